//! Disk discovery and partition orchestration.
//!
//! A [`Disk`] owns one block device: it classifies it, reads its size and
//! label, runs the external partition dump, and instantiates one volume per
//! qualifying partition. Volumes are owned exclusively; they are destroyed,
//! in creation order, before the disk itself goes away.

use std::ffi::OsStr;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classify::{self, DeviceClass};
use crate::device::DeviceId;
use crate::devnode::DeviceNode;
use crate::error::{InvalidStateSnafu, PartitionDumpSnafu, Result};
use crate::events::{Broadcaster, EventCode};
use crate::executor;
use crate::mount::is_mountpoint_mounted;
use crate::partition;
use crate::platform::Platform;
use crate::probe;
use crate::sysfs;
use crate::volume::PublicVolume;

nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// One attached block device and its discovered volumes.
pub struct Disk {
    id: String,
    device: DeviceId,
    event_path: String,
    sys_path: PathBuf,
    dev_path: PathBuf,
    nickname: String,
    flags: u32,
    /// Raw byte size; -1 when the size query failed.
    size: i64,
    label: String,
    /// Optical / virtual-CD media, which has no partition concept.
    optical: bool,
    created: bool,
    just_partitioned: bool,
    volumes: Vec<PublicVolume>,
    node: Option<DeviceNode>,
    platform: Arc<Platform>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl Disk {
    pub fn new(
        event_path: &str,
        device: DeviceId,
        nickname: &str,
        flags: u32,
        platform: Arc<Platform>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let id = format!("disk:{device}");
        let sys_path = platform.sys_path(event_path);
        let dev_path = platform.node_path(&id);
        Self {
            id,
            device,
            event_path: event_path.to_string(),
            sys_path,
            dev_path,
            nickname: nickname.to_string(),
            flags,
            size: -1,
            label: String::new(),
            optical: nickname.starts_with("sr"),
            created: false,
            just_partitioned: false,
            volumes: Vec::new(),
            node: None,
            platform,
            broadcaster,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn event_path(&self) -> &str {
        &self.event_path
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn volumes(&self) -> &[PublicVolume] {
        &self.volumes
    }

    pub fn has_volume(&self, id: &str) -> bool {
        self.volumes.iter().any(|vol| vol.id() == id)
    }

    pub fn find_volume(&mut self, id: &str) -> Option<&mut PublicVolume> {
        self.volumes.iter_mut().find(|vol| vol.id() == id)
    }

    /// Flags the next scan as running against a freshly partitioned device,
    /// which primes its first volume with a known filesystem.
    pub fn set_just_partitioned(&mut self, just_partitioned: bool) {
        self.just_partitioned = just_partitioned;
    }

    /// Whether any owned volume is mounted optical media.
    pub fn optical_media_mounted(&self) -> bool {
        self.volumes.iter().any(|vol| vol.optical_media_mounted())
    }

    fn notify(&self, code: EventCode, value: Option<&str>) {
        self.broadcaster.notify(code, &self.id, value);
    }

    /// Brings the disk up: allocates its device node, reads metadata, and
    /// scans partitions. Optical media skip the scan; they are ready for
    /// mount commands as-is. Valid exactly once per lifecycle.
    pub fn create(&mut self) -> Result<()> {
        if self.created {
            tracing::error!("create() on an already-created disk {}", self.id);
            return InvalidStateSnafu {
                id: self.id.clone(),
                op: "create",
                state: "created",
            }
            .fail();
        }
        self.created = true;

        match DeviceNode::create(&self.dev_path, self.device) {
            Ok(node) => self.node = Some(node),
            Err(e) => warn!("{}: {e}", self.id),
        }
        self.notify(EventCode::DiskCreated, Some(&self.flags.to_string()));

        if !self.optical {
            if let Err(e) = self.read_metadata() {
                warn!("{} metadata read failed: {e}", self.id);
            }
            if let Err(e) = self.read_partitions() {
                warn!("{} partition read failed: {e}", self.id);
            }
        }
        Ok(())
    }

    /// Tears down every owned volume in creation order, then the disk
    /// itself. The device node is released on every exit path; the disk can
    /// be created again afterwards.
    pub fn destroy(&mut self) -> Result<()> {
        if !self.created {
            tracing::error!("destroy() on a disk that is not created: {}", self.id);
            return InvalidStateSnafu {
                id: self.id.clone(),
                op: "destroy",
                state: "destroyed",
            }
            .fail();
        }

        self.destroy_all_volumes();
        self.notify(EventCode::DiskDestroyed, None);
        self.created = false;
        if let Some(node) = self.node.take() {
            node.remove();
        }
        Ok(())
    }

    /// Best-effort unmount of every owned volume, in creation order.
    pub fn unmount_all(&mut self) {
        for vol in &mut self.volumes {
            if vol.is_mounted() {
                if let Err(e) = vol.unmount() {
                    warn!("{} failed to unmount: {e}", vol.id());
                }
            }
        }
    }

    fn destroy_all_volumes(&mut self) {
        for vol in &mut self.volumes {
            if let Err(e) = vol.destroy() {
                warn!("{} failed to destroy: {e}", vol.id());
            }
        }
        self.volumes.clear();
    }

    fn read_metadata(&mut self) -> Result<()> {
        self.size = -1;
        self.label.clear();

        self.size = read_device_size(&self.dev_path).unwrap_or(-1);

        let class = classify::classify(self.device.major, self.platform.is_emulator)?;
        self.label = match class {
            DeviceClass::Optical | DeviceClass::Scsi => sysfs::scsi_vendor(&self.sys_path)?,
            DeviceClass::Mmc => sysfs::mmc_label(&self.sys_path)?,
            DeviceClass::Virtio => "Virtual".to_string(),
        };

        self.notify(EventCode::DiskSizeChanged, Some(&self.size.to_string()));
        self.notify(EventCode::DiskLabelChanged, Some(&self.label.clone()));
        self.notify(
            EventCode::DiskSysPathChanged,
            Some(&self.sys_path.display().to_string()),
        );
        Ok(())
    }

    /// Re-runs the partition scan, e.g. after media insertion or an
    /// external repartition. For optical disks this is what publishes the
    /// whole-device volume.
    pub fn rescan(&mut self) -> Result<()> {
        self.read_partitions()
    }

    fn read_partitions(&mut self) -> Result<()> {
        if self.optical {
            // No partition concept; the entire disk is the medium.
            info!("{} publishing entire optical disk as one volume", self.id);
            self.destroy_all_volumes();
            self.create_volume(self.device, None);
            return Ok(());
        }

        let max_minors = classify::max_minors(
            self.device.major,
            self.platform.is_emulator,
            &self.platform.mmc_max_minors_param,
        )?;

        self.destroy_all_volumes();

        let lines = match executor::run_for_lines(
            &self.platform.sgdisk,
            &[OsStr::new("--android-dump"), self.dev_path.as_os_str()],
        ) {
            Ok(lines) => lines,
            Err(e) => {
                // Soft failure: observers still get the scanned event and
                // the disk degrades to zero volumes.
                warn!("partition dump failed to scan {}: {e}", self.dev_path.display());
                self.notify(EventCode::DiskScanned, None);
                self.just_partitioned = false;
                return PartitionDumpSnafu {
                    device: self.dev_path.display().to_string(),
                    message: e.to_string(),
                }
                .fail();
            }
        };

        let table = partition::parse(lines.iter().map(String::as_str), max_minors);

        if table.is_unknown() {
            self.try_entire_device();
        } else if let Some(name) = sysfs::just_physical_device(&self.sys_path) {
            // Composite device: the kernel already exposes one physical
            // node without sub-minor partitions.
            self.create_physical_volume(&name);
        } else {
            for record in table.records.iter().filter(|r| r.publishes_volume()) {
                let mut part_dev = self.device.partition(record.index);
                // The minor-offset scheme only holds through partition 15.
                if let Some(resolved) =
                    sysfs::physical_partition_device(&self.sys_path, record.index)
                {
                    part_dev = resolved;
                }
                self.create_volume(part_dev, Some(record.index));
            }
        }

        self.notify(EventCode::DiskScanned, None);
        self.just_partitioned = false;
        Ok(())
    }

    /// Last-ditch superfloppy fallback: no valid partition table, so try
    /// the whole device as one filesystem.
    fn try_entire_device(&mut self) {
        warn!("{} has unknown partition table; trying entire device", self.id);
        if probe::read_metadata(&self.platform.blkid, &self.dev_path).is_err() {
            warn!("{} failed to identify, giving up", self.id);
            return;
        }
        if let Some(name) = sysfs::just_physical_device(&self.sys_path) {
            self.create_physical_volume(&name);
        } else {
            self.create_volume(self.device, None);
        }
    }

    fn create_volume(&mut self, device: DeviceId, partition_index: Option<u32>) {
        let vol = PublicVolume::new(
            device,
            partition_index,
            self.platform.clone(),
            self.broadcaster.clone(),
        );
        self.adopt_volume(vol);
    }

    fn create_physical_volume(&mut self, name: &str) {
        let vol =
            PublicVolume::with_physical(name, self.platform.clone(), self.broadcaster.clone());
        self.adopt_volume(vol);
    }

    fn adopt_volume(&mut self, mut vol: PublicVolume) {
        vol.set_disk_id(&self.id);
        vol.set_sys_path(&self.sys_path);

        // A freshly partitioned device carries no filesystem yet; prime its
        // first volume with one before anything is exposed to users.
        if self.just_partitioned && self.volumes.is_empty() {
            debug!("{} just partitioned; silently formatting", self.id);
            vol.set_silent(true);
            if let Err(e) = vol.create() {
                warn!("{} failed to create: {e}", vol.id());
            }
            if let Err(e) = vol.format("auto") {
                warn!("{} failed to format: {e}", vol.id());
            }
            if let Err(e) = vol.destroy() {
                warn!("{} failed to destroy: {e}", vol.id());
            }
            vol.set_silent(false);
        }

        if let Err(e) = vol.create() {
            warn!("{} failed to create: {e}", vol.id());
        }
        self.volumes.push(vol);
    }

    /// Whether any owned volume's mount path is currently active. Used to
    /// refuse re-scans that would yank mounted media.
    pub fn any_volume_mounted(&self) -> bool {
        self.volumes.iter().any(|vol| {
            vol.raw_path()
                .is_some_and(|path| is_mountpoint_mounted(&self.platform.proc_mounts, path))
        })
    }
}

/// BLKGETSIZE64 against the device node. `None` when the node cannot be
/// opened or the ioctl fails; an unknown size is not an error.
fn read_device_size(dev_path: &std::path::Path) -> Option<i64> {
    let file = File::open(dev_path).ok()?;
    let mut size: u64 = 0;
    // Safety: BLKGETSIZE64 writes a u64 through the pointer.
    unsafe { blkgetsize64(file.as_raw_fd(), &mut size) }.ok()?;
    Some(size as i64)
}

impl std::fmt::Debug for Disk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disk")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("label", &self.label)
            .field("volumes", &self.volumes.len())
            .finish_non_exhaustive()
    }
}
