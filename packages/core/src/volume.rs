//! Volume lifecycle and mount orchestration.
//!
//! A [`PublicVolume`] is one mountable unit: a partition, or a whole device
//! when no partition table exists. It owns the sequencing policy around the
//! filesystem backends: metadata probing, consistency checks, mount point
//! preparation with stale-endpoint recovery, ownership fix-up, and the
//! best-effort unmount teardown.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::classify::MAJOR_BLOCK_SR;
use crate::device::DeviceId;
use crate::devnode::DeviceNode;
use crate::error::{
    InvalidFilesystemSnafu, InvalidStateSnafu, MountPointBusySnafu, PhysicalDeviceSnafu, Result,
    UnsupportedFilesystemSnafu,
};
use crate::events::{Broadcaster, EventCode};
use crate::executor;
use crate::fs::{self, FsBackend, MEDIA_RW_GID, MEDIA_RW_UID};
use crate::mount;
use crate::platform::Platform;
use crate::probe;
use crate::sysfs;

/// Volume states, broadcast numerically on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VolumeState {
    Unmounted = 0,
    Checking = 1,
    Mounted = 2,
    Formatting = 4,
    Ejecting = 5,
    Removed = 7,
}

impl VolumeState {
    pub fn code(self) -> u32 {
        self as u32
    }

    fn name(self) -> &'static str {
        match self {
            VolumeState::Unmounted => "unmounted",
            VolumeState::Checking => "checking",
            VolumeState::Mounted => "mounted",
            VolumeState::Formatting => "formatting",
            VolumeState::Ejecting => "ejecting",
            VolumeState::Removed => "removed",
        }
    }
}

/// One managed volume.
pub struct PublicVolume {
    id: String,
    disk_id: String,
    device: Option<DeviceId>,
    dev_path: PathBuf,
    sys_path: PathBuf,
    /// 1-based partition index on the parent disk; `None` for whole-device
    /// and just-physical volumes.
    partition_index: Option<u32>,
    just_physical: bool,
    optical: bool,
    state: VolumeState,
    created: bool,
    silent: bool,
    mount_flags: u32,
    mount_user_id: i32,
    fs_type: String,
    fs_uuid: String,
    fs_label: String,
    raw_path: Option<PathBuf>,
    helper: Option<Pid>,
    optical_mounted: bool,
    node: Option<DeviceNode>,
    platform: Arc<Platform>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl PublicVolume {
    /// Volume backed by a (possibly synthesized) partition device id.
    pub fn new(
        device: DeviceId,
        partition_index: Option<u32>,
        platform: Arc<Platform>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let id = format!("public:{device}");
        let dev_path = platform.node_path(&id);
        Self {
            id,
            disk_id: String::new(),
            device: Some(device),
            dev_path,
            sys_path: PathBuf::new(),
            partition_index,
            just_physical: false,
            optical: device.major == MAJOR_BLOCK_SR,
            state: VolumeState::Unmounted,
            created: false,
            silent: false,
            mount_flags: 0,
            mount_user_id: -1,
            fs_type: String::new(),
            fs_uuid: String::new(),
            fs_label: String::new(),
            raw_path: None,
            helper: None,
            optical_mounted: false,
            node: None,
            platform,
            broadcaster,
        }
    }

    /// Volume for a composite device whose kernel node is already the
    /// addressable physical unit; no device node is synthesized for it.
    pub fn with_physical(
        name: &str,
        platform: Arc<Platform>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let mut vol = Self::new(DeviceId::new(0, 0), None, platform, broadcaster);
        vol.id = name.to_string();
        vol.dev_path = Path::new("/dev").join(name);
        vol.device = None;
        vol.optical = false;
        vol.just_physical = true;
        vol
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> VolumeState {
        self.state
    }

    pub fn fs_type(&self) -> &str {
        &self.fs_type
    }

    pub fn fs_uuid(&self) -> &str {
        &self.fs_uuid
    }

    pub fn raw_path(&self) -> Option<&Path> {
        self.raw_path.as_deref()
    }

    pub fn is_mounted(&self) -> bool {
        self.state == VolumeState::Mounted
    }

    /// Whether this volume is mounted optical media.
    pub fn optical_media_mounted(&self) -> bool {
        self.optical_mounted
    }

    pub fn set_disk_id(&mut self, disk_id: &str) {
        self.disk_id = disk_id.to_string();
    }

    pub fn set_sys_path(&mut self, sys_path: &Path) {
        self.sys_path = sys_path.to_path_buf();
    }

    /// Silent volumes emit no broadcasts; used while priming a freshly
    /// partitioned disk before it is exposed to users.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    pub fn set_mount_flags(&mut self, flags: u32) {
        self.mount_flags = flags;
    }

    pub fn mount_flags(&self) -> u32 {
        self.mount_flags
    }

    pub fn set_mount_user_id(&mut self, user_id: i32) {
        self.mount_user_id = user_id;
    }

    pub fn mount_user_id(&self) -> i32 {
        self.mount_user_id
    }

    /// Whether this volume publishes a composite device's own kernel node.
    pub fn is_just_physical(&self) -> bool {
        self.just_physical
    }

    fn notify(&self, code: EventCode, value: Option<&str>) {
        if !self.silent {
            self.broadcaster.notify(code, &self.id, value);
        }
    }

    fn set_state(&mut self, state: VolumeState) {
        self.state = state;
        let code = state.code().to_string();
        self.notify(EventCode::VolumeStateChanged, Some(&code));
    }

    /// Brings the volume into existence: allocates its device node and
    /// announces it. Valid exactly once per lifecycle.
    pub fn create(&mut self) -> Result<()> {
        if self.created {
            tracing::error!("create() on an already-created volume {}", self.id);
            return InvalidStateSnafu {
                id: self.id.clone(),
                op: "create",
                state: "created",
            }
            .fail();
        }
        self.created = true;

        if let Some(device) = self.device {
            match DeviceNode::create(&self.dev_path, device) {
                Ok(node) => self.node = Some(node),
                Err(e) => warn!("{}: {e}", self.id),
            }
        }

        self.notify(EventCode::VolumeCreated, Some(&self.disk_id.clone()));
        self.set_state(VolumeState::Unmounted);
        Ok(())
    }

    /// Tears the volume down, unmounting first if needed, and releases the
    /// device node. Safe to call mid-failure; the node goes away on every
    /// exit path.
    pub fn destroy(&mut self) -> Result<()> {
        if !self.created {
            tracing::error!("destroy() on a volume that is not created: {}", self.id);
            return InvalidStateSnafu {
                id: self.id.clone(),
                op: "destroy",
                state: "destroyed",
            }
            .fail();
        }

        if self.is_mounted() {
            if let Err(e) = self.unmount() {
                warn!("{} failed to unmount during destroy: {e}", self.id);
            }
        }

        self.set_state(VolumeState::Removed);
        self.notify(EventCode::VolumeDestroyed, None);
        self.created = false;
        self.state = VolumeState::Unmounted;
        if let Some(node) = self.node.take() {
            node.remove();
        }
        Ok(())
    }

    pub fn mount(&mut self) -> Result<()> {
        if !self.created || self.state != VolumeState::Unmounted {
            return InvalidStateSnafu {
                id: self.id.clone(),
                op: "mount",
                state: self.state.name(),
            }
            .fail();
        }

        self.set_state(VolumeState::Checking);
        match self.do_mount() {
            Ok(()) => {
                self.set_state(VolumeState::Mounted);
                Ok(())
            }
            Err(e) => {
                self.set_state(VolumeState::Unmounted);
                Err(e)
            }
        }
    }

    pub fn unmount(&mut self) -> Result<()> {
        if self.state != VolumeState::Mounted {
            return InvalidStateSnafu {
                id: self.id.clone(),
                op: "unmount",
                state: self.state.name(),
            }
            .fail();
        }

        self.set_state(VolumeState::Ejecting);
        self.do_unmount();
        self.set_state(VolumeState::Unmounted);
        Ok(())
    }

    pub fn format(&mut self, fstype: &str) -> Result<()> {
        if !self.created || self.state != VolumeState::Unmounted {
            return InvalidStateSnafu {
                id: self.id.clone(),
                op: "format",
                state: self.state.name(),
            }
            .fail();
        }

        self.set_state(VolumeState::Formatting);
        let res = self.do_format(fstype);
        self.set_state(VolumeState::Unmounted);
        res
    }

    /// Re-reads filesystem identity from the device.
    ///
    /// An empty UUID is substituted with a stable placeholder: downstream
    /// UI consumers crash on a genuinely empty UUID, so this is mandatory.
    fn read_fs_metadata(&mut self) {
        match probe::read_metadata(&self.platform.blkid, &self.dev_path) {
            Ok(md) => {
                self.fs_type = md.fstype;
                self.fs_uuid = md.uuid;
                self.fs_label = md.label;
            }
            Err(e) => {
                debug!("{} metadata probe failed: {e}", self.id);
                self.fs_type.clear();
                self.fs_uuid.clear();
                self.fs_label.clear();
            }
        }

        self.notify(EventCode::VolumeFsTypeChanged, Some(&self.fs_type.clone()));
        if self.fs_uuid.is_empty() {
            self.fs_uuid = if self.optical { "sr0" } else { "fakeUuid" }.to_string();
        }
        self.notify(EventCode::VolumeFsUuidChanged, Some(&self.fs_uuid.clone()));
        self.notify(EventCode::VolumeFsLabelChanged, Some(&self.fs_label.clone()));
    }

    fn do_mount(&mut self) -> Result<()> {
        self.read_fs_metadata();

        let fstype = self.fs_type.clone();
        let Some(backend) = fs::backend_for(&fstype) else {
            warn!("{} unsupported filesystem '{fstype}'", self.id);
            return UnsupportedFilesystemSnafu {
                id: self.id.clone(),
                fstype,
            }
            .fail();
        };

        // Use the UUID as a stable mount name when available.
        let stable = if self.fs_uuid.is_empty() {
            self.id.clone()
        } else {
            self.fs_uuid.clone()
        };
        let raw_path = self.platform.mount_root.join(&stable);

        if mount::is_mountpoint_mounted(&self.platform.proc_mounts, &raw_path) {
            warn!("{} is already mounted", raw_path.display());
            return MountPointBusySnafu { path: raw_path }.fail();
        }

        self.raw_path = Some(raw_path.clone());
        let shown = raw_path.display().to_string();
        self.notify(EventCode::VolumeInternalPathChanged, Some(&shown));
        self.notify(EventCode::VolumePathChanged, Some(&shown));

        if !backend.check_deferred() {
            backend.check(&self.dev_path, &fstype)?;
        }

        mount::prepare_mount_point(&raw_path, 0o700, 0, 0)?;

        let mount_dev = self.mount_device(backend)?;
        self.helper = backend.mount(&mount_dev, &raw_path, &fstype)?;
        info!("{} mounted {} as {fstype}", self.id, mount_dev.display());

        if fstype.starts_with("ext") {
            self.fix_ownership(&raw_path);
        }
        if fstype == "iso9660" || fstype == "udf" {
            self.optical_mounted = true;
        }

        Ok(())
    }

    /// Device node handed to the backend's mount call.
    ///
    /// The ntfs and exfat helpers cannot use the synthesized minor-offset
    /// node; for partition volumes the true logical partition device is
    /// resolved through sysfs, and failing to resolve it fails the mount.
    fn mount_device(&self, backend: &dyn FsBackend) -> Result<PathBuf> {
        if !matches!(backend.name(), "ntfs" | "exfat") {
            return Ok(self.dev_path.clone());
        }
        let Some(index) = self.partition_index else {
            return Ok(self.dev_path.clone());
        };
        let name = sysfs::block_device_name(&self.sys_path).ok_or_else(|| {
            PhysicalDeviceSnafu {
                id: self.id.clone(),
                index,
            }
            .build()
        })?;
        let node = sysfs::logical_partition_path(&name, index);
        if node.exists() {
            Ok(node)
        } else {
            PhysicalDeviceSnafu {
                id: self.id.clone(),
                index,
            }
            .fail()
        }
    }

    /// The ext drivers accept no ownership mount options, so the mounted
    /// tree is fixed up afterwards. Failures leave the volume mounted with
    /// degraded permissions; they are never rolled back.
    fn fix_ownership(&self, raw_path: &Path) {
        let owner = format!("{MEDIA_RW_UID}:{MEDIA_RW_GID}");
        if let Err(e) = executor::run_checked(
            &self.platform.chown,
            &[
                std::ffi::OsStr::new("-R"),
                std::ffi::OsStr::new(&owner),
                raw_path.as_os_str(),
            ],
        ) {
            warn!("{} ownership fix-up failed: {e}", self.id);
            return;
        }
        if let Err(e) = executor::run_checked(
            &self.platform.restorecon,
            &[std::ffi::OsStr::new("-R"), raw_path.as_os_str()],
        ) {
            warn!("{} relabel failed: {e}", self.id);
        }
    }

    fn do_unmount(&mut self) {
        if let Some(raw_path) = self.raw_path.take() {
            // Unmount before killing the FUSE bridge: killed first, clients
            // observe ENOTCONN instead of a clean disconnect.
            mount::kill_processes_using_path(&self.platform.proc_root, &raw_path, Signal::SIGKILL);
            if let Err(e) = mount::force_unmount(&self.platform.proc_root, &raw_path) {
                warn!("{}: {e}", self.id);
            }
            self.reap_helper();
            mount::remove_mount_point(&raw_path);
        } else {
            self.reap_helper();
        }
        self.optical_mounted = false;
    }

    fn reap_helper(&mut self) {
        let Some(pid) = self.helper.take() else {
            return;
        };
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            if e != Errno::ESRCH {
                warn!("{} failed to signal helper {pid}: {e}", self.id);
            }
        }
        loop {
            match waitpid(pid, None) {
                Err(Errno::EINTR) => continue,
                // ECHILD: the helper reparented or was already reaped.
                _ => break,
            }
        }
    }

    fn do_format(&mut self, fstype: &str) -> Result<()> {
        if fstype != "vfat" && fstype != "auto" {
            return InvalidFilesystemSnafu {
                fstype: fstype.to_string(),
            }
            .fail();
        }
        if let Err(e) =
            executor::run_checked(&self.platform.blkdiscard, &[self.dev_path.as_os_str()])
        {
            warn!("{} failed to wipe before format: {e}", self.id);
        }
        fs::vfat::Vfat.format(&self.dev_path)
    }
}

impl std::fmt::Debug for PublicVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicVolume")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("fs_type", &self.fs_type)
            .field("dev_path", &self.dev_path)
            .finish_non_exhaustive()
    }
}
