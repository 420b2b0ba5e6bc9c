//! The volume manager context.
//!
//! One explicitly constructed [`VolumeManager`] owns the shared disk
//! collection and the single coarse lock serializing every top-level
//! operation: device arrival/removal, mount, unmount, format, reset. At
//! most one such operation runs at a time system-wide; this deliberately
//! trades throughput for the absence of concurrent-mutation and
//! interleaved-mount races. The lifecycle of the manager belongs to the
//! process entry point; there is no hidden global instance.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::config::DiskSource;
use crate::device::{DeviceId, FLAG_ADOPTABLE};
use crate::disk::Disk;
use crate::error::{Result, UnknownVolumeSnafu};
use crate::events::Broadcaster;
use crate::platform::Platform;
use crate::volume::PublicVolume;

struct Inner {
    sources: Vec<DiskSource>,
    disks: Vec<Disk>,
    debug: bool,
}

/// Owner of every managed disk and the lock over them.
pub struct VolumeManager {
    platform: Arc<Platform>,
    broadcaster: Arc<dyn Broadcaster>,
    inner: Mutex<Inner>,
}

impl VolumeManager {
    pub fn new(platform: Arc<Platform>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            platform,
            broadcaster,
            inner: Mutex::new(Inner {
                sources: Vec::new(),
                disks: Vec::new(),
                debug: false,
            }),
        }
    }

    pub fn platform(&self) -> &Arc<Platform> {
        &self.platform
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a source of managed disks. Devices whose event path
    /// matches no source are ignored entirely.
    pub fn add_disk_source(&self, source: DiskSource) {
        self.lock().sources.push(source);
    }

    /// Whether any configured source carries the adoptable flag.
    pub fn has_adoptable(&self) -> bool {
        self.lock()
            .sources
            .iter()
            .any(|source| source.flags & FLAG_ADOPTABLE != 0)
    }

    pub fn set_debug(&self, debug: bool) {
        self.lock().debug = debug;
    }

    pub fn debug(&self) -> bool {
        self.lock().debug
    }

    /// Adopts a newly attached block device if a source claims it.
    ///
    /// At most one disk exists per (major, minor) pair; a stale instance
    /// for the same device is destroyed before the new one is created.
    pub fn handle_device_added(&self, event_path: &str, device: DeviceId) -> Result<()> {
        let mut inner = self.lock();

        let Some(source) = inner
            .sources
            .iter()
            .find(|source| source.matches(event_path))
            .cloned()
        else {
            debug!("no source claims {event_path}; ignoring device {device}");
            return Ok(());
        };

        if let Some(pos) = inner.disks.iter().position(|disk| disk.device() == device) {
            warn!("device {device} already present; replacing stale disk");
            let mut stale = inner.disks.remove(pos);
            if let Err(e) = stale.destroy() {
                warn!("{} failed to destroy: {e}", stale.id());
            }
        }

        let mut disk = Disk::new(
            event_path,
            device,
            &source.nickname,
            source.flags,
            self.platform.clone(),
            self.broadcaster.clone(),
        );
        disk.create()?;
        info!("created {} for {event_path}", disk.id());
        inner.disks.push(disk);
        Ok(())
    }

    /// Handles a media-change event (e.g. disc insertion) by rescanning,
    /// unless the disk still has mounted media.
    pub fn handle_device_changed(&self, device: DeviceId) -> Result<()> {
        let mut inner = self.lock();
        let Some(disk) = inner.disks.iter_mut().find(|disk| disk.device() == device) else {
            debug!("change event for unmanaged device {device}");
            return Ok(());
        };
        if disk.any_volume_mounted() || disk.optical_media_mounted() {
            info!("{} has mounted media; skipping rescan", disk.id());
            return Ok(());
        }
        if let Err(e) = disk.rescan() {
            warn!("{} rescan failed: {e}", disk.id());
        }
        Ok(())
    }

    /// Destroys the disk for a departed device.
    pub fn handle_device_removed(&self, device: DeviceId) -> Result<()> {
        let mut inner = self.lock();
        let Some(pos) = inner.disks.iter().position(|disk| disk.device() == device) else {
            debug!("remove event for unmanaged device {device}");
            return Ok(());
        };
        let mut disk = inner.disks.remove(pos);
        disk.destroy()
    }

    /// Mounts a volume by id, propagating the caller's flags and user.
    pub fn mount(&self, volume_id: &str, flags: u32, user_id: i32) -> Result<()> {
        let mut inner = self.lock();
        let vol = find_volume(&mut inner, volume_id)?;
        vol.set_mount_flags(flags);
        vol.set_mount_user_id(user_id);
        vol.mount()
    }

    pub fn unmount(&self, volume_id: &str) -> Result<()> {
        let mut inner = self.lock();
        find_volume(&mut inner, volume_id)?.unmount()
    }

    /// Formats a volume and flags its disk as just-partitioned, so the next
    /// scan primes the device with a known filesystem.
    pub fn format(&self, volume_id: &str, fstype: &str) -> Result<()> {
        let mut inner = self.lock();
        let Some(disk) = inner.disks.iter_mut().find(|disk| disk.has_volume(volume_id)) else {
            return UnknownVolumeSnafu { id: volume_id }.fail();
        };
        let Some(vol) = disk.find_volume(volume_id) else {
            return UnknownVolumeSnafu { id: volume_id }.fail();
        };
        vol.format(fstype)?;
        disk.set_just_partitioned(true);
        Ok(())
    }

    /// Destroys and re-creates every managed disk.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.lock();
        let devices: Vec<(String, DeviceId, String, u32)> = inner
            .disks
            .iter()
            .map(|disk| {
                (
                    disk.event_path().to_string(),
                    disk.device(),
                    disk.nickname().to_string(),
                    disk.flags(),
                )
            })
            .collect();

        for disk in &mut inner.disks {
            if let Err(e) = disk.destroy() {
                warn!("{} failed to destroy: {e}", disk.id());
            }
        }
        inner.disks.clear();

        for (event_path, device, nickname, flags) in devices {
            let mut disk = Disk::new(
                &event_path,
                device,
                &nickname,
                flags,
                self.platform.clone(),
                self.broadcaster.clone(),
            );
            if let Err(e) = disk.create() {
                warn!("{} failed to create: {e}", disk.id());
            }
            inner.disks.push(disk);
        }
        Ok(())
    }

    /// Unmounts everything and destroys every disk. Used on daemon exit.
    pub fn shutdown(&self) -> Result<()> {
        let mut inner = self.lock();
        for disk in &mut inner.disks {
            disk.unmount_all();
            if let Err(e) = disk.destroy() {
                warn!("{} failed to destroy: {e}", disk.id());
            }
        }
        inner.disks.clear();
        Ok(())
    }

    /// Best-effort unmount of every managed volume.
    pub fn unmount_all(&self) {
        let mut inner = self.lock();
        for disk in &mut inner.disks {
            disk.unmount_all();
        }
    }

    /// Number of managed disks; used by status reporting.
    pub fn disk_count(&self) -> usize {
        self.lock().disks.len()
    }
}

fn find_volume<'a>(inner: &'a mut Inner, id: &str) -> Result<&'a mut PublicVolume> {
    let Some(disk) = inner.disks.iter_mut().find(|disk| disk.has_volume(id)) else {
        return UnknownVolumeSnafu { id }.fail();
    };
    match disk.find_volume(id) {
        Some(vol) => Ok(vol),
        None => UnknownVolumeSnafu { id }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::events::testing::RecordingBroadcaster;
    use crate::events::EventCode;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const EVENT_PATH: &str = "devices/platform/soc/usb/host/block/zzmedia0";

    struct Fixture {
        _dir: TempDir,
        manager: VolumeManager,
        broadcaster: Arc<RecordingBroadcaster>,
    }

    fn write_tool(dir: &std::path::Path, name: &str, script: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fixture(dump: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let sgdisk = write_tool(dir.path(), "sgdisk", &format!("printf '{dump}'"));
        let blkid = write_tool(dir.path(), "blkid", "exit 2");

        let sys_disk = dir.path().join("sys").join(EVENT_PATH);
        fs::create_dir_all(sys_disk.join("device")).unwrap();
        fs::write(sys_disk.join("device/vendor"), "Kingston\n").unwrap();
        fs::create_dir_all(sys_disk.join("zzmedia01")).unwrap();

        let platform = Arc::new(Platform {
            devnode_dir: dir.path().join("nodes"),
            mount_root: dir.path().join("media"),
            sysfs_root: dir.path().join("sys"),
            proc_root: dir.path().join("proc"),
            proc_mounts: dir.path().join("proc/mounts"),
            mmc_max_minors_param: dir.path().join("perdev_minors"),
            sgdisk,
            blkid,
            ..Platform::default()
        });
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        Fixture {
            _dir: dir,
            manager: VolumeManager::new(platform, broadcaster.clone()),
            broadcaster,
        }
    }

    #[test]
    fn test_unclaimed_device_is_ignored() {
        let fx = fixture("DISK mbr\\nPART 1 0b\\n");
        fx.manager
            .handle_device_added(EVENT_PATH, DeviceId::new(8, 0))
            .unwrap();
        assert_eq!(fx.manager.disk_count(), 0);
        assert!(fx.broadcaster.codes().is_empty());
    }

    #[test]
    fn test_claimed_device_is_adopted_and_removed() {
        let fx = fixture("DISK mbr\\nPART 1 0b\\n");
        fx.manager
            .add_disk_source(DiskSource::new("devices/*/block/zzmedia*", "usb_disk", 0));

        fx.manager
            .handle_device_added(EVENT_PATH, DeviceId::new(8, 0))
            .unwrap();
        assert_eq!(fx.manager.disk_count(), 1);
        assert!(fx.broadcaster.codes().contains(&EventCode::DiskCreated));
        assert!(fx.broadcaster.codes().contains(&EventCode::VolumeCreated));

        fx.manager
            .handle_device_removed(DeviceId::new(8, 0))
            .unwrap();
        assert_eq!(fx.manager.disk_count(), 0);
        assert!(fx.broadcaster.codes().contains(&EventCode::DiskDestroyed));
    }

    #[test]
    fn test_duplicate_arrival_replaces_stale_disk() {
        let fx = fixture("DISK mbr\\nPART 1 0b\\n");
        fx.manager
            .add_disk_source(DiskSource::new("devices/*", "usb_disk", 0));

        fx.manager
            .handle_device_added(EVENT_PATH, DeviceId::new(8, 0))
            .unwrap();
        fx.manager
            .handle_device_added(EVENT_PATH, DeviceId::new(8, 0))
            .unwrap();
        // Invariant: at most one Disk per live (major, minor) pair.
        assert_eq!(fx.manager.disk_count(), 1);
    }

    #[test]
    fn test_unknown_volume_operations_fail_invalid_argument() {
        let fx = fixture("");
        for err in [
            fx.manager.mount("public:1,2", 0, -1).unwrap_err(),
            fx.manager.unmount("public:1,2").unwrap_err(),
            fx.manager.format("public:1,2", "vfat").unwrap_err(),
        ] {
            assert_eq!(err.class(), ErrorClass::InvalidArgument);
        }
    }

    #[test]
    fn test_unmount_unmounted_volume_is_state_error() {
        let fx = fixture("DISK mbr\\nPART 1 0b\\n");
        fx.manager
            .add_disk_source(DiskSource::new("devices/*", "usb_disk", 0));
        fx.manager
            .handle_device_added(EVENT_PATH, DeviceId::new(8, 0))
            .unwrap();

        let err = fx.manager.unmount("public:8,1").unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidArgument);
    }

    #[test]
    fn test_has_adoptable() {
        let fx = fixture("");
        assert!(!fx.manager.has_adoptable());
        fx.manager
            .add_disk_source(DiskSource::new("devices/*", "usb", FLAG_ADOPTABLE));
        assert!(fx.manager.has_adoptable());
    }

    #[test]
    fn test_reset_recreates_disks() {
        let fx = fixture("DISK mbr\\nPART 1 0b\\n");
        fx.manager
            .add_disk_source(DiskSource::new("devices/*", "usb_disk", 0));
        fx.manager
            .handle_device_added(EVENT_PATH, DeviceId::new(8, 0))
            .unwrap();

        fx.broadcaster.events.lock().unwrap().clear();
        fx.manager.reset().unwrap();
        assert_eq!(fx.manager.disk_count(), 1);
        let codes = fx.broadcaster.codes();
        assert!(codes.contains(&EventCode::DiskDestroyed));
        assert!(codes.contains(&EventCode::DiskCreated));
    }

    #[test]
    fn test_shutdown_destroys_everything() {
        let fx = fixture("DISK mbr\\nPART 1 0b\\n");
        fx.manager
            .add_disk_source(DiskSource::new("devices/*", "usb_disk", 0));
        fx.manager
            .handle_device_added(EVENT_PATH, DeviceId::new(8, 0))
            .unwrap();

        fx.manager.shutdown().unwrap();
        assert_eq!(fx.manager.disk_count(), 0);
    }
}
