//! Platform layout: directories, kernel interfaces, and external tools.
//!
//! Everything the core touches outside its own memory is reachable through
//! this struct, so tests can point the whole stack at a scratch directory
//! and fake tools.

use std::path::PathBuf;

/// Filesystem layout and tool locations for one daemon instance.
#[derive(Debug, Clone)]
pub struct Platform {
    /// Directory mirroring created disks/volumes as block device nodes.
    pub devnode_dir: PathBuf,
    /// Root under which volumes are mounted, one directory per volume.
    pub mount_root: PathBuf,
    /// Sysfs root; event paths are relative to this.
    pub sysfs_root: PathBuf,
    /// Procfs root, used for mount-table reads and process scans.
    pub proc_root: PathBuf,
    /// Mount table (normally `<proc_root>/mounts`).
    pub proc_mounts: PathBuf,
    /// MMC per-device minor count module parameter.
    pub mmc_max_minors_param: PathBuf,
    /// Partition dump tool.
    pub sgdisk: PathBuf,
    /// Filesystem metadata probe.
    pub blkid: PathBuf,
    /// Recursive ownership fix-up tool.
    pub chown: PathBuf,
    /// Recursive security relabel tool.
    pub restorecon: PathBuf,
    /// Block discard tool used to wipe before formatting.
    pub blkdiscard: PathBuf,
    /// Whether the process runs inside an emulator; gates the virtio-blk
    /// major heuristic.
    pub is_emulator: bool,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            devnode_dir: PathBuf::from("/dev/block/mediad"),
            mount_root: PathBuf::from("/mnt/media_rw"),
            sysfs_root: PathBuf::from("/sys"),
            proc_root: PathBuf::from("/proc"),
            proc_mounts: PathBuf::from("/proc/mounts"),
            mmc_max_minors_param: PathBuf::from("/sys/module/mmcblk/parameters/perdev_minors"),
            sgdisk: PathBuf::from("sgdisk"),
            blkid: PathBuf::from("blkid"),
            chown: PathBuf::from("chown"),
            restorecon: PathBuf::from("restorecon"),
            blkdiscard: PathBuf::from("blkdiscard"),
            is_emulator: false,
        }
    }
}

impl Platform {
    /// Device node path for an id under the devnode directory.
    pub fn node_path(&self, id: &str) -> PathBuf {
        self.devnode_dir.join(id)
    }

    /// Sysfs path for a kernel event path.
    pub fn sys_path(&self, event_path: &str) -> PathBuf {
        self.sysfs_root.join(event_path.trim_start_matches('/'))
    }
}
