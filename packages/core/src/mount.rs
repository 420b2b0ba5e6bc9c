//! Mount point plumbing shared by the volume lifecycle.
//!
//! Covers the parts of mounting that are policy rather than filesystem
//! specifics: mount-table inspection, mount point directory preparation with
//! stale-endpoint recovery, forced unmount escalation, and terminating
//! processes that hold a mount path open.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::mount::{MntFlags, umount2};
use nix::sys::signal::{Signal, kill};
use nix::unistd::{Gid, Pid, Uid, chown};
use tracing::{info, warn};

use crate::error::{Error, Result, StaleMountPointSnafu};

/// Checks whether `target` appears as an active mount point.
///
/// `proc_mounts` is normally `/proc/mounts`; injectable so scans can be
/// exercised against a fixture.
pub fn is_mountpoint_mounted(proc_mounts: &Path, target: &Path) -> bool {
    let Ok(table) = fs::read_to_string(proc_mounts) else {
        return false;
    };
    let target = target.to_string_lossy();
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mounted| mounted == target)
}

fn prepare_dir(path: &Path, mode: u32, uid: u32, gid: u32) -> io::Result<()> {
    fs::create_dir_all(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(io::Error::from)
}

/// Prepares a mount point directory with fixed ownership and mode.
///
/// A stale, disconnected transport endpoint (ENOTCONN from a dead FUSE
/// bridge) gets one detached unmount and exactly one retry; if the retry
/// also fails the stale mount point is surfaced to the caller.
pub fn prepare_mount_point(path: &Path, mode: u32, uid: u32, gid: u32) -> Result<()> {
    match prepare_dir(path, mode, uid, gid) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(Errno::ENOTCONN as i32) => {
            info!("stale endpoint at {}; detaching and retrying", path.display());
            match umount2(path, MntFlags::MNT_DETACH) {
                Ok(()) | Err(Errno::EINVAL) | Err(Errno::ENOENT) => {}
                Err(e) => {
                    warn!("detach of {} failed: {e}", path.display());
                    return StaleMountPointSnafu { path }.fail();
                }
            }
            prepare_dir(path, mode, uid, gid).map_err(|_| Error::StaleMountPoint {
                path: path.to_path_buf(),
            })
        }
        Err(source) => Err(Error::MountPointCreation {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Sends `signal` to every process holding `prefix` open.
///
/// Scans `proc_root` (normally `/proc`) for processes whose cwd, root, exe,
/// or any open fd resolves under `prefix`. Returns the number of processes
/// signaled. The scan itself never fails; unreadable entries are skipped.
pub fn kill_processes_using_path(proc_root: &Path, prefix: &Path, signal: Signal) -> usize {
    let Ok(entries) = fs::read_dir(proc_root) else {
        return 0;
    };
    let own_pid = std::process::id() as i32;
    let mut count = 0;

    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i32>().ok())
        else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        if process_uses_path(&entry.path(), prefix) {
            info!("sending {signal} to pid {pid} holding {}", prefix.display());
            if kill(Pid::from_raw(pid), signal).is_ok() {
                count += 1;
            }
        }
    }
    count
}

fn link_under(link: &Path, prefix: &Path) -> bool {
    fs::read_link(link).is_ok_and(|target| target.starts_with(prefix))
}

fn process_uses_path(proc_dir: &Path, prefix: &Path) -> bool {
    for name in ["cwd", "root", "exe"] {
        if link_under(&proc_dir.join(name), prefix) {
            return true;
        }
    }
    let Ok(fds) = fs::read_dir(proc_dir.join("fd")) else {
        return false;
    };
    fds.flatten().any(|fd| link_under(&fd.path(), prefix))
}

/// Forcibly unmounts `path`, escalating until something works.
///
/// Plain unmount first; then a SIGTERM pass over holders and a retry; then
/// SIGKILL and a final lazy detach. EINVAL and ENOENT mean there is nothing
/// mounted there, which counts as success.
pub fn force_unmount(proc_root: &Path, path: &Path) -> Result<()> {
    if try_unmount(path, MntFlags::UMOUNT_NOFOLLOW) {
        return Ok(());
    }

    kill_processes_using_path(proc_root, path, Signal::SIGTERM);
    std::thread::sleep(Duration::from_millis(100));
    if try_unmount(path, MntFlags::UMOUNT_NOFOLLOW) {
        return Ok(());
    }

    kill_processes_using_path(proc_root, path, Signal::SIGKILL);
    std::thread::sleep(Duration::from_millis(100));
    umount2(path, MntFlags::MNT_DETACH | MntFlags::UMOUNT_NOFOLLOW).or_else(|e| match e {
        Errno::EINVAL | Errno::ENOENT => Ok(()),
        source => Err(Error::Unmount {
            path: path.to_path_buf(),
            source,
        }),
    })
}

fn try_unmount(path: &Path, flags: MntFlags) -> bool {
    matches!(
        umount2(path, flags),
        Ok(()) | Err(Errno::EINVAL) | Err(Errno::ENOENT)
    )
}

/// Removes a now-unused mount point directory. Best-effort.
pub fn remove_mount_point(path: &Path) {
    if let Err(e) = fs::remove_dir(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("failed to remove mount point {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_is_mountpoint_mounted() {
        let mut table = tempfile::NamedTempFile::new().unwrap();
        writeln!(table, "/dev/sda1 /mnt/media_rw/4E21-0000 vfat rw 0 0").unwrap();
        writeln!(table, "tmpfs /tmp tmpfs rw 0 0").unwrap();
        assert!(is_mountpoint_mounted(
            table.path(),
            Path::new("/mnt/media_rw/4E21-0000")
        ));
        assert!(!is_mountpoint_mounted(
            table.path(),
            Path::new("/mnt/media_rw/other")
        ));
    }

    #[test]
    fn test_is_mountpoint_mounted_missing_table() {
        assert!(!is_mountpoint_mounted(
            Path::new("/nonexistent/mounts"),
            Path::new("/mnt")
        ));
    }

    #[test]
    fn test_prepare_mount_point_creates_dir() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("media");
        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        prepare_mount_point(&target, 0o700, uid, gid).unwrap();
        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_kill_scan_skips_unreadable_proc() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("not-a-pid")).unwrap();
        assert_eq!(
            kill_processes_using_path(dir.path(), Path::new("/mnt/x"), Signal::SIGTERM),
            0
        );
    }

    #[test]
    fn test_remove_mount_point_missing_is_quiet() {
        remove_mount_point(Path::new("/nonexistent/mount/point"));
    }
}
