//! Filesystem backends.
//!
//! One backend per supported filesystem, each wrapping its external check,
//! mount, and format capability behind the [`FsBackend`] contract. The
//! backend is selected once at filesystem-detection time from the fixed
//! registry in [`backend_for`]; the set is closed on purpose.

pub mod exfat;
pub mod ext4;
pub mod hfsplus;
pub mod iso9660;
pub mod ntfs;
pub mod vfat;

use std::path::Path;

use nix::unistd::Pid;

use crate::error::{InvalidFilesystemSnafu, Result};

/// Fixed owner for mounted removable media.
pub const MEDIA_RW_UID: u32 = 1023;
pub const MEDIA_RW_GID: u32 = 1023;
/// Fixed permission mask applied to mounted trees.
pub const MEDIA_PERM_MASK: u32 = 0o007;

/// Capability contract of one filesystem backend.
///
/// Every call is an opaque, possibly slow, synchronous operation with a
/// plain success/failure result; the caller holds the manager lock for the
/// duration.
pub trait FsBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the consistency check runs as part of [`FsBackend::mount`]
    /// instead of as a separate step.
    fn check_deferred(&self) -> bool {
        false
    }

    /// Runs the filesystem consistency check against `dev`.
    fn check(&self, dev: &Path, fstype: &str) -> Result<()>;

    /// Mounts `dev` at `target` with the fixed media ownership policy.
    ///
    /// Backends bridged through a userspace helper return the helper's pid;
    /// the volume owns that process until unmount.
    fn mount(&self, dev: &Path, target: &Path, fstype: &str) -> Result<Option<Pid>>;

    /// Formats `dev`. Most filesystems cannot be created by this daemon.
    fn format(&self, _dev: &Path) -> Result<()> {
        InvalidFilesystemSnafu { fstype: self.name() }.fail()
    }
}

/// Selects the backend for a detected filesystem type.
///
/// The allow-list is fixed: vfat, ntfs, exfat, the `ext*` family, hfs,
/// iso9660, and udf. Anything else has no backend and cannot be mounted.
pub fn backend_for(fstype: &str) -> Option<&'static dyn FsBackend> {
    match fstype {
        "vfat" => Some(&vfat::Vfat),
        "ntfs" => Some(&ntfs::Ntfs),
        "exfat" => Some(&exfat::Exfat),
        "hfs" => Some(&hfsplus::Hfsplus),
        "iso9660" | "udf" => Some(&iso9660::Iso9660),
        ext if ext.starts_with("ext") => Some(&ext4::Ext4),
        _ => None,
    }
}

/// Standard mount-option string carrying the media ownership policy.
pub(crate) fn media_options(extra: &str) -> String {
    let base = format!(
        "uid={MEDIA_RW_UID},gid={MEDIA_RW_GID},fmask={MEDIA_PERM_MASK:o},dmask={MEDIA_PERM_MASK:o}"
    );
    if extra.is_empty() {
        base
    } else {
        format!("{base},{extra}")
    }
}
