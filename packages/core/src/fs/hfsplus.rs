//! HFS+ backend.

use std::ffi::OsStr;
use std::path::Path;

use nix::mount::{MsFlags, mount};
use nix::unistd::Pid;

use super::{FsBackend, MEDIA_PERM_MASK, MEDIA_RW_GID, MEDIA_RW_UID};
use crate::error::{MountSnafu, Result};
use crate::executor;
use snafu::ResultExt;

const FSCK_TOOL: &str = "fsck.hfsplus";

pub struct Hfsplus;

impl FsBackend for Hfsplus {
    fn name(&self) -> &'static str {
        "hfs"
    }

    fn check(&self, dev: &Path, _fstype: &str) -> Result<()> {
        executor::run_checked(FSCK_TOOL, &[OsStr::new("-q"), dev.as_os_str()])
    }

    fn mount(&self, dev: &Path, target: &Path, _fstype: &str) -> Result<Option<Pid>> {
        let data = format!("uid={MEDIA_RW_UID},gid={MEDIA_RW_GID},umask={MEDIA_PERM_MASK:o}");
        mount(
            Some(dev),
            target,
            Some("hfsplus"),
            MsFlags::MS_NODEV | MsFlags::MS_NOSUID | MsFlags::MS_NOATIME,
            Some(data.as_str()),
        )
        .context(MountSnafu { device: dev, path: target })?;
        Ok(None)
    }
}
