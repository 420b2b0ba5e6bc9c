//! ISO9660/UDF backend for optical media. Always mounted read-only.

use std::path::Path;

use nix::mount::{MsFlags, mount};
use nix::unistd::Pid;

use super::{FsBackend, MEDIA_RW_GID, MEDIA_RW_UID};
use crate::error::{MountSnafu, Result};
use snafu::ResultExt;

pub struct Iso9660;

impl FsBackend for Iso9660 {
    fn name(&self) -> &'static str {
        "iso9660"
    }

    fn check(&self, _dev: &Path, _fstype: &str) -> Result<()> {
        // Pressed media cannot be repaired; there is nothing to check.
        Ok(())
    }

    fn mount(&self, dev: &Path, target: &Path, fstype: &str) -> Result<Option<Pid>> {
        let data = format!("uid={MEDIA_RW_UID},gid={MEDIA_RW_GID}");
        mount(
            Some(dev),
            target,
            Some(fstype),
            MsFlags::MS_RDONLY | MsFlags::MS_NODEV | MsFlags::MS_NOSUID,
            Some(data.as_str()),
        )
        .context(MountSnafu { device: dev, path: target })?;
        Ok(None)
    }
}
