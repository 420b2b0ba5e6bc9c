//! ext2/ext3/ext4 backend.
//!
//! The ext drivers take no uid/gid/mask mount options, so ownership of the
//! mounted tree is fixed up by the caller after mounting. The consistency
//! check is also deferred: it runs as the first step of the mount call
//! rather than as a separate pass.

use std::ffi::OsStr;
use std::path::Path;

use nix::mount::{MsFlags, mount};
use nix::unistd::Pid;

use super::FsBackend;
use crate::error::{MountSnafu, Result};
use crate::executor;
use snafu::ResultExt;

const FSCK_TOOL: &str = "e2fsck";

pub struct Ext4;

impl FsBackend for Ext4 {
    fn name(&self) -> &'static str {
        "ext4"
    }

    fn check_deferred(&self) -> bool {
        true
    }

    fn check(&self, _dev: &Path, _fstype: &str) -> Result<()> {
        Ok(())
    }

    fn mount(&self, dev: &Path, target: &Path, fstype: &str) -> Result<Option<Pid>> {
        // Exit code 1 means errors were found and corrected.
        executor::run_tolerant(
            FSCK_TOOL,
            &[OsStr::new("-f"), OsStr::new("-p"), dev.as_os_str()],
            &[0, 1],
        )?;
        mount(
            Some(dev),
            target,
            Some(fstype),
            MsFlags::MS_NODEV | MsFlags::MS_NOSUID | MsFlags::MS_NOATIME,
            None::<&str>,
        )
        .context(MountSnafu { device: dev, path: target })?;
        Ok(None)
    }
}
