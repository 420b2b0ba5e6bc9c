//! FAT12/16/32 backend.

use std::ffi::OsStr;
use std::path::Path;

use nix::mount::{MsFlags, mount};
use nix::unistd::Pid;

use super::{FsBackend, media_options};
use crate::error::{MountSnafu, Result};
use crate::executor;
use snafu::ResultExt;

const FSCK_TOOL: &str = "fsck.vfat";
const MKFS_TOOL: &str = "mkfs.vfat";

pub struct Vfat;

impl FsBackend for Vfat {
    fn name(&self) -> &'static str {
        "vfat"
    }

    fn check(&self, dev: &Path, _fstype: &str) -> Result<()> {
        // Exit code 1 means errors were found and corrected.
        executor::run_tolerant(
            FSCK_TOOL,
            &[OsStr::new("-p"), OsStr::new("-f"), dev.as_os_str()],
            &[0, 1],
        )
    }

    fn mount(&self, dev: &Path, target: &Path, _fstype: &str) -> Result<Option<Pid>> {
        let data = media_options("utf8,shortname=mixed");
        mount(
            Some(dev),
            target,
            Some("vfat"),
            MsFlags::MS_NODEV | MsFlags::MS_NOSUID | MsFlags::MS_DIRSYNC | MsFlags::MS_NOATIME,
            Some(data.as_str()),
        )
        .context(MountSnafu { device: dev, path: target })?;
        Ok(None)
    }

    fn format(&self, dev: &Path) -> Result<()> {
        executor::run_checked(
            MKFS_TOOL,
            &[OsStr::new("-F"), OsStr::new("32"), dev.as_os_str()],
        )
    }
}
