//! exFAT backend.

use std::ffi::OsStr;
use std::path::Path;

use nix::unistd::Pid;

use super::{FsBackend, media_options};
use crate::error::Result;
use crate::executor;

const FSCK_TOOL: &str = "fsck.exfat";
const MOUNT_TOOL: &str = "mount.exfat";

pub struct Exfat;

impl FsBackend for Exfat {
    fn name(&self) -> &'static str {
        "exfat"
    }

    fn check(&self, dev: &Path, _fstype: &str) -> Result<()> {
        executor::run_tolerant(FSCK_TOOL, &[dev.as_os_str()], &[0, 1])
    }

    fn mount(&self, dev: &Path, target: &Path, _fstype: &str) -> Result<Option<Pid>> {
        let data = media_options("");
        executor::run_checked(
            MOUNT_TOOL,
            &[
                OsStr::new("-o"),
                OsStr::new(data.as_str()),
                dev.as_os_str(),
                target.as_os_str(),
            ],
        )?;
        Ok(None)
    }
}
