//! NTFS backend, bridged through the ntfs-3g FUSE helper.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Stdio};

use nix::unistd::Pid;

use super::{FsBackend, media_options};
use crate::error::{IoResultExt, Result};
use crate::executor;

const FIX_TOOL: &str = "ntfsfix";
const MOUNT_TOOL: &str = "ntfs-3g";

pub struct Ntfs;

impl FsBackend for Ntfs {
    fn name(&self) -> &'static str {
        "ntfs"
    }

    fn check(&self, dev: &Path, _fstype: &str) -> Result<()> {
        // Probe-only run; mounting a dirty volume read-write corrupts it.
        executor::run_checked(FIX_TOOL, &[OsStr::new("-n"), dev.as_os_str()])
    }

    fn mount(&self, dev: &Path, target: &Path, _fstype: &str) -> Result<Option<Pid>> {
        let data = media_options("big_writes");
        let child = Command::new(MOUNT_TOOL)
            .arg(dev)
            .arg(target)
            .arg("-o")
            .arg(&data)
            .stdin(Stdio::null())
            .spawn()
            .command_context(MOUNT_TOOL)?;
        // The helper stays alive as the FUSE bridge; the volume owns it
        // until unmount.
        Ok(Some(Pid::from_raw(child.id() as i32)))
    }
}
