//! Device node lifecycle.
//!
//! Every created Disk and Volume is mirrored by a block device node under
//! the daemon's devnode directory, named by its id. The directory is a
//! derived cache of in-memory state, never authoritative; a node must exist
//! exactly while its owner is between `create()` and `destroy()`, so the
//! node is modeled as a scoped resource that is removed on every exit path.

use std::path::{Path, PathBuf};

use nix::sys::stat::{Mode, SFlag, mknod};
use tracing::warn;

use crate::device::DeviceId;
use crate::error::{Error, Result};

/// A block device node that lives as long as this handle.
#[derive(Debug)]
pub struct DeviceNode {
    path: PathBuf,
}

impl DeviceNode {
    /// Creates the node at `path` for `device`. An existing node at the
    /// same path is reused (the cache directory may survive a restart).
    pub fn create(path: impl Into<PathBuf>, device: DeviceId) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match mknod(&path, SFlag::S_IFBLK, Mode::from_bits_truncate(0o600), device.to_dev()) {
            Ok(()) | Err(nix::errno::Errno::EEXIST) => {}
            Err(source) => return Err(Error::DeviceNode { path, source }),
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the node. Consumes the handle; missing nodes are tolerated
    /// (the cache can be wiped externally at any time).
    pub fn remove(mut self) {
        let path = std::mem::take(&mut self.path);
        std::mem::forget(self);
        remove_at(&path);
    }
}

impl Drop for DeviceNode {
    fn drop(&mut self) {
        remove_at(&self.path);
    }
}

fn remove_at(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove device node {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // mknod needs CAP_MKNOD, so creation is only exercised indirectly; the
    // removal paths work on plain files.

    #[test]
    fn test_remove_tolerates_missing_node() {
        let dir = TempDir::new().unwrap();
        let node = DeviceNode {
            path: dir.path().join("disk:8,0"),
        };
        node.remove();
    }

    #[test]
    fn test_drop_removes_node_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("public:8,1");
        std::fs::write(&path, b"").unwrap();
        {
            let _node = DeviceNode { path: path.clone() };
        }
        assert!(!path.exists());
    }
}
