//! Unified error types for the mediad-core library.
//!
//! Uses SNAFU for context-rich error handling. Every error maps onto one of
//! the coarse classes in [`ErrorClass`], which is what the administrative
//! command surface reports back to callers.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification reported on the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Unrecognized device class.
    NotSupported,
    /// Syscall, mount, or consistency-check failure.
    IoFailure,
    /// Malformed command arguments or a state-machine violation.
    InvalidArgument,
    /// Stale mount point; retried once before being surfaced.
    Transient,
    /// Partition dump or external tool failed; degrades the scan, never
    /// aborts the process.
    SoftScanFailure,
}

impl ErrorClass {
    /// Stable name used on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::NotSupported => "not_supported",
            ErrorClass::IoFailure => "io_failure",
            ErrorClass::InvalidArgument => "invalid_argument",
            ErrorClass::Transient => "transient",
            ErrorClass::SoftScanFailure => "soft_scan_failure",
        }
    }
}

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Block device major number outside every supported class.
    #[snafu(display("unsupported block device major {major}"))]
    UnsupportedMajor { major: u32 },

    /// Detected filesystem is not on the mount allow-list. Classified as an
    /// I/O failure, not NotSupported: the device is fine, its contents are
    /// not mountable.
    #[snafu(display("{id} has unsupported filesystem '{fstype}'"))]
    UnsupportedFilesystem { id: String, fstype: String },

    /// Filesystem type rejected for a format request.
    #[snafu(display("invalid filesystem type for format: {fstype}"))]
    InvalidFilesystem { fstype: String },

    /// Volume id did not resolve to a managed volume.
    #[snafu(display("unknown volume {id}"))]
    UnknownVolume { id: String },

    /// Operation attempted in a state that does not permit it.
    #[snafu(display("{id} cannot {op} while {state}"))]
    InvalidState {
        id: String,
        op: &'static str,
        state: String,
    },

    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Command executed but returned an unexpected exit code.
    #[snafu(display("command '{command}' exited with code {code}: {stderr}"))]
    CommandExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Partition dump tool failed; the scan degrades to zero volumes.
    #[snafu(display("partition dump of {device} failed: {message}"))]
    PartitionDump { device: String, message: String },

    /// Failed to read a sysfs attribute.
    #[snafu(display("failed to read {}", path.display()))]
    SysfsRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A sysfs attribute held something unparseable.
    #[snafu(display("failed to parse {}: {message}", path.display()))]
    SysfsParse { path: PathBuf, message: String },

    /// Failed to create a block device node.
    #[snafu(display("failed to create device node {}", path.display()))]
    DeviceNode { path: PathBuf, source: nix::Error },

    /// Failed to probe filesystem metadata from a device.
    #[snafu(display("failed to probe {}: {message}", path.display()))]
    Probe { path: PathBuf, message: String },

    /// Mount point directory creation failed.
    #[snafu(display("failed to prepare mount point {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Mount point is a stale transport endpoint and the detach-retry also
    /// failed.
    #[snafu(display("stale mount point {}", path.display()))]
    StaleMountPoint { path: PathBuf },

    /// Refused to mount over an already-active mount point.
    #[snafu(display("{} is already mounted", path.display()))]
    MountPointBusy { path: PathBuf },

    /// Mount syscall failed.
    #[snafu(display("failed to mount {} at {}: {source}", device.display(), path.display()))]
    Mount {
        device: PathBuf,
        path: PathBuf,
        source: nix::Error,
    },

    /// Unmount failed after every escalation step.
    #[snafu(display("failed to unmount {}: {source}", path.display()))]
    Unmount { path: PathBuf, source: nix::Error },

    /// Could not resolve the true logical partition device node.
    #[snafu(display("failed to resolve logical partition device for {id} partition {index}"))]
    PhysicalDevice { id: String, index: u32 },

    /// Managed-source configuration could not be read.
    #[snafu(display("failed to read config at {}", path.display()))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Managed-source configuration line was malformed.
    #[snafu(display("failed to parse config: {message}"))]
    ConfigParse { message: String },
}

impl Error {
    /// Maps this error onto the coarse class reported to callers.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::UnsupportedMajor { .. } => ErrorClass::NotSupported,
            Error::InvalidFilesystem { .. }
            | Error::UnknownVolume { .. }
            | Error::InvalidState { .. }
            | Error::ConfigParse { .. } => ErrorClass::InvalidArgument,
            Error::StaleMountPoint { .. } => ErrorClass::Transient,
            Error::PartitionDump { .. } => ErrorClass::SoftScanFailure,
            _ => ErrorClass::IoFailure,
        }
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for sysfs read errors.
    fn sysfs_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for config read errors.
    fn config_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn sysfs_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(SysfsReadSnafu { path: path.into() })
    }

    fn config_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(ConfigReadSnafu { path: path.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            Error::UnsupportedMajor { major: 42 }.class(),
            ErrorClass::NotSupported
        );
        assert_eq!(
            Error::UnsupportedFilesystem {
                id: "public:8,1".into(),
                fstype: "exotic".into()
            }
            .class(),
            ErrorClass::IoFailure
        );
        assert_eq!(
            Error::UnknownVolume {
                id: "public:8,1".into()
            }
            .class(),
            ErrorClass::InvalidArgument
        );
        assert_eq!(
            Error::StaleMountPoint {
                path: "/mnt/media_rw/x".into()
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(
            Error::PartitionDump {
                device: "/dev/sda".into(),
                message: "exit 1".into()
            }
            .class(),
            ErrorClass::SoftScanFailure
        );
        assert_eq!(
            Error::MountPointBusy {
                path: "/mnt/media_rw/x".into()
            }
            .class(),
            ErrorClass::IoFailure
        );
    }
}
