//! Administrative channel protocol types.
//!
//! The daemon speaks JSON lines over stdin/stdout: requests carry an id and
//! a command, every request gets exactly one response, and broadcast events
//! are interleaved on stdout as they happen. This transport is bootstrap
//! plumbing; the command set itself is the stable surface.

use serde::{Deserialize, Serialize};

fn default_user() -> i32 {
    -1
}

/// Commands accepted on the administrative channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// A block device appeared.
    DiskAdded {
        event_path: String,
        major: u32,
        minor: u32,
    },
    /// Media changed on an existing device (e.g. disc inserted).
    DiskChanged { major: u32, minor: u32 },
    /// A block device went away.
    DiskRemoved { major: u32, minor: u32 },
    /// Mount a volume.
    Mount {
        volume: String,
        #[serde(default)]
        flags: u32,
        #[serde(default = "default_user")]
        user: i32,
    },
    /// Unmount a volume.
    Unmount { volume: String },
    /// Format a volume.
    Format { volume: String, fs_type: String },
    /// Destroy and re-create every managed disk.
    Reset,
    /// Toggle debug logging.
    Debug { on: bool },
    /// Tear everything down and exit.
    Shutdown,
}

/// One request line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub cmd: Command,
}

/// One response line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub success: bool,
    /// Error class name when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
    /// Best-effort error message when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn ok(id: u64) -> Self {
        Self {
            id,
            success: true,
            error_class: None,
            message: None,
        }
    }

    pub fn fail(id: u64, class: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            error_class: Some(class.to_string()),
            message: Some(message.into()),
        }
    }
}

/// One broadcast event line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event: u32,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}
