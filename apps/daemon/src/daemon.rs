//! Daemon loop: JSON requests in, responses and broadcast events out.
//!
//! Each request is handled to completion under the manager's coarse lock
//! before the next line is read; device events and administrative commands
//! share the one serialized stream.

use std::io::{self, BufRead, Write};
use std::sync::Mutex;

use mediad_core::{Broadcaster, DeviceId, ErrorClass, EventCode, VolumeManager};
use tracing::{info, warn};

use crate::protocol::{Command, Event, Request, Response};

/// Broadcasts state-change events as JSON lines on stdout.
pub struct StdoutBroadcaster {
    stdout: Mutex<io::Stdout>,
}

impl StdoutBroadcaster {
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(io::stdout()),
        }
    }
}

impl Default for StdoutBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster for StdoutBroadcaster {
    fn notify(&self, code: EventCode, subject: &str, value: Option<&str>) {
        let event = Event {
            event: code.code(),
            subject: subject.to_string(),
            value: value.map(str::to_string),
        };
        let Ok(json) = serde_json::to_string(&event) else {
            return;
        };
        // Fire-and-forget: a broken pipe must never take the core down.
        let mut stdout = self.stdout.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(stdout, "{json}");
        let _ = stdout.flush();
    }
}

/// Runs the daemon until stdin closes or a shutdown command arrives.
pub fn run(manager: &VolumeManager) -> io::Result<()> {
    let stdin = io::stdin();
    let reader = stdin.lock();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                // Can't respond without an id.
                warn!("failed to parse request: {e}");
                continue;
            }
        };

        let shutdown = matches!(request.cmd, Command::Shutdown);
        let response = handle_request(manager, request);
        write_response(&response)?;
        if shutdown {
            break;
        }
    }

    Ok(())
}

fn write_response(response: &Response) -> io::Result<()> {
    let json = serde_json::to_string(response).map_err(io::Error::other)?;
    let mut stdout = io::stdout();
    writeln!(stdout, "{json}")?;
    stdout.flush()
}

fn handle_request(manager: &VolumeManager, request: Request) -> Response {
    let id = request.id;
    let result = match request.cmd {
        Command::DiskAdded {
            event_path,
            major,
            minor,
        } => manager.handle_device_added(&event_path, DeviceId::new(major, minor)),
        Command::DiskChanged { major, minor } => {
            manager.handle_device_changed(DeviceId::new(major, minor))
        }
        Command::DiskRemoved { major, minor } => {
            manager.handle_device_removed(DeviceId::new(major, minor))
        }
        Command::Mount { volume, flags, user } => manager.mount(&volume, flags, user),
        Command::Unmount { volume } => manager.unmount(&volume),
        Command::Format { volume, fs_type } => manager.format(&volume, &fs_type),
        Command::Reset => manager.reset(),
        Command::Debug { on } => {
            manager.set_debug(on);
            Ok(())
        }
        Command::Shutdown => {
            info!("shutting down on request");
            manager.shutdown()
        }
    };

    match result {
        Ok(()) => Response::ok(id),
        Err(e) => {
            // Soft scan failures degrade the scan but the command itself
            // did its job; observers were already notified.
            if e.class() == ErrorClass::SoftScanFailure {
                warn!("{e}");
                return Response::ok(id);
            }
            Response::fail(id, e.class().as_str(), e.to_string())
        }
    }
}
