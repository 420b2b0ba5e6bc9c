//! mediad-core: Core library for the removable-storage volume manager.
//!
//! This library watches block devices come and go, works out what is on
//! them, and drives the mount/unmount lifecycle of the resulting volumes.
//!
//! # Modules
//!
//! - [`classify`]: Device classification by kernel block major
//! - [`partition`]: Partition table dump parsing
//! - [`disk`]: Per-disk discovery and volume orchestration
//! - [`volume`]: Volume lifecycle and mount sequencing
//! - [`fs`]: Filesystem backends (check/mount/format capability table)
//! - [`manager`]: The shared disk collection and its coarse lock
//! - [`config`]: Managed device source configuration
//! - [`events`]: State-change broadcasting
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediad_core::{DeviceId, DiskSource, NullBroadcaster, Platform, VolumeManager};
//!
//! let manager = VolumeManager::new(
//!     Arc::new(Platform::default()),
//!     Arc::new(NullBroadcaster),
//! );
//! manager.add_disk_source(DiskSource::new("devices/*/usb*/block/sd*", "usb_disk", 0));
//!
//! // Device event source reports an arrival:
//! manager
//!     .handle_device_added("devices/pci0000:00/usb1/block/sda", DeviceId::new(8, 0))
//!     .unwrap();
//!
//! // Administrative command stream mounts a discovered volume:
//! if let Err(e) = manager.mount("public:8,1", 0, -1) {
//!     eprintln!("mount failed ({}): {e}", e.class().as_str());
//! }
//! ```

pub mod classify;
pub mod config;
pub mod device;
pub mod devnode;
pub mod disk;
pub mod error;
pub mod events;
pub mod executor;
pub mod fs;
pub mod manager;
pub mod mount;
pub mod partition;
pub mod platform;
pub mod probe;
pub mod sysfs;
pub mod volume;

// Re-export commonly used types
pub use config::DiskSource;
pub use device::DeviceId;
pub use disk::Disk;
pub use error::{Error, ErrorClass, Result};
pub use events::{Broadcaster, EventCode, NullBroadcaster};
pub use manager::VolumeManager;
pub use platform::Platform;
pub use volume::{PublicVolume, VolumeState};
