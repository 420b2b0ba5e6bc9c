//! State-change broadcast events.
//!
//! The core fires events at observers through the [`Broadcaster`]
//! capability; the transport (socket, stdout, test recorder) is supplied by
//! the embedding process. Broadcasts are fire-and-forget, no acknowledgment
//! is ever awaited.

/// Numeric broadcast codes, grouped by subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EventCode {
    DiskCreated = 640,
    DiskSizeChanged = 641,
    DiskLabelChanged = 642,
    DiskScanned = 643,
    DiskSysPathChanged = 644,
    DiskDestroyed = 649,

    VolumeCreated = 650,
    VolumeStateChanged = 651,
    VolumeFsTypeChanged = 652,
    VolumeFsUuidChanged = 653,
    VolumeFsLabelChanged = 654,
    VolumePathChanged = 655,
    VolumeInternalPathChanged = 656,
    VolumeDestroyed = 659,
}

impl EventCode {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Capability for delivering state-change events to observers.
pub trait Broadcaster: Send + Sync {
    /// Delivers one event about `subject`, optionally carrying a value.
    fn notify(&self, code: EventCode, subject: &str, value: Option<&str>);
}

/// Discards every event; used before a real transport is attached.
#[derive(Debug, Default)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn notify(&self, _code: EventCode, _subject: &str, _value: Option<&str>) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every event for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingBroadcaster {
        pub events: Mutex<Vec<(EventCode, String, Option<String>)>>,
    }

    impl RecordingBroadcaster {
        pub fn codes(&self) -> Vec<EventCode> {
            self.events.lock().unwrap().iter().map(|(c, _, _)| *c).collect()
        }
    }

    impl Broadcaster for RecordingBroadcaster {
        fn notify(&self, code: EventCode, subject: &str, value: Option<&str>) {
            self.events.lock().unwrap().push((
                code,
                subject.to_string(),
                value.map(str::to_string),
            ));
        }
    }
}
