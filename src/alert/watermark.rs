use serde::Serialize;

/// The latest event time already alerted in this staff session.
///
/// Only ever moves forward: `advance` takes the maximum, so replaying an
/// older event cannot pull it back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AlertWatermark(u64);

impl AlertWatermark {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Whether an event at `event_time` has not been alerted yet.
    pub fn qualifies(&self, event_time: u64) -> bool {
        event_time > self.0
    }

    pub fn advance(self, event_time: u64) -> Self {
        Self(self.0.max(event_time))
    }
}
