// Sample types stored by the cache

use serde::{Deserialize, Serialize};

/// Which of the two link tables a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleKind {
    /// Averaged signal-strength readings (RSSI).
    Signal,
    /// Variance of the signal-strength readings.
    Variance,
}

/// One averaged reading for an ordered (receiver, transmitter) pair.
///
/// Immutable once created. `timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkSample {
    pub value: f32,
    pub timestamp: i64,
}

impl LinkSample {
    pub fn new(value: f32, timestamp: i64) -> Self {
        LinkSample { value, timestamp }
    }
}

/// Derived (distance, signal) observation for a receiver.
///
/// Recorded only when both endpoints had a known location at the time the
/// signal sample arrived; never user-supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalToDistanceSample {
    pub receiver: String,
    pub transmitter: String,
    pub distance: f32,
    pub signal: f32,
    pub timestamp: i64,
}
