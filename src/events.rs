// Cache events
// Notifications for collaborators that care when tracked devices become
// usable (id known and location set). Delivered over a lossy broadcast
// channel; a lagged or absent subscriber never blocks ingestion.

/// Events emitted by a live cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A tracked receiver gained a location.
    ReceiverAdded(String),
    /// A tracked fiduciary transmitter gained a location.
    FiduciaryTransmitterAdded(String),
}
