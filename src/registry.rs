// Device registry
// Tracks known receivers and fiduciary transmitters, device locations, and
// the alias table mapping raw sensor identifiers to stable device identifiers.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::{DashMap, DashSet};

use crate::region::Point2D;

/// Registry of device-identity facts.
///
/// All maps are append-mostly and read far more often than written; every
/// operation is safe under concurrent access. Identity facts accumulate for
/// the lifetime of a session and are removed only by an explicit `clear`.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    receivers: DashSet<String>,
    fiduciary_transmitters: DashSet<String>,
    /// Device ID -> 2-D location. Locations may exist for ids outside the two
    /// tracked sets (transient devices).
    locations: DashMap<String, Point2D>,
    /// Raw sensor ID -> device ID. Last writer wins.
    aliases: DashMap<String, String>,
    last_signal_update: AtomicI64,
    last_variance_update: AtomicI64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    /// Add a receiver id. Idempotent; returns true if the id was new.
    pub fn add_receiver(&self, id: &str, now_ms: i64) -> bool {
        let added = self.receivers.insert(id.to_string());
        self.last_signal_update.fetch_max(now_ms, Ordering::SeqCst);
        added
    }

    /// Add a fiduciary transmitter id. Idempotent; returns true if new.
    pub fn add_fiduciary_transmitter(&self, id: &str, now_ms: i64) -> bool {
        let added = self.fiduciary_transmitters.insert(id.to_string());
        self.last_signal_update.fetch_max(now_ms, Ordering::SeqCst);
        self.last_variance_update.fetch_max(now_ms, Ordering::SeqCst);
        added
    }

    pub fn is_receiver(&self, id: &str) -> bool {
        self.receivers.contains(id)
    }

    pub fn is_fiduciary_transmitter(&self, id: &str) -> bool {
        self.fiduciary_transmitters.contains(id)
    }

    /// Upsert a device location. No membership check: locations may be set
    /// for ids the registry has never seen.
    pub fn set_location(&self, id: &str, location: Point2D) {
        self.locations.insert(id.to_string(), location);
    }

    pub fn location(&self, id: &str) -> Option<Point2D> {
        self.locations.get(id).map(|entry| *entry.value())
    }

    /// Upsert a sensor-to-device alias. Last writer wins; nothing enforces
    /// uniqueness on the device side.
    pub fn map_sensor(&self, sensor_id: &str, device_id: &str) {
        self.aliases
            .insert(sensor_id.to_string(), device_id.to_string());
    }

    /// Resolve a raw sensor id to its device id. Absence is a normal outcome;
    /// the caller drops the sample.
    pub fn resolve(&self, sensor_id: &str) -> Option<String> {
        self.aliases.get(sensor_id).map(|entry| entry.value().clone())
    }

    /// Defensive copy of the receiver id set.
    pub fn receiver_ids(&self) -> Vec<String> {
        self.receivers.iter().map(|id| id.key().clone()).collect()
    }

    /// Defensive copy of the fiduciary transmitter id set.
    pub fn fiduciary_transmitter_ids(&self) -> Vec<String> {
        self.fiduciary_transmitters
            .iter()
            .map(|id| id.key().clone())
            .collect()
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    pub fn fiduciary_transmitter_count(&self) -> usize {
        self.fiduciary_transmitters.len()
    }

    /// Record sample activity, used by staleness heuristics in rendering
    /// collaborators. Exposed, not consumed internally.
    pub fn touch_signal(&self, now_ms: i64) {
        self.last_signal_update.fetch_max(now_ms, Ordering::SeqCst);
    }

    pub fn touch_variance(&self, now_ms: i64) {
        self.last_variance_update.fetch_max(now_ms, Ordering::SeqCst);
    }

    pub fn last_signal_update(&self) -> i64 {
        self.last_signal_update.load(Ordering::SeqCst)
    }

    pub fn last_variance_update(&self) -> i64 {
        self.last_variance_update.load(Ordering::SeqCst)
    }

    /// Bulk-load helpers used when restoring a snapshot file.
    pub fn extend_receivers<I: IntoIterator<Item = String>>(&self, ids: I) {
        for id in ids {
            self.receivers.insert(id);
        }
    }

    pub fn extend_fiduciary_transmitters<I: IntoIterator<Item = String>>(&self, ids: I) {
        for id in ids {
            self.fiduciary_transmitters.insert(id);
        }
    }

    /// Defensive copies of the location and alias maps.
    pub fn locations(&self) -> Vec<(String, Point2D)> {
        self.locations
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn aliases(&self) -> Vec<(String, String)> {
        self.aliases
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Independent deep copy for snapshots.
    pub fn deep_copy(&self) -> DeviceRegistry {
        let copy = DeviceRegistry::new();
        copy.extend_receivers(self.receiver_ids());
        copy.extend_fiduciary_transmitters(self.fiduciary_transmitter_ids());
        for (id, location) in self.locations() {
            copy.locations.insert(id, location);
        }
        for (sensor, device) in self.aliases() {
            copy.aliases.insert(sensor, device);
        }
        copy.last_signal_update
            .store(self.last_signal_update(), Ordering::SeqCst);
        copy.last_variance_update
            .store(self.last_variance_update(), Ordering::SeqCst);
        copy
    }

    /// Reset all identity facts.
    pub fn clear(&self) {
        self.receivers.clear();
        self.fiduciary_transmitters.clear();
        self.locations.clear();
        self.aliases.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let registry = DeviceRegistry::new();
        assert!(registry.add_receiver("R1", 100));
        assert!(!registry.add_receiver("R1", 200));
        assert_eq!(registry.receiver_count(), 1);

        assert!(registry.add_fiduciary_transmitter("T1", 300));
        assert!(!registry.add_fiduciary_transmitter("T1", 400));
        assert_eq!(registry.fiduciary_transmitter_count(), 1);
    }

    #[test]
    fn test_alias_last_writer_wins() {
        let registry = DeviceRegistry::new();
        registry.map_sensor("sensor-1", "R1");
        registry.map_sensor("sensor-1", "R2");
        assert_eq!(registry.resolve("sensor-1"), Some("R2".to_string()));
        assert_eq!(registry.resolve("sensor-9"), None);
    }

    #[test]
    fn test_location_without_membership() {
        let registry = DeviceRegistry::new();
        registry.set_location("ghost", Point2D::new(1.0, 2.0));
        assert_eq!(registry.location("ghost"), Some(Point2D::new(1.0, 2.0)));
        assert!(!registry.is_receiver("ghost"));
    }

    #[test]
    fn test_update_stamps() {
        let registry = DeviceRegistry::new();
        registry.add_receiver("R1", 500);
        assert_eq!(registry.last_signal_update(), 500);
        assert_eq!(registry.last_variance_update(), 0);

        registry.add_fiduciary_transmitter("T1", 900);
        assert_eq!(registry.last_signal_update(), 900);
        assert_eq!(registry.last_variance_update(), 900);

        // Stamps never move backwards.
        registry.touch_signal(700);
        assert_eq!(registry.last_signal_update(), 900);
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let registry = DeviceRegistry::new();
        registry.add_receiver("R1", 100);
        registry.set_location("R1", Point2D::new(0.0, 0.0));
        registry.map_sensor("s1", "R1");

        let copy = registry.deep_copy();
        registry.add_receiver("R2", 200);
        registry.map_sensor("s2", "R2");

        assert_eq!(copy.receiver_count(), 1);
        assert_eq!(copy.resolve("s2"), None);
        assert_eq!(copy.resolve("s1"), Some("R1".to_string()));
    }

    #[test]
    fn test_clear() {
        let registry = DeviceRegistry::new();
        registry.add_receiver("R1", 100);
        registry.set_location("R1", Point2D::new(0.0, 0.0));
        registry.map_sensor("s1", "R1");

        registry.clear();
        assert_eq!(registry.receiver_count(), 0);
        assert_eq!(registry.location("R1"), None);
        assert_eq!(registry.resolve("s1"), None);
    }
}
