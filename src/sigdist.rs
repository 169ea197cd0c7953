// Signal-to-distance index
// Derived per-receiver history of (distance, signal) pairs, recorded
// opportunistically when a signal sample arrives and both endpoints have
// known locations. Rendering collaborators interpolate against it to infer
// receiver-to-unknown-device distance from signal strength.

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::sample::SignalToDistanceSample;

/// Per-receiver queue of derived samples, trimmed exactly like the link
/// tables: oldest first, appended at the tail, evicted at the head.
#[derive(Debug, Default)]
pub struct SignalToDistanceIndex {
    by_receiver: DashMap<String, VecDeque<SignalToDistanceSample>>,
}

impl SignalToDistanceIndex {
    pub fn new() -> Self {
        SignalToDistanceIndex::default()
    }

    /// Append a derived sample and trim the head of that receiver's queue.
    /// Returns the number of samples evicted by the inline trim.
    pub fn append(&self, sample: SignalToDistanceSample, horizon_ms: i64) -> usize {
        let mut queue = self
            .by_receiver
            .entry(sample.receiver.clone())
            .or_default();
        queue.push_back(sample);

        let mut evicted = 0;
        while queue
            .front()
            .is_some_and(|oldest| oldest.timestamp < horizon_ms)
        {
            queue.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Defensive copy of a receiver's history, oldest first.
    pub fn history_for(&self, receiver: &str) -> Vec<SignalToDistanceSample> {
        self.by_receiver
            .get(receiver)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Evict every sample older than `horizon_ms`. Returns the total evicted.
    pub fn sweep(&self, horizon_ms: i64) -> usize {
        let mut evicted = 0;
        for mut queue in self.by_receiver.iter_mut() {
            while queue
                .front()
                .is_some_and(|oldest| oldest.timestamp < horizon_ms)
            {
                queue.pop_front();
                evicted += 1;
            }
        }
        evicted
    }

    pub fn sample_count(&self) -> usize {
        self.by_receiver.iter().map(|queue| queue.len()).sum()
    }

    /// Replace a receiver's history, used when restoring a snapshot file.
    pub fn insert_history(&self, receiver: &str, samples: Vec<SignalToDistanceSample>) {
        self.by_receiver
            .insert(receiver.to_string(), samples.into());
    }

    /// Independent deep copy for snapshots.
    pub fn deep_copy(&self) -> SignalToDistanceIndex {
        let copy = SignalToDistanceIndex::new();
        for entry in self.by_receiver.iter() {
            copy.insert_history(entry.key(), entry.value().iter().cloned().collect());
        }
        copy
    }

    pub fn clear(&self) {
        self.by_receiver.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(receiver: &str, distance: f32, signal: f32, timestamp: i64) -> SignalToDistanceSample {
        SignalToDistanceSample {
            receiver: receiver.to_string(),
            transmitter: "T1".to_string(),
            distance,
            signal,
            timestamp,
        }
    }

    #[test]
    fn test_history_is_time_ordered() {
        let index = SignalToDistanceIndex::new();
        index.append(sample("R1", 1.0, -40.0, 100), 0);
        index.append(sample("R1", 2.0, -55.0, 200), 0);

        let history = index.history_for("R1");
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp < history[1].timestamp);
        assert!(index.history_for("R2").is_empty());
    }

    #[test]
    fn test_inline_trim() {
        let index = SignalToDistanceIndex::new();
        index.append(sample("R1", 1.0, -40.0, 100), 0);
        let evicted = index.append(sample("R1", 2.0, -55.0, 500), 300);
        assert_eq!(evicted, 1);
        assert_eq!(index.history_for("R1").len(), 1);
    }

    #[test]
    fn test_sweep() {
        let index = SignalToDistanceIndex::new();
        index.append(sample("R1", 1.0, -40.0, 100), 0);
        index.append(sample("R2", 2.0, -50.0, 900), 0);

        assert_eq!(index.sweep(500), 1);
        assert!(index.history_for("R1").is_empty());
        assert_eq!(index.history_for("R2").len(), 1);
    }

    #[test]
    fn test_deep_copy_is_disjoint() {
        let index = SignalToDistanceIndex::new();
        index.append(sample("R1", 1.0, -40.0, 100), 0);

        let copy = index.deep_copy();
        index.append(sample("R1", 2.0, -55.0, 200), 0);

        assert_eq!(copy.history_for("R1").len(), 1);
    }
}
