// Link table
// Concurrent receiver -> transmitter -> sample-queue store for one sample
// kind. Queues are oldest-first, appended at the tail, trimmed at the head.

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::sample::LinkSample;

/// Time-ordered sample store for one kind of link measurement.
///
/// First-time key creation goes through the map's atomic entry API, so two
/// writers racing on a never-seen (receiver, transmitter) pair converge on a
/// single queue. Appends to an existing queue contend only on the shard
/// holding that key, never on the whole table.
#[derive(Debug, Default)]
pub struct LinkTable {
    by_receiver: DashMap<String, DashMap<String, VecDeque<LinkSample>>>,
}

impl LinkTable {
    pub fn new() -> Self {
        LinkTable::default()
    }

    /// Append a sample to the queue for (receiver, transmitter), creating the
    /// queue if this is the first sample for the pair, then trim the head of
    /// that queue only. `horizon_ms` is the oldest admissible timestamp.
    ///
    /// Returns the number of samples evicted by the inline trim.
    pub fn append(
        &self,
        receiver: &str,
        transmitter: &str,
        sample: LinkSample,
        horizon_ms: i64,
    ) -> usize {
        // Common case: the receiver map exists and the outer shard stays
        // read-locked; only a first-time receiver takes the entry path.
        if let Some(by_transmitter) = self.by_receiver.get(receiver) {
            return Self::push_and_trim(&by_transmitter, transmitter, sample, horizon_ms);
        }
        let by_transmitter = self.by_receiver.entry(receiver.to_string()).or_default();
        Self::push_and_trim(&by_transmitter, transmitter, sample, horizon_ms)
    }

    fn push_and_trim(
        by_transmitter: &DashMap<String, VecDeque<LinkSample>>,
        transmitter: &str,
        sample: LinkSample,
        horizon_ms: i64,
    ) -> usize {
        let mut queue = by_transmitter.entry(transmitter.to_string()).or_default();
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

    /// Last known value at or before `target_ms`, but no staler than
    /// `window_ms`: the most recent sample whose timestamp lies in
    /// [target - window, target). Scans oldest to newest and never
    /// extrapolates; sparse or irregular sampling is expected.
    pub fn value_at(
        &self,
        receiver: &str,
        transmitter: &str,
        target_ms: i64,
        window_ms: i64,
    ) -> Option<f32> {
        let by_transmitter = self.by_receiver.get(receiver)?;
        let queue = by_transmitter.get(transmitter)?;

        let mut value = None;
        for sample in queue.iter() {
            if sample.timestamp < target_ms - window_ms {
                continue;
            }
            if sample.timestamp >= target_ms {
                break;
            }
            value = Some(sample.value);
        }
        value
    }

    /// Defensive copy of the samples for (receiver, transmitter), oldest
    /// first. With `span = Some((from, to))`, only samples with
    /// from <= timestamp <= to are returned; `None` copies the whole queue.
    pub fn range(
        &self,
        receiver: &str,
        transmitter: &str,
        span: Option<(i64, i64)>,
    ) -> Vec<LinkSample> {
        let Some(by_transmitter) = self.by_receiver.get(receiver) else {
            return Vec::new();
        };
        let Some(queue) = by_transmitter.get(transmitter) else {
            return Vec::new();
        };

        match span {
            None => queue.iter().copied().collect(),
            Some((from, to)) => queue
                .iter()
                .filter(|sample| sample.timestamp >= from && sample.timestamp <= to)
                .copied()
                .collect(),
        }
    }

    /// Most recent sample for (receiver, transmitter), regardless of age.
    pub fn newest(&self, receiver: &str, transmitter: &str) -> Option<LinkSample> {
        let by_transmitter = self.by_receiver.get(receiver)?;
        let queue = by_transmitter.get(transmitter)?;
        queue.back().copied()
    }

    /// Evict every sample older than `horizon_ms` from every queue. Returns
    /// the total number evicted. Queues that went silent are trimmed here;
    /// the per-insert trim only reaches actively written keys.
    pub fn sweep(&self, horizon_ms: i64) -> usize {
        let mut evicted = 0;
        for by_transmitter in self.by_receiver.iter() {
            for mut queue in by_transmitter.iter_mut() {
                while queue
                    .front()
                    .is_some_and(|oldest| oldest.timestamp < horizon_ms)
                {
                    queue.pop_front();
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Total number of stored samples.
    pub fn sample_count(&self) -> usize {
        self.by_receiver
            .iter()
            .map(|by_transmitter| {
                by_transmitter
                    .iter()
                    .map(|queue| queue.len())
                    .sum::<usize>()
            })
            .sum()
    }

    /// Receiver ids that currently have at least one transmitter queue.
    pub fn receiver_ids(&self) -> Vec<String> {
        self.by_receiver
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Defensive copy of every (transmitter, samples) pair for a receiver,
    /// used by the persistence path.
    pub fn entries_for(&self, receiver: &str) -> Vec<(String, Vec<LinkSample>)> {
        let Some(by_transmitter) = self.by_receiver.get(receiver) else {
            return Vec::new();
        };
        by_transmitter
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().iter().copied().collect()))
            .collect()
    }

    /// Replace the queue for (receiver, transmitter), used when restoring a
    /// snapshot file.
    pub fn insert_queue(&self, receiver: &str, transmitter: &str, samples: Vec<LinkSample>) {
        let by_transmitter = self
            .by_receiver
            .entry(receiver.to_string())
            .or_default();
        by_transmitter.insert(transmitter.to_string(), samples.into());
    }

    /// Independent element-by-element copy for snapshots. Holds only per-key
    /// guards, so ingestion racing with the copy is included or excluded
    /// per key but never torn.
    pub fn deep_copy(&self) -> LinkTable {
        let copy = LinkTable::new();
        for by_transmitter in self.by_receiver.iter() {
            let receiver = by_transmitter.key();
            for entry in by_transmitter.iter() {
                copy.insert_queue(
                    receiver,
                    entry.key(),
                    entry.value().iter().copied().collect(),
                );
            }
        }
        copy
    }

    /// Drop every queue.
    pub fn clear(&self) {
        self.by_receiver.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample(value: f32, timestamp: i64) -> LinkSample {
        LinkSample::new(value, timestamp)
    }

    #[test]
    fn test_append_and_range() {
        let table = LinkTable::new();
        table.append("R1", "T1", sample(1.0, 100), 0);
        table.append("R1", "T1", sample(2.0, 200), 0);
        table.append("R1", "T2", sample(9.0, 150), 0);

        let all = table.range("R1", "T1", None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].timestamp, 100);
        assert_eq!(all[1].timestamp, 200);

        let bounded = table.range("R1", "T1", Some((150, 250)));
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].value, 2.0);

        assert!(table.range("R9", "T1", None).is_empty());
        assert!(table.range("R1", "T9", None).is_empty());
    }

    #[test]
    fn test_inline_trim_on_append() {
        let table = LinkTable::new();
        table.append("R1", "T1", sample(1.0, 100), 0);
        table.append("R1", "T1", sample(2.0, 200), 0);
        // Horizon moves past the first sample.
        let evicted = table.append("R1", "T1", sample(3.0, 300), 150);
        assert_eq!(evicted, 1);

        let remaining = table.range("R1", "T1", None);
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|s| s.timestamp >= 150));
    }

    #[test]
    fn test_value_at_window_semantics() {
        // Samples at t=0,5,10 with values 1,2,3; target=7, window=10.
        // Qualifying samples are t=0 and t=5 (t >= -3 and t < 7); the most
        // recent qualifying sample is t=5 -> 2.
        let table = LinkTable::new();
        table.append("R1", "T1", sample(1.0, 0), i64::MIN);
        table.append("R1", "T1", sample(2.0, 5), i64::MIN);
        table.append("R1", "T1", sample(3.0, 10), i64::MIN);

        assert_eq!(table.value_at("R1", "T1", 7, 10), Some(2.0));
    }

    #[test]
    fn test_value_at_strict_upper_bound() {
        let table = LinkTable::new();
        table.append("R1", "T1", sample(1.0, 1000), 0);
        // A sample exactly at the target instant does not qualify.
        assert_eq!(table.value_at("R1", "T1", 1000, 500), None);
        assert_eq!(table.value_at("R1", "T1", 1001, 500), Some(1.0));
    }

    #[test]
    fn test_value_at_no_data_outside_window() {
        let table = LinkTable::new();
        table.append("R1", "T1", sample(1.0, 100), 0);
        // Window [900, 1000) excludes the only sample.
        assert_eq!(table.value_at("R1", "T1", 1000, 100), None);
        assert_eq!(table.value_at("R9", "T9", 1000, 100), None);
    }

    #[test]
    fn test_sweep_trims_silent_queues() {
        let table = LinkTable::new();
        table.append("R1", "T1", sample(1.0, 100), 0);
        table.append("R1", "T1", sample(2.0, 900), 0);
        table.append("R2", "T1", sample(3.0, 50), 0);

        let evicted = table.sweep(500);
        assert_eq!(evicted, 2);
        assert_eq!(table.sample_count(), 1);
        assert_eq!(table.newest("R1", "T1").unwrap().timestamp, 900);
        assert!(table.range("R2", "T1", None).is_empty());
    }

    #[test]
    fn test_concurrent_first_ingest_single_queue() {
        // N threads racing on a never-seen key must converge on one queue
        // containing all N samples.
        let table = Arc::new(LinkTable::new());
        let threads = 8;
        let per_thread = 50;

        std::thread::scope(|scope| {
            for t in 0..threads {
                let table = Arc::clone(&table);
                scope.spawn(move || {
                    for i in 0..per_thread {
                        let ts = (t * per_thread + i) as i64;
                        table.append("R1", "T1", sample(ts as f32, ts), i64::MIN);
                    }
                });
            }
        });

        assert_eq!(table.sample_count(), threads * per_thread);
        assert_eq!(table.range("R1", "T1", None).len(), threads * per_thread);
    }

    #[test]
    fn test_deep_copy_is_disjoint() {
        let table = LinkTable::new();
        table.append("R1", "T1", sample(1.0, 100), 0);

        let copy = table.deep_copy();
        table.append("R1", "T1", sample(2.0, 200), 0);
        table.append("R2", "T2", sample(3.0, 300), 0);

        assert_eq!(copy.sample_count(), 1);
        assert_eq!(copy.range("R1", "T1", None)[0].value, 1.0);
        assert!(copy.range("R2", "T2", None).is_empty());
    }
}
