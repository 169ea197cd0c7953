// Link-quality cache
// Aggregate root: region metadata, device registry, the two link tables, the
// signal-to-distance index, and snapshot/sweep/clear operations. Ingestion
// arrives from a streaming collaborator; rendering collaborators query it
// directly, through a view filter, or through a frozen snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::events::CacheEvent;
use crate::linktable::LinkTable;
use crate::region::{Bounds, Point2D, RegionInfo};
use crate::registry::DeviceRegistry;
use crate::sample::{LinkSample, SampleKind, SignalToDistanceSample};
use crate::sigdist::SignalToDistanceIndex;

/// Capacity of the lossy event channel; slow subscribers observe a lag, the
/// ingestion path never waits.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Decrement a point counter without wrapping. Counters are advisory stats;
/// concurrent drift is tolerated, underflow is not.
fn saturating_sub(counter: &AtomicUsize, n: usize) {
    if n > 0 {
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(n))
        });
    }
}

/// Point counts and identity counts, for status displays and stats files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub receivers: usize,
    pub fiduciary_transmitters: usize,
    pub signal_points: usize,
    pub variance_points: usize,
    pub sig_to_dist_points: usize,
    pub is_snapshot: bool,
    pub creation_time: i64,
}

/// Time-windowed cache of link-quality samples.
///
/// A cache is created live and continuously mutated by ingestion; `snapshot`
/// produces an independent frozen copy that accepts no further ingestion and
/// answers all point-in-time queries relative to its fixed creation time.
/// Background sweeping of a live cache is owned by the caller; see
/// `sweeper::spawn`.
pub struct Cache {
    region: RwLock<RegionInfo>,
    registry: DeviceRegistry,
    signal: LinkTable,
    variance: LinkTable,
    sig_to_dist: SignalToDistanceIndex,
    max_age: Duration,
    creation_time: i64,
    is_snapshot: bool,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<CacheEvent>,
    signal_points: AtomicUsize,
    variance_points: AtomicUsize,
    sig_to_dist_points: AtomicUsize,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("creation_time", &self.creation_time)
            .field("is_snapshot", &self.is_snapshot)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl Cache {
    /// Default retention window, ten minutes.
    pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

    /// Create a live cache using the system clock.
    pub fn new(max_age: Duration) -> Self {
        Cache::with_clock(max_age, Arc::new(SystemClock))
    }

    /// Create a live cache with an explicit time source.
    pub fn with_clock(max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        let creation_time = clock.now_ms();
        Cache {
            region: RwLock::new(RegionInfo::default()),
            registry: DeviceRegistry::new(),
            signal: LinkTable::new(),
            variance: LinkTable::new(),
            sig_to_dist: SignalToDistanceIndex::new(),
            max_age,
            creation_time,
            is_snapshot: false,
            clock,
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            signal_points: AtomicUsize::new(0),
            variance_points: AtomicUsize::new(0),
            sig_to_dist_points: AtomicUsize::new(0),
        }
    }

    /// Assemble a cache from restored state. Used by the persistence path.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        region: RegionInfo,
        registry: DeviceRegistry,
        signal: LinkTable,
        variance: LinkTable,
        sig_to_dist: SignalToDistanceIndex,
        max_age: Duration,
        creation_time: i64,
        is_snapshot: bool,
    ) -> Self {
        let signal_points = signal.sample_count();
        let variance_points = variance.sample_count();
        let sig_to_dist_points = sig_to_dist.sample_count();
        Cache {
            region: RwLock::new(region),
            registry,
            signal,
            variance,
            sig_to_dist,
            max_age,
            creation_time,
            is_snapshot,
            clock: Arc::new(SystemClock),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            signal_points: AtomicUsize::new(signal_points),
            variance_points: AtomicUsize::new(variance_points),
            sig_to_dist_points: AtomicUsize::new(sig_to_dist_points),
        }
    }

    fn table(&self, kind: SampleKind) -> &LinkTable {
        match kind {
            SampleKind::Signal => &self.signal,
            SampleKind::Variance => &self.variance,
        }
    }

    fn counter(&self, kind: SampleKind) -> &AtomicUsize {
        match kind {
            SampleKind::Signal => &self.signal_points,
            SampleKind::Variance => &self.variance_points,
        }
    }

    fn max_age_ms(&self) -> i64 {
        self.max_age.as_millis() as i64
    }

    /// Reference instant for point-in-time queries: the frozen creation time
    /// on snapshots, the current wall clock on live caches.
    fn reference_time(&self) -> i64 {
        if self.is_snapshot {
            self.creation_time
        } else {
            self.clock.now_ms()
        }
    }

    // --- identity / region (ingestion side) ---

    /// Register a receiver id. Idempotent.
    pub fn add_receiver(&self, id: &str) {
        self.registry.add_receiver(id, self.clock.now_ms());
    }

    /// Register a fiduciary transmitter id. Idempotent.
    pub fn add_fiduciary_transmitter(&self, id: &str) {
        self.registry
            .add_fiduciary_transmitter(id, self.clock.now_ms());
    }

    /// Upsert a device location. Emits an event when a tracked device becomes
    /// locatable; ids outside the tracked sets are stored silently.
    pub fn set_device_location(&self, id: &str, location: Point2D) {
        self.registry.set_location(id, location);
        if self.registry.is_receiver(id) {
            let _ = self.events.send(CacheEvent::ReceiverAdded(id.to_string()));
        } else if self.registry.is_fiduciary_transmitter(id) {
            let _ = self
                .events
                .send(CacheEvent::FiduciaryTransmitterAdded(id.to_string()));
        }
        let now = self.clock.now_ms();
        self.registry.touch_signal(now);
        self.registry.touch_variance(now);
    }

    /// Upsert a sensor-to-device alias. Last writer wins.
    pub fn map_sensor_to_device(&self, sensor_id: &str, device_id: &str) {
        self.registry.map_sensor(sensor_id, device_id);
    }

    /// Replace the region metadata.
    pub fn set_region(
        &self,
        uri: Option<String>,
        bounds: Option<Bounds>,
        image_url: Option<String>,
        image_bytes: Option<Vec<u8>>,
    ) {
        let mut region = self.region.write().expect("region lock poisoned");
        *region = RegionInfo {
            uri,
            bounds,
            image_url,
            image_bytes,
        };
    }

    pub fn region(&self) -> RegionInfo {
        self.region.read().expect("region lock poisoned").clone()
    }

    // --- ingestion ---

    /// Ingest one link sample.
    ///
    /// Sensor ids are resolved through the alias table; an unmapped sensor is
    /// a silent no-op (devices not yet discovered are expected during the
    /// startup race). The target queue is created atomically on first use and
    /// trimmed inline after the append. A signal sample whose endpoints both
    /// have known locations also feeds the signal-to-distance index.
    pub fn ingest(
        &self,
        kind: SampleKind,
        rx_sensor: &str,
        tx_sensor: &str,
        value: f32,
        timestamp: i64,
    ) {
        if self.is_snapshot {
            debug!(rx_sensor, tx_sensor, "ignoring ingest into snapshot");
            return;
        }
        let Some(receiver) = self.registry.resolve(rx_sensor) else {
            trace!(rx_sensor, "unknown receiver sensor, sample dropped");
            return;
        };
        let Some(transmitter) = self.registry.resolve(tx_sensor) else {
            trace!(tx_sensor, "unknown transmitter sensor, sample dropped");
            return;
        };

        let now = self.clock.now_ms();
        let horizon = now - self.max_age_ms();
        let sample = LinkSample::new(value, timestamp);

        let evicted = self.table(kind).append(&receiver, &transmitter, sample, horizon);
        let counter = self.counter(kind);
        counter.fetch_add(1, Ordering::Relaxed);
        saturating_sub(counter, evicted);

        match kind {
            SampleKind::Signal => self.registry.touch_signal(now),
            SampleKind::Variance => self.registry.touch_variance(now),
        }

        if kind != SampleKind::Signal {
            return;
        }

        // Derived index: only when both endpoints are locatable right now.
        let (Some(rx_point), Some(tx_point)) = (
            self.registry.location(&receiver),
            self.registry.location(&transmitter),
        ) else {
            return;
        };
        let derived = SignalToDistanceSample {
            receiver,
            transmitter,
            distance: rx_point.distance_to(&tx_point) as f32,
            signal: value,
            timestamp,
        };
        let evicted = self.sig_to_dist.append(derived, horizon);
        self.sig_to_dist_points.fetch_add(1, Ordering::Relaxed);
        saturating_sub(&self.sig_to_dist_points, evicted);
    }

    // --- queries ---

    /// Value of the most recent sample in [reference - offset - window,
    /// reference - offset), or `None` when no sample qualifies.
    pub fn value_at(
        &self,
        kind: SampleKind,
        transmitter: &str,
        receiver: &str,
        time_offset_ms: i64,
        window_ms: i64,
    ) -> Option<f32> {
        let target = self.reference_time() - time_offset_ms;
        self.table(kind).value_at(receiver, transmitter, target, window_ms)
    }

    /// Defensive copy of the samples for (receiver, transmitter), oldest
    /// first; the whole queue when `span` is `None`, else the inclusive
    /// [from, to] slice.
    pub fn range(
        &self,
        kind: SampleKind,
        receiver: &str,
        transmitter: &str,
        span: Option<(i64, i64)>,
    ) -> Vec<LinkSample> {
        self.table(kind).range(receiver, transmitter, span)
    }

    /// Most recent sample for the pair, unless it is already older than
    /// `max_age` relative to the reference time.
    pub fn current(
        &self,
        kind: SampleKind,
        transmitter: &str,
        receiver: &str,
    ) -> Option<LinkSample> {
        let newest = self.table(kind).newest(receiver, transmitter)?;
        if newest.timestamp < self.reference_time() - self.max_age_ms() {
            return None;
        }
        Some(newest)
    }

    /// Defensive copy of a receiver's signal-to-distance history.
    pub fn history_for(&self, receiver: &str) -> Vec<SignalToDistanceSample> {
        self.sig_to_dist.history_for(receiver)
    }

    pub fn receiver_ids(&self) -> Vec<String> {
        self.registry.receiver_ids()
    }

    pub fn fiduciary_transmitter_ids(&self) -> Vec<String> {
        self.registry.fiduciary_transmitter_ids()
    }

    pub fn device_location(&self, id: &str) -> Option<Point2D> {
        self.registry.location(id)
    }

    /// Timestamp of the latest signal-side activity, for staleness heuristics
    /// in rendering collaborators.
    pub fn last_signal_update(&self) -> i64 {
        self.registry.last_signal_update()
    }

    pub fn last_variance_update(&self) -> i64 {
        self.registry.last_variance_update()
    }

    pub fn is_snapshot(&self) -> bool {
        self.is_snapshot
    }

    pub fn creation_time(&self) -> i64 {
        self.creation_time
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            receivers: self.registry.receiver_count(),
            fiduciary_transmitters: self.registry.fiduciary_transmitter_count(),
            signal_points: self.signal_points.load(Ordering::Relaxed),
            variance_points: self.variance_points.load(Ordering::Relaxed),
            sig_to_dist_points: self.sig_to_dist_points.load(Ordering::Relaxed),
            is_snapshot: self.is_snapshot,
            creation_time: self.creation_time,
        }
    }

    /// Subscribe to device events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    // --- maintenance ---

    /// Evict every sample older than `now - max_age` from both link tables
    /// and the signal-to-distance index. Queues that stopped receiving
    /// samples are only ever trimmed here. No-op on snapshots, whose content
    /// is frozen by definition.
    pub fn sweep(&self) {
        if self.is_snapshot {
            return;
        }
        let horizon = self.clock.now_ms() - self.max_age_ms();
        let signal_evicted = self.signal.sweep(horizon);
        let variance_evicted = self.variance.sweep(horizon);
        let sig_dist_evicted = self.sig_to_dist.sweep(horizon);

        saturating_sub(&self.signal_points, signal_evicted);
        saturating_sub(&self.variance_points, variance_evicted);
        saturating_sub(&self.sig_to_dist_points, sig_dist_evicted);

        if signal_evicted + variance_evicted + sig_dist_evicted > 0 {
            debug!(
                signal_evicted,
                variance_evicted, sig_dist_evicted, "sweep evicted stale samples"
            );
        }
    }

    /// Produce an independent frozen copy of the entire cache state.
    ///
    /// The copy shares no mutable state with the source: every queue and map
    /// is copied element by element under short per-key guards, so ingestion
    /// racing with the copy lands in it or not per key, but the copy is never
    /// torn. Snapshots of snapshots keep the original creation time.
    pub fn snapshot(&self) -> Cache {
        let creation_time = self.reference_time();
        let signal = self.signal.deep_copy();
        let variance = self.variance.deep_copy();
        let sig_to_dist = self.sig_to_dist.deep_copy();
        let signal_points = signal.sample_count();
        let variance_points = variance.sample_count();
        let sig_to_dist_points = sig_to_dist.sample_count();
        Cache {
            region: RwLock::new(self.region()),
            registry: self.registry.deep_copy(),
            signal,
            variance,
            sig_to_dist,
            max_age: self.max_age,
            creation_time,
            is_snapshot: true,
            clock: Arc::clone(&self.clock),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            signal_points: AtomicUsize::new(signal_points),
            variance_points: AtomicUsize::new(variance_points),
            sig_to_dist_points: AtomicUsize::new(sig_to_dist_points),
        }
    }

    /// Drop all sample data, keeping region, registry, and aliases.
    pub fn clear_samples(&self) {
        self.signal.clear();
        self.variance.clear();
        self.sig_to_dist.clear();
        self.signal_points.store(0, Ordering::Relaxed);
        self.variance_points.store(0, Ordering::Relaxed);
        self.sig_to_dist_points.store(0, Ordering::Relaxed);
        let now = self.clock.now_ms();
        self.registry.touch_signal(now);
        self.registry.touch_variance(now);
        debug!("all sample data cleared from cache");
    }

    /// Reset the cache to its initial state: samples, identity facts, and
    /// region metadata.
    pub fn clear_all(&self) {
        self.clear_samples();
        self.registry.clear();
        let mut region = self.region.write().expect("region lock poisoned");
        *region = RegionInfo::default();
        debug!("region info and device identities cleared from cache");
    }

    /// Internal views for the persistence path.
    pub(crate) fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub(crate) fn link_table(&self, kind: SampleKind) -> &LinkTable {
        self.table(kind)
    }

    pub(crate) fn sig_to_dist(&self) -> &SignalToDistanceIndex {
        &self.sig_to_dist
    }

    pub(crate) fn clock_now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}
