// View filter
// Read-only decorator restricting queries to an allow-list of device ids.
// Composition over the cache rather than a subclass: the filter holds a
// shared reference and forwards reads through a membership predicate.

use std::sync::Arc;

use dashmap::DashSet;

use crate::cache::Cache;
use crate::region::Point2D;
use crate::sample::{LinkSample, SampleKind, SignalToDistanceSample};

/// A cache view restricted to an allow-list of device ids.
///
/// With an empty allow-list every read passes through unchanged. Once ids are
/// added, a read succeeds only when every referenced device id is a member;
/// otherwise it reports no data. Ingestion is unaffected: writes go to the
/// wrapped cache directly, the filter has no write surface.
pub struct FilteredCache {
    inner: Arc<Cache>,
    allowed: DashSet<String>,
}

impl FilteredCache {
    pub fn new(inner: Arc<Cache>) -> Self {
        FilteredCache {
            inner,
            allowed: DashSet::new(),
        }
    }

    /// The wrapped cache.
    pub fn inner(&self) -> &Arc<Cache> {
        &self.inner
    }

    pub fn allow(&self, device_id: &str) {
        self.allowed.insert(device_id.to_string());
    }

    pub fn disallow(&self, device_id: &str) {
        self.allowed.remove(device_id);
    }

    pub fn clear_allowed(&self) {
        self.allowed.clear();
    }

    pub fn allowed_ids(&self) -> Vec<String> {
        self.allowed.iter().map(|id| id.key().clone()).collect()
    }

    fn unrestricted(&self) -> bool {
        self.allowed.is_empty()
    }

    fn permits(&self, device_id: &str) -> bool {
        self.unrestricted() || self.allowed.contains(device_id)
    }

    // --- filtered reads ---

    pub fn value_at(
        &self,
        kind: SampleKind,
        transmitter: &str,
        receiver: &str,
        time_offset_ms: i64,
        window_ms: i64,
    ) -> Option<f32> {
        if !self.permits(receiver) || !self.permits(transmitter) {
            return None;
        }
        self.inner
            .value_at(kind, transmitter, receiver, time_offset_ms, window_ms)
    }

    pub fn range(
        &self,
        kind: SampleKind,
        receiver: &str,
        transmitter: &str,
        span: Option<(i64, i64)>,
    ) -> Vec<LinkSample> {
        if !self.permits(receiver) || !self.permits(transmitter) {
            return Vec::new();
        }
        self.inner.range(kind, receiver, transmitter, span)
    }

    pub fn current(
        &self,
        kind: SampleKind,
        transmitter: &str,
        receiver: &str,
    ) -> Option<LinkSample> {
        if !self.permits(receiver) || !self.permits(transmitter) {
            return None;
        }
        self.inner.current(kind, transmitter, receiver)
    }

    pub fn history_for(&self, receiver: &str) -> Vec<SignalToDistanceSample> {
        if !self.permits(receiver) {
            return Vec::new();
        }
        self.inner.history_for(receiver)
    }

    pub fn device_location(&self, device_id: &str) -> Option<Point2D> {
        if !self.permits(device_id) {
            return None;
        }
        self.inner.device_location(device_id)
    }

    pub fn receiver_ids(&self) -> Vec<String> {
        let mut ids = self.inner.receiver_ids();
        if !self.unrestricted() {
            ids.retain(|id| self.allowed.contains(id));
        }
        ids
    }

    pub fn fiduciary_transmitter_ids(&self) -> Vec<String> {
        let mut ids = self.inner.fiduciary_transmitter_ids();
        if !self.unrestricted() {
            ids.retain(|id| self.allowed.contains(id));
        }
        ids
    }

    // --- pass-through metadata ---

    pub fn is_snapshot(&self) -> bool {
        self.inner.is_snapshot()
    }

    pub fn creation_time(&self) -> i64 {
        self.inner.creation_time()
    }

    pub fn max_age(&self) -> std::time::Duration {
        self.inner.max_age()
    }

    /// Snapshot the wrapped cache and carry the allow-list over to the new
    /// view. The filter and snapshot compose independently.
    pub fn snapshot(&self) -> FilteredCache {
        let view = FilteredCache::new(Arc::new(self.inner.snapshot()));
        for id in self.allowed_ids() {
            view.allowed.insert(id);
        }
        view
    }
}
