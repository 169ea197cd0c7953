// Cache sweeper
// Periodic background eviction of stale samples across all queues. Per-insert
// trimming only reaches actively written keys; links that go silent would
// otherwise hold stale data forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::Cache;

/// Handle to a running sweep task.
///
/// The task is owned by whoever holds the handle and runs until `shutdown` is
/// awaited; dropping the handle requests a best-effort stop. There is no
/// implicit timer tied to cache construction.
pub struct SweeperHandle {
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Spawn a periodic sweep of the given cache.
///
/// The interval is fixed and independent of the ingestion rate. Sweeping a
/// snapshot is a no-op (`Cache::sweep` refuses), so a handle on a snapshot
/// merely idles until shutdown.
pub fn spawn(cache: Arc<Cache>, interval: Duration) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh cache is not
        // swept before anything was ingested.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    cache.sweep();
                }
                _ = shutdown_rx.recv() => {
                    debug!("sweeper shutting down");
                    break;
                }
            }
        }
    });

    SweeperHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    }
}

impl SweeperHandle {
    /// Stop the sweep task and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        // Best-effort stop when the handle is dropped without shutdown().
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sample::SampleKind;

    fn seeded_cache(clock: Arc<ManualClock>) -> Arc<Cache> {
        let cache = Arc::new(Cache::with_clock(Duration::from_millis(5000), clock));
        cache.add_receiver("R1");
        cache.add_fiduciary_transmitter("T1");
        cache.map_sensor_to_device("rx-sensor", "R1");
        cache.map_sensor_to_device("tx-sensor", "T1");
        cache
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_silent_queue() {
        let clock = Arc::new(ManualClock::new(1000));
        let cache = seeded_cache(clock.clone());
        cache.ingest(SampleKind::Signal, "rx-sensor", "tx-sensor", -60.0, 1000);

        let sweeper = spawn(Arc::clone(&cache), Duration::from_millis(100));

        // The link goes silent while logical time moves past max_age.
        clock.set(10_000);
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(cache.range(SampleKind::Signal, "R1", "T1", None).is_empty());
        assert_eq!(cache.stats().signal_points, 0);

        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_keeps_fresh_samples() {
        let clock = Arc::new(ManualClock::new(1000));
        let cache = seeded_cache(clock.clone());
        cache.ingest(SampleKind::Signal, "rx-sensor", "tx-sensor", -60.0, 1000);

        let sweeper = spawn(Arc::clone(&cache), Duration::from_millis(100));
        clock.set(2000);
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(cache.range(SampleKind::Signal, "R1", "T1", None).len(), 1);
        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_sweeping() {
        let clock = Arc::new(ManualClock::new(1000));
        let cache = seeded_cache(clock.clone());
        cache.ingest(SampleKind::Signal, "rx-sensor", "tx-sensor", -60.0, 1000);

        let sweeper = spawn(Arc::clone(&cache), Duration::from_millis(100));
        sweeper.shutdown().await;

        // After shutdown nothing evicts the now-stale sample.
        clock.set(100_000);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(cache.range(SampleKind::Signal, "R1", "T1", None).len(), 1);
    }
}
