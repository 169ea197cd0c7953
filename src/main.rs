// Link-quality cache demo - Main Entry Point
// Feeds a live cache with synthetic link samples, sweeps it in the
// background, and optionally saves a snapshot file on shutdown.

use linkcache::cache::Cache;
use linkcache::config::Config;
use linkcache::persist;
use linkcache::region::{Bounds, Point2D};
use linkcache::sample::SampleKind;
use linkcache::sweeper;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use tokio::signal;
use tracing::{info, error, warn};

/// Demo device grid: three receivers and three fiduciary transmitters on a
/// 30x20 floor.
const RECEIVERS: [(&str, f64, f64); 3] = [("R1", 2.0, 2.0), ("R2", 28.0, 2.0), ("R3", 15.0, 18.0)];
const TRANSMITTERS: [(&str, f64, f64); 3] =
    [("T1", 5.0, 10.0), ("T2", 15.0, 5.0), ("T3", 25.0, 12.0)];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    // Inspect mode: load a snapshot file, summarize, exit.
    if let Some(ref file) = config.inspect {
        return inspect_snapshot(Path::new(file));
    }

    info!("Starting link-quality cache demo");

    let cache = Arc::new(Cache::new(Duration::from_secs(config.max_age_secs)));
    cache.set_region(
        Some("region://demo/floor".to_string()),
        Some(Bounds::new(0.0, 0.0, 30.0, 20.0)),
        None,
        None,
    );
    register_demo_devices(&cache);
    info!(
        receivers = cache.receiver_ids().len(),
        transmitters = cache.fiduciary_transmitter_ids().len(),
        "Cache initialized"
    );

    // Background sweep; the handle is owned here and cancelled explicitly.
    let sweep = sweeper::spawn(
        Arc::clone(&cache),
        Duration::from_secs(config.sweep_interval_secs),
    );

    // Synthetic ingestion feed
    let feed_cache = Arc::clone(&cache);
    let feed_period = Duration::from_millis(config.feed_period_ms.max(10));
    let feed = tokio::spawn(async move {
        run_feed(feed_cache, feed_period).await;
    });

    // Periodic status log and optional stats file
    let status_task = if config.status_interval > 0 {
        let status_cache = Arc::clone(&cache);
        let work_dir = config.work_dir.clone();
        let interval_secs = config.status_interval as u64;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                log_status(&status_cache);
                if !work_dir.is_empty() {
                    write_stats(&status_cache, &work_dir);
                }
            }
        }))
    } else {
        None
    };

    info!("Demo ready");

    // Wait for shutdown signal (Ctrl+C)
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
            return Err(err.into());
        }
    }

    // Graceful shutdown
    info!("Shutting down...");
    feed.abort();
    if let Some(task) = status_task {
        task.abort();
    }
    sweep.shutdown().await;

    if let Some(ref file) = config.save_on_exit {
        match persist::save(&cache, Path::new(file)) {
            Ok(()) => info!("Snapshot saved to {}", file),
            Err(e) => error!("Failed to save snapshot to {}: {}", file, e),
        }
    }

    let stats = cache.stats();
    info!(
        "Demo stopped. Final counts: {} signal, {} variance, {} sig-to-dist points",
        stats.signal_points, stats.variance_points, stats.sig_to_dist_points
    );

    Ok(())
}

/// Register the demo grid: ids, locations, and sensor aliases of the form
/// "sensor-<id>".
fn register_demo_devices(cache: &Cache) {
    for (id, x, y) in RECEIVERS {
        cache.add_receiver(id);
        cache.map_sensor_to_device(&format!("sensor-{}", id), id);
        cache.set_device_location(id, Point2D::new(x, y));
    }
    for (id, x, y) in TRANSMITTERS {
        cache.add_fiduciary_transmitter(id);
        cache.map_sensor_to_device(&format!("sensor-{}", id), id);
        cache.set_device_location(id, Point2D::new(x, y));
    }
}

/// Feed every (receiver, transmitter) link with jittered samples derived from
/// a simple distance-based path loss.
async fn run_feed(cache: Arc<Cache>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        for (rx, rx_x, rx_y) in RECEIVERS {
            for (tx, tx_x, tx_y) in TRANSMITTERS {
                let distance = Point2D::new(rx_x, rx_y).distance_to(&Point2D::new(tx_x, tx_y));
                let (signal, variance) = {
                    use rand::Rng;
                    let mut rng = rand::thread_rng();
                    (
                        (-40.0 - 1.5 * distance + rng.gen_range(-3.0..3.0)) as f32,
                        rng.gen_range(0.5..4.0) as f32,
                    )
                };
                cache.ingest(
                    SampleKind::Signal,
                    &format!("sensor-{}", rx),
                    &format!("sensor-{}", tx),
                    signal,
                    now,
                );
                cache.ingest(
                    SampleKind::Variance,
                    &format!("sensor-{}", rx),
                    &format!("sensor-{}", tx),
                    variance,
                    now,
                );
            }
        }
    }
}

/// Log a one-line status summary.
fn log_status(cache: &Cache) {
    let stats = cache.stats();
    info!(
        "Status: ({} receivers {} transmitters) ({} signal {} variance {} sig-to-dist points)",
        stats.receivers,
        stats.fiduciary_transmitters,
        stats.signal_points,
        stats.variance_points,
        stats.sig_to_dist_points
    );
}

/// Write stats.json to the work dir via tmp + rename so readers never see a
/// partial file.
fn write_stats(cache: &Cache, work_dir: &str) {
    let dir = Path::new(work_dir);
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("Failed to create work_dir {}: {}", work_dir, e);
        return;
    }
    let tmp = dir.join("stats.json.tmp");
    let path = dir.join("stats.json");
    match serde_json::to_string(&cache.stats()) {
        Ok(s) => {
            if let Err(e) = std::fs::write(&tmp, s) {
                warn!("Failed to write {}: {}", tmp.display(), e);
            } else if let Err(e) = std::fs::rename(&tmp, &path) {
                let _ = std::fs::remove_file(&tmp);
                warn!("Failed to rename {} -> {}: {}", tmp.display(), path.display(), e);
            }
        }
        Err(e) => warn!("Failed to encode stats: {}", e),
    }
}

/// Load a snapshot file and print a summary of its contents.
fn inspect_snapshot(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cache = persist::load(path)?;
    let stats = cache.stats();
    info!(
        "Snapshot {}: created {} ({} receivers, {} transmitters, {} signal, {} variance, {} sig-to-dist points)",
        path.display(),
        stats.creation_time,
        stats.receivers,
        stats.fiduciary_transmitters,
        stats.signal_points,
        stats.variance_points,
        stats.sig_to_dist_points
    );
    for receiver in cache.receiver_ids() {
        for transmitter in cache.fiduciary_transmitter_ids() {
            let samples = cache.range(SampleKind::Signal, &receiver, &transmitter, None);
            if !samples.is_empty() {
                info!(
                    "  {} <- {}: {} samples, newest t={}",
                    receiver,
                    transmitter,
                    samples.len(),
                    samples.last().map(|s| s.timestamp).unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;

    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_span_events(if verbose {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    if verbose {
        subscriber
            .with_max_level(tracing::Level::DEBUG)
            .init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber
            .with_max_level(tracing::Level::INFO)
            .init();
    }
}
