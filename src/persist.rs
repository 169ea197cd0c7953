// Snapshot persistence
// Writes a cache to a gzip-compressed stream of length-framed records in a
// fixed order, and restores an equivalent frozen cache from such a file.
//
// Record order: creation timestamp; region URI; region bounds; region image
// URL; fiduciary transmitter ids; receiver ids; device locations; sensor
// aliases; signal table (receiver count, then per receiver its id and
// (transmitter, samples) pairs); variance table likewise; then per receiver
// its signal-to-distance history. The decoded region image is in-memory only
// and is never written.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::info;

use crate::cache::Cache;
use crate::linktable::LinkTable;
use crate::region::{Bounds, Point2D, RegionInfo};
use crate::registry::DeviceRegistry;
use crate::sample::{LinkSample, SampleKind, SignalToDistanceSample};
use crate::sigdist::SignalToDistanceIndex;

/// File magic, "LQC1".
const MAGIC: u32 = 0x4C51_4331;
const VERSION: u16 = 1;

/// Failure modes of the persistence path. A failed save or load never
/// touches the in-memory cache.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Codec(#[from] bincode::Error),
    #[error("not a link-quality snapshot file (magic {0:#010x})")]
    BadMagic(u32),
    #[error("unsupported snapshot file version {0}")]
    UnsupportedVersion(u16),
}

/// Write the cache state to `path`.
///
/// Reads the live cache through the same defensive copies the query side
/// uses, so saving may race with ingestion; per-key consistency matches the
/// snapshot contract. The recorded creation timestamp is the wall clock for
/// a live cache and the frozen creation time for a snapshot.
pub fn save(cache: &Cache, path: &Path) -> Result<(), PersistError> {
    let file = File::create(path)?;
    let mut out = GzEncoder::new(BufWriter::new(file), Compression::default());

    bincode::serialize_into(&mut out, &MAGIC)?;
    bincode::serialize_into(&mut out, &VERSION)?;

    let creation_ts = if cache.is_snapshot() {
        cache.creation_time()
    } else {
        cache.clock_now_ms()
    };
    bincode::serialize_into(&mut out, &creation_ts)?;

    let region = cache.region();
    bincode::serialize_into(&mut out, &region.uri)?;
    bincode::serialize_into(&mut out, &region.bounds)?;
    bincode::serialize_into(&mut out, &region.image_url)?;

    bincode::serialize_into(&mut out, &cache.fiduciary_transmitter_ids())?;
    let receivers = cache.receiver_ids();
    bincode::serialize_into(&mut out, &receivers)?;

    bincode::serialize_into(&mut out, &cache.registry().locations())?;
    bincode::serialize_into(&mut out, &cache.registry().aliases())?;

    write_link_table(&mut out, cache.link_table(SampleKind::Signal), &receivers)?;
    write_link_table(&mut out, cache.link_table(SampleKind::Variance), &receivers)?;

    for receiver in &receivers {
        bincode::serialize_into(&mut out, receiver)?;
        bincode::serialize_into(&mut out, &cache.sig_to_dist().history_for(receiver))?;
    }

    out.finish()?.flush()?;
    info!(path = %path.display(), receivers = receivers.len(), "cache saved");
    Ok(())
}

fn write_link_table<W: Write>(
    out: &mut W,
    table: &LinkTable,
    receivers: &[String],
) -> Result<(), PersistError> {
    bincode::serialize_into(&mut *out, &(receivers.len() as u64))?;
    for receiver in receivers {
        bincode::serialize_into(&mut *out, receiver)?;
        let entries: Vec<(String, Vec<LinkSample>)> = table.entries_for(receiver);
        bincode::serialize_into(&mut *out, &entries)?;
    }
    Ok(())
}

/// Restore a cache from `path`.
///
/// The result is always a snapshot (`is_snapshot = true`) anchored at the
/// recorded creation timestamp; it accepts no ingestion. The retention
/// window is not part of the file format and comes back as the default.
pub fn load(path: &Path) -> Result<Cache, PersistError> {
    let file = File::open(path)?;
    let mut input = GzDecoder::new(BufReader::new(file));

    let magic: u32 = bincode::deserialize_from(&mut input)?;
    if magic != MAGIC {
        return Err(PersistError::BadMagic(magic));
    }
    let version: u16 = bincode::deserialize_from(&mut input)?;
    if version != VERSION {
        return Err(PersistError::UnsupportedVersion(version));
    }

    let creation_ts: i64 = bincode::deserialize_from(&mut input)?;

    let uri: Option<String> = bincode::deserialize_from(&mut input)?;
    let bounds: Option<Bounds> = bincode::deserialize_from(&mut input)?;
    let image_url: Option<String> = bincode::deserialize_from(&mut input)?;
    let region = RegionInfo {
        uri,
        bounds,
        image_url,
        image_bytes: None,
    };

    let fiduciary: Vec<String> = bincode::deserialize_from(&mut input)?;
    let receivers: Vec<String> = bincode::deserialize_from(&mut input)?;
    let locations: Vec<(String, Point2D)> = bincode::deserialize_from(&mut input)?;
    let aliases: Vec<(String, String)> = bincode::deserialize_from(&mut input)?;

    let registry = DeviceRegistry::new();
    registry.extend_fiduciary_transmitters(fiduciary);
    registry.extend_receivers(receivers.clone());
    for (id, point) in locations {
        registry.set_location(&id, point);
    }
    for (sensor, device) in aliases {
        registry.map_sensor(&sensor, &device);
    }

    let signal = read_link_table(&mut input)?;
    let variance = read_link_table(&mut input)?;

    let sig_to_dist = SignalToDistanceIndex::new();
    for _ in 0..receivers.len() {
        let receiver: String = bincode::deserialize_from(&mut input)?;
        let history: Vec<SignalToDistanceSample> = bincode::deserialize_from(&mut input)?;
        if !history.is_empty() {
            sig_to_dist.insert_history(&receiver, history);
        }
    }

    let cache = Cache::from_parts(
        region,
        registry,
        signal,
        variance,
        sig_to_dist,
        Cache::DEFAULT_MAX_AGE,
        creation_ts,
        true,
    );
    info!(path = %path.display(), "cache restored as snapshot");
    Ok(cache)
}

fn read_link_table<R: Read>(input: &mut R) -> Result<LinkTable, PersistError> {
    let table = LinkTable::new();
    let receiver_count: u64 = bincode::deserialize_from(&mut *input)?;
    for _ in 0..receiver_count {
        let receiver: String = bincode::deserialize_from(&mut *input)?;
        let entries: Vec<(String, Vec<LinkSample>)> = bincode::deserialize_from(&mut *input)?;
        for (transmitter, samples) in entries {
            table.insert_queue(&receiver, &transmitter, samples);
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn populated_cache() -> Cache {
        let clock = Arc::new(ManualClock::new(5000));
        let cache = Cache::with_clock(Duration::from_secs(600), clock);
        cache.set_region(
            Some("region://lab/floor2".to_string()),
            Some(Bounds::new(0.0, 0.0, 30.0, 20.0)),
            Some("http://example.com/floor2.png".to_string()),
            Some(vec![1, 2, 3]),
        );
        cache.add_receiver("R1");
        cache.add_receiver("R2");
        cache.add_fiduciary_transmitter("T1");
        cache.map_sensor_to_device("s-r1", "R1");
        cache.map_sensor_to_device("s-r2", "R2");
        cache.map_sensor_to_device("s-t1", "T1");
        cache.set_device_location("R1", Point2D::new(0.0, 0.0));
        cache.set_device_location("T1", Point2D::new(6.0, 8.0));

        cache.ingest(SampleKind::Signal, "s-r1", "s-t1", -40.0, 1000);
        cache.ingest(SampleKind::Signal, "s-r1", "s-t1", -42.0, 2000);
        cache.ingest(SampleKind::Signal, "s-r2", "s-t1", -60.0, 1500);
        cache.ingest(SampleKind::Variance, "s-r1", "s-t1", 2.5, 1200);
        cache
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.lqc");

        let original = populated_cache();
        save(&original, &path).unwrap();
        let restored = load(&path).unwrap();

        assert!(restored.is_snapshot());
        assert_eq!(restored.creation_time(), 5000);

        for (rx, tx) in [("R1", "T1"), ("R2", "T1")] {
            assert_eq!(
                restored.range(SampleKind::Signal, rx, tx, None),
                original.range(SampleKind::Signal, rx, tx, None),
            );
            assert_eq!(
                restored.range(SampleKind::Variance, rx, tx, None),
                original.range(SampleKind::Variance, rx, tx, None),
            );
        }
        assert_eq!(restored.history_for("R1"), original.history_for("R1"));

        let mut receivers = restored.receiver_ids();
        receivers.sort();
        assert_eq!(receivers, vec!["R1".to_string(), "R2".to_string()]);
        assert_eq!(restored.fiduciary_transmitter_ids(), vec!["T1".to_string()]);
        assert_eq!(restored.device_location("T1"), Some(Point2D::new(6.0, 8.0)));

        let region = restored.region();
        assert_eq!(region.uri.as_deref(), Some("region://lab/floor2"));
        assert_eq!(region.bounds, Some(Bounds::new(0.0, 0.0, 30.0, 20.0)));
        assert_eq!(region.image_url.as_deref(), Some("http://example.com/floor2.png"));
        // Decoded image bytes are not part of the file format.
        assert!(region.image_bytes.is_none());
    }

    #[test]
    fn test_loaded_cache_rejects_ingestion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.lqc");
        save(&populated_cache(), &path).unwrap();

        let restored = load(&path).unwrap();
        let before = restored.range(SampleKind::Signal, "R1", "T1", None).len();
        restored.ingest(SampleKind::Signal, "s-r1", "s-t1", -1.0, 9999);
        assert_eq!(
            restored.range(SampleKind::Signal, "R1", "T1", None).len(),
            before
        );
    }

    #[test]
    fn test_save_of_snapshot_keeps_creation_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.lqc");

        let snapshot = populated_cache().snapshot();
        save(&snapshot, &path).unwrap();
        let restored = load(&path).unwrap();
        assert_eq!(restored.creation_time(), snapshot.creation_time());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.lqc")).unwrap_err();
        assert!(matches!(err, PersistError::Io(_)));
    }

    #[test]
    fn test_load_foreign_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-cache.lqc");

        // A gzip stream that does not start with the magic record.
        let file = File::create(&path).unwrap();
        let mut out = GzEncoder::new(BufWriter::new(file), Compression::default());
        bincode::serialize_into(&mut out, &0xDEAD_BEEFu32).unwrap();
        bincode::serialize_into(&mut out, &42i64).unwrap();
        out.finish().unwrap().flush().unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, PersistError::BadMagic(0xDEAD_BEEF)));
    }
}
