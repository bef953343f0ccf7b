//! Append-only segment writer for one (series, tag set) pair.
//!
//! A [`SegmentWriter`] owns at most one open segment file at a time: the
//! file of the hour bucket the last appended point fell into. When a point
//! lands in a different hour the current segment is finalized (gzip trailer
//! written, handle closed) and the next one is opened in append mode.
//!
//! # Write pipeline
//!
//! ```text
//! Point -> JSON line -> BufWriter (1 MiB) -> GzEncoder (fast) -> File
//! ```
//!
//! # Durability
//!
//! [`flush`](SegmentWriter::flush) pushes buffered bytes through the
//! compressor with a sync flush and fsyncs the file, so every record written
//! so far is on disk. The gzip trailer is only written on rotation or
//! [`close`](SegmentWriter::close); until then the file is not a complete
//! gzip member and a concurrent reader may see a truncated stream.
//!
//! # Background flush
//!
//! With a non-zero `flush_interval` the writer spawns one thread that waits
//! on a channel with that timeout and flushes on every timeout. `close`
//! signals the thread and joins it before finalizing, so a periodic flush
//! can never touch a segment that is being closed.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::DateTime;
use chrono_tz::Tz;
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::config::WriterConfig;
use crate::error::{Result, WriteError};
use crate::layout;
use crate::point::Point;
use crate::tags::TagSet;

/// Capacity of the buffer in front of the compressor.
const WRITE_BUFFER_CAPACITY: usize = 1 << 20;

/// An open hour segment.
struct OpenSegment {
    hour: DateTime<Tz>,
    path: PathBuf,
    out: BufWriter<GzEncoder<File>>,
}

impl OpenSegment {
    fn open(tag_dir: &Path, hour: DateTime<Tz>) -> Result<Self> {
        let path = layout::segment_path(tag_dir, &hour);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| WriteError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| WriteError::OpenSegment {
                path: path.clone(),
                source,
            })?;

        let encoder = GzEncoder::new(file, Compression::fast());
        Ok(Self {
            hour,
            path,
            out: BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, encoder),
        })
    }

    /// Flushes buffer and compressor state, then fsyncs. No trailer.
    fn flush(&mut self) -> Result<()> {
        // BufWriter::flush drains into the encoder and then flushes it.
        self.out.flush().map_err(|source| WriteError::Flush {
            path: self.path.clone(),
            source,
        })?;
        self.out
            .get_ref()
            .get_ref()
            .sync_all()
            .map_err(|source| WriteError::Sync {
                path: self.path.clone(),
                source,
            })?;
        Ok(())
    }

    /// Writes the gzip trailer and closes the file.
    fn finalize(self) -> Result<()> {
        let path = self.path;
        let encoder = self.out.into_inner().map_err(|e| WriteError::Flush {
            path: path.clone(),
            source: e.into_error(),
        })?;
        let file = encoder.finish().map_err(|source| WriteError::Finalize {
            path: path.clone(),
            source,
        })?;
        file.sync_all()
            .map_err(|source| WriteError::Sync { path, source })?;
        Ok(())
    }
}

/// Mutable state guarded by the writer lock.
struct WriterState {
    segment: Option<OpenSegment>,
    pending: usize,
    closed: bool,
}

/// Handle to the background flush thread.
struct Flusher {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Writer for one tag set of one series.
///
/// All methods take `&self`; appends, rotation, and flushes are serialized
/// by an internal mutex, so a writer can be shared across threads behind an
/// `Arc`. Records land on disk in lock-acquisition order, which is not
/// necessarily timestamp order.
pub struct SegmentWriter {
    series: String,
    tag_hash: String,
    tags: TagSet,
    tag_dir: PathBuf,
    config: WriterConfig,
    state: Arc<Mutex<WriterState>>,
    flusher: Mutex<Option<Flusher>>,
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("series", &self.series)
            .field("tag_hash", &self.tag_hash)
            .field("tags", &self.tags)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SegmentWriter {
    /// Creates a writer for `tags` under `<root>/<series>`.
    ///
    /// No segment is opened until the first append. The labels metadata file
    /// is written best-effort: a failure is logged and otherwise ignored.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use chrono::Utc;
    /// use strata::{Point, SegmentWriter, TagSet, WriterConfig};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let tags = TagSet::from([("player_id", "P:1")]);
    /// let writer = SegmentWriter::new("./data", "players.x", tags.clone(), WriterConfig::default());
    /// writer.append(Point::new(Utc::now(), 12.5, tags))?;
    /// writer.close()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        root: impl AsRef<Path>,
        series: &str,
        tags: TagSet,
        config: WriterConfig,
    ) -> Self {
        let tag_hash = tags.hash();
        let tag_dir = layout::tag_dir(root.as_ref(), series, &tag_hash);

        if let Err(e) = write_labels(&tag_dir, &tags) {
            tracing::warn!(series, tag_hash = %tag_hash, "failed to write labels metadata: {e}");
        }

        let state = Arc::new(Mutex::new(WriterState {
            segment: None,
            pending: 0,
            closed: false,
        }));

        let flusher = if config.flush_interval.is_zero() {
            None
        } else {
            spawn_flusher(series, &tag_hash, Arc::clone(&state), config.flush_interval)
        };

        Self {
            series: series.to_string(),
            tag_hash,
            tags,
            tag_dir,
            config,
            state,
            flusher: Mutex::new(flusher),
        }
    }

    /// Appends a point to the segment of its hour bucket.
    ///
    /// Opens or rotates the segment as needed. If `flush_every` is set and
    /// reached, flushes and fsyncs before returning.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Closed`] after [`close`](Self::close), or any
    /// I/O or encoding error. When an error is returned the point is not
    /// considered written.
    pub fn append(&self, point: Point) -> Result<()> {
        let hour = layout::hour_bucket(point.timestamp, self.config.timezone);
        let line = point.encode_line()?;

        let mut state = self.lock()?;
        if state.closed {
            return Err(self.closed_error());
        }

        let needs_rotation = state
            .segment
            .as_ref()
            .is_none_or(|segment| segment.hour != hour);
        if needs_rotation {
            self.rotate(&mut state, hour)?;
        }

        let Some(segment) = state.segment.as_mut() else {
            return Err(self.closed_error());
        };
        segment
            .out
            .write_all(&line)
            .map_err(|source| WriteError::Write {
                path: segment.path.clone(),
                source,
            })?;

        state.pending += 1;
        if self.config.flush_every > 0 && state.pending >= self.config.flush_every {
            if let Some(segment) = state.segment.as_mut() {
                segment.flush()?;
            }
            state.pending = 0;
        }

        Ok(())
    }

    /// Finalizes the current segment (if any) and opens the one for `hour`.
    fn rotate(&self, state: &mut WriterState, hour: DateTime<Tz>) -> Result<()> {
        if let Some(previous) = state.segment.take() {
            tracing::debug!(
                series = %self.series,
                tag_hash = %self.tag_hash,
                from = %previous.path.display(),
                "rotating segment"
            );
            previous.finalize()?;
        }
        state.pending = 0;
        state.segment = Some(OpenSegment::open(&self.tag_dir, hour)?);
        Ok(())
    }

    /// Flushes buffered records to disk without finalizing the segment.
    ///
    /// A no-op when no segment is open.
    ///
    /// # Errors
    ///
    /// Returns a flush or sync error from the underlying file.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock()?;
        flush_state(&mut state)
    }

    /// Stops the background flusher and finalizes the open segment.
    ///
    /// Idempotent: later calls return `Ok(())` without doing anything.
    /// Appends after close fail with [`WriteError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns an error if finalizing the open segment fails. The writer is
    /// closed regardless.
    pub fn close(&self) -> Result<()> {
        // Join the flusher before taking the state lock.
        let flusher = match self.flusher.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(flusher) = flusher {
            // A send error only means the thread is already gone.
            let _ = flusher.stop.send(());
            if flusher.handle.join().is_err() {
                tracing::warn!(series = %self.series, tag_hash = %self.tag_hash, "flush thread panicked");
            }
        }

        let mut state = self.lock()?;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.pending = 0;
        match state.segment.take() {
            Some(segment) => segment.finalize(),
            None => Ok(()),
        }
    }

    /// Series this writer belongs to.
    pub fn series(&self) -> &str {
        &self.series
    }

    /// Tag hash naming this writer's directory.
    pub fn tag_hash(&self) -> &str {
        &self.tag_hash
    }

    /// Tag set this writer was created for.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Whether [`close`](Self::close) has completed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, WriterState>> {
        self.state.lock().map_err(|_| {
            WriteError::LockPoisoned {
                series: self.series.clone(),
            }
            .into()
        })
    }

    fn closed_error(&self) -> crate::error::StrataError {
        WriteError::Closed {
            series: self.series.clone(),
            tag_hash: self.tag_hash.clone(),
        }
        .into()
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(series = %self.series, tag_hash = %self.tag_hash, "close on drop failed: {e}");
        }
    }
}

fn flush_state(state: &mut WriterState) -> Result<()> {
    match state.segment.as_mut() {
        Some(segment) => {
            segment.flush()?;
            state.pending = 0;
            Ok(())
        }
        None => Ok(()),
    }
}

fn spawn_flusher(
    series: &str,
    tag_hash: &str,
    state: Arc<Mutex<WriterState>>,
    interval: Duration,
) -> Option<Flusher> {
    let (stop, stop_rx) = mpsc::channel::<()>();
    let series_name = series.to_string();
    let hash = tag_hash.to_string();

    let spawned = thread::Builder::new()
        .name(format!("strata-flush-{tag_hash}"))
        .spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Ok(mut guard) = state.lock() else {
                            return;
                        };
                        if guard.closed {
                            return;
                        }
                        if let Err(e) = flush_state(&mut guard) {
                            tracing::debug!(series = %series_name, tag_hash = %hash, "periodic flush failed: {e}");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        });

    match spawned {
        Ok(handle) => Some(Flusher { stop, handle }),
        Err(e) => {
            tracing::warn!(series, tag_hash, "failed to spawn flush thread: {e}");
            None
        }
    }
}

/// Writes `labels.json` atomically (temp file, fsync, rename).
///
/// If a labels file already exists for this hash with a different tag set,
/// the two tag sets collide on the truncated hash; this is reported but the
/// file is still overwritten.
fn write_labels(tag_dir: &Path, tags: &TagSet) -> std::io::Result<()> {
    fs::create_dir_all(tag_dir)?;
    let path = tag_dir.join(layout::LABELS_FILE);

    if let Ok(existing) = fs::read(&path)
        && let Ok(previous) = serde_json::from_slice::<TagSet>(&existing)
        && previous != *tags
    {
        tracing::error!(
            path = %path.display(),
            previous = %previous.canonical(),
            current = %tags.canonical(),
            "tag hash collision"
        );
    }

    let tmp = tag_dir.join(format!("{}.tmp", layout::LABELS_FILE));
    let mut json = serde_json::to_vec_pretty(tags)?;
    json.push(b'\n');

    let mut file = File::create(&tmp)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, &path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};
    use flate2::read::MultiGzDecoder;
    use std::io::{BufRead, BufReader};
    use tempfile::tempdir;

    fn read_segment(path: &Path) -> Vec<Point> {
        let file = File::open(path).unwrap();
        BufReader::new(MultiGzDecoder::new(file))
            .lines()
            .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
            .collect()
    }

    fn tags() -> TagSet {
        TagSet::from([("host", "game01"), ("region", "tokyo")])
    }

    #[test]
    fn test_append_creates_segment_and_labels() {
        let dir = tempdir().unwrap();
        let writer = SegmentWriter::new(dir.path(), "metrics", tags(), WriterConfig::default());

        let base = Utc.with_ymd_and_hms(2025, 8, 26, 12, 34, 0).unwrap();
        writer.append(Point::new(base, 1.0, tags())).unwrap();
        writer.append(Point::new(base + TimeDelta::seconds(1), 2.0, tags())).unwrap();
        writer.close().unwrap();

        let tag_dir = layout::tag_dir(dir.path(), "metrics", &tags().hash());
        let points = read_segment(&tag_dir.join("2025/08/26/12.ndjson.gz"));
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].value, 2.0);

        let labels: TagSet =
            serde_json::from_slice(&fs::read(tag_dir.join("labels.json")).unwrap()).unwrap();
        assert_eq!(labels, tags());
        assert!(!tag_dir.join("labels.json.tmp").exists());
    }

    #[test]
    fn test_rotation_across_hour() {
        let dir = tempdir().unwrap();
        let writer = SegmentWriter::new(dir.path(), "metrics", tags(), WriterConfig::default());

        let base = Utc.with_ymd_and_hms(2025, 8, 26, 12, 59, 50).unwrap();
        for i in 0..20u32 {
            writer
                .append(Point::new(base + TimeDelta::seconds(i64::from(i)), f64::from(i), tags()))
                .unwrap();
        }
        writer.close().unwrap();

        let day = layout::tag_dir(dir.path(), "metrics", &tags().hash()).join("2025/08/26");
        let first = read_segment(&day.join("12.ndjson.gz"));
        let second = read_segment(&day.join("13.ndjson.gz"));
        assert_eq!(first.len(), 10);
        assert_eq!(second.len(), 10);
        assert_eq!(first.last().unwrap().timestamp.format("%H").to_string(), "12");
        assert_eq!(second.first().unwrap().timestamp.format("%H").to_string(), "13");
    }

    #[test]
    fn test_flush_makes_bytes_visible() {
        let dir = tempdir().unwrap();
        let writer = SegmentWriter::new(dir.path(), "metrics", tags(), WriterConfig::default());

        let ts = Utc.with_ymd_and_hms(2025, 8, 26, 12, 0, 10).unwrap();
        writer.append(Point::new(ts, 42.0, tags())).unwrap();

        let path = layout::tag_dir(dir.path(), "metrics", &tags().hash())
            .join("2025/08/26/12.ndjson.gz");
        assert_eq!(fs::metadata(&path).unwrap().len(), 0, "nothing written before flush");

        writer.flush().unwrap();
        assert!(fs::metadata(&path).unwrap().len() > 0);

        writer.close().unwrap();
        let points = read_segment(&path);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 42.0);
    }

    #[test]
    fn test_flush_on_unopened_writer_is_noop() {
        let dir = tempdir().unwrap();
        let writer = SegmentWriter::new(dir.path(), "metrics", tags(), WriterConfig::default());
        writer.flush().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_flush_every_threshold() {
        let dir = tempdir().unwrap();
        let config = WriterConfig::default().with_flush_every(1);
        let writer = SegmentWriter::new(dir.path(), "metrics", tags(), config);

        let ts = Utc.with_ymd_and_hms(2025, 8, 26, 12, 0, 0).unwrap();
        writer.append(Point::new(ts, 1.0, tags())).unwrap();

        let path = layout::tag_dir(dir.path(), "metrics", &tags().hash())
            .join("2025/08/26/12.ndjson.gz");
        assert!(fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_periodic_flush() {
        let dir = tempdir().unwrap();
        let config = WriterConfig::default().with_flush_interval(Duration::from_millis(50));
        let writer = SegmentWriter::new(dir.path(), "metrics", tags(), config);

        let base = Utc.with_ymd_and_hms(2025, 8, 26, 13, 0, 0).unwrap();
        for i in 0..5u32 {
            writer
                .append(Point::new(base + TimeDelta::seconds(i64::from(i)), f64::from(i), tags()))
                .unwrap();
        }

        let path = layout::tag_dir(dir.path(), "metrics", &tags().hash())
            .join("2025/08/26/13.ndjson.gz");
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            if fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false) {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "periodic flush never happened");
            thread::sleep(Duration::from_millis(10));
        }

        writer.close().unwrap();
        let points = read_segment(&path);
        assert_eq!(points.len(), 5);
        for (p, expected) in points.iter().zip(0u32..) {
            assert_eq!(p.value, f64::from(expected));
        }
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_appends() {
        let dir = tempdir().unwrap();
        let config = WriterConfig::default().with_flush_interval(Duration::from_millis(10));
        let writer = SegmentWriter::new(dir.path(), "metrics", tags(), config);

        let ts = Utc.with_ymd_and_hms(2025, 8, 26, 12, 0, 0).unwrap();
        writer.append(Point::new(ts, 1.0, tags())).unwrap();

        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.is_closed());

        let err = writer.append(Point::new(ts, 2.0, tags())).unwrap_err();
        assert!(matches!(
            err,
            crate::error::StrataError::Write(WriteError::Closed { .. })
        ));

        let path = layout::tag_dir(dir.path(), "metrics", &tags().hash())
            .join("2025/08/26/12.ndjson.gz");
        assert_eq!(read_segment(&path).len(), 1);
    }

    #[test]
    fn test_reopen_appends_new_gzip_member() {
        let dir = tempdir().unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 8, 26, 12, 0, 0).unwrap();

        for value in [1.0, 2.0] {
            let writer = SegmentWriter::new(dir.path(), "metrics", tags(), WriterConfig::default());
            writer.append(Point::new(ts, value, tags())).unwrap();
            writer.close().unwrap();
        }

        let path = layout::tag_dir(dir.path(), "metrics", &tags().hash())
            .join("2025/08/26/12.ndjson.gz");
        let values: Vec<f64> = read_segment(&path).iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_timezone_names_files_but_not_values() {
        let dir = tempdir().unwrap();
        let config = WriterConfig::default().with_timezone(chrono_tz::Asia::Tokyo);
        let writer = SegmentWriter::new(dir.path(), "metrics", tags(), config);

        let ts = Utc.with_ymd_and_hms(2025, 8, 26, 20, 10, 0).unwrap();
        writer.append(Point::new(ts, 7.0, tags())).unwrap();
        writer.close().unwrap();

        let path = layout::tag_dir(dir.path(), "metrics", &tags().hash())
            .join("2025/08/27/05.ndjson.gz");
        let points = read_segment(&path);
        assert_eq!(points[0].timestamp, ts);
    }

    #[test]
    fn test_collision_check_keeps_writer_usable() {
        let dir = tempdir().unwrap();
        let tag_dir = layout::tag_dir(dir.path(), "metrics", &tags().hash());
        fs::create_dir_all(&tag_dir).unwrap();
        fs::write(tag_dir.join("labels.json"), r#"{"host":"someone-else"}"#).unwrap();

        let writer = SegmentWriter::new(dir.path(), "metrics", tags(), WriterConfig::default());
        let ts = Utc.with_ymd_and_hms(2025, 8, 26, 12, 0, 0).unwrap();
        writer.append(Point::new(ts, 1.0, tags())).unwrap();
        writer.close().unwrap();

        let labels: TagSet =
            serde_json::from_slice(&fs::read(tag_dir.join("labels.json")).unwrap()).unwrap();
        assert_eq!(labels, tags());
    }
}
