//! Tag-hash routing for one series.
//!
//! A [`Router`] owns one [`SegmentWriter`] per distinct tag set seen in its
//! series and forwards each point to the writer for the point's tag hash.
//! Writers are created lazily on first use and live until the router is
//! closed.
//!
//! # Single writer per tag hash
//!
//! Creating a writer touches the filesystem (labels metadata) and may spawn
//! a flush thread, so it happens outside the map lock. Two callers racing on
//! a new tag set may both build one; whichever inserts first wins and the
//! other closes and drops its instance without ever writing through it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::config::WriterConfig;
use crate::error::{Result, StrataError, WriteError};
use crate::point::Point;
use crate::segment::SegmentWriter;

/// Writers of a router, plus the closed flag flipped under the same lock.
#[derive(Debug, Default)]
struct Writers {
    by_hash: HashMap<String, Arc<SegmentWriter>>,
    closed: bool,
}

/// Routes points of one series to per-tag-set writers.
#[derive(Debug)]
pub struct Router {
    root: PathBuf,
    series: String,
    config: WriterConfig,
    writers: RwLock<Writers>,
}

impl Router {
    /// Creates an empty router for `series` under `root`.
    pub fn new(root: impl Into<PathBuf>, series: &str, config: WriterConfig) -> Self {
        Self {
            root: root.into(),
            series: series.to_string(),
            config,
            writers: RwLock::new(Writers::default()),
        }
    }

    /// Appends a point to the writer for its tag set, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Closed`] if the router is closed, or whatever
    /// the writer's append returns.
    pub fn append(&self, point: Point) -> Result<()> {
        let writer = self.writer_for(&point)?;
        writer.append(point)
    }

    /// Looks up or creates the writer for the point's tag set.
    fn writer_for(&self, point: &Point) -> Result<Arc<SegmentWriter>> {
        let tag_hash = point.tags.hash();

        {
            let writers = self.read()?;
            if let Some(writer) = writers.by_hash.get(&tag_hash) {
                return Ok(Arc::clone(writer));
            }
            if writers.closed {
                return Err(self.closed_error(tag_hash));
            }
        }

        let candidate = Arc::new(SegmentWriter::new(
            &self.root,
            &self.series,
            point.tags.clone(),
            self.config,
        ));

        let (installed, spare) = {
            let mut writers = self.write()?;
            if writers.closed {
                (None, Some(candidate))
            } else if let Some(existing) = writers.by_hash.get(&tag_hash) {
                (Some(Arc::clone(existing)), Some(candidate))
            } else {
                writers.by_hash.insert(tag_hash.clone(), Arc::clone(&candidate));
                (Some(candidate), None)
            }
        };

        if let Some(spare) = spare
            && let Err(e) = spare.close()
        {
            tracing::warn!(series = %self.series, tag_hash = %tag_hash, "failed to close discarded writer: {e}");
        }

        installed.ok_or_else(|| self.closed_error(tag_hash))
    }

    /// Flushes every writer.
    ///
    /// Every writer is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; later ones are logged.
    pub fn flush(&self) -> Result<()> {
        let writers = self.snapshot()?;
        first_error(&self.series, "flush", writers.iter().map(|w| w.flush()))
    }

    /// Closes every writer. Idempotent; a closed router rejects new tag sets.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; later ones are logged.
    pub fn close(&self) -> Result<()> {
        let writers = {
            let mut guard = self.write()?;
            guard.closed = true;
            guard.by_hash.values().cloned().collect::<Vec<_>>()
        };
        first_error(&self.series, "close", writers.iter().map(|w| w.close()))
    }

    /// Series this router writes.
    pub fn series(&self) -> &str {
        &self.series
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of writers (distinct tag sets) created so far.
    pub fn writer_count(&self) -> usize {
        self.read().map(|w| w.by_hash.len()).unwrap_or(0)
    }

    /// Returns the writer for a tag hash, if one exists.
    pub fn writer(&self, tag_hash: &str) -> Option<Arc<SegmentWriter>> {
        self.read().ok()?.by_hash.get(tag_hash).cloned()
    }

    fn snapshot(&self) -> Result<Vec<Arc<SegmentWriter>>> {
        Ok(self.read()?.by_hash.values().cloned().collect())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Writers>> {
        self.writers.read().map_err(|_| self.poisoned())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Writers>> {
        self.writers.write().map_err(|_| self.poisoned())
    }

    fn poisoned(&self) -> StrataError {
        WriteError::LockPoisoned {
            series: self.series.clone(),
        }
        .into()
    }

    fn closed_error(&self, tag_hash: String) -> StrataError {
        WriteError::Closed {
            series: self.series.clone(),
            tag_hash,
        }
        .into()
    }
}

/// Drains `results`, returning the first error and logging the rest.
pub(crate) fn first_error(
    scope: &str,
    op: &str,
    results: impl Iterator<Item = Result<()>>,
) -> Result<()> {
    let mut first = None;
    for result in results {
        if let Err(e) = result {
            if first.is_none() {
                first = Some(e);
            } else {
                tracing::warn!(scope, op, "additional error suppressed: {e}");
            }
        }
    }
    first.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TagSet;
    use chrono::{TimeZone, Utc};
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_one_writer_per_tag_set() {
        let dir = tempdir().unwrap();
        let router = Router::new(dir.path(), "metrics", WriterConfig::default());
        let ts = Utc.with_ymd_and_hms(2025, 8, 26, 10, 0, 0).unwrap();

        let tokyo = TagSet::from([("region", "tokyo")]);
        let osaka = TagSet::from([("region", "osaka")]);
        router.append(Point::new(ts, 1.0, tokyo.clone())).unwrap();
        router.append(Point::new(ts, 2.0, tokyo.clone())).unwrap();
        router.append(Point::new(ts, 3.0, osaka)).unwrap();
        router.append(Point::at(ts, 4.0)).unwrap();

        assert_eq!(router.writer_count(), 3);
        assert!(router.writer(&tokyo.hash()).is_some());
        assert!(router.writer(&TagSet::new().hash()).is_some());
        router.close().unwrap();
    }

    #[test]
    fn test_concurrent_first_use_installs_single_writer() {
        let dir = tempdir().unwrap();
        let router = Arc::new(Router::new(dir.path(), "metrics", WriterConfig::default()));
        let ts = Utc.with_ymd_and_hms(2025, 8, 26, 10, 0, 0).unwrap();
        let tags = TagSet::from([("player_id", "P:1")]);

        let handles: Vec<_> = (0..16u32)
            .map(|i| {
                let router = Arc::clone(&router);
                let tags = tags.clone();
                thread::spawn(move || router.append(Point::new(ts, f64::from(i), tags)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(router.writer_count(), 1);
        router.close().unwrap();

        let points = crate::scan::collect_range(dir.path(), "metrics", ts, ts).unwrap();
        assert_eq!(points.len(), 16);
    }

    #[test]
    fn test_close_idempotent_and_rejects_new_tag_sets() {
        let dir = tempdir().unwrap();
        let router = Router::new(dir.path(), "metrics", WriterConfig::default());
        let ts = Utc.with_ymd_and_hms(2025, 8, 26, 10, 0, 0).unwrap();
        router.append(Point::at(ts, 1.0)).unwrap();

        router.close().unwrap();
        router.close().unwrap();

        assert!(router.append(Point::at(ts, 2.0)).is_err());
        let fresh = Point::new(ts, 3.0, TagSet::from([("new", "tag")]));
        assert!(router.append(fresh).is_err());
        assert_eq!(router.writer_count(), 1);
    }

    #[test]
    fn test_flush_with_no_writers() {
        let dir = tempdir().unwrap();
        let router = Router::new(dir.path(), "metrics", WriterConfig::default());
        router.flush().unwrap();
        router.close().unwrap();
    }

    #[test]
    fn test_first_error_keeps_first() {
        let results = vec![
            Ok(()),
            Err(StrataError::from(WriteError::LockPoisoned { series: "a".into() })),
            Err(StrataError::from(WriteError::LockPoisoned { series: "b".into() })),
        ];
        let err = first_error("test", "flush", results.into_iter()).unwrap_err();
        assert!(err.to_string().contains("'a'"));
    }
}
