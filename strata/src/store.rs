//! Series store: the top-level write API.
//!
//! A [`SeriesStore`] maps series names to [`Router`]s, creating each router
//! lazily on first use and sharing it between all callers. It adds a few
//! convenience writes on top of [`Router::append`] and owns the store-wide
//! lifecycle (flush, close) and retention.
//!
//! # File Layout
//!
//! ```text
//! root/
//! ├── players.x/                     <- one directory per series
//! │   └── 3f2a9c0d1e4b5a67/          <- one directory per tag set
//! │       ├── labels.json
//! │       └── 2025/08/26/12.ndjson.gz
//! ├── players.z/
//! └── events.count/
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use strata::{SeriesStore, TagSet, WriterConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SeriesStore::new("./data", WriterConfig::default());
//! let tags = TagSet::from([("player_id", "P:1"), ("world", "Navezgane")]);
//!
//! // Writes players.x and players.z
//! store.append_vector("players", Utc::now(), [("x", 123.45), ("z", -67.89)], &tags)?;
//!
//! // Writes a 1.0 to events.count with kind=player_connect
//! store.append_event(Utc::now(), "player_connect", tags)?;
//!
//! // Finalize every segment before reading
//! store.close()?;
//!
//! // Keep today and the previous 7 days
//! store.retention(7, chrono_tz::UTC, &[])?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::config::{StoreConfig, WriterConfig};
use crate::error::{Result, StoreError};
use crate::layout;
use crate::point::Point;
use crate::retention;
use crate::router::{Router, first_error};
use crate::tags::TagSet;

/// Series receiving [`SeriesStore::append_event`] points.
pub const EVENTS_SERIES: &str = "events.count";

/// Tag key carrying the event kind in [`EVENTS_SERIES`].
pub const EVENT_KIND_TAG: &str = "kind";

/// Produces the writer configuration for a series.
pub type WriterFactory = dyn Fn(&str) -> WriterConfig + Send + Sync;

/// Routers of a store, plus the closed flag flipped under the same lock.
#[derive(Debug, Default)]
struct Routers {
    by_series: HashMap<String, Arc<Router>>,
    closed: bool,
}

/// Top-level handle of a strata root directory.
///
/// # Thread Safety
///
/// All methods take `&self` and the store is `Send + Sync`; share it behind
/// an `Arc` between poller threads. At most one router per series and one
/// writer per (series, tag set) exist at any time within one store. Two
/// stores (or processes) must never write the same series and tag set.
pub struct SeriesStore {
    root: PathBuf,
    factory: Box<WriterFactory>,
    routers: RwLock<Routers>,
    close_lock: Mutex<()>,
}

impl std::fmt::Debug for SeriesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesStore")
            .field("root", &self.root)
            .field("routers", &self.routers)
            .finish_non_exhaustive()
    }
}

impl SeriesStore {
    /// Creates a store using the same writer configuration for every series.
    ///
    /// Nothing is created on disk until the first append.
    pub fn new(root: impl Into<PathBuf>, config: WriterConfig) -> Self {
        Self::with_factory(root, move |_| config)
    }

    /// Creates a store whose writer configuration is chosen per series.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use strata::{SeriesStore, WriterConfig};
    ///
    /// let store = SeriesStore::with_factory("./data", |series| {
    ///     if series.starts_with("events.") {
    ///         WriterConfig::default().with_flush_every(1)
    ///     } else {
    ///         WriterConfig::default().with_flush_interval(Duration::from_secs(5))
    ///     }
    /// });
    /// ```
    pub fn with_factory<F>(root: impl Into<PathBuf>, factory: F) -> Self
    where
        F: Fn(&str) -> WriterConfig + Send + Sync + 'static,
    {
        Self {
            root: root.into(),
            factory: Box::new(factory),
            routers: RwLock::new(Routers::default()),
            close_lock: Mutex::new(()),
        }
    }

    /// Creates a store from a validated [`StoreConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if validation fails.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.root.clone(), config.writer))
    }

    /// Returns the router for `series`, creating it on first use.
    ///
    /// Concurrent first calls for the same series all receive the same
    /// instance.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] once the store has been closed.
    pub fn ensure_router(&self, series: &str) -> Result<Arc<Router>> {
        {
            let routers = self.routers.read().map_err(|_| StoreError::LockPoisoned)?;
            if routers.closed {
                return Err(StoreError::Closed.into());
            }
            if let Some(router) = routers.by_series.get(series) {
                return Ok(Arc::clone(router));
            }
        }

        let candidate = Arc::new(Router::new(&self.root, series, (self.factory)(series)));

        let (installed, spare) = {
            let mut routers = self.routers.write().map_err(|_| StoreError::LockPoisoned)?;
            if routers.closed {
                (None, Some(candidate))
            } else if let Some(existing) = routers.by_series.get(series) {
                (Some(Arc::clone(existing)), Some(candidate))
            } else {
                routers
                    .by_series
                    .insert(series.to_string(), Arc::clone(&candidate));
                (Some(candidate), None)
            }
        };

        if let Some(spare) = spare
            && let Err(e) = spare.close()
        {
            tracing::warn!(series, "failed to close discarded router: {e}");
        }

        installed.ok_or_else(|| StoreError::Closed.into())
    }

    /// Appends one point to `series`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] after close, or any write error.
    pub fn append(&self, series: &str, point: Point) -> Result<()> {
        self.ensure_router(series)?.append(point)
    }

    /// Appends one point per axis to the series `<base>.<axis>`, all with the
    /// same timestamp and tags.
    ///
    /// Stops at the first failing axis; earlier axes stay written.
    ///
    /// # Errors
    ///
    /// Returns the first append error.
    pub fn append_vector<Tz, I, A>(
        &self,
        base: &str,
        timestamp: DateTime<Tz>,
        axes: I,
        tags: &TagSet,
    ) -> Result<()>
    where
        Tz: TimeZone,
        I: IntoIterator<Item = (A, f64)>,
        A: AsRef<str>,
    {
        let timestamp = timestamp.with_timezone(&Utc);
        for (axis, value) in axes {
            let series = format!("{base}.{}", axis.as_ref());
            self.append(&series, Point::new(timestamp, value, tags.clone()))?;
        }
        Ok(())
    }

    /// Records one occurrence of an event: value `1.0` in
    /// [`EVENTS_SERIES`], with `kind` added to the tags.
    ///
    /// # Errors
    ///
    /// Returns any append error.
    pub fn append_event<Tz: TimeZone>(
        &self,
        timestamp: DateTime<Tz>,
        kind: &str,
        mut tags: TagSet,
    ) -> Result<()> {
        tags.insert(EVENT_KIND_TAG, kind);
        self.append(EVENTS_SERIES, Point::new(timestamp, 1.0, tags))
    }

    /// Flushes every router.
    ///
    /// # Errors
    ///
    /// Returns the first error; every router is still attempted.
    pub fn flush_all(&self) -> Result<()> {
        let routers = self.routers()?;
        first_error("store", "flush", routers.iter().map(|r| r.flush()))
    }

    /// Closes every router and refuses further [`ensure_router`] calls.
    ///
    /// Idempotent: only the first call does any work.
    ///
    /// # Errors
    ///
    /// Returns the first error; every router is still attempted.
    ///
    /// [`ensure_router`]: Self::ensure_router
    pub fn close(&self) -> Result<()> {
        let _serialized = self.close_lock.lock().map_err(|_| StoreError::LockPoisoned)?;

        let routers = {
            let mut guard = self.routers.write().map_err(|_| StoreError::LockPoisoned)?;
            if guard.closed {
                return Ok(());
            }
            guard.closed = true;
            guard.by_series.values().cloned().collect::<Vec<_>>()
        };

        tracing::debug!(root = %self.root.display(), routers = routers.len(), "closing store");
        first_error("store", "close", routers.iter().map(|r| r.close()))
    }

    /// Deletes day directories older than `days` calendar days before today
    /// (in `tz`). `days = 0` keeps only today.
    ///
    /// With an empty `series` list every subdirectory of the root is treated
    /// as a series. Works whether or not the store is closed.
    ///
    /// Returns the number of day directories removed.
    ///
    /// # Errors
    ///
    /// Returns the first error; every series is still attempted.
    pub fn retention(&self, days: u32, tz: Tz, series: &[&str]) -> Result<usize> {
        self.retention_at(Utc::now(), days, tz, series)
    }

    /// [`retention`](Self::retention) with an explicit "now".
    ///
    /// # Errors
    ///
    /// Same as [`retention`](Self::retention).
    pub fn retention_at(
        &self,
        now: DateTime<Utc>,
        days: u32,
        tz: Tz,
        series: &[&str],
    ) -> Result<usize> {
        let today = now.with_timezone(&tz).date_naive();
        let cutoff = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);

        let names: Vec<String> = if series.is_empty() {
            self.discover_series()?
        } else {
            series.iter().map(|s| (*s).to_string()).collect()
        };

        let mut removed = 0;
        let results = names.iter().map(|name| {
            let series_dir = layout::series_dir(&self.root, name);
            retention::delete_before_date(&series_dir, cutoff).map(|n| {
                removed += n;
            })
        });
        first_error("retention", "prune", results)?;
        Ok(removed)
    }

    /// Lists series directories under the root. A missing root has none.
    fn discover_series(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::DirectoryAccess {
                    path: self.root.clone(),
                    source,
                }
                .into());
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::DirectoryAccess {
                path: self.root.clone(),
                source,
            })?;
            if entry.file_type().is_ok_and(|t| t.is_dir())
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of routers created so far.
    pub fn router_count(&self) -> usize {
        self.routers.read().map(|r| r.by_series.len()).unwrap_or(0)
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.routers.read().map(|r| r.closed).unwrap_or(true)
    }

    fn routers(&self) -> Result<Vec<Arc<Router>>> {
        let guard = self.routers.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(guard.by_series.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::thread;
    use tempfile::tempdir;

    fn test_store(root: &Path) -> SeriesStore {
        SeriesStore::new(root, WriterConfig::default().with_flush_every(1))
    }

    #[test]
    fn test_ensure_router_returns_shared_instance() {
        let dir = tempdir().unwrap();
        let store = Arc::new(test_store(dir.path()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.ensure_router("players.x").unwrap())
            })
            .collect();
        let routers: Vec<Arc<Router>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for router in &routers[1..] {
            assert!(Arc::ptr_eq(&routers[0], router));
        }
        assert_eq!(store.router_count(), 1);
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());
        store.append("players.x", Point::at(Utc::now(), 10.0)).unwrap();
        store.flush_all().unwrap();

        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());

        let err = store.ensure_router("players.x").unwrap_err();
        assert!(matches!(err, crate::error::StrataError::Store(StoreError::Closed)));
        assert!(store.append("players.y", Point::at(Utc::now(), 1.0)).is_err());
    }

    #[test]
    fn test_append_event_sets_kind() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());
        let now = Utc::now();
        store
            .append_event(now, "player_death", TagSet::from([("player_id", "P:9")]))
            .unwrap();
        store.close().unwrap();

        let points = crate::scan::collect_range(dir.path(), EVENTS_SERIES, now, now).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 1.0);
        assert_eq!(points[0].tags.get("kind"), Some("player_death"));
        assert_eq!(points[0].tags.get("player_id"), Some("P:9"));
    }

    #[test]
    fn test_retention_boundary_across_midnight_dst_gap() {
        // Havana springs forward at 2025-03-09 00:00, so 00:30 that day never
        // exists. One day before 2025-03-10 00:30 CDT is still 2025-03-09.
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());
        let tag_dir = dir.path().join("s").join("aaaa");
        let mar08 = tag_dir.join("2025/03/08");
        let mar09 = tag_dir.join("2025/03/09");
        fs::create_dir_all(&mar08).unwrap();
        fs::create_dir_all(&mar09).unwrap();

        let now = Utc.with_ymd_and_hms(2025, 3, 10, 4, 30, 0).unwrap();
        let removed = store
            .retention_at(now, 1, chrono_tz::America::Havana, &["s"])
            .unwrap();

        assert_eq!(removed, 1);
        assert!(!mar08.exists());
        assert!(mar09.exists());
    }

    #[test]
    fn test_retention_without_series_on_missing_root() {
        let dir = tempdir().unwrap();
        let store = test_store(&dir.path().join("never-created"));
        assert_eq!(store.retention(0, Tz::UTC, &[]).unwrap(), 0);
    }

    #[test]
    fn test_retention_reports_first_error_but_prunes_others() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());
        let old = Utc::now() - TimeDelta::days(3);
        store.append("players.x", Point::at(old, 1.0)).unwrap();
        store.close().unwrap();

        let result = store.retention(0, Tz::UTC, &["missing", "players.x"]);
        assert!(result.is_err());

        let points = crate::scan::collect_range(
            dir.path(),
            "players.x",
            old - TimeDelta::minutes(1),
            old + TimeDelta::minutes(1),
        )
        .unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn test_factory_is_consulted_per_series() {
        let dir = tempdir().unwrap();
        let store = SeriesStore::with_factory(dir.path(), |series| {
            if series == "events.count" {
                WriterConfig::default().with_flush_every(1)
            } else {
                WriterConfig::default()
            }
        });
        store.append_event(Utc::now(), "player_connect", TagSet::new()).unwrap();

        let tags = TagSet::from([("kind", "player_connect")]);
        let router = store.ensure_router(EVENTS_SERIES).unwrap();
        assert!(router.writer(&tags.hash()).is_some());
        store.close().unwrap();
    }
}
