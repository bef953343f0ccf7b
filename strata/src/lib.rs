//! # strata
//!
//! Embedded tagged time-series storage on plain files.
//!
//! strata appends `(timestamp, value, tags)` points to gzip-compressed
//! newline-delimited JSON files, partitioned by series, tag set and hour.
//! It is meant for collectors and pollers that write a steady trickle of
//! samples and read them back by time range, with no database to run.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - One directory per series, one subdirectory per tag set (content hash)
//! - One gzip file per hour, rotated automatically as time advances
//! - Durable flushes on demand, every N appends, or on a background timer
//! - Stateless range scans that read only the filesystem
//! - Day-granular retention by deleting whole date directories
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chrono::{TimeDelta, Utc};
//! use strata::{Point, SeriesStore, TagSet, WriterConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SeriesStore::new("./my_metrics", WriterConfig::default());
//!
//! let tags = TagSet::from([("host", "web1")]);
//! store.append("cpu.usage", Point::new(Utc::now(), 85.5, tags))?;
//!
//! // Segments are readable once finalized
//! store.close()?;
//!
//! let to = Utc::now();
//! let from = to - TimeDelta::hours(1);
//! strata::scan_range("./my_metrics", "cpu.usage", from, to, |point| {
//!     println!("{} {} {:?}", point.timestamp, point.value, point.tags);
//!     true
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`SeriesStore`] — Top-level handle; one router per series, lifecycle, retention
//! - [`Router`] — One writer per tag set within a series
//! - [`SegmentWriter`] — Hourly gzip segments for one (series, tag set)
//! - [`scan_range`] — Reads points back by inclusive time window
//! - [`delete_before_day`] — Removes expired day directories
//!
//! ## Modules
//!
//! - [`store`] — Series store and convenience writes
//! - [`router`] — Tag-hash routing
//! - [`segment`] — Segment writer, rotation, flushing
//! - [`scan`] — Range scanner
//! - [`retention`] — Retention pruner
//! - [`layout`] — On-disk path scheme
//! - [`tags`] — Tag sets and their hash
//! - [`point`] — The stored record
//! - [`config`] — Writer and store configuration
//! - [`error`] — Error types

pub mod config;
pub mod error;
pub mod layout;
pub mod point;
pub mod retention;
pub mod router;
pub mod scan;
pub mod segment;
pub mod store;
pub mod tags;

// Re-export primary API types at crate root for convenience.
pub use config::{StoreConfig, WriterConfig};
pub use error::{Result, StrataError};
pub use point::Point;
pub use retention::{delete_before_date, delete_before_day};
pub use router::Router;
pub use scan::{collect_range, scan_range, scan_range_in};
pub use segment::SegmentWriter;
pub use store::{EVENT_KIND_TAG, EVENTS_SERIES, SeriesStore};
pub use tags::TagSet;
