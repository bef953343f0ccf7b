//! On-disk layout of a strata root.
//!
//! ```text
//! <root>/
//! └── <series>/
//!     └── <tag_hash>/                  16 hex chars, see TagSet::hash
//!         ├── labels.json             tag set that produced the hash
//!         └── <YYYY>/<MM>/<DD>/
//!             └── <HH>.ndjson.gz      one gzip NDJSON segment per hour
//! ```
//!
//! Year, month, day and hour are taken in the writer's configured timezone.
//! The layout is a compatibility contract: readers locate segments purely by
//! computing these paths, without any index.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// File extension of segment files (without the leading dot).
pub const SEGMENT_EXTENSION: &str = "ndjson.gz";

/// Name of the per-tag-hash labels metadata file.
pub const LABELS_FILE: &str = "labels.json";

/// Returns the start of the local hour (in `tz`) containing `ts`.
///
/// Computed by subtracting the local minutes and seconds, so offsets that
/// are not whole hours (e.g. +05:30) bucket correctly. When the hour start
/// lies before the earliest representable instant, `ts` itself is returned;
/// its local year, month, day and hour are the same.
pub fn hour_bucket(ts: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    let local = ts.with_timezone(&tz);
    let into_hour = TimeDelta::seconds(i64::from(local.minute()) * 60 + i64::from(local.second()))
        + TimeDelta::nanoseconds(i64::from(local.nanosecond()));
    local.checked_sub_signed(into_hour).unwrap_or(local)
}

/// Identity of an hour segment: local `(year, month, day, hour)`.
pub fn hour_key<T: TimeZone>(hour: &DateTime<T>) -> (i32, u32, u32, u32) {
    (hour.year(), hour.month(), hour.day(), hour.hour())
}

/// Directory of one series.
pub fn series_dir(root: &Path, series: &str) -> PathBuf {
    root.join(series)
}

/// Directory of one tag set within a series.
pub fn tag_dir(root: &Path, series: &str, tag_hash: &str) -> PathBuf {
    series_dir(root, series).join(tag_hash)
}

/// Path of the labels metadata file for a tag hash.
pub fn labels_path(root: &Path, series: &str, tag_hash: &str) -> PathBuf {
    tag_dir(root, series, tag_hash).join(LABELS_FILE)
}

/// Day directory (`YYYY/MM/DD`) of an hour bucket, relative to a tag directory.
pub fn day_dir<T: TimeZone>(tag_dir: &Path, hour: &DateTime<T>) -> PathBuf
where
    T::Offset: std::fmt::Display,
{
    tag_dir
        .join(hour.format("%Y").to_string())
        .join(hour.format("%m").to_string())
        .join(hour.format("%d").to_string())
}

/// Segment file path (`YYYY/MM/DD/HH.ndjson.gz`) of an hour bucket.
pub fn segment_path<T: TimeZone>(tag_dir: &Path, hour: &DateTime<T>) -> PathBuf
where
    T::Offset: std::fmt::Display,
{
    day_dir(tag_dir, hour).join(format!("{}.{SEGMENT_EXTENSION}", hour.format("%H")))
}

/// Composite `yyyymmdd` key used to compare calendar days.
pub fn day_key(year: u32, month: u32, day: u32) -> u32 {
    year * 10_000 + month * 100 + day
}

/// Composite day key of a calendar date.
pub fn date_key(date: NaiveDate) -> u32 {
    // Years before 0 never occur in partition names.
    let year = u32::try_from(date.year()).unwrap_or(0);
    day_key(year, date.month(), date.day())
}
