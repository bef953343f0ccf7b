//! Range scans over the on-disk segment tree.
//!
//! Scanning is stateless: it reads only the filesystem and never consults
//! in-memory writers. For every tag-hash directory of a series it computes
//! the hour segments covering `[from, to]`, decodes each one that exists,
//! and hands points inside the window to a callback.
//!
//! Segments that are still open for writing have no gzip trailer yet and
//! may fail with [`ScanError::Truncated`]. Close the writers (or the store)
//! before reading data that is still being written.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use flate2::read::MultiGzDecoder;

use crate::error::{Result, ScanError};
use crate::layout;
use crate::point::Point;

/// Outcome of scanning one file or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Streams every point of `series` with `from <= t <= to` to `f`.
///
/// Segments are located using UTC hour buckets. Use [`scan_range_in`] for
/// a store whose writers name files in another timezone.
///
/// `f` returns `true` to keep going; returning `false` ends the whole scan
/// early and successfully.
///
/// # Errors
///
/// - [`ScanError::InvalidRange`] if `to < from`
/// - [`ScanError::ReadDir`] if the series directory is missing or unreadable
/// - [`ScanError::Truncated`] / [`ScanError::MalformedRecord`] on decode failure
///
/// # Examples
///
/// ```rust,no_run
/// use chrono::{TimeDelta, Utc};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let to = Utc::now();
/// let from = to - TimeDelta::hours(1);
/// let mut count = 0;
/// strata::scan_range("./data", "players.x", from, to, |point| {
///     count += 1;
///     point.value < 1000.0
/// })?;
/// # Ok(())
/// # }
/// ```
pub fn scan_range<F>(
    root: impl AsRef<Path>,
    series: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    f: F,
) -> Result<()>
where
    F: FnMut(Point) -> bool,
{
    scan_range_in(root, series, from, to, Tz::UTC, f)
}

/// Like [`scan_range`], with segment hours named in `tz`.
///
/// # Errors
///
/// Same as [`scan_range`].
pub fn scan_range_in<F>(
    root: impl AsRef<Path>,
    series: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    tz: Tz,
    mut f: F,
) -> Result<()>
where
    F: FnMut(Point) -> bool,
{
    if to < from {
        return Err(ScanError::InvalidRange { from, to }.into());
    }

    let series_dir = layout::series_dir(root.as_ref(), series);
    let entries = fs::read_dir(&series_dir).map_err(|source| ScanError::ReadDir {
        path: series_dir.clone(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| ScanError::ReadDir {
            path: series_dir.clone(),
            source,
        })?;
        if !entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }

        let tag_dir = entry.path();
        for hour in hour_segments(from, to, tz) {
            let path = layout::segment_path(&tag_dir, &hour);
            if scan_file(&path, from, to, &mut f)? == Flow::Stop {
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Collects every point of `series` in `[from, to]` into a vector.
///
/// # Errors
///
/// Same as [`scan_range`].
pub fn collect_range(
    root: impl AsRef<Path>,
    series: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Point>> {
    let mut points = Vec::new();
    scan_range(root, series, from, to, |point| {
        points.push(point);
        true
    })?;
    Ok(points)
}

/// Hour buckets (in `tz`) that can hold points in `[from, to]`, in order.
///
/// Buckets are produced lazily and stop at the last representable hour.
/// Consecutive instants that map to the same local hour (a repeated hour
/// at a DST fall-back) yield a single bucket, so no file is read twice.
fn hour_segments(from: DateTime<Utc>, to: DateTime<Utc>, tz: Tz) -> HourSegments {
    HourSegments {
        next: Some(layout::hour_bucket(from, tz)),
        to,
        tz,
        last: None,
    }
}

/// Iterator returned by [`hour_segments`].
struct HourSegments {
    next: Option<DateTime<Tz>>,
    to: DateTime<Utc>,
    tz: Tz,
    last: Option<(i32, u32, u32, u32)>,
}

impl Iterator for HourSegments {
    type Item = DateTime<Tz>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let hour = self.next.take()?;
            let start = hour.with_timezone(&Utc);
            if start > self.to {
                return None;
            }
            self.next = start
                .checked_add_signed(TimeDelta::hours(1))
                .map(|next| layout::hour_bucket(next, self.tz));

            let key = layout::hour_key(&hour);
            if self.last != Some(key) {
                self.last = Some(key);
                return Some(hour);
            }
        }
    }
}

/// Decodes one segment file. A missing file is skipped.
fn scan_file<F>(path: &Path, from: DateTime<Utc>, to: DateTime<Utc>, f: &mut F) -> Result<Flow>
where
    F: FnMut(Point) -> bool,
{
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Flow::Continue),
        Err(source) => {
            return Err(ScanError::OpenSegment {
                path: path.to_path_buf(),
                source,
            }
            .into());
        }
    };

    // Opened but never flushed: no gzip header yet, nothing to read.
    if file.metadata().is_ok_and(|m| m.len() == 0) {
        return Ok(Flow::Continue);
    }

    let reader = BufReader::new(MultiGzDecoder::new(file));
    for record in serde_json::Deserializer::from_reader(reader).into_iter::<Point>() {
        let point = record.map_err(|e| -> crate::error::StrataError {
            if e.is_io() {
                ScanError::Truncated {
                    path: path.to_path_buf(),
                    source: e.into(),
                }
                .into()
            } else {
                ScanError::MalformedRecord {
                    path: path.to_path_buf(),
                    source: e,
                }
                .into()
            }
        })?;

        if point.timestamp < from || point.timestamp > to {
            continue;
        }
        if !f(point) {
            return Ok(Flow::Stop);
        }
    }

    Ok(Flow::Continue)
}
