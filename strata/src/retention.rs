//! Day-granular retention pruning.
//!
//! Pruning works purely on the directory tree and never touches writers, so
//! it can run against a live or a closed store. Whole `YYYY/MM/DD` day
//! directories are removed; files are never truncated.

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, TimeZone};
use chrono_tz::Tz;

use crate::error::{Result, RetentionError};
use crate::layout;

/// Removes every day directory of a series strictly before the calendar day
/// of `boundary` in `tz`, across all tag hashes.
///
/// Directory names that are not numeric, or out of range for their level
/// (month 1–12, day 1–31), are not part of the partition scheme and are left
/// alone. The boundary day and later days are kept.
///
/// Returns the number of day directories removed.
///
/// # Errors
///
/// Returns [`RetentionError::ReadDir`] if any level cannot be listed
/// (including a missing series directory) and [`RetentionError::Remove`] if
/// a day directory cannot be deleted. Days removed before the error stay
/// removed.
///
/// # Examples
///
/// ```rust,no_run
/// use chrono::Utc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // Keep today (Tokyo time) and drop everything older.
/// let removed = strata::delete_before_day("./data/players.x", Utc::now(), chrono_tz::Asia::Tokyo)?;
/// println!("removed {removed} day(s)");
/// # Ok(())
/// # }
/// ```
pub fn delete_before_day<T: TimeZone>(
    series_dir: impl AsRef<Path>,
    boundary: DateTime<T>,
    tz: Tz,
) -> Result<usize> {
    delete_before_date(series_dir, boundary.with_timezone(&tz).date_naive())
}

/// Removes every day directory of a series strictly before `cutoff`.
///
/// Same as [`delete_before_day`] with the boundary already reduced to a
/// calendar date.
///
/// # Errors
///
/// Same as [`delete_before_day`].
pub fn delete_before_date(series_dir: impl AsRef<Path>, cutoff: NaiveDate) -> Result<usize> {
    let series_dir = series_dir.as_ref();
    let cutoff = layout::date_key(cutoff);
    let mut removed = 0;

    for tag_dir in subdirs(series_dir)? {
        for (year, year_dir) in numbered_subdirs(&tag_dir, 1..=9999)? {
            for (month, month_dir) in numbered_subdirs(&year_dir, 1..=12)? {
                for (day, day_dir) in numbered_subdirs(&month_dir, 1..=31)? {
                    if layout::day_key(year, month, day) >= cutoff {
                        continue;
                    }
                    fs::remove_dir_all(&day_dir).map_err(|source| RetentionError::Remove {
                        path: day_dir.clone(),
                        source,
                    })?;
                    tracing::info!(path = %day_dir.display(), "removed expired day");
                    removed += 1;
                }
            }
        }
    }

    Ok(removed)
}

/// Lists the subdirectories of `dir`.
fn subdirs(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let read_err = |source| RetentionError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

/// Lists subdirectories whose name parses as a number within `range`.
fn numbered_subdirs(
    dir: &Path,
    range: std::ops::RangeInclusive<u32>,
) -> Result<Vec<(u32, std::path::PathBuf)>> {
    Ok(subdirs(dir)?
        .into_iter()
        .filter_map(|path| {
            let n = path.file_name()?.to_str()?.parse::<u32>().ok()?;
            range.contains(&n).then_some((n, path))
        })
        .collect())
}
