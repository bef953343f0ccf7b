//! Writer and store configuration.
//!
//! [`WriterConfig`] controls how a segment writer names and flushes its
//! files. [`StoreConfig`] wraps it with the store root and an optional
//! retention policy, and can be loaded from a JSON file:
//!
//! ```json
//! {
//!   "root": "/var/lib/strata",
//!   "writer": { "timezone": "UTC", "flush_every": 0, "flush_interval": 5.0 },
//!   "retention_days": 30,
//!   "retention_timezone": "Asia/Tokyo"
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Configuration of a single segment writer.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use strata::WriterConfig;
///
/// let config = WriterConfig::default()
///     .with_timezone(chrono_tz::Asia::Tokyo)
///     .with_flush_every(100)
///     .with_flush_interval(Duration::from_secs(5));
/// assert_eq!(config.flush_every, 100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Timezone used to name hour files. Stored timestamps are always UTC.
    pub timezone: Tz,
    /// Flush and sync after this many appends. Zero disables.
    pub flush_every: usize,
    /// Period of the background flush. Zero disables the background task.
    #[serde(with = "duration_serde")]
    pub flush_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            flush_every: 0,
            flush_interval: Duration::ZERO,
        }
    }
}

impl WriterConfig {
    /// Sets the timezone used for hour-file naming.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Sets the append-count flush threshold (0 disables).
    pub fn with_flush_every(mut self, n: usize) -> Self {
        self.flush_every = n;
        self
    }

    /// Sets the background flush period (zero disables).
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

/// Configuration of a [`SeriesStore`](crate::SeriesStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory holding one subdirectory per series.
    pub root: PathBuf,
    /// Writer settings applied to every series.
    #[serde(default)]
    pub writer: WriterConfig,
    /// Keep this many calendar days (plus the current one) when pruning.
    #[serde(default)]
    pub retention_days: Option<u32>,
    /// Timezone whose day boundaries retention uses.
    #[serde(default = "default_timezone")]
    pub retention_timezone: Tz,
}

fn default_timezone() -> Tz {
    Tz::UTC
}

impl StoreConfig {
    /// Creates a configuration with default writer settings and no retention.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writer: WriterConfig::default(),
            retention_days: None,
            retention_timezone: Tz::UTC,
        }
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConfigRead`] if the file cannot be read,
    /// [`StoreError::ConfigParse`] if it is not valid JSON for this type, or
    /// [`StoreError::InvalidConfig`] if validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| StoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|source| StoreError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if the root is empty or the
    /// flush interval is shorter than a millisecond (but not zero).
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(StoreError::InvalidConfig {
                reason: "root directory cannot be empty".to_string(),
            }
            .into());
        }

        let interval = self.writer.flush_interval;
        if !interval.is_zero() && interval < Duration::from_millis(1) {
            return Err(StoreError::InvalidConfig {
                reason: format!("flush_interval ({interval:?}) must be zero or >= 1ms"),
            }
            .into());
        }

        Ok(())
    }
}

/// Serde support for Duration fields.
///
/// Durations are serialized as total seconds (f64) for human readability
/// in JSON configuration files.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_config_defaults() {
        let config = WriterConfig::default();
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.flush_every, 0);
        assert!(config.flush_interval.is_zero());
    }

    #[test]
    fn test_store_config_from_json() {
        let json = r#"{
            "root": "/tmp/strata",
            "writer": { "timezone": "Asia/Tokyo", "flush_every": 10, "flush_interval": 0.5 },
            "retention_days": 7,
            "retention_timezone": "Asia/Tokyo"
        }"#;

        let config: StoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.root, PathBuf::from("/tmp/strata"));
        assert_eq!(config.writer.timezone, chrono_tz::Asia::Tokyo);
        assert_eq!(config.writer.flush_every, 10);
        assert_eq!(config.writer.flush_interval, Duration::from_millis(500));
        assert_eq!(config.retention_days, Some(7));
        config.validate().unwrap();
    }

    #[test]
    fn test_store_config_minimal_json() {
        let config: StoreConfig = serde_json::from_str(r#"{ "root": "data" }"#).unwrap();
        assert_eq!(config.writer, WriterConfig::default());
        assert_eq!(config.retention_days, None);
        assert_eq!(config.retention_timezone, Tz::UTC);
    }

    #[test]
    fn test_validate_rejects_empty_root() {
        let config = StoreConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_sub_millisecond_interval() {
        let mut config = StoreConfig::new("data");
        config.writer.flush_interval = Duration::from_micros(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let result: std::result::Result<StoreConfig, _> = serde_json::from_str(
            r#"{ "root": "data", "retention_timezone": "Mars/Olympus" }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.json");
        std::fs::write(&path, r#"{ "root": "data", "retention_days": 3 }"#).unwrap();

        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config.retention_days, Some(3));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            StoreConfig::load(&path).unwrap_err(),
            crate::error::StrataError::Store(StoreError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");

        let err = StoreConfig::load(&path).unwrap_err();
        assert!(matches!(
            err,
            crate::error::StrataError::Store(StoreError::ConfigRead { .. })
        ));
        assert!(err.to_string().contains("failed to read configuration"));
    }
}
