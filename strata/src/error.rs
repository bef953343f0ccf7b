//! Error types for the strata time-series storage engine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// The main error type for all strata operations.
///
/// Each variant wraps the error enum of one concern: store lifecycle and
/// configuration, the write path, the read path, and retention pruning.
#[derive(Error, Debug)]
pub enum StrataError {
    /// Error from the series store (lifecycle, configuration).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error during an append, flush, or close (write path).
    #[error("write error: {0}")]
    Write(#[from] WriteError),

    /// Error during a range scan (read path).
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),

    /// Error while pruning old day directories.
    #[error("retention error: {0}")]
    Retention(#[from] RetentionError),
}

/// Errors raised by the series store and its configuration.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store has been closed and no longer hands out routers.
    #[error("store is closed")]
    Closed,

    /// A store directory could not be read.
    #[error("failed to access store directory '{}': {source}", path.display())]
    DirectoryAccess {
        /// The path that could not be accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is structurally valid JSON but semantically wrong.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of what is invalid.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration '{}': {source}", path.display())]
    ConfigRead {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration '{}': {source}", path.display())]
    ConfigParse {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// An internal map lock was poisoned by a panicking thread.
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Errors that can occur on the write path.
#[derive(Error, Debug)]
pub enum WriteError {
    /// The writer (or its router) has already been closed.
    #[error("writer for series '{series}' tag hash {tag_hash} is closed")]
    Closed {
        /// Series name.
        series: String,
        /// Tag hash of the writer.
        tag_hash: String,
    },

    /// A segment directory could not be created.
    #[error("failed to create directory '{}': {source}", path.display())]
    CreateDir {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A segment file could not be opened for appending.
    #[error("failed to open segment '{}': {source}", path.display())]
    OpenSegment {
        /// The segment file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A point could not be serialized.
    #[error("failed to encode point: {source}")]
    Encode {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Writing an encoded record failed.
    #[error("failed to write segment '{}': {source}", path.display())]
    Write {
        /// The segment file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Flushing buffered or compressed bytes failed.
    #[error("failed to flush segment '{}': {source}", path.display())]
    Flush {
        /// The segment file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Syncing the segment file to stable storage failed.
    #[error("failed to sync segment '{}' to disk: {source}", path.display())]
    Sync {
        /// The segment file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing the gzip trailer or closing the segment failed.
    #[error("failed to finalize segment '{}': {source}", path.display())]
    Finalize {
        /// The segment file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A writer or router lock was poisoned by a panicking thread.
    #[error("writer lock poisoned for series '{series}'")]
    LockPoisoned {
        /// Series name.
        series: String,
    },
}

/// Errors that can occur on the read path.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The requested range ends before it starts.
    #[error("invalid time range: to {to} is before from {from}")]
    InvalidRange {
        /// Requested start.
        from: DateTime<Utc>,
        /// Requested end.
        to: DateTime<Utc>,
    },

    /// A series or tag-hash directory could not be listed.
    #[error("failed to read directory '{}': {source}", path.display())]
    ReadDir {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A segment file exists but could not be opened.
    #[error("failed to open segment '{}': {source}", path.display())]
    OpenSegment {
        /// The segment file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The compressed stream is corrupt or ends mid-member, typically because
    /// the segment is still open for writing.
    #[error("segment '{}' is truncated or corrupt: {source}", path.display())]
    Truncated {
        /// The segment file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A decompressed line is not a valid point record.
    #[error("malformed record in segment '{}': {source}", path.display())]
    MalformedRecord {
        /// The segment file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur while pruning day directories.
#[derive(Error, Debug)]
pub enum RetentionError {
    /// A partition directory could not be listed.
    #[error("failed to read directory '{}': {source}", path.display())]
    ReadDir {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A day directory could not be removed.
    #[error("failed to remove '{}': {source}", path.display())]
    Remove {
        /// The day directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Type alias for `Result<T, StrataError>`.
pub type Result<T> = std::result::Result<T, StrataError>;
