//! Reading and formatting node timestamps
//!
//! [`read_timestamps`] collects access, modification and status-change time
//! with a single `lstat`-style call, so the three values describe the same
//! moment. Either all three are returned or the read fails as a whole.
//!
//! Dates are written as `%Y-%m-%d %H:%M:%S.%9f %z` in UTC, which keeps the
//! nanoseconds the filesystem reports.

use crate::error::{CheckpointError, Result};
use crate::types::Timestamps;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Format used when writing dates
pub const WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f %z";

/// Format used when reading dates; the fraction is optional
pub const READ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %z";

/// Read the timestamps of `path` without following symlinks
///
/// # Errors
///
/// - [`CheckpointError::Io`] if the metadata cannot be read
/// - [`CheckpointError::InvalidTimestamp`] if a time is out of range
#[cfg(unix)]
pub fn read_timestamps(path: &Path) -> Result<Timestamps> {
    use std::os::unix::fs::MetadataExt;

    let metadata = std::fs::symlink_metadata(path)?;
    Ok(Timestamps::new(
        from_unix(metadata.atime(), metadata.atime_nsec())?,
        from_unix(metadata.mtime(), metadata.mtime_nsec())?,
        from_unix(metadata.ctime(), metadata.ctime_nsec())?,
    ))
}

/// Read the timestamps of `path` without following symlinks
///
/// Status-change time is not available on this platform, so the read always
/// fails.
#[cfg(not(unix))]
pub fn read_timestamps(path: &Path) -> Result<Timestamps> {
    std::fs::symlink_metadata(path)?;
    Err(CheckpointError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "status change time is not available on this platform",
    )))
}

#[cfg(unix)]
fn from_unix(secs: i64, nsecs: i64) -> Result<DateTime<Utc>> {
    u32::try_from(nsecs)
        .ok()
        .and_then(|nsecs| DateTime::from_timestamp(secs, nsecs))
        .ok_or_else(|| CheckpointError::InvalidTimestamp(format!("{}s {}ns", secs, nsecs)))
}

/// Format a date for the checkpoint file
pub fn format_timestamp(date: &DateTime<Utc>) -> String {
    date.format(WRITE_FORMAT).to_string()
}

/// Parse a date from the checkpoint file, normalizing it to UTC
///
/// # Errors
///
/// - [`CheckpointError::InvalidTimestamp`] if `value` does not match the format
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(value, READ_FORMAT)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| CheckpointError::InvalidTimestamp(value.to_string()))
}
