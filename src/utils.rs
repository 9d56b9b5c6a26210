//! Utility functions for the checkpoint library
//!
//! This module provides the file-level helpers shared by the library and the
//! command-line tool.
//!
//! ## Categories of Utilities
//!
//! ### File Operations
//! - Atomic file writing through a temporary file in the target directory
//! - Private directory creation
//! - Permission handling (cross-platform)
//!
//! ### Formatting
//! - Byte formatting (human-readable sizes)
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use crate::utils::{atomic_write_with, create_private_dir, format_bytes};
//! use std::io::Write;
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = Path::new("backup-2024");
//! create_private_dir(dir)?;
//! atomic_write_with(&dir.join("notes.txt"), |w| Ok(w.write_all(b"hello")?))?;
//! println!("{}", format_bytes(1536)); // "1.50 KB"
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::trace;

/// Set Unix permissions
#[cfg(unix)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = fs::Permissions::from_mode(mode);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

/// Set permissions (Windows implementation)
///
/// Only the read-only attribute can be expressed; it is set when the owner
/// write bit is missing from `mode`.
#[cfg(windows)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    let is_readonly = (mode & 0o200) == 0;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(is_readonly);
    fs::set_permissions(path, perms)?;
    Ok(())
}

/// Create a directory readable only by its owner
///
/// Missing parents are created with default permissions. An existing
/// directory keeps its permissions. An empty path designates the current directory.
pub fn create_private_dir(path: &Path) -> Result<()> {
    let path = if path.as_os_str().is_empty() {
        Path::new(".")
    } else {
        path
    };
    if path.is_dir() {
        return Ok(());
    }

    fs::create_dir_all(path)?;
    #[cfg(unix)]
    set_permissions(path, 0o700)?;
    trace!("Created private directory {:?}", path);
    Ok(())
}

/// Format bytes as human-readable string
///
/// # Arguments
///
/// * `bytes` - Number of bytes to format
///
/// # Returns
///
/// Returns a formatted string with the appropriate unit.
///
/// # Example
///
/// ```rust,ignore
/// use crate::utils::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 B");
/// assert_eq!(format_bytes(1023), "1023 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// assert_eq!(format_bytes(1_073_741_824), "1.00 GB");
/// ```
///
/// # Formatting Rules
///
/// - Values less than 1024 bytes are shown as whole numbers with "B"
/// - Larger values are shown with 2 decimal places and appropriate units
/// - Uses binary units (1024-based) rather than decimal (1000-based)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write (write to temp file then rename)
///
/// Streams content produced by `write` into a temporary file next to `path`,
/// flushes it to disk and renames it over `path`. Readers see either the old
/// file or the complete new one, never a partial write.
///
/// # Arguments
///
/// * `path` - Target file path; its parent directory must exist
/// * `write` - Closure producing the content
///
/// # Errors
///
/// - [`crate::CheckpointError::Io`] if creating, writing or renaming fails
/// - Any error returned by `write`; the temporary file is removed
pub fn atomic_write_with<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        write(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    trace!("Atomically wrote {:?}", path);
    Ok(())
}
