//! Core data types used throughout the checkpoint library
//!
//! This module contains the data model shared by generation, serialization and
//! checking.
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Paths**: [`NodePath`] - raw path bytes relative to the checkpoint root
//! - **Digests**: [`Sha256`] - a strict 32-byte content digest
//! - **Three-state fields**: [`Computed`] - "never tried", "tried and failed" or a value
//! - **Entries**: [`Node`], [`Timestamps`] - one filesystem entry and its times
//! - **Scheduling**: [`StorageMedium`] - how work is ordered for the device
//! - **Progress**: [`ProgressInfo`], [`ProgressCallback`] - progress sampling
//!
//! ## Examples
//!
//! ```rust
//! use checkpoint::types::{Computed, Node, NodePath, Sha256};
//!
//! let path = NodePath::new(b"./photos/2019/beach.jpg".to_vec()).unwrap();
//! let node = Node::new(path, false, 1024);
//!
//! assert_eq!(node.hash(), &Computed::<Sha256>::NotComputed);
//! assert!(node.timestamps().value().is_none());
//! ```

use crate::error::{CheckpointError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Path of a node relative to the checkpoint root
///
/// Paths are raw bytes and may contain anything except NUL, including tabs and
/// newlines. The root itself is `.`, everything else starts with `./`. No
/// separator normalization takes place.
///
/// Ordering is the byte-wise unsigned comparison of the path bytes, which is
/// independent of platform and locale.
///
/// # Examples
///
/// ```rust
/// use checkpoint::types::NodePath;
/// use std::path::Path;
///
/// let root = NodePath::root();
/// let file = NodePath::from_relative(Path::new("docs/readme.txt")).unwrap();
///
/// assert_eq!(file.as_bytes(), b"./docs/readme.txt");
/// assert!(file.is_within(&root));
/// assert!(root < file);
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodePath(Vec<u8>);

impl NodePath {
    /// Path of the checkpoint root
    pub fn root() -> Self {
        NodePath(b".".to_vec())
    }

    /// Create a path from raw bytes, validating the prefix convention
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::InvalidPath`] if the bytes contain NUL or are
    ///   neither `.` nor start with `./`
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        let invalid = |reason: &str| CheckpointError::InvalidPath {
            path: String::from_utf8_lossy(&bytes).into_owned(),
            reason: reason.to_string(),
        };

        if bytes.contains(&0) {
            return Err(invalid("contains NUL"));
        }
        if bytes.as_slice() != b"." && !bytes.starts_with(b"./") {
            return Err(invalid("must be '.' or start with './'"));
        }

        Ok(NodePath(bytes))
    }

    /// Create a path from a filesystem path relative to the root
    ///
    /// An empty relative path designates the root.
    pub fn from_relative(relative: &Path) -> Result<Self> {
        let raw = relative.as_os_str().as_encoded_bytes();
        if raw.is_empty() {
            return Ok(Self::root());
        }

        let mut bytes = Vec::with_capacity(raw.len() + 2);
        bytes.extend_from_slice(b"./");
        bytes.extend_from_slice(raw);
        Self::new(bytes)
    }

    /// Parse a user-supplied directory such as `photos`, `./photos/` or `.`
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::InvalidPath`] if the input is absolute or has
    ///   empty, `.` or `..` segments, none of which can name a node
    pub fn parse_user(input: &str) -> Result<Self> {
        let invalid = |reason: &str| CheckpointError::InvalidPath {
            path: input.to_string(),
            reason: reason.to_string(),
        };

        if input.starts_with('/') {
            return Err(invalid("must be relative to the checkpoint root"));
        }
        let trimmed = input.trim_end_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            return Ok(Self::root());
        }
        let relative = trimmed.strip_prefix("./").unwrap_or(trimmed);
        for segment in relative.split('/') {
            match segment {
                "" => return Err(invalid("contains an empty segment")),
                "." | ".." => return Err(invalid("contains a '.' or '..' segment")),
                _ => {}
            }
        }
        Self::from_relative(Path::new(relative))
    }

    /// Raw path bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this is the root path `.`
    pub fn is_root(&self) -> bool {
        self.0.as_slice() == b"."
    }

    /// Path of the enclosing directory, `None` for the root
    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            return None;
        }
        let cut = self.0.iter().rposition(|&b| b == b'/')?;
        if cut <= 1 {
            Some(Self::root())
        } else {
            Some(NodePath(self.0[..cut].to_vec()))
        }
    }

    /// Byte prefix shared by every descendant of this path
    pub fn descendant_prefix(&self) -> Vec<u8> {
        if self.is_root() {
            b"./".to_vec()
        } else {
            let mut prefix = self.0.clone();
            prefix.push(b'/');
            prefix
        }
    }

    /// Whether this path equals `dir` or lies beneath it
    pub fn is_within(&self, dir: &NodePath) -> bool {
        self == dir || self.0.starts_with(&dir.descendant_prefix())
    }

    /// Resolve this path against a root directory on disk
    pub fn to_path_buf(&self, root: &Path) -> PathBuf {
        root.join(self.as_os_path())
    }

    #[cfg(unix)]
    fn as_os_path(&self) -> PathBuf {
        use std::os::unix::ffi::OsStrExt;
        PathBuf::from(std::ffi::OsStr::from_bytes(&self.0))
    }

    #[cfg(not(unix))]
    fn as_os_path(&self) -> PathBuf {
        PathBuf::from(String::from_utf8_lossy(&self.0).into_owned())
    }

    /// Lossy UTF-8 rendering for display
    pub fn display(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePath({:?})", self.display())
    }
}

impl Serialize for NodePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.display())
    }
}

/// SHA-256 digest of a file's content
///
/// Equality is only defined between two digests. Comparing a digest with a
/// hash field that has no digest goes through [`Sha256::strict_eq`], which
/// refuses to answer instead of returning `false`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256([u8; 32]);

impl Sha256 {
    /// Length of the lowercase hex form
    pub const HEX_LEN: usize = 64;

    /// Digest of zero bytes of input
    pub const EMPTY: Sha256 = Sha256([
        0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9,
        0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52,
        0xb8, 0x55,
    ]);

    /// Wrap raw digest bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Sha256(bytes)
    }

    /// Parse the lowercase hex form
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::InvalidHash`] for wrong length, non-hex characters
    ///   or uppercase digits
    pub fn from_hex(value: &str) -> Result<Self> {
        let invalid = |reason: String| CheckpointError::InvalidHash {
            value: value.to_string(),
            reason,
        };

        if value.len() != Self::HEX_LEN {
            return Err(invalid(format!(
                "expected {} characters, found {}",
                Self::HEX_LEN,
                value.len()
            )));
        }
        if value.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(invalid("uppercase hex digits".to_string()));
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(value, &mut bytes).map_err(|e| invalid(e.to_string()))?;
        Ok(Sha256(bytes))
    }

    /// Lowercase hex form, as printed by `sha256sum`
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compare with a hash field which may lack a digest
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::HashUnavailable`] if `other` is not computed or failed
    pub fn strict_eq(&self, other: &Computed<Sha256>) -> Result<bool> {
        match other {
            Computed::Value(digest) => Ok(self == digest),
            Computed::Failed => Err(CheckpointError::HashUnavailable(
                "hashing failed for the other side".to_string(),
            )),
            Computed::NotComputed => Err(CheckpointError::HashUnavailable(
                "the other side was never hashed".to_string(),
            )),
        }
    }
}

impl fmt::Display for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256({})", self.to_hex())
    }
}

impl Serialize for Sha256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// A field which is computed by a worker and may have failed
///
/// `NotComputed` ("never tried") and `Failed` ("tried and failed") are distinct
/// from each other and from every value, and both survive a save/load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Computed<T> {
    /// Never attempted
    NotComputed,
    /// Attempted and failed
    Failed,
    /// Successfully computed
    Value(T),
}

impl<T> Default for Computed<T> {
    fn default() -> Self {
        Computed::NotComputed
    }
}

impl<T> Computed<T> {
    /// The computed value, if any
    pub fn value(&self) -> Option<&T> {
        match self {
            Computed::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Whether a value is present
    pub fn is_value(&self) -> bool {
        matches!(self, Computed::Value(_))
    }

    /// Whether the computation was attempted and failed
    pub fn is_failed(&self) -> bool {
        matches!(self, Computed::Failed)
    }
}

/// Access, modification and status-change time of a node
///
/// All three are read together by one metadata call. Birth time is not
/// collected and always reported as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamps {
    /// Last access time
    pub accessed: DateTime<Utc>,
    /// Last content modification time
    pub modified: DateTime<Utc>,
    /// Last status change time (inode change)
    pub changed: DateTime<Utc>,
}

impl Timestamps {
    /// Create a timestamp triple
    pub fn new(accessed: DateTime<Utc>, modified: DateTime<Utc>, changed: DateTime<Utc>) -> Self {
        Self {
            accessed,
            modified,
            changed,
        }
    }

    /// Birth time, which is never collected
    pub fn birth(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Latest of the three times
    pub fn latest(&self) -> DateTime<Utc> {
        self.accessed.max(self.modified).max(self.changed)
    }
}

/// One filesystem entry of a checkpoint
///
/// Discovery creates nodes with path, kind and size only; a generator worker
/// fills hash and timestamps once through [`Node::with_data`]. Loaded nodes are
/// reconstructed fully formed.
///
/// Equality ignores `size`: the checkpoint format does not carry it, so a
/// loaded node reports 0 and still equals the node that was saved.
///
/// # Examples
///
/// ```rust
/// use checkpoint::types::{Computed, Node, NodePath, Sha256};
///
/// let dir = NodePath::new(b"./music".to_vec()).unwrap();
/// let result = Node::with_data(
///     dir,
///     true,
///     0,
///     Computed::Value(Sha256::EMPTY),
///     Computed::NotComputed,
/// );
///
/// // Directories never carry a hash
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    path: NodePath,
    is_directory: bool,
    size: u64,
    hash: Computed<Sha256>,
    timestamps: Computed<Timestamps>,
}

impl Node {
    /// Create a node as discovered, with nothing computed yet
    ///
    /// Directories always get size 0.
    pub fn new(path: NodePath, is_directory: bool, size: u64) -> Self {
        Self {
            path,
            is_directory,
            size: if is_directory { 0 } else { size },
            hash: Computed::NotComputed,
            timestamps: Computed::NotComputed,
        }
    }

    /// Create a fully formed node
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::InvalidNode`] if a directory is given a hash
    ///   other than `NotComputed`
    pub fn with_data(
        path: NodePath,
        is_directory: bool,
        size: u64,
        hash: Computed<Sha256>,
        timestamps: Computed<Timestamps>,
    ) -> Result<Self> {
        if is_directory && hash != Computed::NotComputed {
            return Err(CheckpointError::InvalidNode {
                path: path.to_string(),
                reason: "directories cannot carry a hash".to_string(),
            });
        }

        Ok(Self {
            size: if is_directory { 0 } else { size },
            path,
            is_directory,
            hash,
            timestamps,
        })
    }

    /// Path relative to the checkpoint root
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// Whether the node is a directory
    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// Size in bytes; 0 for directories and when unknown
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Content hash
    pub fn hash(&self) -> &Computed<Sha256> {
        &self.hash
    }

    /// Timestamps
    pub fn timestamps(&self) -> &Computed<Timestamps> {
        &self.timestamps
    }

    /// Whether every field applicable to this node kind was computed
    pub fn is_fully_computed(&self) -> bool {
        let hash_done = self.is_directory || self.hash.is_value();
        hash_done && self.timestamps.is_value()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.is_directory == other.is_directory
            && self.hash == other.hash
            && self.timestamps == other.timestamps
    }
}

impl Eq for Node {}

/// Kind of storage device holding the input directory
///
/// Determines the default thread count and how work is ordered across
/// workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMedium {
    /// Spinning disk: few threads, path-ordered batches to limit seeking
    Rotational,
    /// Flash storage: many threads, randomly shuffled batches
    #[default]
    SolidState,
}

impl StorageMedium {
    /// Default number of worker threads for this medium
    pub fn default_threads(&self) -> usize {
        match self {
            StorageMedium::Rotational => 2,
            StorageMedium::SolidState => 4 * num_cpus::get(),
        }
    }
}

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
///
/// Counts include nodes reused from a resumed checkpoint.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: String,
    /// Nodes processed so far
    pub processed: usize,
    /// Total nodes to process
    pub total: usize,
    /// Bytes processed so far
    pub bytes_processed: u64,
    /// Total bytes to process
    pub total_bytes: u64,
    /// Time since the operation started
    pub elapsed: Duration,
}

impl ProgressInfo {
    /// Get progress as a percentage (0-100)
    ///
    /// Byte progress is preferred since node sizes vary wildly; node counts
    /// are used when there are no bytes to process.
    pub fn percentage(&self) -> Option<f32> {
        if self.total_bytes > 0 {
            Some((self.bytes_processed as f32 / self.total_bytes as f32) * 100.0)
        } else if self.total > 0 {
            Some((self.processed as f32 / self.total as f32) * 100.0)
        } else {
            None
        }
    }

    /// Average throughput since start
    pub fn bytes_per_second(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            Some(self.bytes_processed as f64 / secs)
        } else {
            None
        }
    }

    /// Estimated time until completion at the average throughput
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.bytes_per_second()?;
        if rate <= 0.0 {
            return None;
        }
        let remaining = self.total_bytes.saturating_sub(self.bytes_processed) as f64;
        Some(Duration::from_secs((remaining / rate) as u64))
    }
}
