//! The checkpoint container
//!
//! A [`Checkpoint`] is the sorted set of [`Node`]s of one directory tree plus
//! aggregate counters and a completeness flag. Generator workers insert into
//! it concurrently; everything else reads cloned snapshots.
//!
//! ## Concurrency
//!
//! The node map and every counter live behind one `parking_lot::Mutex`, so the
//! counters are always updated together with the map and any set of values
//! read through [`Checkpoint::stats`] is mutually consistent. No reference into
//! the map ever escapes the lock.
//!
//! ## Persistence
//!
//! [`Checkpoint::save`] writes `checkpoint.txt` into a checkpoint directory in
//! the format described in [`crate::format`]; [`Checkpoint::load`] reads it
//! back. For every checkpoint `x`, loading what saving `x` wrote yields a
//! checkpoint equal to `x` (node sizes are not part of the format and are not
//! part of node equality).
//!
//! ## Example
//!
//! ```rust,ignore
//! use checkpoint::{Checkpoint, Node, NodePath};
//!
//! let checkpoint = Checkpoint::new();
//! checkpoint.add_node(Node::new(NodePath::root(), true, 0))?;
//! checkpoint.set_complete(true);
//! let file = checkpoint.save(Path::new("backup-checkpoint"))?;
//!
//! let loaded = Checkpoint::load(&file)?;
//! assert_eq!(loaded, checkpoint);
//! ```

use crate::error::{CheckpointError, Result};
use crate::format::{read_checkpoint, write_checkpoint};
use crate::types::{Node, NodePath};
use crate::utils::{atomic_write_with, create_private_dir};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Name of the record file inside a checkpoint directory
pub const CHECKPOINT_FILE_NAME: &str = "checkpoint.txt";

/// Consistent snapshot of a checkpoint's aggregates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckpointStats {
    /// Number of nodes
    pub node_count: usize,
    /// Sum of node sizes as known at insertion
    pub total_size: u64,
    /// Files whose hash could not be computed
    pub hashing_failures: usize,
    /// Nodes whose timestamps could not be read
    pub timestamping_failures: usize,
    /// Whether every discoverable node was processed
    pub complete: bool,
}

#[derive(Debug, Clone, Default)]
struct State {
    nodes: BTreeMap<NodePath, Node>,
    total_size: u64,
    hashing_failures: usize,
    timestamping_failures: usize,
    complete: bool,
}

impl State {
    fn insert(&mut self, node: Node) -> Result<()> {
        if self.nodes.contains_key(node.path()) {
            return Err(CheckpointError::DuplicateNode(node.path().to_string()));
        }

        self.total_size += node.size();
        if node.hash().is_failed() {
            self.hashing_failures += 1;
        }
        if node.timestamps().is_failed() {
            self.timestamping_failures += 1;
        }
        self.nodes.insert(node.path().clone(), node);
        Ok(())
    }

    fn stats(&self) -> CheckpointStats {
        CheckpointStats {
            node_count: self.nodes.len(),
            total_size: self.total_size,
            hashing_failures: self.hashing_failures,
            timestamping_failures: self.timestamping_failures,
            complete: self.complete,
        }
    }
}

/// Sorted, concurrently fillable set of nodes
pub struct Checkpoint {
    state: Mutex<State>,
}

impl Checkpoint {
    /// Create an empty, incomplete checkpoint
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Build a checkpoint from a list of nodes
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::DuplicateNode`] if two nodes share a path
    pub fn from_nodes<I>(nodes: I, complete: bool) -> Result<Self>
    where
        I: IntoIterator<Item = Node>,
    {
        let mut state = State::default();
        for node in nodes {
            state.insert(node)?;
        }
        state.complete = complete;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Insert a node
    ///
    /// Safe to call from many threads at once.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::DuplicateNode`] if a node with the same path is
    ///   present already; the present node stays untouched
    pub fn add_node(&self, node: Node) -> Result<()> {
        self.state.lock().insert(node)
    }

    /// Consistent snapshot of all aggregates
    pub fn stats(&self) -> CheckpointStats {
        self.state.lock().stats()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Sum of the sizes of all nodes
    pub fn total_size(&self) -> u64 {
        self.state.lock().total_size
    }

    /// Number of files whose hash could not be computed
    pub fn hashing_failure_count(&self) -> usize {
        self.state.lock().hashing_failures
    }

    /// Number of nodes whose timestamps could not be read
    pub fn timestamping_failure_count(&self) -> usize {
        self.state.lock().timestamping_failures
    }

    /// Whether every discoverable node was processed
    pub fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    /// Mark the checkpoint as complete or resumable
    pub fn set_complete(&self, complete: bool) {
        self.state.lock().complete = complete;
    }

    /// Copy of the node at `path`
    pub fn get(&self, path: &NodePath) -> Option<Node> {
        self.state.lock().nodes.get(path).cloned()
    }

    /// Whether a node with `path` exists
    pub fn contains(&self, path: &NodePath) -> bool {
        self.state.lock().nodes.contains_key(path)
    }

    /// Copy of all nodes in sort order
    pub fn nodes(&self) -> Vec<Node> {
        self.state.lock().nodes.values().cloned().collect()
    }

    /// Take all nodes in sort order
    pub fn into_nodes(self) -> Vec<Node> {
        self.state.into_inner().nodes.into_values().collect()
    }

    /// Latest timestamp recorded in the checkpoint
    ///
    /// Serves as the date the checkpoint describes. `None` when no node has
    /// timestamps.
    pub fn date_estimate(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock();
        state
            .nodes
            .values()
            .filter_map(|node| node.timestamps().value())
            .map(|ts| ts.latest())
            .max()
    }

    /// Save into the checkpoint directory `dir` using the current completeness
    ///
    /// # Arguments
    ///
    /// * `dir` - Checkpoint directory; created with owner-only permissions if
    ///   missing
    ///
    /// # Returns
    ///
    /// Path of the written `checkpoint.txt`.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::Io`] if the directory or file cannot be written;
    ///   a previously saved file stays intact
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let (nodes, complete) = {
            let state = self.state.lock();
            (state.nodes.values().cloned().collect::<Vec<_>>(), state.complete)
        };
        Self::write_to(dir, &nodes, complete)
    }

    /// Save as resumable regardless of the completeness flag
    ///
    /// Used for intermediate saves while workers are still running.
    pub fn save_incomplete(&self, dir: &Path) -> Result<PathBuf> {
        let nodes = self.nodes();
        Self::write_to(dir, &nodes, false)
    }

    #[instrument(skip(nodes), fields(nodes = nodes.len()))]
    fn write_to(dir: &Path, nodes: &[Node], complete: bool) -> Result<PathBuf> {
        create_private_dir(dir)?;
        let file = dir.join(CHECKPOINT_FILE_NAME);

        atomic_write_with(&file, |writer| write_checkpoint(writer, nodes, complete))?;

        info!(
            "Saved {} checkpoint with {} nodes to {:?}",
            if complete { "complete" } else { "incomplete" },
            nodes.len(),
            file
        );
        Ok(file)
    }

    /// Load a checkpoint
    ///
    /// # Arguments
    ///
    /// * `path` - A checkpoint directory or the `checkpoint.txt` inside it
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::Io`] if the file cannot be read
    /// - [`CheckpointError::Truncated`] if the file ends without a terminal marker
    /// - [`CheckpointError::MalformedRecord`] and the other format errors for
    ///   corrupt content
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let file_path = Self::file_path(path);
        debug!("Loading checkpoint from {:?}", file_path);

        let mut reader = BufReader::new(File::open(&file_path)?);
        let (nodes, complete) = read_checkpoint(&mut reader)?;
        let checkpoint = Self::from_nodes(nodes, complete)?;

        let stats = checkpoint.stats();
        info!(
            "Loaded {} checkpoint with {} nodes ({} hashing failures, {} timestamping failures)",
            if complete { "complete" } else { "incomplete" },
            stats.node_count,
            stats.hashing_failures,
            stats.timestamping_failures
        );
        Ok(checkpoint)
    }

    /// Path of the record file for a checkpoint directory or file path
    pub fn file_path(path: &Path) -> PathBuf {
        if path.is_dir() {
            path.join(CHECKPOINT_FILE_NAME)
        } else {
            path.to_path_buf()
        }
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Checkpoint {
    fn clone(&self) -> Self {
        Self {
            state: Mutex::new(self.state.lock().clone()),
        }
    }
}

impl PartialEq for Checkpoint {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        // One lock at a time, so `a == b` never waits on a thread doing `b == a`
        let left = self.state.lock().clone();
        let right = other.state.lock();
        left.complete == right.complete && left.nodes == right.nodes
    }
}

impl Eq for Checkpoint {}

impl fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Checkpoint")
            .field("complete", &state.complete)
            .field("nodes", &state.nodes.values().collect::<Vec<_>>())
            .finish()
    }
}
