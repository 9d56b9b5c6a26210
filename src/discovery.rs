//! Discovery of the nodes of a directory tree
//!
//! Generation starts from a list of nodes which only carry path, kind and
//! size. [`NodeFinder`] produces that list by walking the input directory;
//! anything implementing [`NodeSource`] can stand in for it.
//!
//! ## What is discovered
//!
//! - Directories, including the root itself as `.`
//! - Regular files, with their size
//!
//! Symbolic links are neither followed nor recorded, and neither are special
//! files such as sockets or device nodes. The walk never crosses into another
//! file system, so mounted volumes below the root are left out.
//!
//! ## Example
//!
//! ```rust,ignore
//! use checkpoint::discovery::{NodeFinder, NodeSource};
//! use std::path::Path;
//!
//! let nodes = NodeFinder::new().discover(Path::new("/srv/photos"))?;
//! println!("Found {} nodes", nodes.len());
//! ```

use crate::error::{CheckpointError, Result};
use crate::types::{Node, NodePath};
use std::fs;
use std::path::Path;
use tracing::{debug, instrument, trace, warn};
use walkdir::WalkDir;

/// Supplier of the nodes a generator processes
pub trait NodeSource: Send + Sync {
    /// List every node below `root`, with nothing computed yet
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::NotADirectory`] if `root` is not a directory
    fn discover(&self, root: &Path) -> Result<Vec<Node>>;
}

/// Walks a directory tree on disk
#[derive(Debug, Clone)]
pub struct NodeFinder {
    same_file_system: bool,
}

impl NodeFinder {
    /// Create a finder which stays on the root's file system
    pub fn new() -> Self {
        Self {
            same_file_system: true,
        }
    }

    /// Allow or forbid descending into other file systems
    pub fn same_file_system(mut self, yes: bool) -> Self {
        self.same_file_system = yes;
        self
    }
}

impl Default for NodeFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSource for NodeFinder {
    #[instrument(skip(self))]
    fn discover(&self, root: &Path) -> Result<Vec<Node>> {
        let root_meta = fs::symlink_metadata(root)?;
        if !root_meta.is_dir() {
            return Err(CheckpointError::NotADirectory(root.to_path_buf()));
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .same_file_system(self.same_file_system);

        let mut nodes = Vec::new();
        let mut total_size = 0u64;
        let mut skipped = 0usize;

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Walk error: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            let file_type = entry.file_type();
            if !file_type.is_dir() && !file_type.is_file() {
                trace!("Skipping special file {:?}", entry.path());
                continue;
            }

            let relative = match entry.path().strip_prefix(root) {
                Ok(relative) => relative,
                Err(_) => {
                    warn!("Entry {:?} is outside of {:?}", entry.path(), root);
                    skipped += 1;
                    continue;
                }
            };
            let path = NodePath::from_relative(relative)?;

            let size = if file_type.is_file() {
                match entry.metadata() {
                    Ok(metadata) => metadata.len(),
                    Err(e) => {
                        warn!("Cannot read size of {:?}: {}", entry.path(), e);
                        0
                    }
                }
            } else {
                0
            };

            total_size += size;
            nodes.push(Node::new(path, file_type.is_dir(), size));
        }

        debug!(
            "Discovered {} nodes ({} bytes), skipped {} unreadable entries",
            nodes.len(),
            total_size,
            skipped
        );
        Ok(nodes)
    }
}

impl NodeSource for Vec<Node> {
    fn discover(&self, _root: &Path) -> Result<Vec<Node>> {
        Ok(self.clone())
    }
}
