//! Comparison of two checkpoints
//!
//! This module runs the integrity rules of [`crate::checks`] over every node
//! of an old checkpoint, comparing it against a new one.
//!
//! ## Overview
//!
//! A typical comparison uses:
//!
//! 1. **Old checkpoint**: taken of a backup of your data
//! 2. **New checkpoint**: taken of the current state of your system
//!
//! Every [`Check`] of [`Check::registry`] is applied to every node of the old
//! checkpoint. Checks are independent and a failing check never stops the
//! others; the comparison passes only if no check fails on any node.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use checkpoint::checking::{CheckEngine, CheckOptions};
//! use checkpoint::Checkpoint;
//!
//! let old = Checkpoint::load(Path::new("backup-checkpoint"))?;
//! let new = Checkpoint::load(Path::new("live-checkpoint"))?;
//!
//! let report = CheckEngine::new(&old, &new, CheckOptions::default()).run();
//! for failure in &report.failures {
//!     println!("{}: {}", failure.path, failure.message);
//! }
//! println!("{}", report.summary());
//! ```

use crate::checkpoint::Checkpoint;
use crate::checks::Check;
use crate::types::{Node, NodePath, Sha256};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Default maturity threshold in months
pub const DEFAULT_MATURITY_MONTHS: u32 = 3;

/// Default minimum size of files matched by content hash alone
pub const DEFAULT_MIN_HASH_MATCH_SIZE: u64 = 4096;

/// Settings of a comparison
#[derive(Debug, Clone, Serialize)]
pub struct CheckOptions {
    /// Nodes unmodified for this many months before the old checkpoint's
    /// date estimate are mature
    pub maturity_months: u32,
    /// Directories in which every destructive change is reported
    pub important_dirs: Vec<NodePath>,
    /// Files of known size below this are never matched by hash alone
    pub min_hash_match_size: u64,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            maturity_months: DEFAULT_MATURITY_MONTHS,
            important_dirs: Vec::new(),
            min_hash_match_size: DEFAULT_MIN_HASH_MATCH_SIZE,
        }
    }
}

/// Read-only, indexed copy of a checkpoint
///
/// Nodes are kept sorted so lookups by path are binary searches, and indexed
/// by content hash for move detection.
#[derive(Debug, Clone)]
pub struct CheckpointView {
    nodes: Vec<Node>,
    by_hash: HashMap<Sha256, Vec<usize>>,
    date_estimate: Option<DateTime<Utc>>,
    complete: bool,
}

impl CheckpointView {
    /// Take a snapshot of `checkpoint`
    pub fn new(checkpoint: &Checkpoint) -> Self {
        let nodes = checkpoint.nodes();
        let mut by_hash: HashMap<Sha256, Vec<usize>> = HashMap::new();
        for (index, node) in nodes.iter().enumerate() {
            if let Some(digest) = node.hash().value() {
                by_hash.entry(*digest).or_default().push(index);
            }
        }

        Self {
            nodes,
            by_hash,
            date_estimate: checkpoint.date_estimate(),
            complete: checkpoint.is_complete(),
        }
    }

    /// All nodes in sort order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node at `path`
    pub fn get(&self, path: &NodePath) -> Option<&Node> {
        self.nodes
            .binary_search_by(|node| node.path().cmp(path))
            .ok()
            .map(|index| &self.nodes[index])
    }

    /// Number of nodes whose content hash is `digest`
    pub fn hash_count(&self, digest: &Sha256) -> usize {
        self.by_hash.get(digest).map_or(0, Vec::len)
    }

    /// The only node whose content hash is `digest`, if exactly one exists
    pub fn unique_with_hash(&self, digest: &Sha256) -> Option<&Node> {
        match self.by_hash.get(digest).map(Vec::as_slice) {
            Some([index]) => Some(&self.nodes[*index]),
            _ => None,
        }
    }

    /// Direct children of the directory `dir`
    pub fn children<'a>(&'a self, dir: &NodePath) -> impl Iterator<Item = &'a Node> + 'a {
        let prefix = dir.descendant_prefix();
        let depth = prefix.len();
        let start = self
            .nodes
            .partition_point(|node| node.path().as_bytes() < prefix.as_slice());

        self.nodes[start..]
            .iter()
            .take_while(move |node| node.path().as_bytes().starts_with(&prefix))
            .filter(move |node| !node.path().as_bytes()[depth..].contains(&b'/'))
    }

    /// Latest timestamp in the checkpoint
    pub fn date_estimate(&self) -> Option<DateTime<Utc>> {
        self.date_estimate
    }

    /// Whether the checkpoint was complete
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Everything a check needs besides the node under test
#[derive(Debug, Clone)]
pub struct CheckContext {
    /// The old checkpoint
    pub old: CheckpointView,
    /// The new checkpoint
    pub new: CheckpointView,
    /// Settings of the comparison
    pub options: CheckOptions,
}

/// One violation found by a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckFailure {
    /// Path of the old node
    pub path: NodePath,
    /// The check which failed
    pub check: Check,
    /// What happened, without the path
    pub message: String,
}

/// Result of a comparison
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    /// Number of old nodes checked
    pub nodes_checked: usize,
    /// Checks applied to every node
    pub checks: Vec<Check>,
    /// All violations, ordered by path
    pub failures: Vec<CheckFailure>,
    /// Date estimate of the old checkpoint
    pub old_date_estimate: Option<DateTime<Utc>>,
    /// Whether the old checkpoint was complete
    pub old_complete: bool,
    /// Whether the new checkpoint was complete
    pub new_complete: bool,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

impl CheckReport {
    /// Whether every check passed on every node
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of failures of `check`
    pub fn failure_count(&self, check: Check) -> usize {
        self.failures.iter().filter(|f| f.check == check).count()
    }

    /// Get a summary of the comparison
    pub fn summary(&self) -> String {
        if self.passed() {
            format!(
                "All {} checks passed on {} nodes",
                self.checks.len(),
                self.nodes_checked
            )
        } else {
            let per_check = self
                .checks
                .iter()
                .filter_map(|check| {
                    let count = self.failure_count(*check);
                    (count > 0).then(|| format!("{} {}", count, check.name()))
                })
                .collect::<Vec<_>>()
                .join(", ");

            format!(
                "{} failures on {} nodes: {}",
                self.failures.len(),
                self.nodes_checked,
                per_check
            )
        }
    }
}

/// Compares an old checkpoint against a new one
pub struct CheckEngine {
    context: CheckContext,
}

impl CheckEngine {
    /// Prepare a comparison of `old` against `new`
    pub fn new(old: &Checkpoint, new: &Checkpoint, options: CheckOptions) -> Self {
        Self {
            context: CheckContext {
                old: CheckpointView::new(old),
                new: CheckpointView::new(new),
                options,
            },
        }
    }

    /// Important directories that are not a directory of the old checkpoint
    ///
    /// Nothing beneath such a path can be protected.
    pub fn unknown_important_dirs(&self) -> Vec<&NodePath> {
        self.context
            .options
            .important_dirs
            .iter()
            .filter(|dir| {
                !self
                    .context
                    .old
                    .get(dir)
                    .is_some_and(|node| node.is_directory())
            })
            .collect()
    }

    /// Apply every check to every node of the old checkpoint
    #[instrument(skip(self))]
    pub fn run(&self) -> CheckReport {
        let started = Instant::now();
        let context = &self.context;

        if !context.old.is_complete() {
            warn!("The old checkpoint is incomplete, nodes missing from it are not checked");
        }
        if !context.new.is_complete() {
            warn!("The new checkpoint is incomplete, missing nodes may be reported as deleted");
        }
        for dir in self.unknown_important_dirs() {
            warn!("Important directory {} is not a directory of the old checkpoint", dir);
        }
        match context.old.date_estimate() {
            Some(date) => info!("Date estimate of the old checkpoint: {}", date),
            None => info!("The old checkpoint has no timestamps, maturity cannot be judged"),
        }

        let checks = Check::registry();
        let failures: Vec<CheckFailure> = context
            .old
            .nodes()
            .par_iter()
            .flat_map_iter(|node| {
                checks.iter().filter_map(move |check| {
                    check
                        .apply(context, node)
                        .err()
                        .map(|message| CheckFailure {
                            path: node.path().clone(),
                            check: *check,
                            message,
                        })
                })
            })
            .collect();

        let report = CheckReport {
            nodes_checked: context.old.nodes().len(),
            checks: checks.to_vec(),
            failures,
            old_date_estimate: context.old.date_estimate(),
            old_complete: context.old.is_complete(),
            new_complete: context.new.is_complete(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        debug!("{}", report.summary());
        report
    }
}
