//! The integrity rules applied when comparing checkpoints
//!
//! Each [`Check`] looks at one node of the old checkpoint and finds its
//! counterpart in the new checkpoint itself: by path, or for files whose
//! content hash is unambiguous, by hash so that renamed and moved files are
//! not reported as deleted.
//!
//! Only modification times are compared. Access times change whenever a file
//! is read and status-change times change whenever a file is copied, so
//! neither tells anything about the content.
//!
//! | Check | Fails when |
//! |---|---|
//! | `HashCheck` | a file's content changed but its modification time did not |
//! | `TimestampPreservationCheck` | a file's content is unchanged but its modification time changed |
//! | `MatureNodeChangedCheck` | a node unmodified for months before the old checkpoint was modified or deleted |
//! | `ImportantDirChangedCheck` | anything in an important directory changed, except new entries and the directory time they bump |

use crate::checking::CheckContext;
use crate::types::{Node, Sha256};
use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use std::fmt;

/// Outcome of applying a check to one node; the error is the failure message
pub type CheckResult = std::result::Result<(), String>;

/// An integrity rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Check {
    /// Content changed while the modification time stayed the same, which
    /// points at disk failure or filesystem bugs
    #[serde(rename = "HashCheck")]
    Hash,
    /// Content stayed the same while the modification time changed, which
    /// points at copying without preserving timestamps
    #[serde(rename = "TimestampPreservationCheck")]
    TimestampPreservation,
    /// A node nobody worked on for a long time changed or vanished, which
    /// points at tampering
    #[serde(rename = "MatureNodeChangedCheck")]
    MatureNodeChanged,
    /// A destructive change happened below a user-designated directory
    #[serde(rename = "ImportantDirChangedCheck")]
    ImportantDirChanged,
}

const REGISTRY: [Check; 4] = [
    Check::Hash,
    Check::TimestampPreservation,
    Check::MatureNodeChanged,
    Check::ImportantDirChanged,
];

impl Check {
    /// Every check, in the order they are applied
    pub fn registry() -> &'static [Check] {
        &REGISTRY
    }

    /// Name shown to users
    pub fn name(self) -> &'static str {
        match self {
            Check::Hash => "HashCheck",
            Check::TimestampPreservation => "TimestampPreservationCheck",
            Check::MatureNodeChanged => "MatureNodeChangedCheck",
            Check::ImportantDirChanged => "ImportantDirChangedCheck",
        }
    }

    /// One-line explanation shown in help output
    pub fn description(self) -> &'static str {
        match self {
            Check::Hash => "file content changed but its modification time did not",
            Check::TimestampPreservation => {
                "file content unchanged but its modification time changed"
            }
            Check::MatureNodeChanged => {
                "a file or directory untouched for months was modified or deleted"
            }
            Check::ImportantDirChanged => {
                "something in an important directory changed other than new entries"
            }
        }
    }

    /// Apply the check to `old_node` of the old checkpoint
    pub fn apply(self, context: &CheckContext, old_node: &Node) -> CheckResult {
        match self {
            Check::Hash => hash_check(context, old_node),
            Check::TimestampPreservation => timestamp_preservation_check(context, old_node),
            Check::MatureNodeChanged => mature_node_changed_check(context, old_node),
            Check::ImportantDirChanged => important_dir_changed_check(context, old_node),
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where an old node went in the new checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counterpart<'a> {
    /// A node exists at the same path
    SamePath(&'a Node),
    /// The file is gone from its path but its content exists at exactly one
    /// other path
    Moved(&'a Node),
    /// Nothing corresponds to the old node
    Missing,
}

/// Find the counterpart of `old_node` in the new checkpoint
///
/// Matching by content hash requires the digest to be unique in both
/// checkpoints and rules out empty files. Files of known size below
/// `min_hash_match_size` are not matched either; loaded checkpoints carry no
/// sizes, so there uniqueness alone decides.
pub fn locate<'a>(context: &'a CheckContext, old_node: &Node) -> Counterpart<'a> {
    if let Some(new_node) = context.new.get(old_node.path()) {
        return Counterpart::SamePath(new_node);
    }
    if old_node.is_directory() {
        return Counterpart::Missing;
    }

    let Some(digest) = old_node.hash().value() else {
        return Counterpart::Missing;
    };
    if *digest == Sha256::EMPTY {
        return Counterpart::Missing;
    }
    let size = old_node.size();
    if size > 0 && size < context.options.min_hash_match_size {
        return Counterpart::Missing;
    }
    if context.old.hash_count(digest) != 1 {
        return Counterpart::Missing;
    }

    match context.new.unique_with_hash(digest) {
        Some(new_node) => Counterpart::Moved(new_node),
        None => Counterpart::Missing,
    }
}

fn modified(node: &Node) -> Option<DateTime<Utc>> {
    node.timestamps().value().map(|ts| ts.modified)
}

fn kind(node: &Node) -> &'static str {
    if node.is_directory() {
        "directory"
    } else {
        "file"
    }
}

/// Whether both nodes carry digests and they differ
///
/// `None` when either side has no digest to compare.
fn content_changed(old_node: &Node, new_node: &Node) -> Option<bool> {
    let old_hash = old_node.hash().value()?;
    old_hash.strict_eq(new_node.hash()).ok().map(|same| !same)
}

fn hash_check(context: &CheckContext, old_node: &Node) -> CheckResult {
    if old_node.is_directory() {
        return Ok(());
    }
    let Counterpart::SamePath(new_node) = locate(context, old_node) else {
        return Ok(());
    };
    if new_node.is_directory() {
        return Ok(());
    }

    if content_changed(old_node, new_node) == Some(true) {
        if let (Some(old_time), Some(new_time)) = (modified(old_node), modified(new_node)) {
            if old_time == new_time {
                return Err(format!(
                    "Content changed but modification time is still {}: disk failure or tampering",
                    old_time
                ));
            }
        }
    }
    Ok(())
}

fn timestamp_preservation_check(context: &CheckContext, old_node: &Node) -> CheckResult {
    if old_node.is_directory() {
        return Ok(());
    }
    let (new_node, moved) = match locate(context, old_node) {
        Counterpart::SamePath(node) if !node.is_directory() => (node, false),
        Counterpart::Moved(node) => (node, true),
        _ => return Ok(()),
    };

    if content_changed(old_node, new_node) != Some(false) {
        return Ok(());
    }
    if let (Some(old_time), Some(new_time)) = (modified(old_node), modified(new_node)) {
        if old_time != new_time {
            let location = if moved {
                format!(" (moved to {})", new_node.path())
            } else {
                String::new()
            };
            return Err(format!(
                "Content unchanged but modification time changed from {} to {}{}",
                old_time, new_time, location
            ));
        }
    }
    Ok(())
}

fn mature_node_changed_check(context: &CheckContext, old_node: &Node) -> CheckResult {
    let Some(estimate) = context.old.date_estimate() else {
        return Ok(());
    };
    let Some(threshold) =
        estimate.checked_sub_months(Months::new(context.options.maturity_months))
    else {
        return Ok(());
    };
    let Some(old_time) = modified(old_node) else {
        return Ok(());
    };
    if old_time > threshold {
        return Ok(());
    }

    match locate(context, old_node) {
        Counterpart::Missing => Err(format!(
            "Mature {} last modified {} was deleted",
            kind(old_node),
            old_time
        )),
        Counterpart::Moved(_) => Ok(()),
        Counterpart::SamePath(new_node) => {
            if new_node.is_directory() != old_node.is_directory() {
                return Err(format!(
                    "Mature {} was replaced by a {}",
                    kind(old_node),
                    kind(new_node)
                ));
            }
            if old_node.is_directory() {
                return Ok(());
            }
            if content_changed(old_node, new_node) == Some(true) {
                return Err(format!(
                    "Mature file last modified {} has different content",
                    old_time
                ));
            }
            match modified(new_node) {
                Some(new_time) if new_time != old_time => Err(format!(
                    "Mature file modification time changed from {} to {}",
                    old_time, new_time
                )),
                _ => Ok(()),
            }
        }
    }
}

fn important_dir_changed_check(context: &CheckContext, old_node: &Node) -> CheckResult {
    let important = context
        .options
        .important_dirs
        .iter()
        .any(|dir| old_node.path().is_within(dir));
    if !important {
        return Ok(());
    }

    let new_node = match locate(context, old_node) {
        Counterpart::Missing => {
            return Err(format!(
                "{} in an important directory was deleted",
                capitalized(kind(old_node))
            ));
        }
        Counterpart::Moved(new_node) => {
            return Err(format!(
                "File in an important directory was moved to {}",
                new_node.path()
            ));
        }
        Counterpart::SamePath(new_node) => new_node,
    };

    if new_node.is_directory() != old_node.is_directory() {
        return Err(format!(
            "{} in an important directory was replaced by a {}",
            capitalized(kind(old_node)),
            kind(new_node)
        ));
    }

    let times = (modified(old_node), modified(new_node));
    if old_node.is_directory() {
        if let (Some(old_time), Some(new_time)) = times {
            if old_time != new_time {
                let has_new_entry = context
                    .new
                    .children(old_node.path())
                    .any(|child| context.old.get(child.path()).is_none());
                if !has_new_entry {
                    return Err(format!(
                        "Directory modification time changed from {} to {} without new entries",
                        old_time, new_time
                    ));
                }
            }
        }
        return Ok(());
    }

    if content_changed(old_node, new_node) == Some(true) {
        return Err("Content of file in an important directory changed".to_string());
    }
    if let (Some(old_time), Some(new_time)) = times {
        if old_time != new_time {
            return Err(format!(
                "Modification time of file in an important directory changed from {} to {}",
                old_time, new_time
            ));
        }
    }
    Ok(())
}

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
