//! Error types for the checkpoint library
//!
//! This module defines every error that can occur while generating, loading,
//! saving or comparing checkpoints. The variants fall into four groups:
//!
//! - **I/O failures**: reading input files or writing checkpoint files
//! - **Cancellation**: a shutdown was requested while work was in flight
//! - **Format errors**: a checkpoint file on disk is truncated or malformed
//! - **Defects**: internal consistency violations which indicate a bug
//!
//! Integrity *violations* found by the check engine are not errors; they are
//! reported through [`crate::checking::CheckReport`].

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the checkpoint library
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Main error type for all checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization of reports
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A shutdown was requested while the operation was running
    #[error("Operation cancelled")]
    Cancelled,

    /// The checkpoint file ended without a terminal marker record
    #[error("Checkpoint is truncated: {0}")]
    Truncated(String),

    /// A record of the checkpoint file could not be parsed
    #[error("Malformed checkpoint record #{record}: {reason}")]
    MalformedRecord {
        /// 1-based index of the offending record
        record: usize,
        /// What was wrong with it
        reason: String,
    },

    /// A hex-encoded hash could not be decoded
    #[error("Invalid SHA-256 value '{value}': {reason}")]
    InvalidHash {
        /// The rejected input
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// A date could not be parsed
    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// A node path violates the path conventions
    #[error("Invalid node path {path:?}: {reason}")]
    InvalidPath {
        /// Lossy rendering of the path
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// A strict hash comparison was attempted without a digest on one side
    #[error("Hash unavailable for comparison: {0}")]
    HashUnavailable(String),

    /// The input of a generation run is not a directory
    #[error("Input path is not a directory: {0:?}")]
    NotADirectory(PathBuf),

    /// Generation was requested for an output which already holds a complete checkpoint
    #[error("Checkpoint at {0:?} is complete already, nothing to do")]
    AlreadyComplete(PathBuf),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A node with the same path was already added to the checkpoint
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    /// A node violates the data model invariants
    #[error("Invalid node {path}: {reason}")]
    InvalidNode {
        /// Lossy rendering of the node path
        path: String,
        /// The violated invariant
        reason: String,
    },

    /// Workers produced a different number of nodes than discovery found
    #[error("Node count mismatch: discovered {discovered}, checkpoint holds {actual}")]
    NodeCountMismatch {
        /// Number of nodes found by discovery
        discovered: usize,
        /// Number of nodes in the checkpoint after all workers finished
        actual: usize,
    },

    /// Thread pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckpointError {
    /// Create a malformed-record error
    pub fn malformed(record: usize, reason: impl Into<String>) -> Self {
        CheckpointError::MalformedRecord {
            record,
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        CheckpointError::Internal(msg.into())
    }

    /// Check if this error is a cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CheckpointError::Cancelled)
    }

    /// Check if this error indicates a corrupt or truncated checkpoint file
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            CheckpointError::Truncated(_)
                | CheckpointError::MalformedRecord { .. }
                | CheckpointError::InvalidHash { .. }
                | CheckpointError::InvalidTimestamp(_)
                | CheckpointError::InvalidPath { .. }
        )
    }

    /// Check if this error indicates a bug in this library
    ///
    /// Defects are never recoverable and should be reported upstream.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            CheckpointError::DuplicateNode(_)
                | CheckpointError::InvalidNode { .. }
                | CheckpointError::NodeCountMismatch { .. }
                | CheckpointError::HashUnavailable(_)
                | CheckpointError::Internal(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            CheckpointError::Truncated(_) => format!(
                "{}. The checkpoint was not written completely; generate it again.",
                self
            ),
            CheckpointError::AlreadyComplete(path) => format!(
                "The checkpoint at {:?} is complete already. Use a different output directory.",
                path
            ),
            e if e.is_defect() => format!("{}. This is a bug, please report it.", e),
            _ => self.to_string(),
        }
    }
}
