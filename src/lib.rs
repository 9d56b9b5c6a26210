//! # Checkpoint - Tamper- and corruption-evident directory fingerprints
//!
//! A library for recording the state of a directory tree in a plain-text
//! checkpoint and comparing two checkpoints to find silent data corruption,
//! botched copies and tampering.
//!
//! ## Overview
//!
//! Checkpoint lets you:
//! - Record the SHA-256 hash of every file and the timestamps of every file
//!   and directory below a root
//! - Interrupt a long run and resume it later from the saved partial state
//! - Compare an old checkpoint, e.g. of a backup, against a new one
//! - Detect files whose content changed while their modification time did not
//! - Detect copies which did not preserve modification times
//! - Detect changes to data nobody touched for months, or to directories you
//!   mark as important
//!
//! ## Architecture
//!
//! - **Discovery**: the input tree is walked once, without following symbolic
//!   links or crossing file systems
//! - **Parallel Hashing**: nodes are divided into balanced batches, sorted for
//!   rotational disks and shuffled for solid-state media, and processed on a
//!   fixed-size thread pool
//! - **Atomic Saves**: checkpoints are written to a temporary file and renamed
//!   into place, so a crash never leaves a half-written file behind
//! - **Self-Delimiting Format**: every checkpoint ends with a completion
//!   marker, so truncation is always detected when loading
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use checkpoint::{CheckEngine, CheckOptions, Checkpoint, GeneratorBuilder};
//! use std::path::{Path, PathBuf};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Fingerprint the live data
//! let report = GeneratorBuilder::new()
//!     .build(PathBuf::from("./photos"), PathBuf::from("./photos-now"))?
//!     .run()?;
//! println!("Checkpoint written to {:?}", report.checkpoint_file);
//!
//! // Compare it with a checkpoint taken of a backup
//! let old = Checkpoint::load(Path::new("./photos-backup"))?;
//! let new = Checkpoint::load(Path::new("./photos-now"))?;
//! let check = CheckEngine::new(&old, &new, CheckOptions::default()).run();
//!
//! for failure in &check.failures {
//!     println!("{} {}: {}", failure.check, failure.path, failure.message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Advanced Usage
//!
//! ### Cancelling and Resuming
//!
//! ```rust,no_run
//! use checkpoint::{CancellationToken, GeneratorBuilder, StorageMedium};
//! use std::path::PathBuf;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let token = CancellationToken::new();
//! let generator = GeneratorBuilder::new()
//!     .medium(StorageMedium::Rotational)
//!     .autosave_interval(Some(Duration::from_secs(300)))
//!     .resume(true)
//!     .cancellation(token.clone())
//!     .build(PathBuf::from("/mnt/archive"), PathBuf::from("/mnt/archive-checkpoint"))?;
//!
//! // Calling token.cancel() from another thread stops the run and saves an
//! // incomplete checkpoint, which the next run with resume(true) continues.
//! let report = generator.run()?;
//! if report.cancelled() {
//!     println!("Interrupted, run again to resume");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Nodes
//!
//! A node is a file or directory, identified by its path relative to the
//! input root, written as `.` or `./a/b`. Files carry a content hash; every
//! node carries access, modification and status-change timestamps. Each value
//! is either computed, failed or not computed, see [`Computed`].
//!
//! ### Checkpoint Files
//!
//! A checkpoint directory holds one `checkpoint.txt`, a sequence of
//! NUL-terminated records sorted by path bytes, followed by a marker telling
//! whether the checkpoint is complete. The format is readable with standard
//! text tools and parsed strictly: anything unexpected is an error, never a
//! guess.
//!
//! ### Checks
//!
//! [`Check::registry`] lists the integrity rules. Each is applied to every
//! node of the old checkpoint; a failing check never stops the others.
//!
//! ## Error Handling
//!
//! All fallible operations return `Result<T, CheckpointError>`. Failures to
//! hash or stat a single node are not errors: they are recorded in the
//! checkpoint and the generation report, and the run goes on.
//!
//! ## Module Organization
//!
//! - [`checkpoint`]: The checkpoint collection with saving and loading
//! - [`format`]: Encoding and decoding of `checkpoint.txt`
//! - [`generator`]: Parallel generation with autosave and resume
//! - [`discovery`]: Walking the input tree
//! - [`hashing`]: Streaming SHA-256 of files
//! - [`timestamps`]: Reading file timestamps
//! - [`checking`]: Comparing two checkpoints
//! - [`checks`]: The integrity rules
//! - [`progress`]: Progress bar and progress logging
//! - [`cancel`]: Cooperative cancellation
//! - [`types`]: Common types and data structures
//! - [`error`]: Error types and handling

// Public API modules
pub mod cancel;
pub mod checking;
pub mod checkpoint;
pub mod checks;
pub mod discovery;
pub mod error;
pub mod format;
pub mod generator;
pub mod hashing;
pub mod progress;
pub mod timestamps;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use cancel::CancellationToken;
pub use checking::{CheckEngine, CheckOptions, CheckReport};
pub use checkpoint::Checkpoint;
pub use checks::Check;
pub use discovery::{NodeFinder, NodeSource};
pub use error::{CheckpointError, Result};
pub use generator::{GenerationReport, Generator, GeneratorBuilder};
pub use types::*;
