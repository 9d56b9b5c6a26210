//! Checkpoint generation
//!
//! A [`Generator`] turns a directory tree into a saved [`Checkpoint`]. A run
//! moves through these phases:
//!
//! 1. **Discovering**: the [`NodeSource`] lists every node with its size
//! 2. **Partitioning**: [`remove_and_divide_work`] splits the nodes into one
//!    batch per worker, ordered for the storage medium
//! 3. **Hashing**: one worker per batch hashes files and reads timestamps on a
//!    fixed-size thread pool, inserting results into the shared checkpoint
//! 4. **Reconciling**: failures are collected and the node count is verified
//! 5. **Persisted**: the checkpoint is marked complete and saved
//!
//! Per-node failures never abort a run. They become [`NodeFailure`] records in
//! the [`GenerationReport`] and are counted in the checkpoint.
//!
//! ## Cancellation and resuming
//!
//! Workers poll the [`CancellationToken`] between nodes and at every buffer
//! refill. A cancelled run drops the node in flight and the rest of each
//! batch, then saves what it has as an incomplete checkpoint. Running again
//! on the same output directory reuses every node of that checkpoint which
//! was fully computed and still exists.
//!
//! ## Example
//!
//! ```rust,ignore
//! use checkpoint::{GeneratorBuilder, StorageMedium};
//! use std::path::PathBuf;
//!
//! let generator = GeneratorBuilder::new()
//!     .medium(StorageMedium::Rotational)
//!     .build(PathBuf::from("/srv/photos"), PathBuf::from("/backup/photos-checkpoint"))?;
//!
//! let report = generator.run()?;
//! println!("{} nodes, {} failures", report.discovered, report.failures.len());
//! ```

use crate::cancel::CancellationToken;
use crate::checkpoint::{Checkpoint, CHECKPOINT_FILE_NAME};
use crate::discovery::{NodeFinder, NodeSource};
use crate::error::{CheckpointError, Result};
use crate::hashing::{FileHasher, DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};
use crate::timestamps::read_timestamps;
use crate::types::{Computed, Node, NodePath, ProgressCallback, ProgressInfo, StorageMedium};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Default interval between intermediate saves
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Interval between progress samples
const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Settings of a generation run
#[derive(Debug, Clone, Serialize)]
pub struct GeneratorConfig {
    /// Worker thread count; `None` picks the medium's default
    pub threads: Option<usize>,
    /// Storage medium of the input directory
    pub medium: StorageMedium,
    /// Read buffer size per worker
    pub buffer_size: usize,
    /// Interval between intermediate saves; `None` disables them
    pub autosave_interval: Option<Duration>,
    /// Whether to continue an incomplete checkpoint found in the output directory
    pub resume: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            threads: None,
            medium: StorageMedium::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            autosave_interval: Some(DEFAULT_AUTOSAVE_INTERVAL),
            resume: true,
        }
    }
}

impl GeneratorConfig {
    /// Number of worker threads to use
    pub fn thread_count(&self) -> usize {
        self.threads
            .unwrap_or_else(|| self.medium.default_threads())
            .max(1)
    }
}

/// Which part of processing a node failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The content could not be hashed
    Hashing,
    /// The timestamps could not be read
    Timestamping,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Hashing => f.write_str("hashing"),
            FailureKind::Timestamping => f.write_str("reading timestamps"),
        }
    }
}

/// A per-node failure recorded by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeFailure {
    /// Node that failed
    pub path: NodePath,
    /// Step that failed
    pub kind: FailureKind,
    /// Human-readable cause
    pub reason: String,
}

impl NodeFailure {
    fn new(path: &NodePath, kind: FailureKind, error: &CheckpointError) -> Self {
        let reason = match error {
            CheckpointError::Io(e) if e.kind() == ErrorKind::NotFound => "not found".to_string(),
            other => other.to_string(),
        };
        Self {
            path: path.clone(),
            kind,
            reason,
        }
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} failed: {}", self.path, self.kind, self.reason)
    }
}

/// Result of a generation run
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    /// The saved `checkpoint.txt`
    pub checkpoint_file: PathBuf,
    /// Nodes found by discovery
    pub discovered: usize,
    /// Nodes taken over from a previous incomplete checkpoint
    pub reused: usize,
    /// Nodes processed by workers in this run
    pub processed: usize,
    /// Per-node failures of this run
    pub failures: Vec<NodeFailure>,
    /// Whether the saved checkpoint is complete
    pub complete: bool,
    /// Worker threads used
    pub threads: usize,
    /// Total size of all discovered files
    pub total_bytes: u64,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl GenerationReport {
    /// Whether the run stopped early because of a cancellation
    pub fn cancelled(&self) -> bool {
        !self.complete
    }

    /// Failures of the given kind
    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &NodeFailure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }
}

/// Builder for configuring a [`Generator`]
///
/// # Examples
///
/// ```rust
/// use checkpoint::{GeneratorBuilder, StorageMedium};
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let generator = GeneratorBuilder::new()
///     .medium(StorageMedium::Rotational)
///     .threads(3)
///     .buffer_size(64 * 1024)
///     .autosave_interval(Some(Duration::from_secs(600)))
///     .build(PathBuf::from("./data"), PathBuf::from("./data-checkpoint"))?;
///
/// assert_eq!(generator.config().thread_count(), 3);
/// # Ok(())
/// # }
/// ```
///
/// # Default Values
///
/// - `threads`: 2 for rotational media, 4 per CPU for solid-state media
/// - `medium`: `StorageMedium::SolidState`
/// - `buffer_size`: 1 MiB
/// - `autosave_interval`: 15 minutes
/// - `resume`: true
pub struct GeneratorBuilder {
    config: GeneratorConfig,
    progress_callback: Option<ProgressCallback>,
    cancellation: CancellationToken,
    source: Option<Box<dyn NodeSource>>,
}

impl GeneratorBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: GeneratorConfig::default(),
            progress_callback: None,
            cancellation: CancellationToken::new(),
            source: None,
        }
    }

    /// Set the number of worker threads (minimum 1)
    pub fn threads(mut self, count: usize) -> Self {
        self.config.threads = Some(count);
        self
    }

    /// Set the storage medium
    ///
    /// Determines the default thread count and how nodes are ordered across
    /// workers.
    pub fn medium(mut self, medium: StorageMedium) -> Self {
        self.config.medium = medium;
        self
    }

    /// Set the per-worker read buffer size in bytes (minimum 4096)
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Set the interval between intermediate saves, `None` to disable them
    pub fn autosave_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.autosave_interval = interval;
        self
    }

    /// Continue an incomplete checkpoint found in the output directory
    pub fn resume(mut self, resume: bool) -> Self {
        self.config.resume = resume;
        self
    }

    /// Set a callback receiving periodic progress samples
    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Use `token` to request cancellation of the run
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Replace directory walking by another node source
    pub fn node_source(mut self, source: impl NodeSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Build the generator
    ///
    /// # Arguments
    ///
    /// * `input_dir` - Directory tree to fingerprint
    /// * `output_dir` - Checkpoint directory receiving `checkpoint.txt`
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::InvalidConfiguration`] for a zero thread count, a
    ///   buffer below 4096 bytes or a zero autosave interval
    pub fn build(self, input_dir: PathBuf, output_dir: PathBuf) -> Result<Generator> {
        if self.config.threads == Some(0) {
            return Err(CheckpointError::InvalidConfiguration(
                "thread count must be at least 1".to_string(),
            ));
        }
        if self.config.buffer_size < MIN_BUFFER_SIZE {
            return Err(CheckpointError::InvalidConfiguration(format!(
                "buffer size must be at least {} bytes",
                MIN_BUFFER_SIZE
            )));
        }
        if self.config.autosave_interval == Some(Duration::ZERO) {
            return Err(CheckpointError::InvalidConfiguration(
                "autosave interval must not be zero".to_string(),
            ));
        }

        Ok(Generator {
            input_dir,
            output_dir,
            config: self.config,
            progress_callback: self.progress_callback,
            cancellation: self.cancellation,
            source: self.source.unwrap_or_else(|| Box::new(NodeFinder::new())),
        })
    }
}

impl Default for GeneratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Work done by one worker
#[derive(Debug, Default)]
struct BatchOutcome {
    processed: usize,
    failures: Vec<NodeFailure>,
    cancelled: bool,
}

impl BatchOutcome {
    fn merge(&mut self, other: BatchOutcome) {
        self.processed += other.processed;
        self.failures.extend(other.failures);
        self.cancelled |= other.cancelled;
    }
}

/// Totals a run measures its progress against
#[derive(Debug, Clone, Copy)]
struct Totals {
    nodes: usize,
    bytes: u64,
    started: Instant,
}

/// Generates a checkpoint of one directory tree
pub struct Generator {
    input_dir: PathBuf,
    output_dir: PathBuf,
    config: GeneratorConfig,
    progress_callback: Option<ProgressCallback>,
    cancellation: CancellationToken,
    source: Box<dyn NodeSource>,
}

impl Generator {
    /// Settings of this generator
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Token which cancels this generator's runs
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Generate and save the checkpoint
    ///
    /// # Returns
    ///
    /// The report of the run. A cancelled run still returns `Ok`, with
    /// [`GenerationReport::cancelled`] set and an incomplete checkpoint saved.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::NotADirectory`] if the input is not a directory
    /// - [`CheckpointError::AlreadyComplete`] if the output holds a complete checkpoint
    /// - [`CheckpointError::NodeCountMismatch`] and other defects
    /// - [`CheckpointError::Io`] if the checkpoint cannot be saved
    pub fn run(&self) -> Result<GenerationReport> {
        self.generate().map(|(_, report)| report)
    }

    /// Generate and save the checkpoint, also returning it
    #[instrument(skip(self), fields(input = ?self.input_dir, output = ?self.output_dir))]
    pub fn generate(&self) -> Result<(Checkpoint, GenerationReport)> {
        let started = Instant::now();
        let root = self.resolve_input()?;
        let previous = self.load_previous()?;
        info!("Generation config: {:?}", self.config);

        // Discovering
        info!("Discovering nodes in {:?}", root);
        let discovered = self.source.discover(&root)?;
        let totals = Totals {
            nodes: discovered.len(),
            bytes: discovered.iter().map(Node::size).sum(),
            started,
        };
        info!("Discovered {} nodes with {} bytes", totals.nodes, totals.bytes);

        let checkpoint = Checkpoint::new();
        let (mut pending, reused) = match previous {
            Some(previous) => reuse_computed_nodes(&checkpoint, previous, discovered)?,
            None => (discovered, 0),
        };

        // Partitioning
        let threads = self.config.thread_count();
        let batches =
            remove_and_divide_work(&mut pending, threads, self.config.medium, &mut rand::rng());
        info!(
            "Partitioned work into {} batches for {} threads ({:?})",
            batches.len(),
            threads,
            self.config.medium
        );

        // Hashing
        let outcome = self.process_batches(&root, &checkpoint, batches, totals)?;
        self.report_progress(&checkpoint, totals);

        // Reconciling
        for failure in &outcome.failures {
            warn!("{}", failure);
        }

        let report = |checkpoint_file: PathBuf, complete: bool| GenerationReport {
            checkpoint_file,
            discovered: totals.nodes,
            reused,
            processed: outcome.processed,
            failures: outcome.failures.clone(),
            complete,
            threads,
            total_bytes: totals.bytes,
            duration: started.elapsed(),
        };

        if outcome.cancelled {
            warn!(
                "Generation cancelled with {} of {} nodes processed",
                checkpoint.node_count(),
                totals.nodes
            );
            checkpoint.set_complete(false);
            let file = checkpoint.save(&self.output_dir)?;
            return Ok((checkpoint, report(file, false)));
        }

        let actual = checkpoint.node_count();
        if actual != totals.nodes {
            return Err(CheckpointError::NodeCountMismatch {
                discovered: totals.nodes,
                actual,
            });
        }

        // Persisted
        checkpoint.set_complete(true);
        let file = checkpoint.save(&self.output_dir)?;
        let report = report(file, true);
        info!(
            "Checkpoint complete: {} nodes ({} reused), {} failures in {}",
            report.discovered,
            report.reused,
            report.failures.len(),
            humantime::format_duration(Duration::from_secs(report.duration.as_secs()))
        );
        Ok((checkpoint, report))
    }

    /// Load the checkpoint a run continues, if any
    fn load_previous(&self) -> Result<Option<Checkpoint>> {
        let file = self.output_dir.join(CHECKPOINT_FILE_NAME);
        if !file.exists() {
            return Ok(None);
        }

        let previous = Checkpoint::load(&file)?;
        if previous.is_complete() {
            return Err(CheckpointError::AlreadyComplete(self.output_dir.clone()));
        }
        if !self.config.resume {
            info!("Ignoring incomplete checkpoint at {:?}", file);
            return Ok(None);
        }

        info!(
            "Resuming incomplete checkpoint with {} nodes",
            previous.node_count()
        );
        Ok(Some(previous))
    }

    /// Input directory with symlinks resolved, so a symlinked root is walked
    /// like the directory it points to
    fn resolve_input(&self) -> Result<PathBuf> {
        let not_a_directory = || CheckpointError::NotADirectory(self.input_dir.clone());
        let root = match fs::canonicalize(&self.input_dir) {
            Ok(root) => root,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_a_directory()),
            Err(e) => return Err(e.into()),
        };
        if !root.is_dir() {
            return Err(not_a_directory());
        }
        if root != self.input_dir {
            debug!("Resolved input {:?} to {:?}", self.input_dir, root);
        }
        Ok(root)
    }

    fn process_batches(
        &self,
        root: &Path,
        checkpoint: &Checkpoint,
        batches: Vec<Vec<Node>>,
        totals: Totals,
    ) -> Result<BatchOutcome> {
        if batches.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(batches.len())
            .thread_name(|i| format!("checkpoint-worker-{}", i))
            .build()
            .map_err(|e| CheckpointError::ThreadPool(e.to_string()))?;

        let results: Mutex<Vec<Result<BatchOutcome>>> = Mutex::new(Vec::with_capacity(batches.len()));
        let finished = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let monitor = scope.spawn(|| self.monitor(checkpoint, &finished, totals));

            pool.scope(|s| {
                for (index, batch) in batches.into_iter().enumerate() {
                    let results = &results;
                    s.spawn(move |_| {
                        let outcome = self.process_batch(root, index, batch, checkpoint);
                        results.lock().push(outcome);
                    });
                }
            });

            finished.store(true, Ordering::SeqCst);
            monitor.thread().unpark();
        });

        let mut merged = BatchOutcome::default();
        for result in results.into_inner() {
            merged.merge(result?);
        }
        Ok(merged)
    }

    fn process_batch(
        &self,
        root: &Path,
        index: usize,
        batch: Vec<Node>,
        checkpoint: &Checkpoint,
    ) -> Result<BatchOutcome> {
        debug!("Batch {} started with {} nodes", index, batch.len());
        let mut hasher = FileHasher::new(self.config.buffer_size, self.cancellation.clone());
        let mut outcome = BatchOutcome::default();

        for node in batch {
            if self.cancellation.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            match process_node(&mut hasher, root, node) {
                Ok((node, failures)) => {
                    checkpoint.add_node(node)?;
                    outcome.processed += 1;
                    outcome.failures.extend(failures);
                }
                Err(e) if e.is_cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            "Batch {} finished: {} processed, {} failures, cancelled: {}",
            index,
            outcome.processed,
            outcome.failures.len(),
            outcome.cancelled
        );
        Ok(outcome)
    }

    /// Sample progress and save intermediate checkpoints until `finished`
    fn monitor(&self, checkpoint: &Checkpoint, finished: &AtomicBool, totals: Totals) {
        let mut last_save = Instant::now();

        while !finished.load(Ordering::SeqCst) {
            std::thread::park_timeout(SAMPLE_INTERVAL);
            if finished.load(Ordering::SeqCst) {
                break;
            }

            self.report_progress(checkpoint, totals);

            if let Some(interval) = self.config.autosave_interval {
                if last_save.elapsed() >= interval {
                    match checkpoint.save_incomplete(&self.output_dir) {
                        Ok(file) => debug!("Intermediate save to {:?}", file),
                        Err(e) => warn!("Intermediate save failed: {}", e),
                    }
                    last_save = Instant::now();
                }
            }
        }
    }

    fn report_progress(&self, checkpoint: &Checkpoint, totals: Totals) {
        if let Some(callback) = &self.progress_callback {
            let stats = checkpoint.stats();
            callback(ProgressInfo {
                operation: "Hashing".to_string(),
                processed: stats.node_count,
                total: totals.nodes,
                bytes_processed: stats.total_size,
                total_bytes: totals.bytes,
                elapsed: totals.started.elapsed(),
            });
        }
    }
}

/// Move fully computed nodes of `previous` which still exist into `checkpoint`
///
/// Returns the nodes left to process and the number of reused nodes.
fn reuse_computed_nodes(
    checkpoint: &Checkpoint,
    previous: Checkpoint,
    discovered: Vec<Node>,
) -> Result<(Vec<Node>, usize)> {
    let mut previous: BTreeMap<NodePath, Node> = previous
        .into_nodes()
        .into_iter()
        .map(|node| (node.path().clone(), node))
        .collect();

    let mut pending = Vec::new();
    let mut reused = 0;
    for node in discovered {
        match previous.remove(node.path()) {
            Some(old) if old.is_directory() == node.is_directory() && old.is_fully_computed() => {
                checkpoint.add_node(Node::with_data(
                    node.path().clone(),
                    node.is_directory(),
                    node.size(),
                    *old.hash(),
                    *old.timestamps(),
                )?)?;
                reused += 1;
            }
            _ => pending.push(node),
        }
    }

    info!(
        "Reused {} nodes, {} left to process, {} vanished since the last run",
        reused,
        pending.len(),
        previous.len()
    );
    Ok((pending, reused))
}

/// Hash and timestamp one node
///
/// Hashing comes first (files only), then timestamps. Failures of either step
/// are returned as [`NodeFailure`]s alongside the node, whose field is then
/// `Failed`.
///
/// # Errors
///
/// - [`CheckpointError::Cancelled`] if cancellation interrupted hashing; the
///   node is dropped
pub fn process_node(
    hasher: &mut FileHasher,
    root: &Path,
    node: Node,
) -> Result<(Node, Vec<NodeFailure>)> {
    let full_path = node.path().to_path_buf(root);
    let mut failures = Vec::new();

    let hash = if node.is_directory() {
        Computed::NotComputed
    } else {
        match hasher.hash_file(&full_path) {
            Ok(digest) => Computed::Value(digest),
            Err(CheckpointError::Cancelled) => return Err(CheckpointError::Cancelled),
            Err(e) => {
                failures.push(NodeFailure::new(node.path(), FailureKind::Hashing, &e));
                Computed::Failed
            }
        }
    };

    let timestamps = match read_timestamps(&full_path) {
        Ok(timestamps) => Computed::Value(timestamps),
        Err(e) => {
            failures.push(NodeFailure::new(node.path(), FailureKind::Timestamping, &e));
            Computed::Failed
        }
    };

    let node = Node::with_data(
        node.path().clone(),
        node.is_directory(),
        node.size(),
        hash,
        timestamps,
    )?;
    Ok((node, failures))
}

/// Take all nodes out of `work` and divide them into batches
///
/// # Arguments
///
/// * `work` - Nodes to divide; left empty
/// * `batch_count` - Desired number of batches, usually the thread count
/// * `medium` - Rotational media get path-sorted contiguous batches so each
///   worker reads neighbouring files; solid-state media get a random shuffle
/// * `rng` - Source of randomness for the shuffle
///
/// # Returns
///
/// Non-empty batches whose sizes differ by at most one. When there are fewer
/// nodes than `batch_count`, fewer batches are returned.
///
/// # Examples
///
/// ```rust
/// use checkpoint::generator::remove_and_divide_work;
/// use checkpoint::{Node, NodePath, StorageMedium};
///
/// let mut work: Vec<Node> = (0..7)
///     .map(|i| Node::new(NodePath::new(format!("./{}", i).into_bytes()).unwrap(), false, 0))
///     .collect();
///
/// let batches = remove_and_divide_work(&mut work, 3, StorageMedium::Rotational, &mut rand::rng());
/// let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
///
/// assert_eq!(sizes, vec![3, 2, 2]);
/// assert!(work.is_empty());
/// ```
pub fn remove_and_divide_work<R: Rng + ?Sized>(
    work: &mut Vec<Node>,
    batch_count: usize,
    medium: StorageMedium,
    rng: &mut R,
) -> Vec<Vec<Node>> {
    let mut items = std::mem::take(work);
    if items.is_empty() {
        return Vec::new();
    }

    match medium {
        StorageMedium::Rotational => items.sort_by(|a, b| a.path().cmp(b.path())),
        StorageMedium::SolidState => items.shuffle(rng),
    }

    let total = items.len();
    let batch_count = batch_count.clamp(1, total);
    let base = total / batch_count;
    let remainder = total % batch_count;

    let mut iter = items.into_iter();
    (0..batch_count)
        .map(|i| {
            let size = base + usize::from(i < remainder);
            iter.by_ref().take(size).collect()
        })
        .collect()
}
