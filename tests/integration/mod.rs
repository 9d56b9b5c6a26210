//! Integration tests for checkpoint
//!
//! Tests real-world scenarios end to end: a directory tree is fingerprinted,
//! changed the way disks, copy tools or intruders change data, fingerprinted
//! again, and the two checkpoints are loaded from disk and compared.

use ::checkpoint::*;
use filetime::FileTime;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

const YEAR: i64 = 365 * 24 * 60 * 60;

/// Test harness for generate-and-compare scenarios
pub struct CheckpointTestHarness {
    pub input: TempDir,
    pub checkpoints: TempDir,
}

impl CheckpointTestHarness {
    /// Create a harness with an empty input tree
    pub fn new() -> Self {
        Self {
            input: TempDir::new().unwrap(),
            checkpoints: TempDir::new().unwrap(),
        }
    }

    /// Absolute path of `relative` in the input tree
    pub fn path(&self, relative: &str) -> PathBuf {
        self.input.path().join(relative)
    }

    /// Write a file, creating parent directories
    pub fn write(&self, relative: &str, content: &[u8]) {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    /// Replace a file's content without changing its modification time
    pub fn corrupt(&self, relative: &str, content: &[u8]) {
        let path = self.path(relative);
        let mtime = FileTime::from_last_modification_time(&fs::metadata(&path).unwrap());
        fs::write(&path, content).unwrap();
        filetime::set_file_mtime(&path, mtime).unwrap();
    }

    /// Shift a file's modification time
    pub fn touch(&self, relative: &str, offset_secs: i64) {
        let path = self.path(relative);
        let mtime = FileTime::from_last_modification_time(&fs::metadata(&path).unwrap());
        let shifted = FileTime::from_unix_time(mtime.unix_seconds() + offset_secs, mtime.nanoseconds());
        filetime::set_file_mtime(&path, shifted).unwrap();
    }

    /// Set a file's modification time to `age_secs` before now
    pub fn age(&self, relative: &str, age_secs: i64) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        filetime::set_file_mtime(self.path(relative), FileTime::from_unix_time(now - age_secs, 0))
            .unwrap();
    }

    /// Generate a checkpoint into the checkpoint directory `name`
    pub fn generate(&self, name: &str) -> GenerationReport {
        let report = GeneratorBuilder::new()
            .threads(3)
            .build(
                self.input.path().to_path_buf(),
                self.checkpoints.path().join(name),
            )
            .unwrap()
            .run()
            .unwrap();
        assert!(report.complete);
        report
    }

    /// Load two saved checkpoints and compare them
    pub fn check(&self, old: &str, new: &str, options: CheckOptions) -> CheckReport {
        let old = Checkpoint::load(&self.checkpoints.path().join(old)).unwrap();
        let new = Checkpoint::load(&self.checkpoints.path().join(new)).unwrap();
        CheckEngine::new(&old, &new, options).run()
    }

    /// Path of a saved checkpoint file
    pub fn checkpoint_file(&self, name: &str) -> PathBuf {
        self.checkpoints.path().join(name).join("checkpoint.txt")
    }
}

impl Default for CheckpointTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic file content of a given size
pub fn content(seed: u8, size: usize) -> Vec<u8> {
    (0..size).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn node_path(path: &str) -> NodePath {
    NodePath::new(path.as_bytes().to_vec()).unwrap()
}

fn failed_paths(report: &CheckReport, check: Check) -> Vec<String> {
    report
        .failures
        .iter()
        .filter(|f| f.check == check)
        .map(|f| f.path.to_string())
        .collect()
}

fn standard_tree(harness: &CheckpointTestHarness) {
    harness.write("a.txt", b"alpha");
    harness.write("b.txt", b"bravo");
    harness.write("docs/report.md", &content(1, 10_000));
    harness.write("docs/notes.txt", b"notes");
    harness.write("photos/2019/beach.jpg", &content(2, 20_000));
}

#[test]
fn test_unchanged_tree_passes() {
    let harness = CheckpointTestHarness::new();
    standard_tree(&harness);

    let first = harness.generate("first");
    let second = harness.generate("second");
    assert_eq!(first.discovered, 9);
    assert_eq!(second.discovered, 9);

    let report = harness.check("first", "second", CheckOptions::default());
    assert!(report.passed(), "{:?}", report.failures);
    assert_eq!(report.nodes_checked, 9);
    assert!(report.old_complete && report.new_complete);
}

#[test]
fn test_silent_corruption_is_detected() {
    let harness = CheckpointTestHarness::new();
    standard_tree(&harness);
    harness.generate("before");

    harness.corrupt("docs/report.md", &content(9, 10_000));
    harness.generate("after");

    let report = harness.check("before", "after", CheckOptions::default());
    assert_eq!(failed_paths(&report, Check::Hash), vec!["./docs/report.md"]);
    assert_eq!(report.failure_count(Check::TimestampPreservation), 0);
}

#[test]
fn test_edit_with_new_mtime_is_not_corruption() {
    let harness = CheckpointTestHarness::new();
    standard_tree(&harness);
    harness.generate("before");

    harness.write("a.txt", b"alpha, edited");
    harness.touch("a.txt", 60);
    harness.generate("after");

    let report = harness.check("before", "after", CheckOptions::default());
    assert!(report.passed(), "{:?}", report.failures);
}

#[test]
fn test_lost_timestamps_are_detected() {
    let harness = CheckpointTestHarness::new();
    standard_tree(&harness);
    harness.generate("backup");

    harness.touch("b.txt", 24 * 60 * 60);
    harness.generate("restored");

    let report = harness.check("backup", "restored", CheckOptions::default());
    assert_eq!(
        failed_paths(&report, Check::TimestampPreservation),
        vec!["./b.txt"]
    );
    assert_eq!(report.failure_count(Check::Hash), 0);
}

#[test]
fn test_deleted_mature_file_is_detected() {
    let harness = CheckpointTestHarness::new();
    standard_tree(&harness);
    harness.write("archive/tax-2019.pdf", b"receipts");
    harness.age("archive/tax-2019.pdf", 2 * YEAR);
    harness.write("archive/draft.txt", b"recent");
    harness.generate("before");

    fs::remove_file(harness.path("archive/tax-2019.pdf")).unwrap();
    fs::remove_file(harness.path("archive/draft.txt")).unwrap();
    harness.generate("after");

    let report = harness.check("before", "after", CheckOptions::default());
    assert_eq!(
        failed_paths(&report, Check::MatureNodeChanged),
        vec!["./archive/tax-2019.pdf"]
    );
}

#[test]
fn test_renamed_mature_file_is_not_reported() {
    let harness = CheckpointTestHarness::new();
    standard_tree(&harness);
    harness.write("archive/scan.tiff", &content(3, 50_000));
    harness.age("archive/scan.tiff", 2 * YEAR);
    harness.generate("before");

    fs::create_dir_all(harness.path("sorted")).unwrap();
    fs::rename(harness.path("archive/scan.tiff"), harness.path("sorted/scan.tiff")).unwrap();
    harness.generate("after");

    let report = harness.check("before", "after", CheckOptions::default());
    assert!(report.passed(), "{:?}", report.failures);
}

#[test]
fn test_maturity_is_configurable() {
    let harness = CheckpointTestHarness::new();
    standard_tree(&harness);
    harness.write("old.txt", b"six weeks old");
    harness.age("old.txt", 42 * 24 * 60 * 60);
    harness.generate("before");

    fs::remove_file(harness.path("old.txt")).unwrap();
    harness.generate("after");

    let lenient = harness.check("before", "after", CheckOptions::default());
    assert!(lenient.passed(), "{:?}", lenient.failures);

    let strict = harness.check(
        "before",
        "after",
        CheckOptions {
            maturity_months: 1,
            ..Default::default()
        },
    );
    assert_eq!(failed_paths(&strict, Check::MatureNodeChanged), vec!["./old.txt"]);
}

#[test]
fn test_important_dir_allows_new_files() {
    let harness = CheckpointTestHarness::new();
    standard_tree(&harness);
    harness.generate("before");

    // Make the directory time change observable on coarse file systems
    std::thread::sleep(Duration::from_millis(20));
    harness.write("docs/new.txt", b"fresh");
    harness.generate("after");

    let options = CheckOptions {
        important_dirs: vec![NodePath::parse_user("docs").unwrap()],
        ..Default::default()
    };
    let report = harness.check("before", "after", options);
    assert!(report.passed(), "{:?}", report.failures);
}

#[test]
fn test_important_dir_reports_deletions() {
    let harness = CheckpointTestHarness::new();
    standard_tree(&harness);
    harness.generate("before");

    fs::remove_file(harness.path("docs/notes.txt")).unwrap();
    fs::remove_file(harness.path("a.txt")).unwrap();
    harness.generate("after");

    let options = CheckOptions {
        important_dirs: vec![NodePath::parse_user("./docs/").unwrap()],
        ..Default::default()
    };
    let report = harness.check("before", "after", options);
    let failed = failed_paths(&report, Check::ImportantDirChanged);
    assert!(failed.contains(&"./docs/notes.txt".to_string()), "{:?}", failed);
    assert!(!failed.contains(&"./a.txt".to_string()));
}

#[test]
fn test_saved_checkpoint_matches_generated() {
    let harness = CheckpointTestHarness::new();
    standard_tree(&harness);

    let (generated, report) = GeneratorBuilder::new()
        .medium(StorageMedium::Rotational)
        .build(
            harness.input.path().to_path_buf(),
            harness.checkpoints.path().join("cp"),
        )
        .unwrap()
        .generate()
        .unwrap();

    assert_eq!(report.checkpoint_file, harness.checkpoint_file("cp"));
    let loaded = Checkpoint::load(&report.checkpoint_file).unwrap();
    assert_eq!(loaded, generated);
    assert_eq!(loaded.date_estimate(), generated.date_estimate());

    let beach = loaded.get(&node_path("./photos/2019/beach.jpg")).unwrap();
    assert_eq!(
        beach.hash(),
        &Computed::Value(::checkpoint::hashing::hash_data(&content(2, 20_000)))
    );
}

#[test]
fn test_checkpoint_file_is_plain_text() {
    let harness = CheckpointTestHarness::new();
    harness.write("a.txt", b"alpha");
    harness.generate("cp");

    let bytes = fs::read(harness.checkpoint_file("cp")).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    let records: Vec<&str> = text.split('\0').collect();

    assert_eq!(records.len(), 4);
    assert_eq!(records[0], ".");
    assert!(records[1].starts_with("\t(directory)\tBirth: -\tAccess: "));
    assert!(records[1].ends_with("\n./a.txt"));
    assert!(records[2].starts_with(&format!(
        "\t{}\tBirth: -",
        ::checkpoint::hashing::hash_data(b"alpha")
    )));
    assert!(records[2].ends_with("\nThis checkpoint is complete.\n"));
    assert_eq!(records[3], "");
}

#[test]
fn test_truncated_checkpoint_is_rejected() {
    let harness = CheckpointTestHarness::new();
    standard_tree(&harness);
    harness.generate("cp");

    let file = harness.checkpoint_file("cp");
    let bytes = fs::read(&file).unwrap();
    fs::write(&file, &bytes[..bytes.len() / 2]).unwrap();

    let err = Checkpoint::load(&file).unwrap_err();
    assert!(matches!(err, CheckpointError::Truncated(_)), "{}", err);
    assert!(err.is_corruption());
}

#[test]
fn test_damaged_hash_is_rejected() {
    let harness = CheckpointTestHarness::new();
    harness.write("a.txt", b"alpha");
    harness.generate("cp");

    let file = harness.checkpoint_file("cp");
    let digest = ::checkpoint::hashing::hash_data(b"alpha").to_hex();
    let text = fs::read_to_string(&file).unwrap();
    let damaged = text.replacen(&digest, &"Z".repeat(64), 1);
    assert_ne!(text, damaged);
    fs::write(&file, damaged).unwrap();

    let err = Checkpoint::load(harness.checkpoints.path().join("cp").as_path()).unwrap_err();
    assert!(err.is_corruption(), "{}", err);
}

#[test]
fn test_complete_output_is_refused() {
    let harness = CheckpointTestHarness::new();
    standard_tree(&harness);
    harness.generate("cp");

    let err = GeneratorBuilder::new()
        .build(
            harness.input.path().to_path_buf(),
            harness.checkpoints.path().join("cp"),
        )
        .unwrap()
        .run()
        .unwrap_err();
    assert!(matches!(err, CheckpointError::AlreadyComplete(_)));
    assert!(err.user_message().contains("different output directory"));
}

#[cfg(unix)]
#[test]
fn test_checkpoint_dir_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let harness = CheckpointTestHarness::new();
    harness.write("a.txt", b"alpha");
    harness.generate("cp");

    let mode = fs::metadata(harness.checkpoints.path().join("cp"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o700);
}
