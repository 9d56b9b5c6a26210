//! Chaos tests for checkpoint
//!
//! Interrupt generation at arbitrary moments, resume it, and hammer a shared
//! checkpoint from many threads. Assertions hold whatever the timing.

use ::checkpoint::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn create_large_tree(root: &Path, dirs: usize, files_per_dir: usize) {
    for d in 0..dirs {
        let dir = root.join(format!("dir_{:02}", d));
        fs::create_dir_all(&dir).unwrap();
        for f in 0..files_per_dir {
            let content: Vec<u8> = (0..32 * 1024).map(|i| ((i * 7 + d * 13 + f) % 251) as u8).collect();
            fs::write(dir.join(format!("file_{:03}.bin", f)), content).unwrap();
        }
    }
}

fn hashes(checkpoint: &Checkpoint) -> BTreeMap<NodePath, Computed<Sha256>> {
    checkpoint
        .nodes()
        .into_iter()
        .map(|node| (node.path().clone(), *node.hash()))
        .collect()
}

#[test]
fn test_cancel_at_random_moments_then_resume() {
    let input = TempDir::new().unwrap();
    create_large_tree(input.path(), 8, 25);

    let reference_dir = TempDir::new().unwrap();
    let (reference, _) = GeneratorBuilder::new()
        .build(input.path().to_path_buf(), reference_dir.path().to_path_buf())
        .unwrap()
        .generate()
        .unwrap();

    for delay_ms in [0u64, 1, 5, 20] {
        let output = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let generator = GeneratorBuilder::new()
            .threads(2)
            .buffer_size(4096)
            .cancellation(token.clone())
            .build(input.path().to_path_buf(), output.path().to_path_buf())
            .unwrap();

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(delay_ms));
            token.cancel();
        });
        let first = generator.run().unwrap();
        canceller.join().unwrap();

        let saved = Checkpoint::load(output.path()).unwrap();
        assert_eq!(saved.is_complete(), first.complete);
        if first.cancelled() {
            assert!(saved.node_count() <= first.discovered);
            // Interrupted nodes are dropped, never recorded half-done
            assert_eq!(saved.hashing_failure_count(), 0);
        }

        if !first.complete {
            let second = GeneratorBuilder::new()
                .resume(true)
                .build(input.path().to_path_buf(), output.path().to_path_buf())
                .unwrap()
                .run()
                .unwrap();
            assert!(second.complete);
            assert_eq!(second.reused + second.processed, second.discovered);
        }

        let finished = Checkpoint::load(output.path()).unwrap();
        assert!(finished.is_complete());
        assert_eq!(hashes(&finished), hashes(&reference));

        let report = CheckEngine::new(&reference, &finished, CheckOptions::default()).run();
        assert!(report.passed(), "{:?}", report.failures);
    }
}

#[test]
fn test_resume_disabled_starts_over() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    create_large_tree(input.path(), 2, 3);

    let token = CancellationToken::new();
    token.cancel();
    let cancelled = GeneratorBuilder::new()
        .cancellation(token)
        .build(input.path().to_path_buf(), output.path().to_path_buf())
        .unwrap()
        .run()
        .unwrap();
    assert!(cancelled.cancelled());

    let fresh = GeneratorBuilder::new()
        .resume(false)
        .build(input.path().to_path_buf(), output.path().to_path_buf())
        .unwrap()
        .run()
        .unwrap();
    assert!(fresh.complete);
    assert_eq!(fresh.reused, 0);
    assert_eq!(fresh.processed, fresh.discovered);
}

#[test]
fn test_files_deleted_during_resume_are_dropped() -> anyhow::Result<()> {
    let input = TempDir::new()?;
    let output = TempDir::new()?;
    create_large_tree(input.path(), 2, 4);

    // A saved incomplete checkpoint holding every node
    let scratch = TempDir::new()?;
    let (full, _) = GeneratorBuilder::new()
        .build(input.path().to_path_buf(), scratch.path().join("cp"))?
        .generate()?;
    full.set_complete(false);
    full.save(output.path())?;

    fs::remove_dir_all(input.path().join("dir_01"))?;

    let (resumed, report) = GeneratorBuilder::new()
        .resume(true)
        .build(input.path().to_path_buf(), output.path().to_path_buf())?
        .generate()?;

    assert!(report.complete);
    assert_eq!(report.processed, 0);
    assert_eq!(report.reused, report.discovered);
    assert_eq!(resumed.node_count(), 1 + 1 + 4);
    Ok(())
}

#[test]
fn test_concurrent_inserts() {
    let checkpoint = Arc::new(Checkpoint::new());
    let threads = 8;
    let per_thread = 200;

    // Every thread inserts the same paths; each path must be accepted once
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let checkpoint = Arc::clone(&checkpoint);
            thread::spawn(move || {
                let mut accepted = 0;
                for i in 0..per_thread {
                    let path = NodePath::new(format!("./node_{:04}", i).into_bytes()).unwrap();
                    match checkpoint.add_node(Node::new(path, false, 1)) {
                        Ok(()) => accepted += 1,
                        Err(CheckpointError::DuplicateNode(_)) => {}
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                accepted
            })
        })
        .collect();

    let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(accepted, per_thread);
    assert_eq!(checkpoint.node_count(), per_thread);
    assert_eq!(checkpoint.total_size(), per_thread as u64);
}

#[test]
fn test_readers_during_generation() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    create_large_tree(input.path(), 4, 10);

    let samples = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&samples);
    let report = GeneratorBuilder::new()
        .threads(4)
        .autosave_interval(Some(Duration::from_millis(1)))
        .progress_callback(Arc::new(move |info: ProgressInfo| sink.lock().push(info)))
        .build(input.path().to_path_buf(), output.path().to_path_buf())
        .unwrap()
        .run()
        .unwrap();

    assert!(report.complete);
    let samples = samples.lock();
    assert!(samples.windows(2).all(|w| w[0].processed <= w[1].processed));
    assert!(Checkpoint::load(output.path()).unwrap().is_complete());
}
