//! Main test module for checkpoint
//!
//! This module includes all test suites:
//! - Integration tests for generate, save, load and check scenarios
//! - Chaos tests for cancellation, resuming and concurrent use
//! - Property-based tests for invariants

pub mod chaos;
pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::checkpoint::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_directory() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        let report = GeneratorBuilder::new()
            .build(input.path().to_path_buf(), output.path().to_path_buf())
            .unwrap()
            .run()
            .unwrap();
        assert!(report.complete);
        assert_eq!(report.discovered, 1);

        let checkpoint = Checkpoint::load(output.path()).unwrap();
        assert_eq!(checkpoint.node_count(), 1);
        let root = checkpoint.get(&NodePath::root()).unwrap();
        assert!(root.is_directory());
        assert!(root.timestamps().is_value());
    }

    #[test]
    fn test_special_filenames() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.with.dots.txt",
            "file@with#special$chars.txt",
            "file(with)parens.txt",
            "file[with]brackets.txt",
            "tab\there.txt",
            "newline\nhere.txt",
            "файл.txt",
            "文件.txt",
            "🚀🌟💾.txt",
        ];

        let mut created = Vec::new();
        for name in &special_names {
            // Skip names the file system rejects
            if fs::write(input.path().join(name), name.as_bytes()).is_ok() {
                created.push(*name);
            }
        }

        GeneratorBuilder::new()
            .build(input.path().to_path_buf(), output.path().to_path_buf())
            .unwrap()
            .run()
            .unwrap();

        let checkpoint = Checkpoint::load(output.path()).unwrap();
        assert_eq!(checkpoint.node_count(), created.len() + 1);
        for name in created {
            let path = NodePath::new(format!("./{}", name).into_bytes()).unwrap();
            let node = checkpoint.get(&path).unwrap();
            assert_eq!(
                node.hash(),
                &Computed::Value(::checkpoint::hashing::hash_data(name.as_bytes()))
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_filename() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let name = OsStr::from_bytes(b"caf\xe9.txt");
        if fs::write(input.path().join(name), b"latin-1").is_err() {
            return;
        }

        GeneratorBuilder::new()
            .build(input.path().to_path_buf(), output.path().to_path_buf())
            .unwrap()
            .run()
            .unwrap();

        let checkpoint = Checkpoint::load(output.path()).unwrap();
        let path = NodePath::new(b"./caf\xe9.txt".to_vec()).unwrap();
        assert!(checkpoint.get(&path).unwrap().hash().is_value());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_recorded_as_failure() {
        use std::os::unix::fs::PermissionsExt;

        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let secret = input.path().join("secret");
        fs::write(&secret, b"top secret").unwrap();
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();

        // Permissions do not apply to root
        if fs::read(&secret).is_ok() {
            return;
        }

        let report = GeneratorBuilder::new()
            .build(input.path().to_path_buf(), output.path().to_path_buf())
            .unwrap()
            .run()
            .unwrap();
        assert!(report.complete);
        assert_eq!(report.failures.len(), 1);

        let checkpoint = Checkpoint::load(output.path()).unwrap();
        assert_eq!(checkpoint.hashing_failure_count(), 1);
        assert_eq!(checkpoint.timestamping_failure_count(), 0);
        let node = checkpoint
            .get(&NodePath::new(b"./secret".to_vec()).unwrap())
            .unwrap();
        assert!(node.hash().is_failed());
    }

    #[test]
    fn test_input_must_be_a_directory() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let file = input.path().join("file");
        fs::write(&file, b"x").unwrap();

        let err = GeneratorBuilder::new()
            .build(file, output.path().to_path_buf())
            .unwrap()
            .run()
            .unwrap_err();
        assert!(matches!(err, CheckpointError::NotADirectory(_)));
    }
}
