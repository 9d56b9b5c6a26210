//! Property-based testing for checkpoint
//!
//! Uses proptest to verify invariants of the checkpoint format, the node
//! collection and the work partitioning across randomly generated inputs.

use ::checkpoint::format::{read_checkpoint, write_checkpoint};
use ::checkpoint::generator::remove_and_divide_work;
use ::checkpoint::*;
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;

/// Generate relative paths such as `./ab/c d/e.txt`
fn path_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec("[a-z0-9 ._-]{1,8}", 1..=4).prop_map(|segments| {
        let mut path = b".".to_vec();
        for segment in segments {
            path.push(b'/');
            path.extend_from_slice(segment.as_bytes());
        }
        path
    })
}

fn date_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000, 0u32..1_000_000_000)
        .prop_map(|(secs, nanos)| Utc.timestamp_opt(secs, nanos).unwrap())
}

fn timestamps_strategy() -> impl Strategy<Value = Computed<Timestamps>> {
    prop_oneof![
        Just(Computed::NotComputed),
        Just(Computed::Failed),
        (date_strategy(), date_strategy(), date_strategy())
            .prop_map(|(a, m, c)| Computed::Value(Timestamps::new(a, m, c))),
    ]
}

fn hash_strategy() -> impl Strategy<Value = Computed<Sha256>> {
    prop_oneof![
        Just(Computed::NotComputed),
        Just(Computed::Failed),
        any::<[u8; 32]>().prop_map(|bytes| Computed::Value(Sha256::from_bytes(bytes))),
    ]
}

/// Generate a node with any combination of computed fields
fn node_strategy() -> impl Strategy<Value = Node> {
    (
        path_strategy(),
        any::<bool>(),
        hash_strategy(),
        timestamps_strategy(),
    )
        .prop_map(|(path, is_directory, hash, timestamps)| {
            let hash = if is_directory {
                Computed::NotComputed
            } else {
                hash
            };
            Node::with_data(NodePath::new(path).unwrap(), is_directory, 0, hash, timestamps)
                .unwrap()
        })
}

/// Generate nodes with distinct paths, in arbitrary order
fn nodes_strategy(max: usize) -> impl Strategy<Value = Vec<Node>> {
    prop::collection::vec(node_strategy(), 0..max).prop_map(|nodes| {
        let mut seen = BTreeSet::new();
        nodes
            .into_iter()
            .filter(|node| seen.insert(node.path().clone()))
            .collect()
    })
}

fn encode(checkpoint: &Checkpoint) -> Vec<u8> {
    let nodes = checkpoint.nodes();
    let mut out = Vec::new();
    write_checkpoint(&mut out, &nodes, checkpoint.is_complete()).unwrap();
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Encoding then decoding yields the same nodes and completeness
    #[test]
    fn format_round_trip(nodes in nodes_strategy(40), complete in any::<bool>()) {
        let checkpoint = Checkpoint::from_nodes(nodes, complete).unwrap();
        let bytes = encode(&checkpoint);

        let (decoded, decoded_complete) = read_checkpoint(&mut bytes.as_slice()).unwrap();
        prop_assert_eq!(decoded_complete, complete);
        prop_assert_eq!(decoded, checkpoint.nodes());
    }

    /// Every strict prefix of a checkpoint is detected as truncated
    #[test]
    fn truncation_is_always_detected(nodes in nodes_strategy(8), cut in any::<prop::sample::Index>()) {
        let checkpoint = Checkpoint::from_nodes(nodes, true).unwrap();
        let bytes = encode(&checkpoint);
        let len = cut.index(bytes.len());

        let result = read_checkpoint(&mut &bytes[..len]);
        prop_assert!(
            matches!(result, Err(CheckpointError::Truncated(_))),
            "prefix of {} bytes out of {} was accepted: {:?}",
            len,
            bytes.len(),
            result.map(|(nodes, complete)| (nodes.len(), complete))
        );
    }

    /// Nodes come out sorted by path bytes whatever the insertion order
    #[test]
    fn nodes_are_sorted(nodes in nodes_strategy(60)) {
        let checkpoint = Checkpoint::new();
        for node in nodes.iter().rev() {
            checkpoint.add_node(node.clone()).unwrap();
        }

        let paths: Vec<Vec<u8>> = checkpoint
            .nodes()
            .iter()
            .map(|n| n.path().as_bytes().to_vec())
            .collect();
        let mut sorted = paths.clone();
        sorted.sort();
        prop_assert_eq!(&paths, &sorted);
        prop_assert_eq!(paths.len(), nodes.len());
    }

    /// Adding a path twice is always refused
    #[test]
    fn duplicates_are_refused(nodes in nodes_strategy(20).prop_filter("non-empty", |n| !n.is_empty())) {
        let checkpoint = Checkpoint::from_nodes(nodes.clone(), false).unwrap();
        for node in nodes {
            let duplicate = Node::new(node.path().clone(), node.is_directory(), 0);
            prop_assert!(
                matches!(checkpoint.add_node(duplicate), Err(CheckpointError::DuplicateNode(_))),
                "duplicate accepted"
            );
        }
    }

    /// Work is divided into balanced, non-empty batches without loss
    #[test]
    fn partitioning_is_balanced(
        nodes in nodes_strategy(100),
        batch_count in 1usize..20,
        rotational in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let medium = if rotational { StorageMedium::Rotational } else { StorageMedium::SolidState };
        let expected: BTreeSet<NodePath> = nodes.iter().map(|n| n.path().clone()).collect();
        let mut work = nodes;

        let batches = remove_and_divide_work(&mut work, batch_count, medium, &mut StdRng::seed_from_u64(seed));

        prop_assert!(work.is_empty());
        prop_assert_eq!(batches.len(), batch_count.min(expected.len()));
        prop_assert!(batches.iter().all(|b| !b.is_empty()));

        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        if let (Some(min), Some(max)) = (sizes.iter().min(), sizes.iter().max()) {
            prop_assert!(max - min <= 1);
        }

        let actual: BTreeSet<NodePath> = batches.iter().flatten().map(|n| n.path().clone()).collect();
        prop_assert_eq!(actual, expected);

        if rotational {
            let flattened: Vec<&NodePath> = batches.iter().flatten().map(|n| n.path()).collect();
            prop_assert!(flattened.windows(2).all(|w| w[0] < w[1]));
        }
    }

    /// Comparing a checkpoint with itself never reports anything
    #[test]
    fn self_check_passes(nodes in nodes_strategy(40)) {
        let checkpoint = Checkpoint::from_nodes(nodes, true).unwrap();
        let options = CheckOptions {
            important_dirs: vec![NodePath::root()],
            ..Default::default()
        };

        let report = CheckEngine::new(&checkpoint, &checkpoint, options).run();
        prop_assert!(report.passed(), "{:?}", report.failures);
    }
}
