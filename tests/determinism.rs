use std::collections::HashSet;
use std::fs;

use kdcode::util::run_with_threads;
use kdcode::{KdTree, TreeConfig, TreeError};
use serde_json::{json, Value};
use tempfile::TempDir;

mod common;
use common::{eight_points, random_cloud};

#[test]
fn seeded_training_is_deterministic() {
    let points = random_cloud(2_000, 4, 21);
    let config = TreeConfig::new(20, 6).with_seed(99);

    let mut fingerprints = HashSet::new();
    for parallel_depth in [0, 1, 3, 8] {
        let tree = KdTree::train(points.view(), &config.with_parallel_depth(parallel_depth))
            .expect("training succeeds");
        fingerprints.insert(tree.fingerprint());
    }
    for threads in [1, 2, 4] {
        let tree = run_with_threads(threads, |_| KdTree::train(points.view(), &config))
            .expect("thread pool builds")
            .expect("training succeeds");
        fingerprints.insert(tree.fingerprint());
    }

    assert_eq!(fingerprints.len(), 1, "trees diverged across runs");
}

#[test]
fn different_seeds_change_the_tree() {
    let points = random_cloud(2_000, 8, 3);
    let first = KdTree::train(points.view(), &TreeConfig::new(10, 6).with_seed(1)).unwrap();
    let second = KdTree::train(points.view(), &TreeConfig::new(10, 6).with_seed(2)).unwrap();
    assert_ne!(first.fingerprint(), second.fingerprint());
}

#[test]
fn encoding_is_deterministic() {
    let points = random_cloud(1_000, 3, 5);
    let query = random_cloud(300, 3, 6);
    let tree = KdTree::train(points.view(), &TreeConfig::new(10, 5).with_seed(4)).unwrap();

    let reference = tree.encode(query.view()).unwrap();
    for _ in 0..5 {
        assert_eq!(tree.encode(query.view()).unwrap(), reference);
    }
}

#[test]
fn saved_tree_encodes_identically() {
    let dir = TempDir::new().expect("create scratch directory");
    let file = dir.path().join("tree.json");

    let points = random_cloud(1_000, 3, 10);
    let query = random_cloud(200, 3, 11);
    let tree = KdTree::train(points.view(), &TreeConfig::new(16, 5).with_seed(12)).unwrap();

    tree.save_json(&file).expect("tree saves");
    let loaded = KdTree::load_json(&file).expect("tree loads");

    assert_eq!(loaded, tree);
    assert_eq!(loaded.fingerprint(), tree.fingerprint());
    assert_eq!(loaded.encode(query.view()).unwrap(), tree.encode(query.view()).unwrap());
}

/// Save an eight-point tree, apply `edit` to its JSON and load it back
fn load_edited(edit: impl FnOnce(&mut Value)) -> Result<KdTree, TreeError> {
    let dir = TempDir::new().expect("create scratch directory");
    let file = dir.path().join("tree.json");
    let points = eight_points();
    let tree = KdTree::train(points.view(), &TreeConfig::new(2, 2).with_seed(17)).unwrap();
    tree.save_json(&file).expect("tree saves");

    let mut value: Value = serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
    edit(&mut value);
    fs::write(&file, value.to_string()).unwrap();
    KdTree::load_json(&file)
}

fn split_of<'a>(value: &'a mut Value, path: &[&str]) -> &'a mut Value {
    let mut node = &mut value["root"];
    for side in path {
        node = &mut node["kind"]["Split"][*side];
    }
    &mut node["kind"]["Split"]
}

fn assert_rejected(result: Result<KdTree, TreeError>, needle: &str) {
    match result {
        Err(TreeError::InvalidInput(message)) => {
            assert!(message.contains(needle), "unexpected message: {}", message)
        }
        Err(other) => panic!("expected invalid input, got {}", other),
        Ok(_) => panic!("corrupted tree loaded"),
    }
}

#[test]
fn unedited_tree_loads() {
    assert!(load_edited(|_| {}).is_ok());
}

#[test]
fn load_rejects_out_of_range_split_dimension() {
    assert_rejected(
        load_edited(|value| split_of(value, &[])["split_dimension"] = json!(7)),
        "split dimension 7",
    );
}

#[test]
fn load_rejects_inconsistent_children() {
    assert_rejected(
        load_edited(|value| split_of(value, &["above"])["below"]["size"] = json!(3)),
        "children hold",
    );
    assert_rejected(
        load_edited(|value| split_of(value, &[])["below"]["path"] = json!("1")),
        "child paths",
    );
}

#[test]
fn load_rejects_wrong_node_dimension() {
    assert_rejected(
        load_edited(|value| split_of(value, &["below"])["above"]["dim"] = json!(5)),
        "dim 5",
    );
}

#[test]
fn load_rejects_mismatched_data_size() {
    assert_rejected(load_edited(|value| value["data_size"] = json!(9)), "data size 9");
}
