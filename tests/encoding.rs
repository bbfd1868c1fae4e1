//! Encoding scenarios on small hand-built datasets

use std::collections::HashSet;

use approx::assert_abs_diff_eq;
use kdcode::tree::SMOOTH;
use kdcode::{bit_to_index, KdTree, NodePath, TreeConfig, TreeError};
use ndarray::{s, Array2};
use test_case::test_case;

mod common;
use common::{eight_points, random_cloud};

#[test]
fn eight_point_tree_has_predicted_shape() {
    let points = eight_points();
    let tree = KdTree::train(points.view(), &TreeConfig::new(2, 2).with_seed(17)).unwrap();

    // 8 → 4/4 → 2/2 → 1/1, leaves once the path is longer than 2.
    assert_eq!(tree.node_count(), 15);
    assert_eq!(tree.leaf_count(), 8);
    assert_eq!(tree.height(), 3);
    assert_eq!(tree.degenerate_splits(), 0);

    let (below, above) = tree.root().children().expect("root is split");
    assert_eq!(below.size(), 4);
    assert_eq!(above.size(), 4);
    assert_abs_diff_eq!(below.probability(), 0.5);
    assert_abs_diff_eq!(above.probability(), 0.5);

    let (dimension, threshold) = tree.root().split().unwrap();
    let expected = if dimension == 0 { 3.5 } else { 35.0 };
    assert_abs_diff_eq!(threshold, expected);

    for node in tree.nodes().filter(|node| node.is_leaf()) {
        assert_eq!(node.size(), 1);
        assert_eq!(node.path().len(), 3);
    }
}

#[test]
fn encoding_training_set_gives_zero_codes() {
    let points = eight_points();
    let tree = KdTree::train(points.view(), &TreeConfig::new(2, 2).with_seed(17)).unwrap();
    let code = tree.encode(points.view()).unwrap();

    let order: Vec<String> = code.iter().map(|(path, _)| path.to_string()).collect();
    assert_eq!(
        order,
        vec!["", "1", "11", "111", "110", "10", "101", "100", "0", "01", "011", "010", "00", "001", "000"]
    );
    assert_eq!(code[0].1, 0.0);
    for (_, log_ratio) in &code {
        assert_abs_diff_eq!(*log_ratio, 0.0);
    }
}

#[test]
fn empty_query_emits_root_only() {
    let points = eight_points();
    let tree = KdTree::train(points.view(), &TreeConfig::new(2, 2).with_seed(17)).unwrap();

    let empty = Array2::<f64>::zeros((0, 2));
    let code = tree.encode(empty.view()).unwrap();
    assert_eq!(code.len(), 1);
    assert!(code[0].0.is_empty());
    assert_abs_diff_eq!(code[0].1, (SMOOTH / (1.0 + SMOOTH)).ln(), epsilon = 1e-12);
}

#[test]
fn empty_subset_is_not_descended() {
    let points = eight_points();
    let tree = KdTree::train(points.view(), &TreeConfig::new(2, 2).with_seed(17)).unwrap();

    // Top half only: the below subtree sees no points.
    let top = points.slice(s![4.., ..]);
    let code = tree.encode(top).unwrap();
    let paths: HashSet<String> = code.iter().map(|(path, _)| path.to_string()).collect();

    assert!(paths.contains("0"));
    assert!(!paths.contains("00") && !paths.contains("01"));
    let below = code.iter().find(|(path, _)| path.to_string() == "0").unwrap();
    assert_abs_diff_eq!(below.1, (SMOOTH / (0.5 + SMOOTH)).ln(), epsilon = 1e-12);

    let above = code.iter().find(|(path, _)| path.to_string() == "1").unwrap();
    assert_abs_diff_eq!(above.1, 0.0);
}

#[test]
fn query_limit_stops_descent() {
    let points = eight_points();
    let tree = KdTree::train(points.view(), &TreeConfig::new(2, 2).with_seed(17)).unwrap();

    let code = tree.encode_with_limit(points.view(), 5).unwrap();
    // Root has 8 >= 5 rows, each child only 4.
    assert_eq!(code.len(), 3);
}

#[test]
fn constant_column_builds_empty_children() {
    let points = Array2::from_elem((8, 1), 5.0);
    let tree = KdTree::train(points.view(), &TreeConfig::new(2, 2).with_seed(1)).unwrap();

    // Every split sends all points above; below children are empty leaves.
    assert_eq!(tree.degenerate_splits(), 3);
    let empty: Vec<_> = tree.nodes().filter(|node| node.size() == 0).collect();
    assert_eq!(empty.len(), 3);
    for node in empty {
        assert!(node.is_leaf());
        assert_eq!(node.probability(), 0.0);
    }

    let deepest = tree.find(&"111".parse().unwrap()).unwrap();
    assert!(deepest.is_leaf());
    assert_eq!(deepest.size(), 8);

    let code = tree.encode(points.view()).unwrap();
    for (_, log_ratio) in code {
        assert_abs_diff_eq!(log_ratio, 0.0);
    }
}

#[test]
fn limit_is_applied_at_every_level() {
    let points = random_cloud(500, 3, 8);
    let tree = KdTree::train(points.view(), &TreeConfig::new(40, 20).with_seed(2)).unwrap();

    for node in tree.nodes() {
        if !node.is_leaf() {
            assert!(node.size() >= 40, "split node '{}' has {} points", node.path(), node.size());
        }
    }
    assert!(tree.height() < 20);
}

#[test]
fn query_dimension_must_match() {
    let points = random_cloud(50, 3, 1);
    let tree = KdTree::train(points.view(), &TreeConfig::new(5, 3).with_seed(2)).unwrap();
    let query = random_cloud(10, 4, 2);

    assert!(matches!(
        tree.encode(query.view()),
        Err(TreeError::DimensionMismatch { expected: 3, found: 4 })
    ));
}

#[test_case("", 0 ; "root")]
#[test_case("0", 1 ; "below")]
#[test_case("1", 2 ; "above")]
#[test_case("00", 3 ; "below below")]
#[test_case("01", 4 ; "below above")]
#[test_case("10", 5 ; "above below")]
#[test_case("11", 6 ; "above above")]
fn bit_index_is_level_order(raw: &str, expected: usize) {
    let path: NodePath = raw.parse().unwrap();
    assert_eq!(bit_to_index(&path), expected);
}

#[test]
fn bit_indices_fit_feature_width() {
    let depth = 2;
    let width = 1usize << (depth + 1);

    let mut paths = vec![NodePath::root()];
    let mut frontier = vec![NodePath::root()];
    for _ in 0..depth {
        frontier = frontier
            .iter()
            .flat_map(|path| [path.child(kdcode::Branch::Below), path.child(kdcode::Branch::Above)])
            .collect();
        paths.extend(frontier.iter().cloned());
    }

    let indices: HashSet<usize> = paths.iter().map(bit_to_index).collect();
    assert_eq!(indices.len(), paths.len());
    assert!(indices.iter().all(|&index| index < width));
    assert_ne!(
        bit_to_index(&NodePath::from_bits(&[false])),
        bit_to_index(&NodePath::from_bits(&[true]))
    );
}
