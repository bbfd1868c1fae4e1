#![allow(dead_code)]

use kdcode::{Branch, Node, NodePath};
use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Eight points on a diagonal; every column orders the rows the same way,
/// so the partition does not depend on which column is drawn.
pub fn eight_points() -> Array2<f64> {
    Array2::from_shape_fn((8, 2), |(row, column)| (row * (1 + 9 * column)) as f64)
}

/// Uniform cloud in `[0, 1)^dim`
pub fn random_cloud(rows: usize, dim: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, dim), |_| rng.gen::<f64>())
}

/// Training rows reaching every node, found by replaying stored splits
pub fn route_rows(node: &Node, points: ArrayView2<'_, f64>, rows: Vec<usize>) -> Vec<(NodePath, Vec<usize>)> {
    let mut routed = Vec::new();
    route_into(node, points, rows, &mut routed);
    routed
}

fn route_into(
    node: &Node,
    points: ArrayView2<'_, f64>,
    rows: Vec<usize>,
    routed: &mut Vec<(NodePath, Vec<usize>)>,
) {
    if let (Some((dimension, threshold)), Some((below, above))) = (node.split(), node.children()) {
        let (below_rows, above_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&row| Branch::of(points[[row, dimension]], threshold) == Branch::Below);
        route_into(below, points, below_rows, routed);
        route_into(above, points, above_rows, routed);
    }
    routed.push((node.path().clone(), rows));
}
