//! Median selection over a column subset

use std::cmp::Ordering;

use ndarray::ArrayView2;

/// Median of `points[rows, column]`.
///
/// Even counts average the two middle values. Returns `None` for an empty
/// row set. Uses quick-select, so runs in expected linear time.
///
/// ```
/// use kdcode::util::column_median;
/// use ndarray::array;
///
/// let points = array![[3.0], [1.0], [4.0], [1.5]];
/// assert_eq!(column_median(points.view(), &[0, 1, 2, 3], 0), Some(2.25));
/// assert_eq!(column_median(points.view(), &[0, 1, 2], 0), Some(3.0));
/// assert_eq!(column_median(points.view(), &[], 0), None);
/// ```
pub fn column_median(points: ArrayView2<'_, f64>, rows: &[usize], column: usize) -> Option<f64> {
    let mut values: Vec<f64> = rows.iter().map(|&row| points[[row, column]]).collect();
    median_in_place(&mut values)
}

/// Median of a scratch buffer; reorders the buffer.
pub fn median_in_place(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }

    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, cmp_f64);
    let upper = *upper;
    if n % 2 == 1 {
        return Some(upper);
    }

    // Largest value of the lower half is the other middle element.
    let lower = lower
        .iter()
        .copied()
        .max_by(cmp_f64)
        .unwrap_or(upper);
    Some((lower + upper) / 2.0)
}

#[inline]
fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    a.total_cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_odd_and_even_medians() {
        assert_eq!(median_in_place(&mut [5.0]), Some(5.0));
        assert_eq!(median_in_place(&mut [2.0, 1.0]), Some(1.5));
        assert_eq!(median_in_place(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median_in_place(&mut [7.0, 0.0, 6.0, 1.0, 5.0, 2.0, 4.0, 3.0]), Some(3.5));
        assert_eq!(median_in_place(&mut []), None);
    }

    #[test]
    fn test_constant_column() {
        let points = array![[1.0, 9.0], [2.0, 9.0], [3.0, 9.0], [4.0, 9.0]];
        assert_eq!(column_median(points.view(), &[0, 1, 2, 3], 1), Some(9.0));
    }

    #[test]
    fn test_row_subset() {
        let points = array![[10.0], [0.0], [20.0], [30.0]];
        assert_eq!(column_median(points.view(), &[0, 2, 3], 0), Some(20.0));
        assert_eq!(column_median(points.view(), &[1, 3], 0), Some(15.0));
    }
}
