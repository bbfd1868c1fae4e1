//! Utility functions

mod median;

pub use median::{column_median, median_in_place};

use ndarray::{ArrayView2, Axis};

/// Execution mode for fan-out work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    /// Run everything on the calling thread
    Sequential,
    /// Use the current rayon pool
    Parallel,
}

impl Parallelism {
    /// Create from thread count semantics.
    ///
    /// - 0 = auto (parallel if the rayon pool has multiple threads)
    /// - 1 = sequential
    /// - >1 = parallel
    pub fn from_threads(n_threads: usize) -> Self {
        if n_threads == 1 || (n_threads == 0 && rayon::current_num_threads() == 1) {
            Parallelism::Sequential
        } else {
            Parallelism::Parallel
        }
    }

    /// Returns `true` if parallel execution is allowed.
    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(self, Parallelism::Parallel)
    }
}

/// Run `f` with the requested number of threads.
///
/// `n_threads > 1` installs a dedicated pool; 0 reuses the global pool.
pub fn run_with_threads<T: Send>(
    n_threads: usize,
    f: impl FnOnce(Parallelism) -> T + Send,
) -> Result<T, rayon::ThreadPoolBuildError> {
    let parallelism = Parallelism::from_threads(n_threads);
    if n_threads <= 1 {
        return Ok(f(parallelism));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build()?;
    Ok(pool.install(|| f(parallelism)))
}

/// Point density inside the axis-aligned bounding box of `points`.
///
/// `rows / (volume + 0.001)`, where volume is the product of the per-column
/// ranges. Fewer than two points have no extent and give 0.
pub fn bounding_box_density(points: ArrayView2<'_, f64>) -> f64 {
    let rows = points.nrows();
    if rows < 2 {
        return 0.0;
    }

    let volume: f64 = points
        .axis_iter(Axis(1))
        .map(|column| {
            let (min, max) = column
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            max - min
        })
        .product();

    rows as f64 / (volume + 0.001)
}
