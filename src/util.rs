//! Convenient utility functions.

use std::cmp::Ordering;

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

#[cfg(feature = "progress_bar")]
use indicatif::{ProgressBar, ProgressStyle};
#[cfg(feature = "progress_bar")]
use std::time::Duration;

/// Creates a [`ProgressBar`] with a predefined default style.
#[cfg(feature = "progress_bar")]
pub fn progress_bar(len: usize) -> ProgressBar {
    let progress_bar = ProgressBar::new(len as u64).with_style(
        ProgressStyle::with_template("{elapsed_precise} {wide_bar} {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress_bar.enable_steady_tick(Duration::new(0, 100000000));
    progress_bar
}

/// Return the maximum absolute value of a correlation trace.
pub fn max_abs(row: ArrayView1<f64>) -> f64 {
    row.fold(0., |acc, &x| f64::max(acc, x.abs()))
}

/// Return an array where the i-th element contains the maximum absolute value of the i-th row of
/// the input array.
pub fn max_abs_per_row(arr: ArrayView2<f64>) -> Array1<f64> {
    arr.axis_iter(Axis(0)).map(max_abs).collect()
}

/// Return the indices that would sort the given array with a comparison function.
///
/// The sort is stable: equal elements keep their index order.
pub fn argsort_by<T, F>(data: &[T], compare: F) -> Vec<usize>
where
    F: Fn(&T, &T) -> Ordering,
{
    let mut indices: Vec<usize> = (0..data.len()).collect();

    indices.sort_by(|&a, &b| compare(&data[a], &data[b]));

    indices
}

/// Rank candidates from the most to the least likely.
///
/// Candidates are sorted by descending score, ties are broken by ascending candidate value and
/// degenerate candidates come last whatever their score.
pub fn rank_candidates(scores: ArrayView1<f64>, degenerate: ArrayView1<bool>) -> Vec<usize> {
    debug_assert_eq!(scores.len(), degenerate.len());

    let keys: Vec<(bool, f64)> = degenerate.iter().copied().zip(scores.iter().copied()).collect();

    argsort_by(&keys, |(degenerate_a, score_a), (degenerate_b, score_b)| {
        degenerate_a
            .cmp(degenerate_b)
            .then_with(|| score_b.total_cmp(score_a))
    })
}

#[cfg(test)]
mod tests {
    use super::{max_abs_per_row, rank_candidates};
    use ndarray::array;

    #[test]
    fn test_max_abs_per_row() {
        let arr = array![[0.1, -0.7, 0.3], [0.0, 0.0, 0.0], [0.2, 0.5, -0.1]];
        assert_eq!(max_abs_per_row(arr.view()), array![0.7, 0.0, 0.5]);
    }

    #[test]
    fn test_rank_candidates() {
        let scores = array![0.2, 0.9, 0.5, 0.9, 0.0];
        let degenerate = array![false, false, false, false, true];
        assert_eq!(
            rank_candidates(scores.view(), degenerate.view()),
            vec![1, 3, 2, 0, 4]
        );

        // A degenerate candidate never outranks a distinguishing one.
        let scores = array![0.0, 0.0, 0.0];
        let degenerate = array![true, false, true];
        assert_eq!(
            rank_candidates(scores.view(), degenerate.view()),
            vec![1, 0, 2]
        );
    }
}
