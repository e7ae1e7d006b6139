//! Group-wise transforms applied to response vectors and design matrices.
//!
//! All transforms work column by column on `nalgebra` matrices, using an
//! [`EntityGrouping`] that maps every row to a dense group code.

use crate::panel::EntityGrouping;
use nalgebra::{DMatrix, DVector};

/// Per-group column means, stored as a `n_groups x ncols` matrix.
///
/// NaN follows ordinary floating-point semantics: a group containing a NaN gets
/// a NaN mean for that column.
pub fn group_means(matrix: &DMatrix<f64>, grouping: &EntityGrouping) -> DMatrix<f64> {
    debug_assert_eq!(matrix.nrows(), grouping.len());

    let n_groups = grouping.n_groups();
    let mut sums = DMatrix::zeros(n_groups, matrix.ncols());
    let mut counts = vec![0usize; n_groups];

    for (row, &g) in grouping.codes().iter().enumerate() {
        counts[g] += 1;
        for c in 0..matrix.ncols() {
            sums[(g, c)] += matrix[(row, c)];
        }
    }

    for (g, &count) in counts.iter().enumerate() {
        if count > 0 {
            let mut row = sums.row_mut(g);
            row /= count as f64;
        }
    }
    sums
}

/// The fixed-effects ("within" plus grand mean) transform.
///
/// Every value becomes `x[r, c] - mean(c, group(r)) + grand_mean(c)`. The
/// overall mean of each column is preserved, so a constant column stays
/// constant and a fitted intercept is the average entity effect.
///
/// The transform is idempotent: after one pass every group mean equals the
/// grand mean.
///
/// A NaN contaminates the rows of its own group only: group means keep plain
/// float semantics, while the grand mean skips NaN values.
pub fn fixed_effects(matrix: &DMatrix<f64>, grouping: &EntityGrouping) -> DMatrix<f64> {
    let means = group_means(matrix, grouping);
    let grand = nan_skipping_column_means(matrix);

    DMatrix::from_fn(matrix.nrows(), matrix.ncols(), |r, c| {
        matrix[(r, c)] - means[(grouping.code(r), c)] + grand[c]
    })
}

/// Column means over the non-NaN values. An all-NaN column has a NaN mean.
fn nan_skipping_column_means(matrix: &DMatrix<f64>) -> Vec<f64> {
    matrix
        .column_iter()
        .map(|column| {
            let (sum, count) = column
                .iter()
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
            if count == 0 {
                f64::NAN
            } else {
                sum / count as f64
            }
        })
        .collect()
}

/// Vector form of [`fixed_effects`], used for the response.
pub fn fixed_effects_vector(vector: &DVector<f64>, grouping: &EntityGrouping) -> DVector<f64> {
    let as_matrix = DMatrix::from_column_slice(vector.len(), 1, vector.as_slice());
    fixed_effects(&as_matrix, grouping).column(0).into_owned()
}

/// The plain within transform: `x[r, c] - mean(c, group(r))`.
pub fn within(matrix: &DMatrix<f64>, grouping: &EntityGrouping) -> DMatrix<f64> {
    let means = group_means(matrix, grouping);
    DMatrix::from_fn(matrix.nrows(), matrix.ncols(), |r, c| {
        matrix[(r, c)] - means[(grouping.code(r), c)]
    })
}

/// The between transform: every row is replaced by its entity mean.
pub fn between(matrix: &DMatrix<f64>, grouping: &EntityGrouping) -> DMatrix<f64> {
    let means = group_means(matrix, grouping);
    DMatrix::from_fn(matrix.nrows(), matrix.ncols(), |r, c| {
        means[(grouping.code(r), c)]
    })
}
