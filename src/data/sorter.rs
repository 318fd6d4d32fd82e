// ============================================================
// Layer 4 — Spatial Sorter
// ============================================================
// Gives the instances of a bag a deterministic order that does
// not depend on how the extractor happened to write them.
//
// Ordering rule (same as numpy.lexsort((x, y))):
//   1. column 1 ascending   (row position / slice index)
//   2. column 0 ascending   (horizontal position)
//   3. original index       (stable tie-break)
//
// Example:
//   coords  [[5,2], [1,9], [3,2]]
//   order   [2, 0, 1]
//   sorted  [[3,2], [5,2], [1,9]]
//
// Coordinate tables with fewer than two columns keep their
// storage order.
//
// The permutation is computed ONCE per bag, from the reference
// scale, and then applied to every scale. Sorting each scale
// from its own coordinates would be correct only while all the
// coordinate files are identical; one shared permutation keeps
// row i of every scale pointing at the same patch no matter
// what.

use ndarray::{Array2, ArrayView2, Axis};

use crate::domain::error::{BagError, Result};

/// A reordering of the N instances of one bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation(Vec<usize>);

impl Permutation {
    pub fn identity(n: usize) -> Self {
        Self((0..n).collect())
    }

    /// Compute the sort permutation of a coordinate table.
    pub fn from_coords(coords: ArrayView2<'_, f64>) -> Self {
        let n = coords.nrows();
        if coords.ncols() < 2 {
            return Self::identity(n);
        }

        let mut order: Vec<usize> = (0..n).collect();
        // sort_by is stable, so equal keys keep their original index order
        order.sort_by(|&a, &b| {
            coords[[a, 1]]
                .total_cmp(&coords[[b, 1]])
                .then_with(|| coords[[a, 0]].total_cmp(&coords[[b, 0]]))
        });
        Self(order)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn is_identity(&self) -> bool {
        self.0.iter().enumerate().all(|(i, &j)| i == j)
    }

    /// Reorder the rows of `matrix`: row i of the result is row
    /// `self[i]` of the input.
    pub fn apply<T: Clone>(&self, matrix: &Array2<T>) -> Result<Array2<T>> {
        if matrix.nrows() != self.0.len() {
            return Err(BagError::shape_mismatch(
                "permutation length vs matrix rows",
                vec![self.0.len()],
                vec![matrix.nrows()],
            ));
        }
        Ok(matrix.select(Axis(0), &self.0))
    }
}
