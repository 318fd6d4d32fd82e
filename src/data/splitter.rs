// ============================================================
// Layer 4 — Cross-Validation Fold Splitter
// ============================================================
// Splits a bag index into (training, validation) by fold:
//   - Validation set: every bag whose fold == k
//   - Training set:   every other bag that has a fold
//
// Why split by fold and not at random?
//   The folds are assigned once, per patient, when the label
//   table is built. Reusing them keeps the same patient out of
//   both sets and makes every run comparable to every other
//   run on the same fold.
//
// Bags without a fold belong to neither set. Both halves keep
// the row order of the original index.

use crate::data::label_table::{BagEntry, BagIndex};
use crate::domain::error::{BagError, Result};

/// Split `index` into (train, validation) with fold `val_fold` held out.
///
/// # Errors
/// Configuration error if either half would be empty.
///
/// # Example
/// ```ignore
/// let (train, val) = split_by_fold(&index, 0)?;
/// // val holds fold 0, train holds folds 1, 2, ...
/// ```
pub fn split_by_fold(index: &BagIndex, val_fold: u32) -> Result<(BagIndex, BagIndex)> {
    let (val, train): (Vec<BagEntry>, Vec<BagEntry>) = index
        .iter()
        .filter(|e| e.fold.is_some())
        .cloned()
        .partition(|e| e.fold == Some(val_fold));

    if val.is_empty() {
        return Err(BagError::configuration(format!(
            "validation fold {val_fold} has no bags"
        )));
    }
    if train.is_empty() {
        return Err(BagError::configuration(format!(
            "no training bags left after holding out fold {val_fold}"
        )));
    }

    let unassigned = index.len() - train.len() - val.len();
    if unassigned > 0 {
        tracing::warn!("{} bags have no fold and are left out of the split", unassigned);
    }

    tracing::debug!(
        "Fold split (val fold {}): {} training, {} validation",
        val_fold,
        train.len(),
        val.len(),
    );

    Ok((BagIndex::from_entries(train), BagIndex::from_entries(val)))
}
