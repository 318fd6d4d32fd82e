// ============================================================
// Layer 2 — Index Use Case
// ============================================================
// Reads the label table and reports what the pipeline would
// iterate over:
//
//   Step 1: Validate the configuration
//   Step 2: Build the (fold-filtered) bag index   (Layer 4)
//   Step 3: Count labels and folds
//   Step 4: Optionally split off a validation fold (Layer 4)

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};

use crate::application::config::MilConfig;
use crate::data::{label_table::BagIndex, splitter::split_by_fold};
use crate::domain::bag::Label;

/// Sizes of a cross-validation split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSummary {
    pub val_fold: u32,
    pub train:    usize,
    pub val:      usize,
}

#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub index:        BagIndex,
    pub label_counts: BTreeMap<Label, usize>,
    pub folds:        BTreeSet<u32>,
    pub split:        Option<SplitSummary>,
}

pub struct IndexUseCase {
    config: MilConfig,
}

impl IndexUseCase {
    pub fn new(config: MilConfig) -> Self {
        Self { config }
    }

    /// Build the index; with `val_fold`, also check that the split is usable.
    pub fn execute(&self, val_fold: Option<u32>) -> Result<IndexSummary> {
        let cfg = &self.config;
        cfg.validate()?;

        tracing::info!(
            "Reading label table '{}' (label column '{}')",
            cfg.labels_csv.display(),
            cfg.label_col
        );
        let index = cfg.bag_index()?;
        let label_counts = index.label_counts();
        let folds = index.folds();
        tracing::info!("Index holds {} bags, labels {:?}", index.len(), label_counts);

        let split = val_fold
            .map(|k| {
                let (train, val) = split_by_fold(&index, k)
                    .with_context(|| format!("Cannot hold out fold {k}"))?;
                Ok::<_, anyhow::Error>(SplitSummary { val_fold: k, train: train.len(), val: val.len() })
            })
            .transpose()?;

        Ok(IndexSummary { index, label_counts, folds, split })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const CSV: &str = "patient_id,cs_pca,fold\np1,1,0\np2,0,1\np3,0,0\np4,1,2\n";

    fn config(dir: &tempfile::TempDir) -> MilConfig {
        let labels = dir.path().join("labels.csv");
        fs::write(&labels, CSV).unwrap();
        MilConfig {
            labels_csv:  labels,
            coords_file: "info_patches.npy".into(),
            ..MilConfig::default()
        }
    }

    #[test]
    fn test_summary_counts_labels_and_folds() {
        let dir = tempfile::tempdir().unwrap();
        let summary = IndexUseCase::new(config(&dir)).execute(None).unwrap();
        assert_eq!(summary.index.len(), 4);
        assert_eq!(summary.label_counts[&Label::POSITIVE], 2);
        assert_eq!(summary.folds.into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(summary.split.is_none());
    }

    #[test]
    fn test_split_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let summary = IndexUseCase::new(config(&dir)).execute(Some(0)).unwrap();
        assert_eq!(summary.split, Some(SplitSummary { val_fold: 0, train: 2, val: 2 }));
    }

    #[test]
    fn test_unknown_label_column_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = MilConfig { label_col: "isup".into(), ..config(&dir) };
        assert!(IndexUseCase::new(cfg).execute(None).is_err());
    }
}
