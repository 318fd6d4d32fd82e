// ============================================================
// Layer 2 — Inspect Use Case
// ============================================================
// Assembles a single bag and describes it, scale by scale.
// Useful to check a patient folder by hand before a long run:
// the shapes show whether every pyramid level was extracted
// with the same patch grid, and the leading coordinates show
// the spatial order the model will see.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::application::config::MilConfig;
use crate::domain::{
    bag::{Bag, Label, ScaleTag},
    error::BagError,
};

/// How many sorted coordinate rows a summary keeps.
pub const COORD_PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleSummary {
    pub tag:          ScaleTag,
    pub instances:    usize,
    pub dim:          usize,
    pub coord_cols:   usize,
    /// First rows of the coordinate table, after sorting
    pub first_coords: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BagSummary {
    pub patient_id: String,
    pub label:      Label,
    pub fold:       Option<u32>,
    pub scales:     Vec<ScaleSummary>,
}

impl BagSummary {
    fn from_bag(bag: &Bag, fold: Option<u32>, preview: usize) -> Self {
        let scales = bag
            .scales
            .iter()
            .map(|s| ScaleSummary {
                tag:          s.tag.clone(),
                instances:    s.instance_count(),
                dim:          s.embedding_dim(),
                coord_cols:   s.coords.ncols(),
                first_coords: s.coords.rows().into_iter().take(preview).map(|r| r.to_vec()).collect(),
            })
            .collect();
        Self { patient_id: bag.patient_id.clone(), label: bag.label, fold, scales }
    }
}

pub struct InspectUseCase {
    config: MilConfig,
}

impl InspectUseCase {
    pub fn new(config: MilConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self, patient_id: &str) -> Result<BagSummary> {
        let cfg = &self.config;
        cfg.validate()?;

        let index = Arc::new(cfg.bag_index()?);
        let entry = index
            .find(patient_id)
            .cloned()
            .ok_or_else(|| BagError::not_found("patient in bag index", patient_id))?;

        tracing::info!(
            "Inspecting '{}' under '{}' ({})",
            patient_id,
            cfg.feature_root().display(),
            cfg.multi_scale_model
        );
        let assembler = cfg.assembler(index);
        let bag = assembler
            .assemble_bag(&entry.patient_id, entry.label)
            .with_context(|| format!("Cannot assemble bag '{patient_id}'"))?;

        Ok(BagSummary::from_bag(&bag, entry.fold, COORD_PREVIEW_ROWS))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_npy::write_npy;
    use std::fs;

    fn workspace() -> (tempfile::TempDir, MilConfig) {
        let dir = tempfile::tempdir().unwrap();
        let labels = dir.path().join("labels.csv");
        fs::write(&labels, "patient_id,cs_pca,fold\n10000,1,0\n").unwrap();

        let cfg = MilConfig {
            data_root:         dir.path().to_path_buf(),
            labels_csv:        labels,
            feature_extension: "npy".into(),
            coords_file:       "coords.npy".into(),
            ..MilConfig::default()
        };
        let bag_dir = cfg.feature_root().join("10000");
        fs::create_dir_all(&bag_dir).unwrap();
        write_npy(bag_dir.join("coords.npy"), &array![[5.0f64, 2.0], [1.0, 9.0], [3.0, 2.0]]).unwrap();
        write_npy(bag_dir.join("C4_patch_features.npy"), &array![[0.0f32, 0.0], [1.0, 1.0], [2.0, 2.0]]).unwrap();
        write_npy(bag_dir.join("C5_patch_features.npy"), &array![[0.0f32], [1.0], [2.0]]).unwrap();
        (dir, cfg)
    }

    #[test]
    fn test_summary_is_sorted_per_scale() {
        let (_dir, cfg) = workspace();
        let summary = InspectUseCase::new(cfg).execute("10000").unwrap();

        assert_eq!(summary.label, Label::POSITIVE);
        assert_eq!(summary.fold, Some(0));
        assert_eq!(summary.scales.len(), 2);
        assert_eq!(summary.scales[0].dim, 2);
        assert_eq!(summary.scales[1].dim, 1);
        assert_eq!(summary.scales[1].instances, 3);
        assert_eq!(
            summary.scales[0].first_coords,
            vec![vec![3.0, 2.0], vec![5.0, 2.0], vec![1.0, 9.0]]
        );
    }

    #[test]
    fn test_unknown_patient_fails() {
        let (_dir, cfg) = workspace();
        assert!(InspectUseCase::new(cfg).execute("99999").is_err());
    }
}
