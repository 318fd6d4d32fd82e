// ============================================================
// Layer 2 — MIL Configuration
// ============================================================
// Every knob of the bag pipeline in one explicit object.
// Components receive what they need from it at construction;
// nothing reads process-wide defaults behind their back.
//
// Serialisable so a run's exact configuration can be saved
// next to its outputs and reloaded later. Every field has a
// default, so a JSON file only needs the fields it changes:
//
//   { "data_root": "/kaggle/input/picai", "fold": 0 }
//
// Reference: serde documentation (field defaults)

use std::{
    collections::HashSet,
    convert::Infallible,
    fmt,
    path::PathBuf,
    str::FromStr,
    sync::Arc,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::{
    assembler::BagAssembler,
    batcher::BagSizePolicy,
    label_table::{BagIndex, LabelTable},
    loader::{FeatureLoader, FileLayout},
};
use crate::domain::{
    bag::{BagMode, ScaleTag},
    error::BagError,
};

/// Sub-directory of `feat_dir` holding one folder per patient.
pub const MULTI_SCALE_DIR: &str = "multi_scale";

// ─── MultiScaleModel ──────────────────────────────────────────────────────────
/// The model family the features were extracted for.
///
/// `fpn` and `backbone_pyramid` consume one matrix per pyramid level;
/// anything else consumes the untagged single-scale matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MultiScaleModel {
    Fpn,
    BackbonePyramid,
    Other(String),
}

impl MultiScaleModel {
    pub fn is_multi_scale(&self) -> bool {
        matches!(self, Self::Fpn | Self::BackbonePyramid)
    }
}

impl FromStr for MultiScaleModel {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Infallible> {
        Ok(match s.trim() {
            "fpn"              => Self::Fpn,
            "backbone_pyramid" => Self::BackbonePyramid,
            other              => Self::Other(other.to_string()),
        })
    }
}

impl From<String> for MultiScaleModel {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(m) => m,
            Err(never) => match never {},
        }
    }
}

impl From<MultiScaleModel> for String {
    fn from(m: MultiScaleModel) -> String {
        m.to_string()
    }
}

impl fmt::Display for MultiScaleModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fpn             => f.write_str("fpn"),
            Self::BackbonePyramid => f.write_str("backbone_pyramid"),
            Self::Other(s)        => f.write_str(s),
        }
    }
}

// ─── MilConfig ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MilConfig {
    /// Dataset root; features live under data_root/feat_dir/multi_scale
    pub data_root:  PathBuf,
    pub feat_dir:   PathBuf,
    /// Label CSV: patient_id, <label_col>, fold
    pub labels_csv: PathBuf,
    /// Column holding the binary bag label
    pub label_col:  String,

    pub multi_scale_model: MultiScaleModel,
    /// Pyramid levels to load, in order; the first is the reference scale
    pub scale_tags: Vec<String>,

    /// Restrict the index to one fold
    pub fold: Option<u32>,

    pub batch_size:      usize,
    pub num_workers:     usize,
    /// Shuffle bags each epoch with this seed; None keeps index order
    pub shuffle_seed:    Option<u64>,
    pub bag_size_policy: BagSizePolicy,

    pub feature_extension: String,
    pub coords_file:       String,
    pub coords_dataset:    String,
}

impl Default for MilConfig {
    fn default() -> Self {
        Self {
            data_root:         PathBuf::from("."),
            feat_dir:          PathBuf::from("picai_extracted_features"),
            labels_csv:        PathBuf::from("data/picai_labels.csv"),
            label_col:         "cs_pca".to_string(),
            multi_scale_model: MultiScaleModel::Fpn,
            scale_tags:        vec!["C4".to_string(), "C5".to_string()],
            fold:              None,
            batch_size:        1,
            num_workers:       1,
            shuffle_seed:      None,
            bag_size_policy:   BagSizePolicy::Strict,
            feature_extension: "pt".to_string(),
            coords_file:       "info_patches.h5".to_string(),
            coords_dataset:    "coords".to_string(),
        }
    }
}

impl MilConfig {
    /// Directory holding one sub-directory per patient.
    pub fn feature_root(&self) -> PathBuf {
        self.data_root.join(&self.feat_dir).join(MULTI_SCALE_DIR)
    }

    pub fn mode(&self) -> BagMode {
        if self.multi_scale_model.is_multi_scale() {
            BagMode::MultiScale(self.scale_tags.iter().map(ScaleTag::level).collect())
        } else {
            BagMode::SingleScale
        }
    }

    pub fn layout(&self) -> FileLayout {
        FileLayout {
            feature_extension: self.feature_extension.trim_start_matches('.').to_string(),
            coords_file:       self.coords_file.clone(),
            coords_dataset:    self.coords_dataset.clone(),
        }
    }

    /// Reject settings no component could work with, including file
    /// types this build has no decoder for.
    pub fn validate(&self) -> std::result::Result<(), BagError> {
        if self.label_col.trim().is_empty() {
            return Err(BagError::configuration("label_col must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(BagError::configuration("batch_size must be at least 1"));
        }
        if self.multi_scale_model.is_multi_scale() {
            if self.scale_tags.is_empty() {
                return Err(BagError::configuration(format!(
                    "multi_scale_model '{}' needs at least one scale tag",
                    self.multi_scale_model
                )));
            }
            let mut seen = HashSet::new();
            for tag in &self.scale_tags {
                if tag.trim().is_empty() || !seen.insert(tag.as_str()) {
                    return Err(BagError::configuration(format!(
                        "scale tags must be unique and non-empty, got {:?}",
                        self.scale_tags
                    )));
                }
            }
        }
        for (name, value) in [
            ("feature_extension", &self.feature_extension),
            ("coords_file", &self.coords_file),
            ("coords_dataset", &self.coords_dataset),
        ] {
            if value.trim().is_empty() {
                return Err(BagError::configuration(format!("{name} must not be empty")));
            }
        }
        self.layout().ensure_readable()
    }

    /// Read the label table and build the (optionally fold-filtered) index.
    pub fn bag_index(&self) -> Result<BagIndex> {
        let table = LabelTable::from_path(&self.labels_csv)
            .with_context(|| format!("Cannot read label table '{}'", self.labels_csv.display()))?;
        let index = BagIndex::build(&table, &self.label_col, self.fold)
            .with_context(|| format!("Cannot build bag index from '{}'", self.labels_csv.display()))?;
        Ok(index)
    }

    /// Assembler reading from the configured feature root.
    pub fn assembler(&self, index: Arc<BagIndex>) -> BagAssembler<FeatureLoader> {
        let loader = FeatureLoader::new(self.feature_root(), self.layout());
        BagAssembler::new(loader, self.mode(), index)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = MilConfig::default();
        assert_eq!(cfg.label_col, "cs_pca");
        assert_eq!(cfg.multi_scale_model, MultiScaleModel::Fpn);
        assert_eq!(
            cfg.mode(),
            BagMode::MultiScale(vec![ScaleTag::level("C4"), ScaleTag::level("C5")])
        );
        assert_eq!(
            cfg.feature_root(),
            PathBuf::from("./picai_extracted_features/multi_scale")
        );
        // info_patches.h5 is only readable with HDF5 support compiled in
        assert_eq!(cfg.validate().is_ok(), cfg!(feature = "hdf5"));
    }

    #[test]
    fn test_validate_accepts_npy_coordinates() {
        let cfg = MilConfig { coords_file: "info_patches.npy".into(), ..MilConfig::default() };
        assert!(cfg.validate().is_ok());
    }

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn test_validate_rejects_hdf5_without_support() {
        let err = MilConfig::default().validate().unwrap_err();
        assert!(matches!(err, BagError::Configuration(_)));
        assert!(err.to_string().contains("info_patches.h5"));
    }

    #[test]
    fn test_validate_rejects_unknown_feature_extension() {
        let cfg = MilConfig {
            feature_extension: "csv".into(),
            coords_file:       "info_patches.npy".into(),
            ..MilConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(BagError::Configuration(_))));
    }

    #[test]
    fn test_other_model_is_single_scale() {
        let cfg = MilConfig {
            multi_scale_model: "abmil".parse().unwrap(),
            ..MilConfig::default()
        };
        assert_eq!(cfg.mode(), BagMode::SingleScale);
        assert_eq!(cfg.multi_scale_model.to_string(), "abmil");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: MilConfig = serde_json::from_str(
            r#"{ "multi_scale_model": "backbone_pyramid", "fold": 2, "bag_size_policy": "pad_to_longest" }"#,
        )
        .unwrap();
        assert_eq!(cfg.multi_scale_model, MultiScaleModel::BackbonePyramid);
        assert_eq!(cfg.fold, Some(2));
        assert_eq!(cfg.bag_size_policy, BagSizePolicy::PadToLongest);
        assert_eq!(cfg.scale_tags, vec!["C4", "C5"]);
    }

    #[test]
    fn test_validate_rejects_duplicate_tags() {
        let cfg = MilConfig {
            scale_tags: vec!["C4".into(), "C4".into()],
            ..MilConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(BagError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let cfg = MilConfig { batch_size: 0, ..MilConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_layout_strips_leading_dot() {
        let cfg = MilConfig { feature_extension: ".npy".into(), ..MilConfig::default() };
        assert_eq!(cfg.layout().feature_extension, "npy");
    }
}
