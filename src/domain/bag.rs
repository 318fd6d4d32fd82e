// ============================================================
// Layer 3 — Bag Domain Types
// ============================================================
// In multi-instance learning the unit of supervision is the
// BAG: here, every patch-level feature vector extracted from
// one patient's scan. Only the bag carries a label; the
// instances inside it are unlabelled.
//
//   Bag (one patient)
//     ├── label: 0 / 1                     (cs_pca)
//     └── scales: Vec<ScaleFeatureSet>     (e.g. C4, C5)
//           ├── features: [N x D]          one row per instance
//           └── coords:   [N x K]          one row per instance
//
// Every scale of a bag describes the SAME N instances, seen
// through a different receptive field. Row i of C4 and row i
// of C5 must always refer to the same patch.
//
// Reference: Ilse et al. (2018) Attention-based Deep MIL
//            Rust Book §5 (Structs), §6 (Enums)

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::{BagError, Result};

/// Instance features for one scale, shape [N, D].
pub type FeatureMatrix = Array2<f32>;

/// Instance coordinates, shape [N, K]. Column 0 is the horizontal
/// position, column 1 the vertical position or slice index.
pub type CoordTable = Array2<f64>;

// ─── Label ────────────────────────────────────────────────────────────────────
/// Binary bag-level label (0 = negative, 1 = positive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Label(u8);

impl Label {
    pub const NEGATIVE: Label = Label(0);
    pub const POSITIVE: Label = Label(1);

    pub fn new(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::NEGATIVE),
            1 => Ok(Self::POSITIVE),
            other => Err(BagError::invalid_value(format!(
                "label must be 0 or 1, got {other}"
            ))),
        }
    }

    /// Parse a label cell as it appears in a label table.
    ///
    /// Accepts integer (`1`), float (`1.0`) and boolean (`true`) spellings.
    pub fn parse(cell: &str) -> Result<Self> {
        let cell = cell.trim();
        match cell.to_ascii_lowercase().as_str() {
            "true"  => return Ok(Self::POSITIVE),
            "false" => return Ok(Self::NEGATIVE),
            _ => {}
        }
        if let Ok(v) = cell.parse::<i64>() {
            return Self::new(v);
        }
        match cell.parse::<f64>() {
            Ok(v) if v == 0.0 => Ok(Self::NEGATIVE),
            Ok(v) if v == 1.0 => Ok(Self::POSITIVE),
            _ => Err(BagError::invalid_value(format!(
                "label must be 0 or 1, got '{cell}'"
            ))),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Float form used in the batch label vector.
    pub fn as_f32(self) -> f32 {
        self.0 as f32
    }
}

impl TryFrom<u8> for Label {
    type Error = BagError;

    fn try_from(v: u8) -> Result<Self> {
        Self::new(v as i64)
    }
}

impl From<Label> for u8 {
    fn from(l: Label) -> u8 {
        l.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── ScaleTag ─────────────────────────────────────────────────────────────────
/// Which feature-pyramid level a file holds.
///
/// `Default` is the untagged single-scale file (`patch_features.*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScaleTag {
    Default,
    Level(String),
}

impl ScaleTag {
    pub fn level(tag: impl Into<String>) -> Self {
        Self::Level(tag.into())
    }

    /// File stem of the feature file for this scale.
    ///
    ///   ScaleTag::level("C4") → "C4_patch_features"
    ///   ScaleTag::Default     → "patch_features"
    pub fn feature_stem(&self) -> String {
        match self {
            Self::Default    => "patch_features".to_string(),
            Self::Level(tag) => format!("{tag}_patch_features"),
        }
    }
}

impl fmt::Display for ScaleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default    => f.write_str("default"),
            Self::Level(tag) => f.write_str(tag),
        }
    }
}

// ─── BagMode ──────────────────────────────────────────────────────────────────
/// Whether a bag is loaded as one matrix or as an ordered pyramid of scales.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BagMode {
    SingleScale,
    /// Scales in the order they are returned; the first one is the
    /// reference scale whose coordinates define the instance order.
    MultiScale(Vec<ScaleTag>),
}

impl BagMode {
    /// The tags to load, in order.
    pub fn tags(&self) -> Vec<ScaleTag> {
        match self {
            Self::SingleScale     => vec![ScaleTag::Default],
            Self::MultiScale(tags) => tags.clone(),
        }
    }

    pub fn is_multi_scale(&self) -> bool {
        matches!(self, Self::MultiScale(_))
    }
}

// ─── ScaleFeatureSet ──────────────────────────────────────────────────────────
/// Features and coordinates of one bag at one scale.
#[derive(Debug, Clone)]
pub struct ScaleFeatureSet {
    pub tag:      ScaleTag,
    pub features: FeatureMatrix,
    pub coords:   CoordTable,
}

impl ScaleFeatureSet {
    /// Build a set, rejecting coordinate tables whose row count
    /// differs from the feature matrix.
    pub fn new(tag: ScaleTag, features: FeatureMatrix, coords: CoordTable) -> Result<Self> {
        if coords.nrows() != features.nrows() {
            return Err(BagError::shape_mismatch(
                format!("scale {tag}: coordinate rows vs feature rows"),
                vec![features.nrows()],
                vec![coords.nrows()],
            ));
        }
        Ok(Self { tag, features, coords })
    }

    pub fn instance_count(&self) -> usize {
        self.features.nrows()
    }

    pub fn embedding_dim(&self) -> usize {
        self.features.ncols()
    }
}

// ─── Bag ──────────────────────────────────────────────────────────────────────
/// A fully assembled bag, coordinates included.
#[derive(Debug, Clone)]
pub struct Bag {
    pub patient_id: String,
    pub label:      Label,
    pub scales:     Vec<ScaleFeatureSet>,
}

impl Bag {
    /// Instance count shared by every scale (0 for a bag with no scales).
    pub fn instance_count(&self) -> usize {
        self.scales.first().map(|s| s.instance_count()).unwrap_or(0)
    }

    /// Drop the coordinates and keep what a training batch needs.
    pub fn into_sample(self, mode: &BagMode) -> BagSample {
        let features = match mode {
            BagMode::SingleScale => BagFeatures::Single(
                self.scales
                    .into_iter()
                    .next()
                    .map(|s| s.features)
                    .unwrap_or_else(|| FeatureMatrix::zeros((0, 0))),
            ),
            BagMode::MultiScale(_) => {
                BagFeatures::Multi(self.scales.into_iter().map(|s| s.features).collect())
            }
        };
        BagSample {
            patient_id: self.patient_id,
            features,
            label: self.label,
        }
    }
}

// ─── BagSample ────────────────────────────────────────────────────────────────
/// Features of one bag, ready for the batcher.
#[derive(Debug, Clone, PartialEq)]
pub enum BagFeatures {
    /// One [N, D] matrix.
    Single(FeatureMatrix),
    /// One [N, D_s] matrix per scale, in configured scale order.
    Multi(Vec<FeatureMatrix>),
}

impl BagFeatures {
    pub fn scale_count(&self) -> usize {
        match self {
            Self::Single(_)   => 1,
            Self::Multi(list) => list.len(),
        }
    }

    pub fn matrices(&self) -> Vec<&FeatureMatrix> {
        match self {
            Self::Single(m)   => vec![m],
            Self::Multi(list) => list.iter().collect(),
        }
    }

    pub fn instance_count(&self) -> usize {
        self.matrices().first().map(|m| m.nrows()).unwrap_or(0)
    }

    pub fn is_multi_scale(&self) -> bool {
        matches!(self, Self::Multi(_))
    }
}

/// One dataset item: a bag's features plus its label.
#[derive(Debug, Clone, PartialEq)]
pub struct BagSample {
    pub patient_id: String,
    pub features:   BagFeatures,
    pub label:      Label,
}
