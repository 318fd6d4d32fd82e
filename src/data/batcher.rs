// ============================================================
// Layer 4 — MIL Batcher
// ============================================================
// Implements Burn's Batcher trait to merge assembled bags into
// tensors.
//
// How batching works here:
//   Input:  Vec of B bags, each with S scales of shape [N, D_s]
//   Output: MilBatch with
//             S feature tensors of shape [B, N, D_s]
//             a validity mask         of shape [B, N]
//             a label vector          of shape [B]
//
//   For every scale position s we flatten the bags' matrices
//   row by row into one Vec, then build a [B, N, D_s] tensor:
//   [b1_r1 .. b1_rN, b2_r1 .. bB_rN] → [B, N, D_s]
//
// Bags of different sizes:
//   Strict       — every bag must have the same N, otherwise the
//                  batch fails with a shape error.
//   PadToLongest — N is the longest bag; shorter bags get zero
//                  rows and `false` in the mask.
//   The mask is emitted under both policies (all `true` when
//   Strict) so consumers never special-case it.
//
// Dataset items are Result<BagSample>: a bag that failed to load
// fails the whole batch. There is no partial batch.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};
use serde::{Deserialize, Serialize};

use crate::data::dataset::LoadedBag;
use crate::domain::{
    bag::BagSample,
    error::{BagError, Result},
};

// ─── BagSizePolicy ────────────────────────────────────────────────────────────
/// What to do when the bags of one batch have different instance counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BagSizePolicy {
    #[default]
    Strict,
    PadToLongest,
}

// ─── MilBatch ─────────────────────────────────────────────────────────────────
/// Stacked features: one tensor, or one tensor per scale position.
#[derive(Debug, Clone)]
pub enum BatchFeatures<B: Backend> {
    /// [batch_size, n_instances, dim]
    Single(Tensor<B, 3>),
    /// One [batch_size, n_instances, dim_s] tensor per scale, in scale order
    Multi(Vec<Tensor<B, 3>>),
}

impl<B: Backend> BatchFeatures<B> {
    pub fn tensors(&self) -> Vec<&Tensor<B, 3>> {
        match self {
            Self::Single(t)   => vec![t],
            Self::Multi(list) => list.iter().collect(),
        }
    }
}

/// A batch of bags ready for the model forward pass.
/// All tensors have batch_size as their first dimension.
#[derive(Debug, Clone)]
pub struct MilBatch<B: Backend> {
    /// Patient ids in batch order
    pub patient_ids: Vec<String>,

    pub features: BatchFeatures<B>,

    /// Validity mask, shape [batch_size, n_instances]
    /// true = real instance, false = padding
    pub mask: Tensor<B, 2, Bool>,

    /// Bag labels as floats, shape [batch_size]
    pub labels: Tensor<B, 1>,
}

/// What the batcher hands to the DataLoader.
pub type BatchResult<B> = Result<MilBatch<B>>;

// ─── MilBatcher ───────────────────────────────────────────────────────────────
/// Holds the target device and the bag size policy.
#[derive(Clone, Debug)]
pub struct MilBatcher<B: Backend> {
    pub device: B::Device,
    pub policy: BagSizePolicy,
}

impl<B: Backend> MilBatcher<B> {
    pub fn new(device: B::Device, policy: BagSizePolicy) -> Self {
        Self { device, policy }
    }

    /// Stack already-loaded bags into a batch.
    ///
    /// # Errors
    /// * InvalidValue: empty batch
    /// * ShapeMismatch: mixed single/multi-scale bags, differing scale
    ///   count, differing embedding dim for a scale position, differing
    ///   instance counts inside a bag, or (Strict) across bags
    pub fn collate(&self, items: Vec<BagSample>) -> Result<MilBatch<B>> {
        let first = items
            .first()
            .ok_or_else(|| BagError::invalid_value("cannot collate an empty batch"))?;

        let batch_size  = items.len();
        let multi       = first.features.is_multi_scale();
        let scale_count = first.features.scale_count();
        let dims: Vec<usize> = first.features.matrices().iter().map(|m| m.ncols()).collect();

        // ── Validate the layout of every bag ─────────────────────────────────
        for item in &items {
            check_layout(item, multi, &dims)?;
        }

        // ── Decide the instance dimension ────────────────────────────────────
        let counts: Vec<usize> = items.iter().map(|s| s.features.instance_count()).collect();
        let n = match self.policy {
            BagSizePolicy::Strict => {
                let n0 = counts[0];
                if let Some(i) = counts.iter().position(|&c| c != n0) {
                    return Err(BagError::shape_mismatch(
                        format!(
                            "bag '{}': instance count differs from '{}' in the same batch",
                            items[i].patient_id, first.patient_id
                        ),
                        vec![n0],
                        vec![counts[i]],
                    ));
                }
                n0
            }
            BagSizePolicy::PadToLongest => counts.iter().copied().max().unwrap_or(0),
        };

        // ── Stack each scale position ────────────────────────────────────────
        let mut tensors = Vec::with_capacity(scale_count);
        for (s, &d) in dims.iter().enumerate() {
            let mut flat: Vec<f32> = Vec::with_capacity(batch_size * n * d);
            for item in &items {
                let matrix = item.features.matrices()[s];
                // iter() walks in logical row-major order whatever the memory layout
                flat.extend(matrix.iter().copied());
                flat.resize(flat.len() + (n - matrix.nrows()) * d, 0.0);
            }
            tensors.push(Tensor::<B, 3>::from_data(
                TensorData::new(flat, [batch_size, n, d]),
                &self.device,
            ));
        }

        // ── Mask and labels ──────────────────────────────────────────────────
        let mask_flat: Vec<bool> = counts
            .iter()
            .flat_map(|&c| (0..n).map(move |i| i < c))
            .collect();
        let mask = Tensor::<B, 2, Bool>::from_data(
            TensorData::new(mask_flat, [batch_size, n]),
            &self.device,
        );

        let label_flat: Vec<f32> = items.iter().map(|s| s.label.as_f32()).collect();
        let labels = Tensor::<B, 1>::from_data(
            TensorData::new(label_flat, [batch_size]),
            &self.device,
        );

        let features = if multi {
            BatchFeatures::Multi(tensors)
        } else {
            let single = tensors
                .pop()
                .ok_or_else(|| BagError::invalid_value("single-scale bag without features"))?;
            BatchFeatures::Single(single)
        };

        Ok(MilBatch {
            patient_ids: items.into_iter().map(|s| s.patient_id).collect(),
            features,
            mask,
            labels,
        })
    }
}

/// Check one bag against the layout of the first bag of the batch.
fn check_layout(item: &BagSample, multi: bool, dims: &[usize]) -> Result<()> {
    let mode = |m: bool| if m { "multi-scale" } else { "single-scale" };
    let matrices = item.features.matrices();

    if item.features.is_multi_scale() != multi {
        return Err(BagError::shape_mismatch(
            format!(
                "bag '{}' is {} but the batch is {}",
                item.patient_id,
                mode(item.features.is_multi_scale()),
                mode(multi)
            ),
            vec![dims.len()],
            vec![matrices.len()],
        ));
    }
    if matrices.len() != dims.len() {
        return Err(BagError::shape_mismatch(
            format!("bag '{}': scale count", item.patient_id),
            vec![dims.len()],
            vec![matrices.len()],
        ));
    }

    let n = item.features.instance_count();
    for (s, (m, &d)) in matrices.iter().zip(dims).enumerate() {
        if m.ncols() != d {
            return Err(BagError::shape_mismatch(
                format!("bag '{}': embedding dim of scale position {s}", item.patient_id),
                vec![d],
                vec![m.ncols()],
            ));
        }
        if m.nrows() != n {
            return Err(BagError::shape_mismatch(
                format!("bag '{}': instances at scale position {s}", item.patient_id),
                vec![n],
                vec![m.nrows()],
            ));
        }
    }
    Ok(())
}

// ─── Burn Batcher Trait Implementation ────────────────────────────────────────
// This is what makes MilBatcher work with Burn's DataLoader.
// Any item that failed to load fails the batch it was drawn into.
impl<B: Backend> Batcher<LoadedBag, BatchResult<B>> for MilBatcher<B> {
    fn batch(&self, items: Vec<LoadedBag>) -> BatchResult<B> {
        let samples = items.into_iter().collect::<Result<Vec<_>>>()?;
        self.collate(samples)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bag::{BagFeatures, FeatureMatrix, Label};
    use ndarray::Array2;

    type TestBackend = burn::backend::NdArray;

    fn batcher(policy: BagSizePolicy) -> MilBatcher<TestBackend> {
        MilBatcher::new(Default::default(), policy)
    }

    /// Matrix whose entry (i, j) is `base + i * dim + j`.
    fn counting(n: usize, dim: usize, base: f32) -> FeatureMatrix {
        Array2::from_shape_fn((n, dim), |(i, j)| base + (i * dim + j) as f32)
    }

    fn multi(id: &str, n: usize, label: Label) -> BagSample {
        BagSample {
            patient_id: id.into(),
            features:   BagFeatures::Multi(vec![counting(n, 4, 0.0), counting(n, 2, 100.0)]),
            label,
        }
    }

    fn single(id: &str, n: usize, label: Label) -> BagSample {
        BagSample {
            patient_id: id.into(),
            features:   BagFeatures::Single(counting(n, 3, 0.0)),
            label,
        }
    }

    #[test]
    fn test_multi_scale_shapes() {
        let batch = batcher(BagSizePolicy::Strict)
            .collate(vec![multi("p1", 3, Label::POSITIVE), multi("p2", 3, Label::NEGATIVE)])
            .unwrap();

        let dims: Vec<[usize; 3]> = batch.features.tensors().iter().map(|t| t.dims()).collect();
        assert_eq!(dims, vec![[2, 3, 4], [2, 3, 2]]);
        assert_eq!(batch.labels.dims(), [2]);
        assert_eq!(batch.mask.dims(), [2, 3]);
        assert_eq!(batch.patient_ids, vec!["p1", "p2"]);
        assert_eq!(batch.labels.into_data().to_vec::<f32>().unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_single_scale_is_one_tensor() {
        let batch = batcher(BagSizePolicy::Strict)
            .collate(vec![single("p1", 2, Label::NEGATIVE); 4])
            .unwrap();
        match &batch.features {
            BatchFeatures::Single(t) => assert_eq!(t.dims(), [4, 2, 3]),
            other => panic!("expected a single tensor, got {other:?}"),
        }
    }

    #[test]
    fn test_values_keep_row_order() {
        let batch = batcher(BagSizePolicy::Strict)
            .collate(vec![single("p1", 2, Label::POSITIVE)])
            .unwrap();
        let t = batch.features.tensors()[0].clone();
        assert_eq!(
            t.into_data().to_vec::<f32>().unwrap(),
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]
        );
    }

    #[test]
    fn test_strict_rejects_different_bag_sizes() {
        let err = batcher(BagSizePolicy::Strict)
            .collate(vec![multi("p1", 3, Label::POSITIVE), multi("p2", 5, Label::POSITIVE)])
            .unwrap_err();
        assert!(matches!(err, BagError::ShapeMismatch { .. }));
        assert!(err.to_string().contains("p2"));
    }

    #[test]
    fn test_padding_fills_zeros_and_masks() {
        let batch = batcher(BagSizePolicy::PadToLongest)
            .collate(vec![single("p1", 1, Label::POSITIVE), single("p2", 2, Label::NEGATIVE)])
            .unwrap();

        let t = batch.features.tensors()[0].clone();
        assert_eq!(t.dims(), [2, 2, 3]);
        assert_eq!(
            t.into_data().to_vec::<f32>().unwrap(),
            vec![0.0, 1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0]
        );
        assert_eq!(
            batch.mask.into_data().to_vec::<bool>().unwrap(),
            vec![true, false, true, true]
        );
    }

    #[test]
    fn test_embedding_dim_mismatch() {
        let mut odd = multi("p2", 3, Label::POSITIVE);
        odd.features = BagFeatures::Multi(vec![counting(3, 4, 0.0), counting(3, 7, 0.0)]);
        let err = batcher(BagSizePolicy::PadToLongest)
            .collate(vec![multi("p1", 3, Label::POSITIVE), odd])
            .unwrap_err();
        assert!(matches!(err, BagError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_mixed_modes_are_rejected() {
        let err = batcher(BagSizePolicy::Strict)
            .collate(vec![multi("p1", 3, Label::POSITIVE), single("p2", 3, Label::POSITIVE)])
            .unwrap_err();
        assert!(matches!(err, BagError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_empty_batch() {
        let err = batcher(BagSizePolicy::Strict).collate(Vec::new()).unwrap_err();
        assert!(matches!(err, BagError::InvalidValue(_)));
    }

    #[test]
    fn test_failed_item_fails_the_batch() {
        let b = batcher(BagSizePolicy::Strict);
        let items: Vec<LoadedBag> = vec![
            Ok(single("p1", 2, Label::POSITIVE)),
            Err(BagError::not_found("coordinate file", "p2/info_patches.h5")),
        ];
        assert!(matches!(b.batch(items), Err(BagError::NotFound { .. })));

        let ok: Vec<LoadedBag> = vec![Ok(single("p1", 2, Label::POSITIVE))];
        assert!(b.batch(ok).is_ok());
    }
}
