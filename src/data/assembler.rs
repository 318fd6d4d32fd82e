// ============================================================
// Layer 4 — Bag Assembler
// ============================================================
// Builds one bag from its parts:
//
//   BagIndex          → label of the patient
//       │
//       ▼
//   FeatureSource     → reference scale (first tag): features + coords
//       │
//       ▼
//   Permutation       → computed ONCE from the reference coordinates
//       │
//       ▼
//   FeatureSource     → every other scale, checked to have the same N
//       │
//       ▼
//   Permutation.apply → same reordering applied to every scale
//
// Nothing is cached: every call rereads the files, so the
// assembler can be shared freely between worker threads.

use std::sync::Arc;

use rayon::prelude::*;

use crate::data::{
    label_table::{BagEntry, BagIndex},
    sorter::Permutation,
};
use crate::domain::{
    bag::{Bag, BagMode, BagSample, Label, ScaleFeatureSet},
    error::{BagError, Result},
    traits::FeatureSource,
};

/// Composes index, feature source and sorter into bag samples.
#[derive(Debug)]
pub struct BagAssembler<S> {
    source: S,
    mode:   BagMode,
    index:  Arc<BagIndex>,
}

impl<S: FeatureSource> BagAssembler<S> {
    pub fn new(source: S, mode: BagMode, index: Arc<BagIndex>) -> Self {
        Self { source, mode, index }
    }

    pub fn mode(&self) -> &BagMode {
        &self.mode
    }

    pub fn index(&self) -> &Arc<BagIndex> {
        &self.index
    }

    /// Load every configured scale of one patient and put the instances
    /// in spatial order. Coordinates are kept, sorted like the features.
    ///
    /// # Errors
    /// * anything the FeatureSource raises, unchanged
    /// * InvalidValue: the reference scale has no instances
    /// * ShapeMismatch: a scale's instance count differs from the reference
    pub fn assemble_bag(&self, patient_id: &str, label: Label) -> Result<Bag> {
        let tags = self.mode.tags();
        let (reference_tag, others) = tags
            .split_first()
            .ok_or_else(|| BagError::configuration("no scale tags configured"))?;

        let reference = self.source.load_scale(patient_id, reference_tag)?;
        let n = reference.instance_count();
        if n == 0 {
            return Err(BagError::invalid_value(format!(
                "bag '{patient_id}' has no instances at scale {reference_tag}"
            )));
        }

        let perm = Permutation::from_coords(reference.coords.view());
        let mut scales = Vec::with_capacity(tags.len());

        for tag in others {
            let set = self.source.load_scale(patient_id, tag)?;
            if set.instance_count() != n {
                return Err(BagError::shape_mismatch(
                    format!(
                        "bag '{patient_id}': instances at scale {tag} vs reference scale {reference_tag}"
                    ),
                    vec![n],
                    vec![set.instance_count()],
                ));
            }
            if set.coords != reference.coords {
                tracing::warn!(
                    "Bag '{}': coordinates of scale {} differ from {}; ordering follows {}",
                    patient_id, tag, reference_tag, reference_tag
                );
            }
            scales.push(set);
        }
        scales.insert(0, reference);

        let scales = scales
            .into_iter()
            .map(|set| reorder(set, &perm))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            "Assembled bag '{}': {} scales x {} instances (sorted: {})",
            patient_id,
            scales.len(),
            n,
            !perm.is_identity(),
        );

        Ok(Bag { patient_id: patient_id.to_string(), label, scales })
    }

    /// Assemble the training sample of one index entry.
    pub fn assemble(&self, entry: &BagEntry) -> Result<BagSample> {
        let bag = self.assemble_bag(&entry.patient_id, entry.label)?;
        Ok(bag.into_sample(&self.mode))
    }

    /// Assemble a bag by patient id, taking its label from the index.
    pub fn assemble_by_id(&self, patient_id: &str) -> Result<BagSample> {
        let entry = self
            .index
            .find(patient_id)
            .ok_or_else(|| BagError::not_found("patient in bag index", patient_id))?;
        self.assemble(entry)
    }

    /// Assemble the bag at `position` of the index; None past the end.
    pub fn assemble_at(&self, position: usize) -> Option<Result<BagSample>> {
        self.index.get(position).map(|entry| self.assemble(entry))
    }

    /// Assemble several bags in parallel.
    ///
    /// Waits for all of them; if any one fails the whole call fails.
    /// Output order follows `entries`.
    pub fn assemble_many(&self, entries: &[BagEntry]) -> Result<Vec<BagSample>> {
        entries.par_iter().map(|entry| self.assemble(entry)).collect()
    }
}

/// Apply the shared permutation to one scale.
fn reorder(set: ScaleFeatureSet, perm: &Permutation) -> Result<ScaleFeatureSet> {
    Ok(ScaleFeatureSet {
        features: perm.apply(&set.features)?,
        coords:   perm.apply(&set.coords)?,
        tag:      set.tag,
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::{FeatureLoader, FileLayout};
    use crate::domain::bag::{BagFeatures, CoordTable, FeatureMatrix, ScaleTag};
    use ndarray::{array, Array2};
    use std::collections::HashMap;

    /// Feature source backed by a map of (patient, tag) → scale.
    #[derive(Default)]
    struct MemorySource {
        scales: HashMap<(String, String), ScaleFeatureSet>,
    }

    impl MemorySource {
        fn insert(&mut self, pid: &str, tag: &str, features: FeatureMatrix, coords: CoordTable) {
            let set = ScaleFeatureSet::new(ScaleTag::level(tag), features, coords).unwrap();
            self.scales.insert((pid.to_string(), tag.to_string()), set);
        }
    }

    impl FeatureSource for MemorySource {
        fn load_scale(&self, pid: &str, tag: &ScaleTag) -> Result<ScaleFeatureSet> {
            self.scales
                .get(&(pid.to_string(), tag.to_string()))
                .cloned()
                .ok_or_else(|| BagError::not_found("scale", format!("{pid}/{tag}")))
        }
    }

    fn two_scales() -> BagMode {
        BagMode::MultiScale(vec![ScaleTag::level("C4"), ScaleTag::level("C5")])
    }

    fn index(ids: &[(&str, Label)]) -> Arc<BagIndex> {
        Arc::new(BagIndex::from_entries(
            ids.iter()
                .map(|(id, label)| BagEntry { patient_id: id.to_string(), label: *label, fold: None })
                .collect(),
        ))
    }

    /// Coordinates deliberately stored out of order.
    fn shuffled_coords() -> CoordTable {
        array![[5.0, 2.0], [1.0, 9.0], [3.0, 2.0]]
    }

    /// Row j of C4 is [j], row j of C5 is [100 j, 100 j + 1].
    fn source_with_aligned_scales() -> MemorySource {
        let mut src = MemorySource::default();
        src.insert("p1", "C4", array![[0.0], [1.0], [2.0]], shuffled_coords());
        src.insert(
            "p1",
            "C5",
            array![[0.0, 1.0], [100.0, 101.0], [200.0, 201.0]],
            shuffled_coords(),
        );
        src
    }

    #[test]
    fn test_scales_stay_aligned_after_sorting() {
        let asm = BagAssembler::new(
            source_with_aligned_scales(),
            two_scales(),
            index(&[("p1", Label::POSITIVE)]),
        );
        let bag = asm.assemble_bag("p1", Label::POSITIVE).unwrap();

        let c4 = &bag.scales[0];
        let c5 = &bag.scales[1];
        assert_eq!(c4.coords, array![[3.0, 2.0], [5.0, 2.0], [1.0, 9.0]]);
        for i in 0..3 {
            // same original instance in row i of both scales
            assert_eq!(c4.features[[i, 0]] * 100.0, c5.features[[i, 0]]);
            assert_eq!(c4.coords.row(i), c5.coords.row(i));
        }
        assert_eq!(c4.features.column(0).to_vec(), vec![2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_reference_scale_defines_the_order() {
        let mut src = source_with_aligned_scales();
        // C5 coordinates reversed: its own sort would give a different order
        src.insert(
            "p1",
            "C5",
            array![[0.0, 1.0], [100.0, 101.0], [200.0, 201.0]],
            array![[0.0, 3.0], [0.0, 2.0], [0.0, 1.0]],
        );
        let asm = BagAssembler::new(src, two_scales(), index(&[("p1", Label::NEGATIVE)]));
        let bag = asm.assemble_bag("p1", Label::NEGATIVE).unwrap();
        assert_eq!(bag.scales[1].features.column(0).to_vec(), vec![200.0, 0.0, 100.0]);
    }

    #[test]
    fn test_sample_is_ordered_list_of_scales() {
        let asm = BagAssembler::new(
            source_with_aligned_scales(),
            two_scales(),
            index(&[("p1", Label::POSITIVE)]),
        );
        let sample = asm.assemble_by_id("p1").unwrap();
        assert_eq!(sample.label, Label::POSITIVE);
        match &sample.features {
            BagFeatures::Multi(list) => {
                assert_eq!(list.len(), 2);
                assert_eq!(list[0].dim(), (3, 1));
                assert_eq!(list[1].dim(), (3, 2));
            }
            other => panic!("expected multi-scale features, got {other:?}"),
        }
    }

    #[test]
    fn test_instance_count_mismatch_between_scales() {
        let mut src = source_with_aligned_scales();
        src.insert("p1", "C5", Array2::zeros((2, 2)), Array2::zeros((2, 2)));
        let asm = BagAssembler::new(src, two_scales(), index(&[("p1", Label::POSITIVE)]));
        let err = asm.assemble_by_id("p1").unwrap_err();
        assert!(matches!(err, BagError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_missing_scale_propagates() {
        let mut src = MemorySource::default();
        src.insert("p1", "C4", array![[0.0]], array![[0.0, 0.0]]);
        let asm = BagAssembler::new(src, two_scales(), index(&[("p1", Label::POSITIVE)]));
        assert!(matches!(asm.assemble_by_id("p1").unwrap_err(), BagError::NotFound { .. }));
    }

    #[test]
    fn test_unknown_patient_is_not_found() {
        let asm = BagAssembler::new(MemorySource::default(), two_scales(), index(&[]));
        assert!(matches!(asm.assemble_by_id("nobody").unwrap_err(), BagError::NotFound { .. }));
        assert!(asm.assemble_at(0).is_none());
    }

    #[test]
    fn test_empty_bag_is_rejected() {
        let mut src = MemorySource::default();
        src.insert("p1", "C4", Array2::zeros((0, 4)), Array2::zeros((0, 2)));
        src.insert("p1", "C5", Array2::zeros((0, 4)), Array2::zeros((0, 2)));
        let asm = BagAssembler::new(src, two_scales(), index(&[("p1", Label::POSITIVE)]));
        assert!(matches!(asm.assemble_by_id("p1").unwrap_err(), BagError::InvalidValue(_)));
    }

    #[test]
    fn test_assemble_many_fails_as_a_whole() {
        let asm = BagAssembler::new(
            source_with_aligned_scales(),
            two_scales(),
            index(&[("p1", Label::POSITIVE), ("p2", Label::NEGATIVE)]),
        );
        let entries = asm.index().entries().to_vec();
        assert!(asm.assemble_many(&entries[..1]).is_ok());
        assert!(asm.assemble_many(&entries).is_err());
    }

    #[test]
    fn test_assembles_from_files_on_disk() {
        use ndarray_npy::write_npy;

        let root = tempfile::tempdir().unwrap();
        let dir  = root.path().join("10000");
        std::fs::create_dir_all(&dir).unwrap();
        write_npy(dir.join("patch_features.npy"), &array![[1.0_f32, 1.0], [2.0, 2.0]]).unwrap();
        write_npy(dir.join("info_patches.npy"), &array![[0_i64, 5], [0, 1]]).unwrap();

        let layout = FileLayout {
            feature_extension: "npy".into(),
            coords_file:       "info_patches.npy".into(),
            coords_dataset:    "coords".into(),
        };
        let asm = BagAssembler::new(
            FeatureLoader::new(root.path(), layout),
            BagMode::SingleScale,
            index(&[("10000", Label::NEGATIVE)]),
        );
        let sample = asm.assemble_at(0).unwrap().unwrap();
        assert_eq!(
            sample.features,
            BagFeatures::Single(array![[2.0_f32, 2.0], [1.0, 1.0]])
        );
    }
}
