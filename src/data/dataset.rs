use std::sync::Arc;

use burn::data::dataset::Dataset;

use crate::data::{assembler::BagAssembler, label_table::BagIndex};
use crate::domain::{
    bag::BagSample,
    error::Result,
    traits::FeatureSource,
};

/// One dataset item: the assembled bag, or why it could not be assembled.
/// Errors are carried to the batcher instead of being dropped here.
pub type LoadedBag = Result<BagSample>;

/// Bags of an index, assembled on every `get`.
pub struct MilDataset<S> {
    assembler: Arc<BagAssembler<S>>,
}

impl<S: FeatureSource> MilDataset<S> {
    pub fn new(assembler: Arc<BagAssembler<S>>) -> Self {
        Self { assembler }
    }

    pub fn index(&self) -> &Arc<BagIndex> {
        self.assembler.index()
    }
}

impl<S: FeatureSource> Dataset<LoadedBag> for MilDataset<S> {
    fn get(&self, index: usize) -> Option<LoadedBag> {
        self.assembler.assemble_at(index)
    }

    fn len(&self) -> usize {
        self.assembler.index().len()
    }
}
