// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The assembler never reads files itself. It asks a
// FeatureSource for "features + coordinates of scale S for
// patient P" and works only with what comes back.
//
// Implementations:
//   - FeatureLoader → per-patient directories on disk
//   - (tests)       → in-memory maps of hand-written matrices
//
// Send + Sync because bags are assembled concurrently from
// many worker threads sharing one source.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use crate::domain::bag::{ScaleFeatureSet, ScaleTag};
use crate::domain::error::Result;

// ─── FeatureSource ────────────────────────────────────────────────────────────
/// Anything that can produce one scale of one bag.
pub trait FeatureSource: Send + Sync {
    /// Load the feature matrix and coordinate table of `patient_id`
    /// at scale `tag`. Row counts of the two are already checked.
    fn load_scale(&self, patient_id: &str, tag: &ScaleTag) -> Result<ScaleFeatureSet>;
}

impl<T: FeatureSource + ?Sized> FeatureSource for std::sync::Arc<T> {
    fn load_scale(&self, patient_id: &str, tag: &ScaleTag) -> Result<ScaleFeatureSet> {
        (**self).load_scale(patient_id, tag)
    }
}
