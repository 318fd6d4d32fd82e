// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types describing bags, labels and scales, the
// error taxonomy, and the one trait the data layer builds on.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only structs, enums, traits and their invariants
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

/// Bag, ScaleFeatureSet, Label, ScaleTag, BagMode, BagSample
pub mod bag;

/// BagError and the Result alias used below the application layer
pub mod error;

/// FeatureSource: where the assembler gets its matrices from
pub mod traits;
