// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer handles everything from the label table on disk
// all the way to batch tensors.
//
// The pipeline flows in this order:
//
//   picai_labels.csv
//       │
//       ▼
//   LabelTable / BagIndex → ordered (patient_id, label) list
//       │
//       ▼
//   FeatureLoader         → per-scale features + coordinates
//       │
//       ▼
//   Permutation           → one spatial order per bag, shared
//       │                   by all of its scales
//       ▼
//   BagAssembler          → one BagSample per patient
//       │
//       ▼
//   MilDataset            → implements Burn's Dataset trait
//       │
//       ▼
//   MilBatcher            → stacks bags into [B, N, D] tensors
//       │
//       ▼
//   DataLoader            → feeds batches to the training loop
//
// Each module is responsible for exactly one step.
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads the label CSV and builds the bag index
pub mod label_table;

/// Holds one fold out for validation
pub mod splitter;

/// Reads feature matrices and coordinate tables from disk
pub mod loader;

/// Computes and applies the spatial instance order
pub mod sorter;

/// Composes index, loader and sorter into bag samples
pub mod assembler;

/// Implements Burn's Dataset trait over the bag index
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
