// ============================================================
// picai-mil — Library Root
// ============================================================
// Layers, outermost first:
//
//   cli          — Layer 1: clap commands and config overrides
//   application  — Layer 2: MilConfig and the use cases
//   domain       — Layer 3: bags, labels, errors, FeatureSource
//   data         — Layer 4: index, loader, sorter, assembler,
//                            Burn dataset and batcher
//   infra        — Layer 6: config persistence, scan report
//
// A training loop only needs the data layer: build a BagIndex,
// wrap a BagAssembler in MilDataset and hand it to Burn's
// DataLoaderBuilder together with a MilBatcher.

pub mod application;
pub mod cli;
pub mod data;
pub mod domain;
pub mod infra;
