// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates the other layers to accomplish one
// goal per CLI command.
//
// Rules for this layer:
//   - No feature decoding or tensor code here (Layer 4)
//   - No printing here (that's Layer 1)
//   - Only workflow coordination, plus anyhow context on errors
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// MilConfig: every setting of the bag pipeline
pub mod config;

/// Resolve and summarise the bag index
pub mod index_use_case;

/// Assemble and describe a single bag
pub mod inspect_use_case;

/// Drive every bag through the DataLoader and collator
pub mod scan_use_case;
