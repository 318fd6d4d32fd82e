// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that don't belong in any specific
// business layer:
//
//   config_store.rs — Saving and loading MilConfig as JSON,
//                     so a run can be repeated exactly.
//
//   report.rs       — Per-bag scan report written as CSV,
//                     one row per patient with its shape or
//                     the reason it could not be loaded.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// MilConfig JSON persistence
pub mod config_store;

/// Per-bag scan report (CSV)
pub mod report;
