// ============================================================
// Layer 3 — Bag Error Taxonomy
// ============================================================
// Every failure the bag pipeline can raise, in one enum.
//
// All of these describe defects in persisted data or in the
// configuration, never transient conditions, so nothing here
// is retried. Errors are raised where they are detected and
// handed back to whoever asked for the bag or the batch.
//
// BagError is Clone because burn's DataLoader moves items and
// batches between worker threads and requires Clone on both.
// io::Error is not Clone, so it travels inside an Arc.

use std::{io, path::PathBuf, sync::Arc};
use thiserror::Error;

/// Errors raised while indexing, loading, ordering or batching bags.
#[derive(Error, Debug, Clone)]
pub enum BagError {
    /// Label table or configuration cannot produce a usable index.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A required file (or an indexed patient) does not exist.
    #[error("{what} not found: '{}'", path.display())]
    NotFound { what: String, path: PathBuf },

    /// Two quantities that must agree do not.
    #[error("Shape mismatch ({context}): expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context:  String,
        expected: Vec<usize>,
        actual:   Vec<usize>,
    },

    /// A value that parsed but is not acceptable (wrong rank, non-binary label, ...).
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// The file exists but its content could not be decoded.
    #[error("Cannot decode '{}': {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Unsupported format for '{}': {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },
}

/// Result alias used by the domain and data layers.
pub type Result<T> = std::result::Result<T, BagError>;

impl BagError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn not_found(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::NotFound { what: what.into(), path: path.into() }
    }

    pub fn shape_mismatch(
        context:  impl Into<String>,
        expected: impl Into<Vec<usize>>,
        actual:   impl Into<Vec<usize>>,
    ) -> Self {
        Self::ShapeMismatch {
            context:  context.into(),
            expected: expected.into(),
            actual:   actual.into(),
        }
    }

    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io { path: path.into(), source: Arc::new(source) }
    }

    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode { path: path.into(), reason: reason.to_string() }
    }

    pub fn unsupported(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat { path: path.into(), reason: reason.into() }
    }

    /// Short machine-friendly name of the variant, used in scan reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_)         => "configuration",
            Self::NotFound { .. }          => "not_found",
            Self::ShapeMismatch { .. }     => "shape_mismatch",
            Self::InvalidValue(_)          => "invalid_value",
            Self::Io { .. }                => "io",
            Self::Decode { .. }            => "decode",
            Self::UnsupportedFormat { .. } => "unsupported_format",
        }
    }
}
