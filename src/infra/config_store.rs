// ============================================================
// Layer 6 — Config Store
// ============================================================
// Saves and restores MilConfig as pretty-printed JSON.
//
// Why save the config at all?
//   A scan (or a training run driven by this crate) depends on
//   the exact label column, fold, scale order and bag size
//   policy. Writing the resolved configuration next to the
//   outputs makes the run reproducible without remembering
//   which CLI flags were passed.
//
// Missing fields in a loaded file fall back to the defaults,
// so hand-written files can stay short.
//
// Reference: serde_json documentation
//            Rust Book §9 (Error Handling)

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};

use crate::application::config::MilConfig;

/// Reads and writes one configuration file.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the configuration, failing if the file is absent.
    pub fn load(&self) -> Result<MilConfig> {
        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read config '{}'", self.path.display()))?;
        let cfg = serde_json::from_str(&json)
            .with_context(|| format!("Invalid config JSON in '{}'", self.path.display()))?;
        tracing::debug!("Loaded config from '{}'", self.path.display());
        Ok(cfg)
    }

    /// Write the configuration, creating parent directories as needed.
    pub fn save(&self, cfg: &MilConfig) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create '{}'", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Cannot write config to '{}'", self.path.display()))?;
        tracing::debug!("Saved config to '{}'", self.path.display());
        Ok(())
    }
}
