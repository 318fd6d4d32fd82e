// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the three subcommands (`index`, `inspect`, `scan`)
// and the configuration overrides every one of them accepts.
//
// Where a setting comes from, lowest precedence first:
//   1. MilConfig::default()
//   2. the JSON file given with --config
//   3. flags on the command line (or DATA_ROOT / FEAT_DIR /
//      LABELS_CSV in the environment)
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → u32, PathBuf, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::config::{MilConfig, MultiScaleModel};
use crate::data::batcher::BagSizePolicy;
use crate::infra::config_store::ConfigStore;

/// The top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the bag index and its label distribution
    Index(IndexArgs),

    /// Assemble one bag and print its per-scale shapes
    Inspect(InspectArgs),

    /// Load and collate every bag, writing a per-bag CSV report
    Scan(ScanArgs),
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Also check the train/validation split holding out this fold
    #[arg(long)]
    pub val_fold: Option<u32>,

    /// Print every entry, not just the summary
    #[arg(long)]
    pub list: bool,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Patient whose bag to assemble
    #[arg(long)]
    pub patient_id: String,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Log defective bags and batches and carry on. Bags that loaded
    /// are still collated, so a batch may be smaller than --batch-size
    #[arg(long)]
    pub keep_going: bool,

    /// Where to write the per-bag report
    #[arg(long, default_value = "scan_report.csv")]
    pub report: PathBuf,
}

// ─── Configuration Overrides ─────────────────────────────────────────────────
/// Flags shared by every subcommand. Unset flags leave the value from
/// the config file (or the default) untouched.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// JSON configuration file to start from
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Write the resolved configuration to this file
    #[arg(long, global = true)]
    pub save_config: Option<PathBuf>,

    /// Dataset root directory
    #[arg(long, global = true, env = "DATA_ROOT")]
    pub data_root: Option<PathBuf>,

    /// Feature directory, relative to the dataset root
    #[arg(long, global = true, env = "FEAT_DIR")]
    pub feat_dir: Option<PathBuf>,

    /// Label table (CSV with patient_id, the label column and fold)
    #[arg(long, global = true, env = "LABELS_CSV")]
    pub labels_csv: Option<PathBuf>,

    /// Column holding the binary bag label
    #[arg(long, global = true)]
    pub label_col: Option<String>,

    /// fpn and backbone_pyramid load one matrix per scale tag;
    /// any other model loads the single untagged matrix
    #[arg(long, global = true)]
    pub multi_scale_model: Option<MultiScaleModel>,

    /// Comma-separated pyramid levels; the first one fixes the order
    #[arg(long, global = true, value_delimiter = ',')]
    pub scale_tags: Option<Vec<String>>,

    /// Keep only bags of this fold
    #[arg(long, global = true)]
    pub fold: Option<u32>,

    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    #[arg(long, global = true)]
    pub num_workers: Option<usize>,

    /// Shuffle bag order with this seed
    #[arg(long, global = true)]
    pub shuffle_seed: Option<u64>,

    /// Zero-pad bags of different sizes instead of failing the batch
    #[arg(long, global = true)]
    pub pad_bags: bool,

    /// Feature file extension (pt, pth or npy)
    #[arg(long, global = true)]
    pub feature_extension: Option<String>,

    /// Coordinate file name inside each patient directory
    #[arg(long, global = true)]
    pub coords_file: Option<String>,

    /// Dataset name inside an HDF5 coordinate file
    #[arg(long, global = true)]
    pub coords_dataset: Option<String>,
}

impl ConfigArgs {
    /// Layer the flags over the config file (if any) over the defaults.
    pub fn resolve(&self) -> Result<MilConfig> {
        let base = match &self.config {
            Some(path) => ConfigStore::new(path).load()?,
            None       => MilConfig::default(),
        };
        let cfg = self.apply(base);

        if let Some(path) = &self.save_config {
            ConfigStore::new(path).save(&cfg)?;
            tracing::info!("Saved resolved config to '{}'", path.display());
        }
        Ok(cfg)
    }

    /// Overwrite the fields whose flags were given.
    pub fn apply(&self, mut cfg: MilConfig) -> MilConfig {
        if let Some(v) = &self.data_root         { cfg.data_root = v.clone(); }
        if let Some(v) = &self.feat_dir          { cfg.feat_dir = v.clone(); }
        if let Some(v) = &self.labels_csv        { cfg.labels_csv = v.clone(); }
        if let Some(v) = &self.label_col         { cfg.label_col = v.clone(); }
        if let Some(v) = &self.multi_scale_model { cfg.multi_scale_model = v.clone(); }
        if let Some(v) = &self.scale_tags        { cfg.scale_tags = v.clone(); }
        if let Some(v) = self.fold               { cfg.fold = Some(v); }
        if let Some(v) = self.batch_size         { cfg.batch_size = v; }
        if let Some(v) = self.num_workers        { cfg.num_workers = v; }
        if let Some(v) = self.shuffle_seed       { cfg.shuffle_seed = Some(v); }
        if self.pad_bags                         { cfg.bag_size_policy = BagSizePolicy::PadToLongest; }
        if let Some(v) = &self.feature_extension { cfg.feature_extension = v.clone(); }
        if let Some(v) = &self.coords_file       { cfg.coords_file = v.clone(); }
        if let Some(v) = &self.coords_dataset    { cfg.coords_dataset = v.clone(); }
        cfg
    }
}
