// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Three commands are supported:
//   1. `index`   — resolve the label table into a bag index
//   2. `inspect` — assemble one bag and show its shapes
//   3. `scan`    — push every bag through the DataLoader
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

// Declare the commands submodule
pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, ConfigArgs, IndexArgs, InspectArgs, ScanArgs};

use crate::application::config::MilConfig;

/// Top-level arguments: one subcommand plus the config overrides.
#[derive(Parser, Debug)]
#[command(
    name = "picai-mil",
    version,
    about = "Assemble and batch multiple-instance bags of PI-CAI patch features."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub config: ConfigArgs,
}

impl Cli {
    /// Resolve the configuration, then dispatch to the use case.
    pub fn run(self) -> Result<()> {
        let cfg = self.config.resolve()?;
        match self.command {
            Commands::Index(args)   => run_index(cfg, args),
            Commands::Inspect(args) => run_inspect(cfg, args),
            Commands::Scan(args)    => run_scan(cfg, args),
        }
    }
}

fn run_index(cfg: MilConfig, args: IndexArgs) -> Result<()> {
    use crate::application::index_use_case::IndexUseCase;

    let summary = IndexUseCase::new(cfg).execute(args.val_fold)?;

    if args.list {
        println!("patient_id,label,fold");
        for e in summary.index.iter() {
            let fold = e.fold.map(|f| f.to_string()).unwrap_or_default();
            println!("{},{},{}", e.patient_id, e.label, fold);
        }
    }
    println!("\nBags:   {}", summary.index.len());
    for (label, count) in &summary.label_counts {
        println!("  label {label}: {count}");
    }
    println!("Folds:  {:?}", summary.folds);
    if let Some(split) = summary.split {
        println!(
            "Split (val fold {}): {} train / {} validation",
            split.val_fold, split.train, split.val
        );
    }
    Ok(())
}

fn run_inspect(cfg: MilConfig, args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let summary = InspectUseCase::new(cfg).execute(&args.patient_id)?;

    let fold = summary.fold.map(|f| f.to_string()).unwrap_or_else(|| "-".into());
    println!("\nPatient {} (label {}, fold {})", summary.patient_id, summary.label, fold);
    for scale in &summary.scales {
        println!(
            "  {:<8} features [{} x {}]  coords [{} x {}]",
            scale.tag.to_string(), scale.instances, scale.dim, scale.instances, scale.coord_cols
        );
        for row in &scale.first_coords {
            println!("           {row:?}");
        }
    }
    Ok(())
}

fn run_scan(cfg: MilConfig, args: ScanArgs) -> Result<()> {
    use crate::application::scan_use_case::{ScanOptions, ScanUseCase};

    let options = ScanOptions { keep_going: args.keep_going, report_path: args.report };
    let summary = ScanUseCase::new(cfg, options).execute()?;

    println!(
        "\nScanned {} bags ({} failed) in {} batches ({} failed).",
        summary.bags, summary.failed_bags, summary.batches, summary.failed_batches
    );
    println!("Report: {}", summary.report_path.display());
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::BagSizePolicy;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "picai-mil", "scan", "--keep-going",
            "--scale-tags", "C3,C4,C5", "--fold", "1", "--pad-bags",
        ])
        .unwrap();
        let cfg = cli.config.apply(MilConfig::default());
        assert_eq!(cfg.scale_tags, vec!["C3", "C4", "C5"]);
        assert_eq!(cfg.fold, Some(1));
        assert_eq!(cfg.bag_size_policy, BagSizePolicy::PadToLongest);
        assert!(matches!(cli.command, Commands::Scan(ScanArgs { keep_going: true, .. })));
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{ "label_col": "isup_pos", "batch_size": 4 }"#).unwrap();

        let cli = Cli::try_parse_from([
            "picai-mil", "index", "--config", path.to_str().unwrap(), "--batch-size", "2",
        ])
        .unwrap();
        let cfg = cli.config.resolve().unwrap();
        assert_eq!(cfg.label_col, "isup_pos");
        assert_eq!(cfg.batch_size, 2);
    }

    #[test]
    fn test_inspect_requires_patient_id() {
        assert!(Cli::try_parse_from(["picai-mil", "inspect"]).is_err());
    }
}
