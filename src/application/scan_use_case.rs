// ============================================================
// Layer 2 — Scan Use Case
// ============================================================
// Drives every bag of the index through the same machinery a
// training run uses, without a model on the other end:
//
//   Step 1: Validate the configuration
//   Step 2: Build the bag index                 (Layer 4)
//   Step 3: Build the assembler and dataset     (Layer 4)
//   Step 4: Build Burn's DataLoader + batcher   (Layer 4)
//   Step 5: Iterate, log batch shapes, report   (Layer 6)
//
// Every bag gets a report row, loaded or not. By default the
// first defective bag or batch stops the scan; the report is
// flushed on every exit path. With keep_going the defect is
// logged and the scan moves on. Bags that loaded are still
// collated, so a batch may hold fewer than batch_size bags.
//
// Reference: Burn Book §4 (DataLoader)

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use burn::{
    backend::NdArray,
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    tensor::backend::Backend,
};

use crate::application::config::MilConfig;
use crate::data::{
    batcher::{BatchResult, MilBatch, MilBatcher},
    dataset::{LoadedBag, MilDataset},
    label_table::BagEntry,
};
use crate::domain::{error::BagError, traits::FeatureSource};
use crate::infra::report::{BagReportRow, ScanReport};

/// Scans only build tensors, so the CPU backend is enough.
pub type ScanBackend = NdArray;

// ─── ScanDataset ──────────────────────────────────────────────────────────────
/// A loaded bag together with the index entry it came from, so a
/// failed load can still be reported against its patient.
#[derive(Debug, Clone)]
pub struct ScanItem {
    pub entry: BagEntry,
    pub bag:   LoadedBag,
}

pub struct ScanDataset<S> {
    inner: MilDataset<S>,
}

impl<S: FeatureSource> ScanDataset<S> {
    pub fn new(inner: MilDataset<S>) -> Self {
        Self { inner }
    }
}

impl<S: FeatureSource> Dataset<ScanItem> for ScanDataset<S> {
    fn get(&self, index: usize) -> Option<ScanItem> {
        let entry = self.inner.index().get(index)?.clone();
        let bag   = self.inner.get(index)?;
        Some(ScanItem { entry, bag })
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

// ─── ScanBatcher ──────────────────────────────────────────────────────────────
/// One report row per item, plus the collated batch of the bags that
/// loaded (None when none did).
#[derive(Debug, Clone)]
pub struct ScanBatch<B: Backend> {
    pub rows:     Vec<BagReportRow>,
    /// Load errors by patient id, in item order
    pub failures: Vec<(String, BagError)>,
    pub batch:    Option<BatchResult<B>>,
}

#[derive(Clone, Debug)]
pub struct ScanBatcher<B: Backend> {
    inner: MilBatcher<B>,
}

impl<B: Backend> ScanBatcher<B> {
    pub fn new(inner: MilBatcher<B>) -> Self {
        Self { inner }
    }
}

impl<B: Backend> Batcher<ScanItem, ScanBatch<B>> for ScanBatcher<B> {
    fn batch(&self, items: Vec<ScanItem>) -> ScanBatch<B> {
        let mut rows     = Vec::with_capacity(items.len());
        let mut samples  = Vec::with_capacity(items.len());
        let mut failures = Vec::new();

        for item in items {
            match item.bag {
                Ok(sample) => {
                    rows.push(BagReportRow::ok(&item.entry, &sample));
                    samples.push(sample);
                }
                Err(err) => {
                    rows.push(BagReportRow::failed(&item.entry, &err));
                    failures.push((item.entry.patient_id, err));
                }
            }
        }

        let batch = (!samples.is_empty()).then(|| self.inner.collate(samples));
        ScanBatch { rows, failures, batch }
    }
}

// ─── ScanUseCase ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub keep_going:  bool,
    pub report_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub bags:           usize,
    pub failed_bags:    usize,
    pub batches:        usize,
    pub failed_batches: usize,
    pub report_path:    PathBuf,
}

pub struct ScanUseCase {
    config:  MilConfig,
    options: ScanOptions,
}

impl ScanUseCase {
    pub fn new(config: MilConfig, options: ScanOptions) -> Self {
        Self { config, options }
    }

    pub fn execute(&self) -> Result<ScanSummary> {
        let cfg  = &self.config;
        let opts = &self.options;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;

        // ── Step 2: Bag index ─────────────────────────────────────────────────
        let index = Arc::new(cfg.bag_index()?);
        tracing::info!(
            "Scanning {} bags (labels {:?}, fold filter {:?})",
            index.len(),
            index.label_counts(),
            cfg.fold
        );

        // ── Step 3: Assembler + dataset ───────────────────────────────────────
        tracing::info!(
            "Reading features from '{}' as {} ({} scales)",
            cfg.feature_root().display(),
            cfg.multi_scale_model,
            cfg.mode().tags().len()
        );
        let assembler = Arc::new(cfg.assembler(Arc::clone(&index)));
        let dataset   = ScanDataset::new(MilDataset::new(assembler));

        // ── Step 4: DataLoader ────────────────────────────────────────────────
        let device  = <ScanBackend as Backend>::Device::default();
        let batcher = ScanBatcher::<ScanBackend>::new(MilBatcher::new(device, cfg.bag_size_policy));
        let mut builder = DataLoaderBuilder::new(batcher)
            .batch_size(cfg.batch_size)
            .num_workers(cfg.num_workers);
        if let Some(seed) = cfg.shuffle_seed {
            builder = builder.shuffle(seed);
        }
        let loader = builder.build(dataset);

        // ── Step 5: Iterate ───────────────────────────────────────────────────
        let mut report  = ScanReport::create(&opts.report_path)?;
        let mut summary = ScanSummary {
            bags:           0,
            failed_bags:    0,
            batches:        0,
            failed_batches: 0,
            report_path:    opts.report_path.clone(),
        };

        let outcome = drain(&*loader, opts.keep_going, &mut report, &mut summary);
        let flushed = report.finish();
        outcome.with_context(|| {
            format!("Scan stopped; partial report in '{}'", opts.report_path.display())
        })?;
        flushed?;
        tracing::info!(
            "Scan complete: {} bags ({} failed), {} batches ({} failed). Report: '{}'",
            summary.bags,
            summary.failed_bags,
            summary.batches,
            summary.failed_batches,
            summary.report_path.display()
        );
        Ok(summary)
    }
}

/// Logs every batch the loader yields. Returns at the first defect
/// unless `keep_going` is set; the caller owns the report and
/// finishes it either way.
fn drain(
    loader:     &dyn DataLoader<ScanBatch<ScanBackend>>,
    keep_going: bool,
    report:     &mut ScanReport,
    summary:    &mut ScanSummary,
) -> Result<()> {
    for scan in loader.iter() {
        let mut fatal: Option<(String, BagError)> = None;

        for row in &scan.rows {
            report.log(row)?;
        }
        summary.bags        += scan.rows.len();
        summary.failed_bags += scan.failures.len();

        for (patient_id, err) in scan.failures {
            tracing::warn!("Bag '{}' failed ({}): {}", patient_id, err.kind(), err);
            if !keep_going && fatal.is_none() {
                fatal = Some((format!("Bag '{patient_id}' could not be loaded"), err));
            }
        }

        match scan.batch {
            Some(Ok(batch)) => {
                summary.batches += 1;
                log_batch(summary.batches, &batch);
            }
            Some(Err(err)) => {
                summary.failed_batches += 1;
                let ids: Vec<&str> = scan
                    .rows
                    .iter()
                    .filter(|r| r.is_ok())
                    .map(|r| r.patient_id.as_str())
                    .collect();
                tracing::warn!("Batch of {:?} could not be collated: {}", ids, err);
                if !keep_going && fatal.is_none() {
                    fatal = Some((format!("Batch of {ids:?} could not be collated"), err));
                }
            }
            None => {}
        }

        if let Some((context, err)) = fatal {
            return Err(anyhow::Error::new(err).context(context));
        }
    }
    Ok(())
}

fn log_batch<B: Backend>(n: usize, batch: &MilBatch<B>) {
    let shapes: Vec<[usize; 3]> = batch.features.tensors().iter().map(|t| t.dims()).collect();
    tracing::info!(
        "Batch {}: {} bags, features {:?}, mask {:?}",
        n,
        batch.patient_ids.len(),
        shapes,
        batch.mask.dims()
    );
}
