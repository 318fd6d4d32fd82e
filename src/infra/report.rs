// ============================================================
// Layer 6 — Scan Report
// ============================================================
// Records one CSV row per bag visited by a scan.
//
// Why a report?
//   A scan over a few thousand patients is the quickest way to
//   find the bags that will break a training run: missing
//   coordinate files, scales with different instance counts,
//   feature files of the wrong width. The CSV can be filtered
//   and joined back onto the label table.
//
// Example CSV output:
//   patient_id,label,fold,status,instances,dims,error_kind,error
//   10000,1,0,ok,412,256;256,,
//   10001,0,0,error,,,not_found,coordinate file not found: '...'

use anyhow::{Context, Result};
use serde::Serialize;
use std::{fs, path::PathBuf};

use crate::data::label_table::BagEntry;
use crate::domain::{bag::BagSample, error::BagError};

/// One row of the scan report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BagReportRow {
    pub patient_id: String,
    pub label:      u8,
    pub fold:       Option<u32>,
    /// "ok" or "error"
    pub status:     &'static str,
    pub instances:  Option<usize>,
    /// Embedding dims per scale, ';'-separated
    pub dims:       Option<String>,
    pub error_kind: Option<&'static str>,
    pub error:      Option<String>,
}

impl BagReportRow {
    pub fn ok(entry: &BagEntry, sample: &BagSample) -> Self {
        let dims = sample
            .features
            .matrices()
            .iter()
            .map(|m| m.ncols().to_string())
            .collect::<Vec<_>>()
            .join(";");
        Self {
            patient_id: entry.patient_id.clone(),
            label:      entry.label.value(),
            fold:       entry.fold,
            status:     "ok",
            instances:  Some(sample.features.instance_count()),
            dims:       Some(dims),
            error_kind: None,
            error:      None,
        }
    }

    pub fn failed(entry: &BagEntry, err: &BagError) -> Self {
        Self {
            patient_id: entry.patient_id.clone(),
            label:      entry.label.value(),
            fold:       entry.fold,
            status:     "error",
            instances:  None,
            dims:       None,
            error_kind: Some(err.kind()),
            error:      Some(err.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Writes report rows to a CSV file.
pub struct ScanReport {
    writer:   csv::Writer<fs::File>,
    rows:     usize,
    failures: usize,
}

impl ScanReport {
    /// Create (or truncate) the report file.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let csv_path = path.into();
        if let Some(parent) = csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let writer = csv::Writer::from_path(&csv_path)
            .with_context(|| format!("Cannot create report '{}'", csv_path.display()))?;
        tracing::debug!("Created scan report: '{}'", csv_path.display());
        Ok(Self { writer, rows: 0, failures: 0 })
    }

    pub fn log(&mut self, row: &BagReportRow) -> Result<()> {
        self.writer.serialize(row)?;
        self.rows += 1;
        if !row.is_ok() {
            self.failures += 1;
        }
        Ok(())
    }

    /// Flush and return (rows written, failed rows).
    pub fn finish(mut self) -> Result<(usize, usize)> {
        self.writer.flush()?;
        Ok((self.rows, self.failures))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bag::{BagFeatures, FeatureMatrix, Label};

    fn entry() -> BagEntry {
        BagEntry { patient_id: "10000".into(), label: Label::POSITIVE, fold: Some(0) }
    }

    #[test]
    fn test_rows_are_written() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let mut report = ScanReport::create(&path).unwrap();

        let sample = BagSample {
            patient_id: "10000".into(),
            features:   BagFeatures::Multi(vec![FeatureMatrix::zeros((5, 8)), FeatureMatrix::zeros((5, 4))]),
            label:      Label::POSITIVE,
        };
        report.log(&BagReportRow::ok(&entry(), &sample)).unwrap();
        report
            .log(&BagReportRow::failed(&entry(), &BagError::not_found("coordinate file", "x.h5")))
            .unwrap();
        assert_eq!(report.finish().unwrap(), (2, 1));

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "patient_id,label,fold,status,instances,dims,error_kind,error");
        assert_eq!(lines[1], "10000,1,0,ok,5,8;4,,");
        assert!(lines[2].starts_with("10000,1,0,error,,,not_found,"));
    }
}
