// ============================================================
// Layer 4 — Label Table and Bag Index
// ============================================================
// Turns the label CSV into the ordered list of bags a dataset
// iterates over.
//
//   picai_labels.csv
//     patient_id,image_id,cs_pca,fold
//     10000,10000_1000000,1,0
//     10001,10001_1000001,0,1
//       │
//       ▼
//   LabelTable   → headers + raw string cells (csv crate)
//       │
//       ▼
//   BagIndex     → [(patient_id, label, fold)], row order kept,
//                  optionally restricted to one fold
//
// Reading the file and building the index are separate steps:
// BagIndex::build never touches the filesystem, so it can be
// tested with tables written inline.
//
// Reference: csv crate documentation
//            Rust Book §8 (Collections)

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io::Read,
    path::Path,
};

use crate::domain::{
    bag::Label,
    error::{BagError, Result},
};

/// Column holding the bag identifier.
pub const PATIENT_ID_COL: &str = "patient_id";

/// Column holding the cross-validation fold.
pub const FOLD_COL: &str = "fold";

// ─── LabelTable ───────────────────────────────────────────────────────────────
/// A label table as read from disk: column names plus string cells.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    headers: Vec<String>,
    rows:    Vec<Vec<String>>,
}

impl LabelTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Read a CSV label table from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(BagError::not_found("label table", path));
        }
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)
            .map_err(|e| BagError::decode(path, e))?;
        Self::from_csv(reader).map_err(|e| match e {
            BagError::Decode { reason, .. } => BagError::decode(path, reason),
            other => other,
        })
    }

    /// Read a CSV label table from any reader (first line is the header).
    pub fn from_reader<R: Read>(rdr: R) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(rdr);
        Self::from_csv(reader)
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| BagError::decode("<label table>", e))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| BagError::decode("<label table>", e))?;
            rows.push(record.iter().map(|c| c.to_string()).collect());
        }

        tracing::debug!("Label table: {} columns, {} rows", headers.len(), rows.len());
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Position of a column, if present.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn require_column(&self, name: &str) -> Result<usize> {
        self.column(name).ok_or_else(|| {
            BagError::configuration(format!(
                "label table has no '{name}' column (columns: {:?})",
                self.headers
            ))
        })
    }

    /// Cell at (row, column); short rows read as empty.
    fn cell(&self, row: usize, col: usize) -> &str {
        self.rows[row].get(col).map(|s| s.as_str()).unwrap_or("")
    }
}

// ─── BagEntry ─────────────────────────────────────────────────────────────────
/// One bag of the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BagEntry {
    pub patient_id: String,
    pub label:      Label,
    pub fold:       Option<u32>,
}

/// Parse a fold cell. Empty means "no fold"; `"1.0"` is accepted
/// because spreadsheet exports like to write integers as floats.
fn parse_fold(cell: &str) -> Result<Option<u32>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    if let Ok(v) = cell.parse::<u32>() {
        return Ok(Some(v));
    }
    match cell.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 => Ok(Some(v as u32)),
        _ => Err(BagError::invalid_value(format!(
            "fold must be a non-negative integer, got '{cell}'"
        ))),
    }
}

// ─── BagIndex ─────────────────────────────────────────────────────────────────
/// Ordered, deduplicated list of bags. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct BagIndex {
    entries: Vec<BagEntry>,
}

impl BagIndex {
    /// Build the index from an in-memory label table.
    ///
    /// # Arguments
    /// * `table`     - The parsed label table
    /// * `label_col` - Column holding the binary bag label (e.g. "cs_pca")
    /// * `fold`      - Keep only rows of this fold, if given
    ///
    /// # Errors
    /// * Configuration: missing `patient_id` / label / fold column,
    ///   or an empty result
    /// * InvalidValue: a label or fold cell that cannot be parsed
    pub fn build(table: &LabelTable, label_col: &str, fold: Option<u32>) -> Result<Self> {
        let pid_col   = table.require_column(PATIENT_ID_COL)?;
        let label_idx = table.require_column(label_col)?;
        let fold_idx  = match fold {
            Some(_) => Some(table.require_column(FOLD_COL)?),
            None    => table.column(FOLD_COL),
        };

        let mut seen: HashMap<String, Label> = HashMap::new();
        let mut entries = Vec::new();

        for row in 0..table.row_count() {
            let line = row + 2; // 1-based, after the header line
            let patient_id = table.cell(row, pid_col).trim().to_string();
            if patient_id.is_empty() {
                return Err(BagError::invalid_value(format!(
                    "empty {PATIENT_ID_COL} on line {line}"
                )));
            }

            let row_fold = match fold_idx {
                Some(c) => parse_fold(table.cell(row, c)).map_err(|e| {
                    BagError::invalid_value(format!("line {line} ({patient_id}): {e}"))
                })?,
                None => None,
            };
            if fold.is_some() && row_fold != fold {
                continue;
            }

            let label = Label::parse(table.cell(row, label_idx)).map_err(|e| {
                BagError::invalid_value(format!("line {line} ({patient_id}): {e}"))
            })?;

            if let Some(first) = seen.get(&patient_id) {
                if *first != label {
                    tracing::warn!(
                        "Duplicate patient '{}' on line {} with conflicting label {} (kept {})",
                        patient_id, line, label, first
                    );
                } else {
                    tracing::warn!("Duplicate patient '{}' on line {} ignored", patient_id, line);
                }
                continue;
            }
            seen.insert(patient_id.clone(), label);
            entries.push(BagEntry { patient_id, label, fold: row_fold });
        }

        if entries.is_empty() {
            return Err(BagError::configuration(match fold {
                Some(f) => format!("fold {f} selects no rows of the label table"),
                None    => "label table has no rows".to_string(),
            }));
        }

        tracing::debug!("Bag index: {} bags (fold filter: {:?})", entries.len(), fold);
        Ok(Self { entries })
    }

    /// Wrap an already-built list of entries.
    pub fn from_entries(entries: Vec<BagEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BagEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[BagEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &BagEntry> {
        self.entries.iter()
    }

    pub fn patient_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.patient_id.as_str()).collect()
    }

    pub fn position(&self, patient_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.patient_id == patient_id)
    }

    pub fn find(&self, patient_id: &str) -> Option<&BagEntry> {
        self.entries.iter().find(|e| e.patient_id == patient_id)
    }

    pub fn label_of(&self, patient_id: &str) -> Option<Label> {
        self.find(patient_id).map(|e| e.label)
    }

    /// Distinct folds present in the index, ascending.
    pub fn folds(&self) -> BTreeSet<u32> {
        self.entries.iter().filter_map(|e| e.fold).collect()
    }

    /// Number of bags per label value.
    pub fn label_counts(&self) -> BTreeMap<Label, usize> {
        let mut counts = BTreeMap::new();
        for e in &self.entries {
            *counts.entry(e.label).or_insert(0) += 1;
        }
        counts
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn table(csv: &str) -> LabelTable {
        LabelTable::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_fold_filter_keeps_row_order() {
        let t = table("patient_id,cs_pca,fold\np1,1,0\np2,0,1\np3,1,0\n");
        let index = BagIndex::build(&t, "cs_pca", Some(0)).unwrap();
        assert_eq!(index.patient_ids(), vec!["p1", "p3"]);
        assert_eq!(index.label_of("p3"), Some(Label::POSITIVE));
    }

    #[test]
    fn test_no_filter_keeps_everything() {
        let t = table("patient_id,cs_pca,fold\np1,1,0\np2,0,1\np3,1,0\n");
        let index = BagIndex::build(&t, "cs_pca", None).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.folds().into_iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(index.label_counts()[&Label::POSITIVE], 2);
    }

    #[test]
    fn test_missing_label_column_is_configuration_error() {
        let t = table("patient_id,isup,fold\np1,3,0\n");
        let err = BagIndex::build(&t, "cs_pca", None).unwrap_err();
        assert!(matches!(err, BagError::Configuration(_)));
    }

    #[test]
    fn test_custom_label_column() {
        let t = table("patient_id,isup_high,fold\np1,1,0\np2,0,0\n");
        let index = BagIndex::build(&t, "isup_high", None).unwrap();
        assert_eq!(index.label_of("p2"), Some(Label::NEGATIVE));
    }

    #[test]
    fn test_empty_fold_is_configuration_error() {
        let t = table("patient_id,cs_pca,fold\np1,1,0\np2,0,1\n");
        let err = BagIndex::build(&t, "cs_pca", Some(4)).unwrap_err();
        assert!(matches!(err, BagError::Configuration(_)));
    }

    #[test]
    fn test_fold_filter_without_fold_column() {
        let t = table("patient_id,cs_pca\np1,1\n");
        assert!(BagIndex::build(&t, "cs_pca", None).is_ok());
        let err = BagIndex::build(&t, "cs_pca", Some(0)).unwrap_err();
        assert!(matches!(err, BagError::Configuration(_)));
    }

    #[test]
    fn test_duplicates_keep_first_row() {
        let t = table("patient_id,cs_pca,fold\np1,1,0\np2,0,0\np1,0,0\n");
        let index = BagIndex::build(&t, "cs_pca", None).unwrap();
        assert_eq!(index.patient_ids(), vec!["p1", "p2"]);
        assert_eq!(index.label_of("p1"), Some(Label::POSITIVE));
    }

    #[test]
    fn test_float_spellings_and_extra_columns() {
        let t = table("patient_id,image_id,cs_pca,fold\n10000,10000_1,1.0,2.0\n");
        let index = BagIndex::build(&t, "cs_pca", Some(2)).unwrap();
        let e = index.get(0).unwrap();
        assert_eq!(e.patient_id, "10000");
        assert_eq!(e.fold, Some(2));
    }

    #[test]
    fn test_bad_label_names_the_line() {
        let t = table("patient_id,cs_pca\np1,1\np2,maybe\n");
        let err = BagIndex::build(&t, "cs_pca", None).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = LabelTable::from_path("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, BagError::NotFound { .. }));
    }
}
