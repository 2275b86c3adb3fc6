//! Record catalog: the ordered list of recordings a run traverses.
//!
//! Loaded from a CSV with at least the columns `BidsFolder`, `SessionID`,
//! `SiteID` and `HasAnnotations`; `PreSleepQuestionnaire` is optional and any
//! other column is ignored.
//!
//! ```text
//! BidsFolder,SessionID,SiteID,HasAnnotations,PreSleepQuestionnaire
//! sub-S0001111192396,1,S0001,Y,N
//! ```

use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::data::RecordingKey;
use crate::errors::IngestError;

/// One catalog row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Recording this row points at.
    pub key: RecordingKey,
    /// Whether a scored annotation log exists for the recording.
    pub has_annotations: bool,
    /// Whether a pre-sleep questionnaire was collected.
    pub has_pre_sleep_questionnaire: bool,
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(rename = "BidsFolder")]
    folder: String,
    #[serde(rename = "SessionID")]
    session: String,
    #[serde(rename = "SiteID")]
    site: String,
    #[serde(rename = "HasAnnotations")]
    has_annotations: String,
    #[serde(rename = "PreSleepQuestionnaire", default)]
    pre_sleep_questionnaire: Option<String>,
}

/// A contiguous slice of the catalog, numbered from 1.
#[derive(Clone, Copy, Debug)]
pub struct CatalogBatch<'a> {
    /// 1-based batch number.
    pub index: u64,
    /// Entries of this batch in catalog order.
    pub entries: &'a [CatalogEntry],
}

/// Ordered, immutable catalog.
#[derive(Clone, Debug, Default)]
pub struct RecordCatalog {
    entries: Vec<CatalogEntry>,
}

impl RecordCatalog {
    /// Catalog over already-parsed entries, kept in the given order.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Load a CSV catalog from disk.
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let file = File::open(path)
            .map_err(|err| IngestError::Catalog(format!("{}: {err}", path.display())))?;
        Self::from_reader(file)
    }

    /// Parse CSV catalog rows from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, IngestError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut entries = Vec::new();
        for (row_idx, result) in csv_reader.deserialize::<CatalogRow>().enumerate() {
            let row = result.map_err(|e| IngestError::Catalog(format!("row {}: {e}", row_idx + 1)))?;
            entries.push(CatalogEntry {
                key: RecordingKey::new(row.folder, row.session, row.site),
                has_annotations: yes_no(&row.has_annotations, row_idx)?,
                has_pre_sleep_questionnaire: match row.pre_sleep_questionnaire.as_deref() {
                    Some(flag) => yes_no(flag, row_idx)?,
                    None => false,
                },
            });
        }
        Ok(Self { entries })
    }

    /// All entries in catalog order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of batches of width `batch_size`.
    pub fn batch_count(&self, batch_size: usize) -> u64 {
        self.entries.len().div_ceil(batch_size.max(1)) as u64
    }

    /// Contiguous batches of at most `batch_size` entries; the last may be short.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = CatalogBatch<'_>> {
        self.entries
            .chunks(batch_size.max(1))
            .zip(1u64..)
            .map(|(entries, index)| CatalogBatch { index, entries })
    }
}

fn yes_no(raw: &str, row_idx: usize) -> Result<bool, IngestError> {
    match raw.trim() {
        flag if flag.eq_ignore_ascii_case("y") => Ok(true),
        flag if flag.eq_ignore_ascii_case("n") || flag.is_empty() => Ok(false),
        other => Err(IngestError::Catalog(format!(
            "row {}: expected Y or N, found '{other}'",
            row_idx + 1
        ))),
    }
}
