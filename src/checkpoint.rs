//! Durable progress marker for resumable ingestion runs.
//!
//! The on-disk form is plain text with one `KEY=VALUE` pair per line:
//!
//! ```text
//! CHUNKS=12
//! INSERTED=640
//! DONE
//! ```
//!
//! The first line's key is the mode tag and must match what the caller
//! expects. `INSERTED` is optional and `DONE` appears only after the catalog
//! was exhausted.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::constants::checkpoint::{
    DEFAULT_CHECKPOINT_FILENAME, DONE_MARKER, INSERTED_KEY, KEY_VALUE_DELIMITER,
};
use crate::errors::IngestError;
use crate::types::ModeTag;
use crate::utils::write_atomic;

/// Progress persisted between runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Leading token naming what the counter tracks.
    pub mode: ModeTag,
    /// Batches fully handled; batches with index `<=` this are skipped on resume.
    pub batches_processed: u64,
    /// Rows inserted since the last train-and-flush.
    pub inserted_since_flush: u64,
    /// Set once the whole catalog has been processed.
    pub done: bool,
}

impl CheckpointRecord {
    /// Zero state used when no checkpoint exists.
    pub fn fresh(mode: impl Into<ModeTag>) -> Self {
        Self {
            mode: mode.into(),
            batches_processed: 0,
            inserted_since_flush: 0,
            done: false,
        }
    }

    /// Parse checkpoint text, requiring the first line to carry `expected_mode`.
    ///
    /// Empty text is the zero state.
    pub fn parse(raw: &str, expected_mode: &str) -> Result<Self, IngestError> {
        let mut lines = raw.lines().map(str::trim).filter(|line| !line.is_empty());
        let Some(first) = lines.next() else {
            return Ok(Self::fresh(expected_mode));
        };

        let (mode, value) = match first.split_once(KEY_VALUE_DELIMITER) {
            Some((mode, value)) => (mode, Some(value)),
            None => (first, None),
        };
        if mode != expected_mode {
            return Err(IngestError::IncompatibleCheckpoint {
                expected: expected_mode.to_string(),
                found: mode.to_string(),
            });
        }
        let value = value.ok_or_else(|| {
            IngestError::CorruptCheckpoint(format!("mode line '{first}' carries no batch count"))
        })?;

        let mut record = Self::fresh(expected_mode);
        record.batches_processed = parse_count(mode, value)?;
        for line in lines {
            if line == DONE_MARKER {
                record.done = true;
                continue;
            }
            match line.split_once(KEY_VALUE_DELIMITER) {
                Some((INSERTED_KEY, value)) => {
                    record.inserted_since_flush = parse_count(INSERTED_KEY, value)?;
                }
                _ => {
                    return Err(IngestError::CorruptCheckpoint(format!(
                        "unexpected line '{line}'"
                    )));
                }
            }
        }
        Ok(record)
    }
}

impl fmt::Display for CheckpointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}{KEY_VALUE_DELIMITER}{}", self.mode, self.batches_processed)?;
        writeln!(f, "{INSERTED_KEY}{KEY_VALUE_DELIMITER}{}", self.inserted_since_flush)?;
        if self.done {
            writeln!(f, "{DONE_MARKER}")?;
        }
        Ok(())
    }
}

fn parse_count(key: &str, value: &str) -> Result<u64, IngestError> {
    value
        .trim()
        .parse()
        .map_err(|_| {
            IngestError::CorruptCheckpoint(format!("{key} has non-numeric value '{value}'"))
        })
}

/// Persistence backend for [`CheckpointRecord`]s.
pub trait CheckpointStore: Send + Sync {
    /// Load the stored record, or the zero state when none exists.
    fn load(&self, expected_mode: &str) -> Result<CheckpointRecord, IngestError>;
    /// Replace the stored record.
    fn save(&self, record: &CheckpointRecord) -> Result<(), IngestError>;
}

/// File-backed checkpoint store with atomic replace-on-save.
#[derive(Clone, Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Store backed by the file at `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default filename inside `dir`.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::new(dir.as_ref().join(DEFAULT_CHECKPOINT_FILENAME))
    }

    /// Location of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, expected_mode: &str) -> Result<CheckpointRecord, IngestError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => CheckpointRecord::parse(&raw, expected_mode),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Ok(CheckpointRecord::fresh(expected_mode))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, record: &CheckpointRecord) -> Result<(), IngestError> {
        write_atomic(&self.path, record.to_string().as_bytes())?;
        Ok(())
    }
}

/// In-memory checkpoint store holding the rendered text, for tests and dry runs.
///
/// Clones share state.
#[derive(Clone, Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<MemoryCheckpointState>>,
}

#[derive(Debug, Default)]
struct MemoryCheckpointState {
    text: Option<String>,
    saves: usize,
}

impl MemoryCheckpointStore {
    /// Store with no checkpoint recorded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with raw checkpoint text.
    pub fn with_text(text: impl Into<String>) -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.inner.lock() {
            state.text = Some(text.into());
        }
        store
    }

    /// Current raw text, if anything was saved.
    pub fn text(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|state| state.text.clone())
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.inner.lock().map(|state| state.saves).unwrap_or(0)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, expected_mode: &str) -> Result<CheckpointRecord, IngestError> {
        match self.text() {
            Some(raw) => CheckpointRecord::parse(&raw, expected_mode),
            None => Ok(CheckpointRecord::fresh(expected_mode)),
        }
    }

    fn save(&self, record: &CheckpointRecord) -> Result<(), IngestError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| IngestError::Store("checkpoint state lock poisoned".into()))?;
        state.text = Some(record.to_string());
        state.saves += 1;
        Ok(())
    }
}
