//! Feature-row persistence collaborator and its in-process reference store.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::data::{FeatureRow, RecordingKey, TrainingBatch};
use crate::errors::IngestError;
use crate::metrics::{class_weights, min_max_scale};
use crate::utils::write_atomic;

/// Stream of training batches handed to a model trainer.
pub type TrainingStream = Box<dyn Iterator<Item = TrainingBatch> + Send>;

/// Independently counted and flushed pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureTable {
    /// Training pool, flushed after every training round.
    Samples,
    /// Held-out evaluation pool.
    Evaluation,
}

/// Relational-store collaborator receiving feature rows.
pub trait FeatureStore: Send + Sync {
    /// Insert `rows` into `table` and return how many were new.
    ///
    /// Inserts are idempotent on `(RecordingKey, epoch_index)`: a row whose
    /// natural key was ever inserted into `table` is ignored, even after a
    /// flush. Reprocessing a batch after a crash therefore never duplicates
    /// rows.
    fn insert_batch(&self, table: FeatureTable, rows: Vec<FeatureRow>) -> Result<usize, IngestError>;
    /// Drop every stored row of `table`.
    fn flush(&self, table: FeatureTable) -> Result<(), IngestError>;
    /// Number of rows currently stored in `table`.
    fn sample_count(&self, table: FeatureTable) -> Result<usize, IngestError>;
    /// Shuffled passes over `table` in batches of `batch_size`, `epochs` times.
    ///
    /// Features are min-max scaled per sample and every batch carries the
    /// per-sample class weight derived from the label frequency in `table`.
    fn read_shuffled_batches(
        &self,
        table: FeatureTable,
        batch_size: usize,
        epochs: usize,
    ) -> Result<TrainingStream, IngestError>;
    /// Record `key` on the reservation list attached to `table`.
    fn reserve_held_out(&self, key: &RecordingKey, table: FeatureTable) -> Result<(), IngestError>;
    /// Keys reserved for `table`, in reservation order.
    fn held_out_keys(&self, table: FeatureTable) -> Result<Vec<RecordingKey>, IngestError>;
}

/// Ordered, de-duplicated list of reserved recordings persisted as a JSON array.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeldOutList {
    keys: Vec<RecordingKey>,
}

impl HeldOutList {
    /// Load the list at `path`; an absent file is an empty list.
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        match fs::read(path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|err| IngestError::Decode {
                what: format!("held-out list {}", path.display()),
                reason: err.to_string(),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Write the list as pretty JSON, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<(), IngestError> {
        let raw = serde_json::to_vec_pretty(self)
            .map_err(|err| IngestError::Store(format!("failed encoding held-out list: {err}")))?;
        write_atomic(path, &raw)?;
        Ok(())
    }

    /// Append `key` unless present; returns whether it was added.
    pub fn insert(&mut self, key: RecordingKey) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.keys.push(key);
        true
    }

    /// Whether `key` is reserved.
    pub fn contains(&self, key: &RecordingKey) -> bool {
        self.keys.contains(key)
    }

    /// Reserved keys in reservation order.
    pub fn keys(&self) -> &[RecordingKey] {
        &self.keys
    }

    /// Number of reserved keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether nothing is reserved.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Default)]
struct TableState {
    rows: Vec<FeatureRow>,
    ledger: HashSet<(RecordingKey, usize)>,
    held_out: HeldOutList,
    flushes: usize,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<FeatureTable, TableState>,
}

/// In-memory [`FeatureStore`] with seeded shuffles.
///
/// Clones share the same tables, so a test can keep a handle while the
/// orchestrator owns another. When a held-out path is configured the
/// evaluation reservation list is mirrored to that JSON file on every change.
#[derive(Clone, Debug)]
pub struct MemoryFeatureStore {
    inner: Arc<RwLock<StoreState>>,
    seed: u64,
    held_out_path: Option<PathBuf>,
}

impl MemoryFeatureStore {
    /// Empty store whose shuffles derive from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreState::default())),
            seed,
            held_out_path: None,
        }
    }

    /// Store whose evaluation reservations persist at `path`, loading any existing list.
    pub fn with_held_out_path<P: Into<PathBuf>>(seed: u64, path: P) -> Result<Self, IngestError> {
        let path = path.into();
        let existing = HeldOutList::load(&path)?;
        let store = Self {
            held_out_path: Some(path),
            ..Self::new(seed)
        };
        store
            .write()?
            .tables
            .entry(FeatureTable::Evaluation)
            .or_default()
            .held_out = existing;
        Ok(store)
    }

    /// Snapshot of the rows currently held by `table`.
    pub fn rows(&self, table: FeatureTable) -> Result<Vec<FeatureRow>, IngestError> {
        Ok(self
            .read()?
            .tables
            .get(&table)
            .map(|state| state.rows.clone())
            .unwrap_or_default())
    }

    /// Number of flushes applied to `table`.
    pub fn flush_count(&self, table: FeatureTable) -> Result<usize, IngestError> {
        Ok(self
            .read()?
            .tables
            .get(&table)
            .map_or(0, |state| state.flushes))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, IngestError> {
        self.inner
            .read()
            .map_err(|_| IngestError::Store("feature store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, IngestError> {
        self.inner
            .write()
            .map_err(|_| IngestError::Store("feature store lock poisoned".into()))
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn insert_batch(&self, table: FeatureTable, rows: Vec<FeatureRow>) -> Result<usize, IngestError> {
        let mut state = self.write()?;
        let table_state = state.tables.entry(table).or_default();
        let offered = rows.len();
        let mut inserted = 0;
        for row in rows {
            if table_state.ledger.insert(row.natural_key()) {
                table_state.rows.push(row);
                inserted += 1;
            }
        }
        if inserted < offered {
            debug!(
                ?table,
                offered,
                inserted,
                "[sleepfeed:store] ignored previously inserted rows"
            );
        }
        Ok(inserted)
    }

    fn flush(&self, table: FeatureTable) -> Result<(), IngestError> {
        let mut state = self.write()?;
        let table_state = state.tables.entry(table).or_default();
        table_state.rows.clear();
        table_state.flushes += 1;
        Ok(())
    }

    fn sample_count(&self, table: FeatureTable) -> Result<usize, IngestError> {
        Ok(self
            .read()?
            .tables
            .get(&table)
            .map_or(0, |state| state.rows.len()))
    }

    fn read_shuffled_batches(
        &self,
        table: FeatureTable,
        batch_size: usize,
        epochs: usize,
    ) -> Result<TrainingStream, IngestError> {
        if batch_size == 0 {
            return Err(IngestError::Store("batch size must be positive".into()));
        }
        let rows = self.rows(table)?;
        let labels: Vec<_> = rows.iter().map(|row| row.features.label).collect();
        let weights = class_weights(&labels);

        let mut batches = Vec::new();
        for epoch in 0..epochs {
            let mut order: Vec<usize> = (0..rows.len()).collect();
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
            for chunk in order.chunks(batch_size) {
                let mut batch = TrainingBatch {
                    features: Vec::with_capacity(chunk.len()),
                    labels: Vec::with_capacity(chunk.len()),
                    class_weights: Vec::with_capacity(chunk.len()),
                };
                for idx in chunk {
                    let features = &rows[*idx].features;
                    batch.features.push(min_max_scale(&features.values));
                    batch.labels.push(features.label);
                    batch
                        .class_weights
                        .push(weights.get(usize::from(features.label)).copied().unwrap_or(1.0));
                }
                batches.push(batch);
            }
        }
        Ok(Box::new(batches.into_iter()))
    }

    fn reserve_held_out(&self, key: &RecordingKey, table: FeatureTable) -> Result<(), IngestError> {
        let mut state = self.write()?;
        let table_state = state.tables.entry(table).or_default();
        if !table_state.held_out.insert(key.clone()) {
            return Ok(());
        }
        if table == FeatureTable::Evaluation
            && let Some(path) = &self.held_out_path
        {
            table_state.held_out.save(path)?;
        }
        Ok(())
    }

    fn held_out_keys(&self, table: FeatureTable) -> Result<Vec<RecordingKey>, IngestError> {
        Ok(self
            .read()?
            .tables
            .get(&table)
            .map(|state| state.held_out.keys().to_vec())
            .unwrap_or_default())
    }
}
