//! Batch orchestration: catalog traversal, concurrent record tasks, training
//! and checkpointing.
//!
//! A run walks the catalog in contiguous batches. Every record of a batch is
//! processed on its own scoped thread; the orchestrator waits for the whole
//! batch, then classifies each outcome, appends successes to the feature
//! store, trains and flushes when enough rows accumulated, and writes a
//! checkpoint every `checkpoint_every_batches` batches. Batches already
//! covered by a checkpoint are skipped on restart.

use std::collections::{HashMap, HashSet};
use std::thread;
use tracing::{debug, info, warn};

use crate::annotations::AnnotationAligner;
use crate::catalog::{CatalogEntry, RecordCatalog};
use crate::channels::{ChannelRuleset, ChannelSelection};
use crate::checkpoint::CheckpointStore;
use crate::config::IngestConfig;
use crate::constants::ingestion::TASK_PANICKED_REASON;
use crate::data::{RecordFeatures, RecordingKey};
use crate::errors::{FailureKind, IngestError};
use crate::features::EpochFeatureExtractor;
use crate::hash::unit_interval;
use crate::metrics::representation_ratio;
use crate::store::{FeatureStore, FeatureTable};
use crate::trainer::ModelTrainer;
use crate::transport::RecordingFetcher;

/// Outcome of one record task.
#[derive(Debug)]
pub enum TaskResult {
    /// Feature vectors extracted from the record; empty for unannotated records.
    Success(RecordFeatures),
    /// Failure, classified through [`IngestError::kind`].
    Failed(IngestError),
}

impl From<Result<RecordFeatures, IngestError>> for TaskResult {
    fn from(result: Result<RecordFeatures, IngestError>) -> Self {
        match result {
            Ok(features) => TaskResult::Success(features),
            Err(err) => TaskResult::Failed(err),
        }
    }
}

/// Where the orchestrator is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No checkpoint found; nothing processed yet.
    Fresh,
    /// Checkpoint loaded; batches up to `batches_processed` will be skipped.
    Resuming {
        /// Highest batch index covered by the checkpoint.
        batches_processed: u64,
    },
    /// Batch `index` is dispatched or being merged.
    ActiveBatch {
        /// 1-based batch number.
        index: u64,
    },
    /// The training pool was just handed to the trainer and flushed after batch `index`.
    Flushed {
        /// Batch after which the flush happened.
        index: u64,
    },
    /// Catalog exhausted and the terminal checkpoint written.
    Done,
}

/// Counters for one [`IngestionOrchestrator::run`] call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// Batch indices dispatched in this run, in order.
    pub dispatched_batches: Vec<u64>,
    /// Batches skipped because a checkpoint already covered them.
    pub skipped_batches: u64,
    /// Records handed to tasks in this run.
    pub records_dispatched: usize,
    /// Records whose task produced features, possibly none.
    pub succeeded: usize,
    /// Failed records by failure class.
    pub failures: HashMap<FailureKind, usize>,
    /// Rows newly inserted into the training pool.
    pub rows_inserted: u64,
    /// Train-and-flush rounds run.
    pub training_rounds: usize,
    /// Checkpoints saved, including the terminal one.
    pub checkpoints_written: usize,
    /// The loaded checkpoint was already complete, so nothing ran.
    pub already_done: bool,
}

impl RunSummary {
    /// Failures recorded for `kind`.
    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.failures.get(&kind).copied().unwrap_or(0)
    }

    /// Share of dispatched records that produced features.
    pub fn representation_ratio(&self) -> f64 {
        representation_ratio(self.succeeded, self.records_dispatched)
    }
}

/// Per-record pipeline shared read-only by every task of a batch.
///
/// Runs channel selection, annotation alignment and epoch feature extraction
/// for one recording.
pub struct RecordPipeline<'a> {
    /// Source of raw recording artifacts.
    pub fetcher: &'a dyn RecordingFetcher,
    /// Channel selection rules.
    pub ruleset: &'a ChannelRuleset,
    /// Event log aligner.
    pub aligner: &'a AnnotationAligner,
    /// Epoch feature extractor.
    pub extractor: &'a EpochFeatureExtractor,
}

impl RecordPipeline<'_> {
    /// Fetch channels and pick the canonical selection.
    pub fn select_channels(&self, key: &RecordingKey) -> Result<ChannelSelection, IngestError> {
        let channels = self.fetcher.channels(key)?;
        self.ruleset.select(&channels)
    }

    /// Fetch signal and log, align, and extract features for `selection`.
    pub fn extract(
        &self,
        key: &RecordingKey,
        selection: &ChannelSelection,
    ) -> Result<RecordFeatures, IngestError> {
        let signal = self.fetcher.signal(key)?;
        let raw_events = self.fetcher.annotations(key)?;
        let aligned = self
            .aligner
            .align(&raw_events, signal.start, signal.duration_seconds);
        let (vectors, _labels) = self.extractor.extract(&signal, selection, aligned)?;
        Ok(RecordFeatures { vectors })
    }
}

/// Inputs to the held-out and validation checks of a training task.
struct Admission<'a> {
    validation: &'a HashSet<RecordingKey>,
    held_out: &'a HashSet<RecordingKey>,
    seed: u64,
    held_out_probability: f64,
}

impl Admission<'_> {
    /// Seeded draw; the same key always gets the same answer for one seed.
    fn draws_held_out(&self, key: &RecordingKey) -> bool {
        self.held_out_probability > 0.0 && unit_interval(self.seed, key) < self.held_out_probability
    }
}

/// Drives a resumable ingestion run over a record catalog.
pub struct IngestionOrchestrator {
    config: IngestConfig,
    ruleset: ChannelRuleset,
    aligner: AnnotationAligner,
    extractor: EpochFeatureExtractor,
    fetcher: Box<dyn RecordingFetcher>,
    store: Box<dyn FeatureStore>,
    trainer: Box<dyn ModelTrainer>,
    checkpoints: Box<dyn CheckpointStore>,
    state: OrchestratorState,
}

impl IngestionOrchestrator {
    /// Validate `config` and wire the collaborators.
    pub fn new(
        config: IngestConfig,
        fetcher: Box<dyn RecordingFetcher>,
        store: Box<dyn FeatureStore>,
        trainer: Box<dyn ModelTrainer>,
        checkpoints: Box<dyn CheckpointStore>,
    ) -> Result<Self, IngestError> {
        let config = config.validated()?;
        Ok(Self {
            ruleset: ChannelRuleset::for_kind(config.ruleset),
            aligner: AnnotationAligner::default(),
            extractor: EpochFeatureExtractor::new(config.extraction.clone()),
            config,
            fetcher,
            store,
            trainer,
            checkpoints,
            state: OrchestratorState::Fresh,
        })
    }

    /// Replace the ruleset derived from the config.
    pub fn with_ruleset(mut self, ruleset: ChannelRuleset) -> Self {
        self.ruleset = ruleset;
        self
    }

    /// Replace the default annotation aligner.
    pub fn with_aligner(mut self, aligner: AnnotationAligner) -> Self {
        self.aligner = aligner;
        self
    }

    /// Replace the extractor derived from the config.
    pub fn with_extractor(mut self, extractor: EpochFeatureExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Validated run configuration.
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Process `catalog` from the last checkpoint to the end.
    ///
    /// Per-record failures are logged and skipped. Checkpoint, catalog and
    /// collaborator (store, trainer, checkpoint I/O) failures abort the run.
    pub fn run(&mut self, catalog: &RecordCatalog) -> Result<RunSummary, IngestError> {
        let mode = self.config.mode_tag.clone();
        let checkpoint = self.checkpoints.load(&mode)?;
        let mut summary = RunSummary::default();

        if checkpoint.done {
            info!(
                batches = checkpoint.batches_processed,
                "[sleepfeed:ingest] checkpoint already complete; nothing to do"
            );
            self.state = OrchestratorState::Done;
            summary.already_done = true;
            return Ok(summary);
        }

        self.state = if checkpoint.batches_processed == 0 && checkpoint.inserted_since_flush == 0 {
            OrchestratorState::Fresh
        } else {
            OrchestratorState::Resuming {
                batches_processed: checkpoint.batches_processed,
            }
        };
        info!(
            state = ?self.state,
            records = catalog.len(),
            batches = catalog.batch_count(self.config.batch_size),
            "[sleepfeed:ingest] starting run"
        );

        let validation: HashSet<RecordingKey> =
            self.config.validation_set.iter().cloned().collect();
        let mut held_out: HashSet<RecordingKey> = self
            .store
            .held_out_keys(FeatureTable::Evaluation)?
            .into_iter()
            .collect();
        let mut progress = checkpoint;

        for batch in catalog.batches(self.config.batch_size) {
            if batch.index <= progress.batches_processed {
                summary.skipped_batches += 1;
                continue;
            }
            self.state = OrchestratorState::ActiveBatch { index: batch.index };
            summary.dispatched_batches.push(batch.index);
            summary.records_dispatched += batch.entries.len();

            let admission = Admission {
                validation: &validation,
                held_out: &held_out,
                seed: self.config.seed,
                held_out_probability: self.config.held_out_probability,
            };
            let outcomes = self.dispatch(batch.entries, |pipeline, entry| {
                training_task(pipeline, &admission, entry)
            });

            for (key, outcome) in outcomes {
                match outcome {
                    TaskResult::Success(features) => {
                        let epochs = features.len();
                        let inserted = self
                            .store
                            .insert_batch(FeatureTable::Samples, features.into_rows(&key))?;
                        progress.inserted_since_flush += inserted as u64;
                        summary.rows_inserted += inserted as u64;
                        summary.succeeded += 1;
                        debug!(
                            subject = %key.subject,
                            session = %key.session,
                            site = %key.site,
                            epochs,
                            inserted,
                            "[sleepfeed:ingest] record ingested"
                        );
                    }
                    TaskResult::Failed(err) => {
                        if err.is_fatal() {
                            return Err(err);
                        }
                        let kind = err.kind();
                        *summary.failures.entry(kind).or_default() += 1;
                        if kind == FailureKind::HeldOutReserved {
                            self.store.reserve_held_out(&key, FeatureTable::Evaluation)?;
                            held_out.insert(key.clone());
                        }
                        log_failure(&key, kind, &err);
                    }
                }
            }

            if self.config.train_every_inserted > 0
                && progress.inserted_since_flush >= self.config.train_every_inserted
            {
                self.train_and_flush(batch.index)?;
                summary.training_rounds += 1;
                progress.inserted_since_flush = 0;
            }

            progress.batches_processed = batch.index;
            if batch.index % self.config.checkpoint_every_batches == 0 {
                self.checkpoints.save(&progress)?;
                summary.checkpoints_written += 1;
                debug!(
                    batch = batch.index,
                    inserted_since_flush = progress.inserted_since_flush,
                    "[sleepfeed:ingest] checkpoint written"
                );
            }
        }

        if progress.inserted_since_flush > 0 {
            self.train_and_flush(progress.batches_processed)?;
            summary.training_rounds += 1;
            progress.inserted_since_flush = 0;
        }
        progress.batches_processed = progress
            .batches_processed
            .max(catalog.batch_count(self.config.batch_size));
        progress.done = true;
        self.checkpoints.save(&progress)?;
        summary.checkpoints_written += 1;
        self.state = OrchestratorState::Done;

        info!(
            dispatched = summary.records_dispatched,
            succeeded = summary.succeeded,
            skipped_batches = summary.skipped_batches,
            rows = summary.rows_inserted,
            representation = summary.representation_ratio(),
            "[sleepfeed:ingest] run complete"
        );
        Ok(summary)
    }

    /// Extract features for `keys` into the evaluation table.
    ///
    /// Does nothing when the evaluation table already holds rows. Returns the
    /// number of rows inserted. Validation and reservation checks do not
    /// apply here.
    pub fn populate_evaluation_pool(
        &mut self,
        keys: &[RecordingKey],
    ) -> Result<usize, IngestError> {
        if self.store.sample_count(FeatureTable::Evaluation)? > 0 {
            info!("[sleepfeed:ingest] evaluation pool already populated; skipping");
            return Ok(0);
        }

        let entries: Vec<CatalogEntry> = keys
            .iter()
            .map(|key| CatalogEntry {
                key: key.clone(),
                has_annotations: true,
                has_pre_sleep_questionnaire: false,
            })
            .collect();

        let mut inserted_total = 0;
        for chunk in entries.chunks(self.config.batch_size) {
            let outcomes = self.dispatch(chunk, |pipeline, entry| {
                let selection = pipeline.select_channels(&entry.key)?;
                pipeline.extract(&entry.key, &selection)
            });
            for (key, outcome) in outcomes {
                match outcome {
                    TaskResult::Success(features) => {
                        inserted_total += self
                            .store
                            .insert_batch(FeatureTable::Evaluation, features.into_rows(&key))?;
                    }
                    TaskResult::Failed(err) => log_failure(&key, err.kind(), &err),
                }
            }
        }
        info!(
            records = keys.len(),
            rows = inserted_total,
            "[sleepfeed:ingest] evaluation pool populated"
        );
        Ok(inserted_total)
    }

    /// Run `task` for every entry on its own scoped thread and wait for all.
    ///
    /// A panicking task becomes a [`IngestError::Task`] failure for its key.
    fn dispatch<F>(&self, entries: &[CatalogEntry], task: F) -> Vec<(RecordingKey, TaskResult)>
    where
        F: Fn(&RecordPipeline<'_>, &CatalogEntry) -> Result<RecordFeatures, IngestError> + Sync,
    {
        let pipeline = RecordPipeline {
            fetcher: &*self.fetcher,
            ruleset: &self.ruleset,
            aligner: &self.aligner,
            extractor: &self.extractor,
        };
        let pipeline = &pipeline;
        let task = &task;

        thread::scope(|scope| {
            let handles: Vec<_> = entries
                .iter()
                .map(|entry| (entry, scope.spawn(move || task(pipeline, entry))))
                .collect();
            handles
                .into_iter()
                .map(|(entry, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(IngestError::Task {
                            key: entry.key.clone(),
                            reason: TASK_PANICKED_REASON.into(),
                        })
                    });
                    (entry.key.clone(), TaskResult::from(result))
                })
                .collect()
        })
    }

    fn train_and_flush(&mut self, batch_index: u64) -> Result<(), IngestError> {
        let pool = self.store.sample_count(FeatureTable::Samples)?;
        let train = self.store.read_shuffled_batches(
            FeatureTable::Samples,
            self.config.train_batch_size,
            self.config.train_epochs,
        )?;
        let validation = if self.store.sample_count(FeatureTable::Evaluation)? > 0 {
            Some(self.store.read_shuffled_batches(
                FeatureTable::Evaluation,
                self.config.train_batch_size,
                1,
            )?)
        } else {
            None
        };

        let metrics = self.trainer.fit(train, validation)?;
        self.trainer
            .save(&format!("{}={batch_index}", self.config.mode_tag))?;
        self.store.flush(FeatureTable::Samples)?;
        self.state = OrchestratorState::Flushed { index: batch_index };
        info!(
            batch = batch_index,
            pool,
            accuracy = metrics.accuracy,
            loss = metrics.loss,
            validation_accuracy = ?metrics.validation_accuracy,
            "[sleepfeed:ingest] trained and flushed"
        );
        Ok(())
    }
}

/// Admission checks followed by the record pipeline, for the training pool.
fn training_task(
    pipeline: &RecordPipeline<'_>,
    admission: &Admission<'_>,
    entry: &CatalogEntry,
) -> Result<RecordFeatures, IngestError> {
    let key = &entry.key;
    if admission.validation.contains(key) {
        return Err(IngestError::AlreadyValidationElement(key.clone()));
    }
    if admission.held_out.contains(key) {
        return Err(IngestError::HeldOutReserved(key.clone()));
    }

    let selection = pipeline.select_channels(key)?;
    if !entry.has_annotations {
        return Ok(RecordFeatures::default());
    }
    if admission.draws_held_out(key) {
        return Err(IngestError::HeldOutReserved(key.clone()));
    }
    pipeline.extract(key, &selection)
}

fn log_failure(key: &RecordingKey, kind: FailureKind, err: &IngestError) {
    match kind {
        FailureKind::AlreadyValidationElement => debug!(
            subject = %key.subject,
            session = %key.session,
            site = %key.site,
            "[sleepfeed:ingest] validation element skipped"
        ),
        FailureKind::HeldOutReserved => info!(
            subject = %key.subject,
            session = %key.session,
            site = %key.site,
            "[sleepfeed:ingest] reserved for held-out evaluation"
        ),
        _ => warn!(
            subject = %key.subject,
            session = %key.session,
            site = %key.site,
            kind = ?kind,
            error = %err,
            "[sleepfeed:ingest] record skipped"
        ),
    }
}
