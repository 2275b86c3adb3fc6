use serde::{Deserialize, Serialize};

use crate::constants::checkpoint::DEFAULT_MODE_TAG;
use crate::constants::features::{EPOCH_SECONDS, EXPECTED_SAMPLING_RATE_HZ};
use crate::constants::ingestion::{
    DEFAULT_BATCH_SIZE, DEFAULT_CHECKPOINT_EVERY_BATCHES, DEFAULT_HELD_OUT_PROBABILITY,
    DEFAULT_SEED, DEFAULT_TRAIN_BATCH_SIZE, DEFAULT_TRAIN_EPOCHS, DEFAULT_TRAIN_EVERY_INSERTED,
};
use crate::data::RecordingKey;
use crate::errors::IngestError;
use crate::types::ModeTag;

/// What to do when a recording's sampling rate differs from the expected rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingRatePolicy {
    /// Log a warning and keep extracting.
    #[default]
    Lenient,
    /// Reject the record with a signal-quality error.
    Strict,
}

/// Which channel table a run selects against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RulesetKind {
    /// Broad multi-signal montage (EEG, EOG, EMG, respiration, oximetry).
    FullMontage,
    /// EEG/EOG subset used for band-power features.
    #[default]
    EegOnly,
}

/// Controls epoch slicing and spectral feature extraction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Epoch length in seconds.
    pub epoch_seconds: f64,
    /// Sampling rate every selected channel should report.
    pub expected_sampling_rate: f64,
    /// Reaction to a sampling-rate mismatch.
    pub sampling_rate_policy: SamplingRatePolicy,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            epoch_seconds: EPOCH_SECONDS,
            expected_sampling_rate: EXPECTED_SAMPLING_RATE_HZ,
            sampling_rate_policy: SamplingRatePolicy::default(),
        }
    }
}

/// Top-level ingestion run configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Seed for held-out reservation and training shuffles.
    pub seed: u64,
    /// Catalog records dispatched concurrently per batch.
    pub batch_size: usize,
    /// Write a checkpoint every this many batches.
    pub checkpoint_every_batches: u64,
    /// Train and flush once this many rows were inserted since the last flush.
    pub train_every_inserted: u64,
    /// Tag written at the start of the checkpoint file.
    pub mode_tag: ModeTag,
    /// Probability that an annotated record is reserved for evaluation.
    ///
    /// `0.0` disables reservation entirely.
    pub held_out_probability: f64,
    /// Records that are never used for training.
    pub validation_set: Vec<RecordingKey>,
    /// Channel table used for selection.
    pub ruleset: RulesetKind,
    /// Epoch/feature settings.
    pub extraction: ExtractionConfig,
    /// Batch size requested from the store when training.
    pub train_batch_size: usize,
    /// Passes over the stored pool per training call.
    pub train_epochs: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            batch_size: DEFAULT_BATCH_SIZE,
            checkpoint_every_batches: DEFAULT_CHECKPOINT_EVERY_BATCHES,
            train_every_inserted: DEFAULT_TRAIN_EVERY_INSERTED,
            mode_tag: DEFAULT_MODE_TAG.to_string(),
            held_out_probability: DEFAULT_HELD_OUT_PROBABILITY,
            validation_set: Vec::new(),
            ruleset: RulesetKind::default(),
            extraction: ExtractionConfig::default(),
            train_batch_size: DEFAULT_TRAIN_BATCH_SIZE,
            train_epochs: DEFAULT_TRAIN_EPOCHS,
        }
    }
}

impl IngestConfig {
    /// Check ranges; returns the config unchanged when valid.
    pub fn validated(self) -> Result<Self, IngestError> {
        if self.batch_size == 0 {
            return Err(IngestError::Configuration(
                "batch_size must be positive".into(),
            ));
        }
        if self.checkpoint_every_batches == 0 {
            return Err(IngestError::Configuration(
                "checkpoint_every_batches must be positive".into(),
            ));
        }
        if self.train_batch_size == 0 {
            return Err(IngestError::Configuration(
                "train_batch_size must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.held_out_probability) {
            return Err(IngestError::Configuration(
                "held_out_probability must be within [0, 1]".into(),
            ));
        }
        if self.mode_tag.is_empty()
            || self
                .mode_tag
                .contains(|ch: char| ch == '=' || ch.is_whitespace())
        {
            return Err(IngestError::Configuration(format!(
                "invalid checkpoint mode tag '{}'",
                self.mode_tag
            )));
        }
        if self.extraction.epoch_seconds <= 0.0 || self.extraction.expected_sampling_rate <= 0.0 {
            return Err(IngestError::Configuration(
                "epoch length and sampling rate must be positive".into(),
            ));
        }
        Ok(self)
    }
}
