#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Event-log alignment onto the recording timeline.
pub mod annotations;
/// Record catalog loading and batching.
pub mod catalog;
/// Deterministic channel selection rulesets.
pub mod channels;
/// Resumable progress markers.
pub mod checkpoint;
/// Run and extraction configuration types.
pub mod config;
/// Centralized constants used across selection, alignment, extraction and persistence.
pub mod constants;
/// Recording keys, sleep stages and feature rows.
pub mod data;
/// EDF signal codec.
pub mod edf;
/// Epoch slicing and band-power features.
pub mod features;
mod hash;
/// Batch orchestration over the catalog.
pub mod ingestion;
/// Class weights, scaling and sleep metrics.
pub mod metrics;
/// Typed pre-sleep questionnaire covariates.
pub mod questionnaire;
/// Power-spectrum estimation.
pub mod spectral;
/// Feature-store collaborator and reference store.
pub mod store;
/// Model-trainer collaborator and reference trainer.
pub mod trainer;
/// Recording fetch collaborators (filesystem, in-memory).
pub mod transport;
/// Shared type aliases.
pub mod types;
/// Filesystem helpers.
pub mod utils;

mod errors;

pub use annotations::{AlignedEvent, AnnotationAligner, AnnotationSummary, RawAnnotationEvent};
pub use catalog::{CatalogBatch, CatalogEntry, RecordCatalog};
pub use channels::{ChannelDescriptor, ChannelRuleset, ChannelSelection};
pub use checkpoint::{CheckpointRecord, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::{ExtractionConfig, IngestConfig, RulesetKind, SamplingRatePolicy};
pub use data::{FeatureRow, FeatureVector, RecordFeatures, RecordingKey, SleepStage, TrainingBatch};
pub use errors::{ChannelConstraint, FailureKind, IngestError};
pub use features::{ChannelSignal, EpochFeatureExtractor, SignalData};
pub use ingestion::{
    IngestionOrchestrator, OrchestratorState, RecordPipeline, RunSummary, TaskResult,
};
pub use questionnaire::{NightWakings, PreSleepCovariates, Sex, SleepLatency};
pub use spectral::{Periodogram, SpectralEstimator, Spectrum};
pub use store::{FeatureStore, FeatureTable, HeldOutList, MemoryFeatureStore, TrainingStream};
pub use trainer::{CentroidTrainer, FitMetrics, ModelTrainer};
pub use transport::RecordingFetcher;
pub use transport::fs::FsRecordingFetcher;
pub use transport::memory::{MemoryRecordingFetcher, RecordingArtifacts};
pub use types::{ChannelName, ClassId, EventLabel, ModeTag, SessionId, SiteId, SubjectFolder};
