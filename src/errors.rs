use std::io;

use thiserror::Error;

use crate::data::RecordingKey;

/// Which part of a channel ruleset was not satisfied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelConstraint {
    /// The exclusive set did not match exactly once per member.
    ExclusiveSet,
    /// The equivalence group at this index did not match exactly one member.
    EquivalenceGroup(usize),
}

/// Error type for per-record ingestion failures and run-level faults.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A channel list, event log or signal file does not exist.
    #[error("remote object '{object}' missing for {key}")]
    RemoteObjectMissing {
        /// Recording whose artifact is missing.
        key: RecordingKey,
        /// File or object name that was requested.
        object: String,
    },
    /// Channel selection failed.
    #[error("channel constraint unmet ({constraint:?}): expected {expected}, matched {matched}")]
    ChannelConstraintUnmet {
        /// Part of the ruleset that failed.
        constraint: ChannelConstraint,
        /// Matches required.
        expected: usize,
        /// Matches found.
        matched: usize,
    },
    /// A selected channel reports an unexpected sampling rate.
    #[error("channel '{channel}' sampled at {found} Hz (expected {expected} Hz)")]
    SignalQuality {
        /// Offending channel.
        channel: String,
        /// Configured rate in Hz.
        expected: f64,
        /// Reported rate in Hz.
        found: f64,
    },
    /// The record is set aside for held-out evaluation.
    #[error("{0} reserved for held-out evaluation")]
    HeldOutReserved(RecordingKey),
    /// The record belongs to the validation set.
    #[error("{0} is a validation element")]
    AlreadyValidationElement(RecordingKey),
    /// The checkpoint tracks a different mode.
    #[error("checkpoint mode '{found}' incompatible with expected '{expected}'")]
    IncompatibleCheckpoint {
        /// Mode tag the run was configured with.
        expected: String,
        /// Leading token found in the checkpoint.
        found: String,
    },
    /// The checkpoint text cannot be parsed.
    #[error("malformed checkpoint: {0}")]
    CorruptCheckpoint(String),
    /// The record catalog cannot be read.
    #[error("catalog load failed: {0}")]
    Catalog(String),
    /// An artifact was present but malformed.
    #[error("failed to decode {what}: {reason}")]
    Decode {
        /// Kind of artifact being decoded.
        what: String,
        /// What was wrong with it.
        reason: String,
    },
    /// The feature store rejected an operation.
    #[error("feature store failure: {0}")]
    Store(String),
    /// The model trainer rejected an operation.
    #[error("model trainer failure: {0}")]
    Trainer(String),
    /// A record task failed outside the classified cases, including panics.
    #[error("task for {key} failed: {reason}")]
    Task {
        /// Recording the task was processing.
        key: RecordingKey,
        /// Failure description.
        reason: String,
    },
    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Configuration values out of range.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The event log contains no staged sleep or wake time.
    #[error("no staged sleep or wake time in event log")]
    NoStagedTime,
}

/// Orchestrator-facing classification of an [`IngestError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// See [`IngestError::RemoteObjectMissing`].
    RemoteObjectMissing,
    /// See [`IngestError::ChannelConstraintUnmet`].
    ChannelConstraintUnmet,
    /// See [`IngestError::SignalQuality`].
    SignalQuality,
    /// See [`IngestError::HeldOutReserved`].
    HeldOutReserved,
    /// See [`IngestError::AlreadyValidationElement`].
    AlreadyValidationElement,
    /// See [`IngestError::IncompatibleCheckpoint`].
    IncompatibleCheckpoint,
    /// Every other failure.
    GenericTaskFailure,
}

impl IngestError {
    /// Classify this error for the orchestrator's skip/abort switch.
    pub fn kind(&self) -> FailureKind {
        match self {
            IngestError::RemoteObjectMissing { .. } => FailureKind::RemoteObjectMissing,
            IngestError::ChannelConstraintUnmet { .. } => FailureKind::ChannelConstraintUnmet,
            IngestError::SignalQuality { .. } => FailureKind::SignalQuality,
            IngestError::HeldOutReserved(_) => FailureKind::HeldOutReserved,
            IngestError::AlreadyValidationElement(_) => FailureKind::AlreadyValidationElement,
            IngestError::IncompatibleCheckpoint { .. } => FailureKind::IncompatibleCheckpoint,
            _ => FailureKind::GenericTaskFailure,
        }
    }

    /// True for errors that must abort the run instead of skipping a record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::IncompatibleCheckpoint { .. }
                | IngestError::CorruptCheckpoint(_)
                | IngestError::Catalog(_)
        )
    }
}
