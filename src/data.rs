use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::annotations::{
    N1_SYNONYMS, N2_SYNONYMS, N3_SYNONYMS, REM_SYNONYMS, WAKE_SYNONYMS,
};

pub use crate::types::{ClassId, SessionId, SiteId, SubjectFolder};

/// Identifies one recording; join key across every collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordingKey {
    /// Subject folder (for example `sub-S0001111192396`).
    #[serde(rename = "folder")]
    pub subject: SubjectFolder,
    /// Session identifier within the subject folder.
    pub session: SessionId,
    /// Acquisition site identifier.
    pub site: SiteId,
}

impl RecordingKey {
    /// Key from its subject folder, session and site.
    pub fn new(
        subject: impl Into<SubjectFolder>,
        session: impl Into<SessionId>,
        site: impl Into<SiteId>,
    ) -> Self {
        Self {
            subject: subject.into(),
            session: session.into(),
            site: site.into(),
        }
    }
}

impl fmt::Display for RecordingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/ses-{}", self.site, self.subject, self.session)
    }
}

/// Canonical sleep-stage class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SleepStage {
    /// Rapid eye movement sleep.
    Rem,
    /// Light sleep, stage 1.
    N1,
    /// Light sleep, stage 2.
    N2,
    /// Deep sleep.
    N3,
    /// Awake.
    Wake,
}

impl SleepStage {
    /// All stages ordered by class id.
    pub const ALL: [SleepStage; 5] = [
        SleepStage::Rem,
        SleepStage::N1,
        SleepStage::N2,
        SleepStage::N3,
        SleepStage::Wake,
    ];

    /// Collapse a vendor spelling onto its canonical stage.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        let table: [(&[&str], SleepStage); 5] = [
            (WAKE_SYNONYMS, SleepStage::Wake),
            (N1_SYNONYMS, SleepStage::N1),
            (N2_SYNONYMS, SleepStage::N2),
            (N3_SYNONYMS, SleepStage::N3),
            (REM_SYNONYMS, SleepStage::Rem),
        ];
        table
            .into_iter()
            .find(|(synonyms, _)| synonyms.contains(&label))
            .map(|(_, stage)| stage)
    }

    /// Integer class id used as the model label.
    pub fn class_id(self) -> ClassId {
        match self {
            SleepStage::Rem => 0,
            SleepStage::N1 => 1,
            SleepStage::N2 => 2,
            SleepStage::N3 => 3,
            SleepStage::Wake => 4,
        }
    }

    /// Stage for a class id, if the id is known.
    pub fn from_class_id(id: ClassId) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.class_id() == id)
    }

    /// Canonical label written by downstream tooling.
    pub fn canonical_label(self) -> &'static str {
        match self {
            SleepStage::Rem => "Sleep_stage_R",
            SleepStage::N1 => "Sleep_stage_N1",
            SleepStage::N2 => "Sleep_stage_N2",
            SleepStage::N3 => "Sleep_stage_N3",
            SleepStage::Wake => "Sleep_stage_W",
        }
    }

    /// Whether the stage counts as time asleep.
    pub fn is_asleep(self) -> bool {
        !matches!(self, SleepStage::Wake)
    }
}

/// Band-power feature vector for one epoch plus its class label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Band means, band-major: each band holds one value per channel in
    /// selection order.
    pub values: Vec<f64>,
    /// Class id of the epoch's stage.
    pub label: ClassId,
}

/// A feature vector tagged with its natural key for idempotent storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    /// Recording the epoch came from.
    pub key: RecordingKey,
    /// Position of the epoch among the record's retained epochs.
    pub epoch_index: usize,
    /// Band-power values and label.
    pub features: FeatureVector,
}

impl FeatureRow {
    /// Identity used for idempotent inserts.
    pub fn natural_key(&self) -> (RecordingKey, usize) {
        (self.key.clone(), self.epoch_index)
    }
}

/// Everything a successful record task produced.
#[derive(Clone, Debug, Default)]
pub struct RecordFeatures {
    /// One vector per retained epoch, in epoch order.
    pub vectors: Vec<FeatureVector>,
}

impl RecordFeatures {
    /// Attach natural keys so rows can be inserted idempotently.
    pub fn into_rows(self, key: &RecordingKey) -> Vec<FeatureRow> {
        self.vectors
            .into_iter()
            .enumerate()
            .map(|(epoch_index, features)| FeatureRow {
                key: key.clone(),
                epoch_index,
                features,
            })
            .collect()
    }

    /// Number of retained epochs.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether no epoch was retained.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// One batch handed to the model trainer.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingBatch {
    /// Scaled feature vectors, one per sample.
    pub features: Vec<Vec<f64>>,
    /// Class id per sample.
    pub labels: Vec<ClassId>,
    /// Per-sample weight derived from the label frequency in the source table.
    pub class_weights: Vec<f64>,
}

impl TrainingBatch {
    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the batch holds no samples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
