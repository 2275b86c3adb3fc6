use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::annotations::RawAnnotationEvent;
use crate::channels::ChannelDescriptor;
use crate::constants::transport::{
    ANNOTATION_DURATION_COLUMN, ANNOTATION_EVENT_COLUMN, ANNOTATION_TIME_COLUMN,
    CHANNEL_NAME_COLUMN,
};
use crate::data::RecordingKey;
use crate::edf;
use crate::errors::IngestError;
use crate::features::SignalData;
use crate::questionnaire::PreSleepCovariates;
use crate::transport::RecordingFetcher;

/// Fetches recordings from `<root>/<site>/<subject>/ses-<session>/eeg/`.
///
/// File names follow `<subject>_ses-<session>_task-psg_<suffix>`; annotation
/// logs fall back to `<subject>_ses-<session>_task_Xltek.csv`.
#[derive(Clone, Debug)]
pub struct FsRecordingFetcher {
    root: PathBuf,
}

impl FsRecordingFetcher {
    /// Fetcher over the tree rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding every artifact of `key`.
    pub fn recording_dir(&self, key: &RecordingKey) -> PathBuf {
        self.root
            .join(&key.site)
            .join(&key.subject)
            .join(format!("ses-{}", key.session))
            .join("eeg")
    }

    /// Channel listing TSV.
    pub fn channels_path(&self, key: &RecordingKey) -> PathBuf {
        self.task_file(key, "task-psg_channels.tsv")
    }

    /// Primary annotation CSV.
    pub fn annotations_path(&self, key: &RecordingKey) -> PathBuf {
        self.task_file(key, "task-psg_annotations.csv")
    }

    /// Vendor-export annotation CSV used when the primary log is absent.
    pub fn xltek_annotations_path(&self, key: &RecordingKey) -> PathBuf {
        self.task_file(key, "task_Xltek.csv")
    }

    /// EDF signal file.
    pub fn signal_path(&self, key: &RecordingKey) -> PathBuf {
        self.task_file(key, "task-psg_eeg.edf")
    }

    /// Per-task pre-sleep questionnaire CSV.
    pub fn questionnaire_path(&self, key: &RecordingKey) -> PathBuf {
        self.task_file(key, "task-psg_pre.csv")
    }

    /// Pre-sleep questionnaire as `(question, answer)` pairs.
    ///
    /// Falls back to the session-wide `questionnaire_pre.csv` when the
    /// per-task file is absent.
    pub fn pre_sleep_questionnaire(
        &self,
        key: &RecordingKey,
    ) -> Result<Vec<(String, String)>, IngestError> {
        let file = open_with_fallback(
            key,
            &self.questionnaire_path(key),
            &self.recording_dir(key).join("questionnaire_pre.csv"),
        )?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);
        let mut answers = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|err| decode_error("questionnaire", err))?;
            let question = record.get(0).unwrap_or_default().trim().to_string();
            let answer = record.get(1).unwrap_or_default().trim().to_string();
            answers.push((question, answer));
        }
        Ok(answers)
    }

    /// Typed covariates parsed from [`Self::pre_sleep_questionnaire`].
    pub fn pre_sleep_covariates(
        &self,
        key: &RecordingKey,
    ) -> Result<PreSleepCovariates, IngestError> {
        let answers = self.pre_sleep_questionnaire(key)?;
        debug!(%key, answers = answers.len(), "[sleepfeed:fs] parsing pre-sleep questionnaire");
        Ok(PreSleepCovariates::from_answers(&answers))
    }

    fn task_file(&self, key: &RecordingKey, suffix: &str) -> PathBuf {
        self.recording_dir(key)
            .join(format!("{}_ses-{}_{suffix}", key.subject, key.session))
    }
}

impl RecordingFetcher for FsRecordingFetcher {
    fn channels(&self, key: &RecordingKey) -> Result<Vec<ChannelDescriptor>, IngestError> {
        let file = open_object(key, &self.channels_path(key))?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(file);
        let name_idx = column_index(&mut reader, CHANNEL_NAME_COLUMN, "channels")?;

        let mut channels = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|err| decode_error("channels", err))?;
            if let Some(name) = record.get(name_idx) {
                channels.push(ChannelDescriptor::new(name.trim()));
            }
        }
        Ok(channels)
    }

    fn annotations(&self, key: &RecordingKey) -> Result<Vec<RawAnnotationEvent>, IngestError> {
        let file = open_with_fallback(
            key,
            &self.annotations_path(key),
            &self.xltek_annotations_path(key),
        )?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);
        let time_idx = column_index(&mut reader, ANNOTATION_TIME_COLUMN, "annotations")?;
        let event_idx = column_index(&mut reader, ANNOTATION_EVENT_COLUMN, "annotations")?;
        let duration_idx = column_index(&mut reader, ANNOTATION_DURATION_COLUMN, "annotations")?;

        let mut events = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|err| decode_error("annotations", err))?;
            let duration = record
                .get(duration_idx)
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            events.push(RawAnnotationEvent::new(
                record.get(time_idx).unwrap_or_default().trim(),
                record.get(event_idx).unwrap_or_default().trim(),
                duration,
            ));
        }
        Ok(events)
    }

    fn signal(&self, key: &RecordingKey) -> Result<SignalData, IngestError> {
        let path = self.signal_path(key);
        edf::read_path(&path).map_err(|err| match err {
            IngestError::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {
                missing(key, &path)
            }
            other => other,
        })
    }
}

fn open_object(key: &RecordingKey, path: &Path) -> Result<File, IngestError> {
    File::open(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            missing(key, path)
        } else {
            err.into()
        }
    })
}

fn open_with_fallback(
    key: &RecordingKey,
    primary: &Path,
    fallback: &Path,
) -> Result<File, IngestError> {
    match open_object(key, primary) {
        Err(IngestError::RemoteObjectMissing { .. }) => {
            debug!(
                %key,
                fallback = %fallback.display(),
                "[sleepfeed:fs] primary object missing; trying fallback"
            );
            open_object(key, fallback)
        }
        other => other,
    }
}

fn column_index<R: io::Read>(
    reader: &mut csv::Reader<R>,
    column: &str,
    what: &str,
) -> Result<usize, IngestError> {
    let headers = reader.headers().map_err(|err| decode_error(what, err))?;
    headers
        .iter()
        .position(|header| header.trim() == column)
        .ok_or_else(|| IngestError::Decode {
            what: what.to_string(),
            reason: format!("missing column '{column}'"),
        })
}

fn missing(key: &RecordingKey, path: &Path) -> IngestError {
    IngestError::RemoteObjectMissing {
        key: key.clone(),
        object: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
    }
}

fn decode_error(what: &str, err: csv::Error) -> IngestError {
    IngestError::Decode {
        what: what.to_string(),
        reason: err.to_string(),
    }
}
