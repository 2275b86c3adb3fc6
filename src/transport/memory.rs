use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::annotations::RawAnnotationEvent;
use crate::channels::ChannelDescriptor;
use crate::data::RecordingKey;
use crate::errors::IngestError;
use crate::features::SignalData;
use crate::transport::RecordingFetcher;

/// Everything a fetcher serves for one recording.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordingArtifacts {
    /// Channel labels served by `channels`.
    pub channels: Vec<ChannelDescriptor>,
    /// Raw event log served by `annotations`.
    pub annotations: Vec<RawAnnotationEvent>,
    /// Decoded signal served by `signal`.
    pub signal: SignalData,
}

/// In-process fetcher over prepared artifacts.
///
/// Clones share the same recordings and fetch counters.
#[derive(Clone, Debug, Default)]
pub struct MemoryRecordingFetcher {
    recordings: Arc<RwLock<HashMap<RecordingKey, RecordingArtifacts>>>,
    channel_fetches: Arc<Mutex<HashMap<RecordingKey, usize>>>,
}

impl MemoryRecordingFetcher {
    /// Fetcher with no recordings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the artifacts of `key`.
    pub fn insert(&self, key: RecordingKey, artifacts: RecordingArtifacts) {
        self.recordings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, artifacts);
    }

    /// How many times the channel list of `key` was requested.
    ///
    /// Every dispatched record task starts with that request, so this counts
    /// dispatches of records that passed the validation and reservation checks.
    pub fn fetch_count(&self, key: &RecordingKey) -> usize {
        self.channel_fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Channel-list requests across all keys.
    pub fn total_fetches(&self) -> usize {
        self.channel_fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    fn with_artifacts<T>(
        &self,
        key: &RecordingKey,
        object: &str,
        read: impl FnOnce(&RecordingArtifacts) -> T,
    ) -> Result<T, IngestError> {
        let recordings = self.recordings.read().unwrap_or_else(PoisonError::into_inner);
        recordings
            .get(key)
            .map(read)
            .ok_or_else(|| IngestError::RemoteObjectMissing {
                key: key.clone(),
                object: object.to_string(),
            })
    }
}

impl RecordingFetcher for MemoryRecordingFetcher {
    fn channels(&self, key: &RecordingKey) -> Result<Vec<ChannelDescriptor>, IngestError> {
        *self
            .channel_fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default() += 1;
        self.with_artifacts(key, "channels", |artifacts| artifacts.channels.clone())
    }

    fn annotations(&self, key: &RecordingKey) -> Result<Vec<RawAnnotationEvent>, IngestError> {
        self.with_artifacts(key, "annotations", |artifacts| artifacts.annotations.clone())
    }

    fn signal(&self, key: &RecordingKey) -> Result<SignalData, IngestError> {
        self.with_artifacts(key, "signal", |artifacts| artifacts.signal.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use indexmap::IndexMap;

    #[test]
    fn unknown_keys_are_missing_and_fetches_are_counted() {
        let fetcher = MemoryRecordingFetcher::new();
        let key = RecordingKey::new("sub-1", "1", "S0001");
        assert!(matches!(
            fetcher.channels(&key),
            Err(IngestError::RemoteObjectMissing { ref object, .. }) if object == "channels"
        ));

        fetcher.clone().insert(
            key.clone(),
            RecordingArtifacts {
                channels: vec![ChannelDescriptor::new("C3-M2")],
                annotations: Vec::new(),
                signal: SignalData {
                    start: Utc::now(),
                    duration_seconds: 0.0,
                    channels: IndexMap::new(),
                },
            },
        );
        assert_eq!(fetcher.channels(&key).unwrap().len(), 1);
        assert_eq!(fetcher.fetch_count(&key), 2);
        assert_eq!(fetcher.total_fetches(), 2);
    }
}
