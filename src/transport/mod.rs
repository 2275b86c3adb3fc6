//! Recording transports: where channel metadata, event logs and signals come from.

use crate::annotations::RawAnnotationEvent;
use crate::channels::ChannelDescriptor;
use crate::data::RecordingKey;
use crate::errors::IngestError;
use crate::features::SignalData;

/// Filesystem transport over a BIDS-style directory tree.
pub mod fs;
/// In-process transport over prepared artifacts.
pub mod memory;

/// Remote-fetch collaborator serving one recording's raw artifacts.
///
/// Every method fails with [`IngestError::RemoteObjectMissing`] when the
/// underlying object does not exist, so callers can tell "absent" apart from
/// "unreadable".
pub trait RecordingFetcher: Send + Sync {
    /// Channel labels reported by the recording.
    fn channels(&self, key: &RecordingKey) -> Result<Vec<ChannelDescriptor>, IngestError>;
    /// Raw annotation log in file order.
    fn annotations(&self, key: &RecordingKey) -> Result<Vec<RawAnnotationEvent>, IngestError>;
    /// Decoded signal data.
    fn signal(&self, key: &RecordingKey) -> Result<SignalData, IngestError>;
}
