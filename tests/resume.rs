use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{TimeDelta, TimeZone, Utc};
use sleepfeed::{
    CatalogEntry, CentroidTrainer, ChannelDescriptor, ChannelSignal, FeatureRow, FeatureStore,
    FeatureTable, IngestConfig, IngestError, IngestionOrchestrator, MemoryCheckpointStore,
    MemoryFeatureStore, MemoryRecordingFetcher, RawAnnotationEvent, RecordCatalog,
    RecordingArtifacts, RecordingKey, SignalData, TrainingStream,
};

const RATE: f64 = 200.0;
const RAW_CHANNELS: [&str; 8] = [
    "C3-M2", "O1-M2", "C4-M1", "E1-M2", "E2-M1", "F4-M1", "O2-M1", "ECG",
];
const STAGES: [&str; 2] = ["Sleep_stage_N2", "Sleep_stage_REM"];

fn key(idx: usize) -> RecordingKey {
    RecordingKey::new(format!("sub-{idx}"), "1", "S0001")
}

fn recording(epochs: usize) -> RecordingArtifacts {
    let start = Utc.with_ymd_and_hms(2024, 3, 9, 23, 30, 0).unwrap();
    let seconds = epochs as f64 * 30.0 + 5.0;
    let channels = RAW_CHANNELS
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let freq = 2.0 + idx as f64 * 3.0;
            let samples = (0..(seconds * RATE) as usize)
                .map(|i| (2.0 * PI * freq * i as f64 / RATE).sin())
                .collect();
            (
                name.to_string(),
                ChannelSignal {
                    samples,
                    sampling_rate: RATE,
                },
            )
        })
        .collect();
    RecordingArtifacts {
        channels: RAW_CHANNELS.iter().map(|name| ChannelDescriptor::new(*name)).collect(),
        annotations: (0..epochs)
            .map(|epoch| {
                let at = start + TimeDelta::seconds(epoch as i64 * 30);
                RawAnnotationEvent::new(
                    at.format("%H:%M:%S").to_string(),
                    STAGES[epoch % STAGES.len()],
                    30.0,
                )
            })
            .collect(),
        signal: SignalData {
            start,
            duration_seconds: seconds,
            channels,
        },
    }
}

fn fixture(records: usize) -> (MemoryRecordingFetcher, RecordCatalog) {
    let fetcher = MemoryRecordingFetcher::new();
    let mut entries = Vec::new();
    for idx in 0..records {
        fetcher.insert(key(idx), recording(2));
        entries.push(CatalogEntry {
            key: key(idx),
            has_annotations: true,
            has_pre_sleep_questionnaire: false,
        });
    }
    (fetcher, RecordCatalog::from_entries(entries))
}

fn config(checkpoint_every_batches: u64) -> IngestConfig {
    IngestConfig {
        batch_size: 2,
        checkpoint_every_batches,
        train_every_inserted: 1_000,
        held_out_probability: 0.0,
        train_epochs: 1,
        ..IngestConfig::default()
    }
}

/// Feature store that fails one chosen `insert_batch` call, simulating a crash
/// between batch completion and the next checkpoint.
#[derive(Clone)]
struct CrashingStore {
    inner: MemoryFeatureStore,
    inserts: Arc<AtomicUsize>,
    crash_on_insert: Option<usize>,
}

impl CrashingStore {
    fn new(inner: MemoryFeatureStore, crash_on_insert: Option<usize>) -> Self {
        Self {
            inner,
            inserts: Arc::new(AtomicUsize::new(0)),
            crash_on_insert,
        }
    }
}

impl FeatureStore for CrashingStore {
    fn insert_batch(
        &self,
        table: FeatureTable,
        rows: Vec<FeatureRow>,
    ) -> Result<usize, IngestError> {
        let call = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.crash_on_insert == Some(call) {
            return Err(IngestError::Store("simulated crash".into()));
        }
        self.inner.insert_batch(table, rows)
    }

    fn flush(&self, table: FeatureTable) -> Result<(), IngestError> {
        self.inner.flush(table)
    }

    fn sample_count(&self, table: FeatureTable) -> Result<usize, IngestError> {
        self.inner.sample_count(table)
    }

    fn read_shuffled_batches(
        &self,
        table: FeatureTable,
        batch_size: usize,
        epochs: usize,
    ) -> Result<TrainingStream, IngestError> {
        self.inner.read_shuffled_batches(table, batch_size, epochs)
    }

    fn reserve_held_out(&self, key: &RecordingKey, table: FeatureTable) -> Result<(), IngestError> {
        self.inner.reserve_held_out(key, table)
    }

    fn held_out_keys(&self, table: FeatureTable) -> Result<Vec<RecordingKey>, IngestError> {
        self.inner.held_out_keys(table)
    }
}

fn orchestrator(
    config: IngestConfig,
    fetcher: &MemoryRecordingFetcher,
    store: CrashingStore,
    trainer: &CentroidTrainer,
    checkpoints: &MemoryCheckpointStore,
) -> IngestionOrchestrator {
    IngestionOrchestrator::new(
        config,
        Box::new(fetcher.clone()),
        Box::new(store),
        Box::new(trainer.clone()),
        Box::new(checkpoints.clone()),
    )
    .unwrap()
}

#[test]
fn crash_after_first_checkpoint_reprocesses_second_batch_without_duplicates() {
    let (fetcher, catalog) = fixture(5);
    let store = MemoryFeatureStore::new(9);
    let trainer = CentroidTrainer::new();
    let checkpoints = MemoryCheckpointStore::new();

    // First run checkpoints after every batch and dies while merging batch 2,
    // after sub-2's rows were inserted but before sub-3's.
    let mut first = orchestrator(
        config(1),
        &fetcher,
        CrashingStore::new(store.clone(), Some(4)),
        &trainer,
        &checkpoints,
    );
    let err = first.run(&catalog).unwrap_err();
    assert!(matches!(err, IngestError::Store(_)));
    assert_eq!(checkpoints.text().unwrap(), "CHUNKS=1\nINSERTED=4\n");
    assert_eq!(store.sample_count(FeatureTable::Samples).unwrap(), 6);

    let mut second = orchestrator(
        config(2),
        &fetcher,
        CrashingStore::new(store.clone(), None),
        &trainer,
        &checkpoints,
    );
    let summary = second.run(&catalog).unwrap();

    assert_eq!(summary.skipped_batches, 1);
    assert_eq!(summary.dispatched_batches, vec![2, 3]);
    assert_eq!(summary.rows_inserted, 4, "sub-2 rows are not inserted twice");
    assert_eq!(fetcher.fetch_count(&key(0)), 1);
    assert_eq!(fetcher.fetch_count(&key(1)), 1);
    assert_eq!(fetcher.fetch_count(&key(2)), 2);
    assert_eq!(fetcher.fetch_count(&key(3)), 2);
    assert_eq!(fetcher.fetch_count(&key(4)), 1);

    assert_eq!(trainer.samples_seen(), 10, "every epoch of every record trained once");
    assert_eq!(checkpoints.text().unwrap(), "CHUNKS=3\nINSERTED=0\nDONE\n");
}

#[test]
fn crash_between_checkpoints_resumes_after_last_checkpoint() {
    let (fetcher, catalog) = fixture(5);
    let store = MemoryFeatureStore::new(9);
    let trainer = CentroidTrainer::new();
    let checkpoints = MemoryCheckpointStore::new();

    let mut first = orchestrator(
        config(2),
        &fetcher,
        CrashingStore::new(store.clone(), Some(5)),
        &trainer,
        &checkpoints,
    );
    assert!(first.run(&catalog).is_err());
    assert_eq!(checkpoints.saves(), 1);
    assert_eq!(checkpoints.text().unwrap(), "CHUNKS=2\nINSERTED=8\n");

    let mut second = orchestrator(
        config(2),
        &fetcher,
        CrashingStore::new(store.clone(), None),
        &trainer,
        &checkpoints,
    );
    let summary = second.run(&catalog).unwrap();
    assert_eq!(summary.skipped_batches, 2);
    assert_eq!(summary.dispatched_batches, vec![3]);
    for idx in 0..4 {
        assert_eq!(fetcher.fetch_count(&key(idx)), 1);
    }
    assert_eq!(fetcher.fetch_count(&key(4)), 2);
    assert_eq!(trainer.samples_seen(), 10);
}

#[test]
fn resume_never_dispatches_checkpointed_batches() {
    let (fetcher, catalog) = fixture(7);
    let trainer = CentroidTrainer::new();
    let checkpoints = MemoryCheckpointStore::with_text("CHUNKS=2\nINSERTED=0\n");

    let mut run = orchestrator(
        config(1),
        &fetcher,
        CrashingStore::new(MemoryFeatureStore::new(1), None),
        &trainer,
        &checkpoints,
    );
    let summary = run.run(&catalog).unwrap();
    assert_eq!(summary.dispatched_batches, vec![3, 4]);
    assert_eq!(summary.records_dispatched, 3);
    for idx in 0..4 {
        assert_eq!(fetcher.fetch_count(&key(idx)), 0, "sub-{idx} belongs to a skipped batch");
    }
    for idx in 4..7 {
        assert_eq!(fetcher.fetch_count(&key(idx)), 1);
    }
}

#[test]
fn features_follow_the_eeg_montage() {
    let (fetcher, _catalog) = fixture(1);
    let store = MemoryFeatureStore::new(1);
    let trainer = CentroidTrainer::new();
    let mut run = orchestrator(
        config(1),
        &fetcher,
        CrashingStore::new(store.clone(), None),
        &trainer,
        &MemoryCheckpointStore::new(),
    );
    assert_eq!(run.populate_evaluation_pool(&[key(0)]).unwrap(), 2);

    let rows = store.rows(FeatureTable::Evaluation).unwrap();
    assert_eq!(rows.len(), 2);
    // Seven selected channels, five bands each; ECG is not part of the montage.
    assert!(rows.iter().all(|row| row.features.values.len() == 35));
    assert_eq!(
        rows.iter().map(|row| row.features.label).collect::<Vec<_>>(),
        vec![2, 0]
    );
}
