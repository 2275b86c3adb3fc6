/// Constants used by channel rulesets.
pub mod channels {
    /// Channels that must each appear exactly once in the full montage.
    pub const FULL_EXCLUSIVE: &[&str] = &[
        "ABD", "C3-M2", "CHEST", "O1-M2", "IC", "SNORE", "AIRFLOW", "HR", "SaO2",
    ];

    /// Equivalence groups for the full montage, in canonical output order.
    pub const FULL_EQUIVALENCES: &[&[&str]] = &[
        &["C4-M1", "C4-M2"],
        &[
            "CHIN1-CHIN2",
            "CHIN1-CHIN3",
            "CHIN2-CHIN3",
            "CHIN3-CHIN1",
            "CHIN3-CHIN2",
            "Chin1-31",
            "Chin1-Chin2",
            "Chin1-Chin3",
            "Chin1-P3",
            "Chin1-P4",
            "Chin2-Chin3",
            "Chin3-Chin2",
        ],
        &["E1-M1", "E1-M2"],
        &["E2-M1", "E2-M2"],
        &["F4-M1", "F4-M2", "F8-M1", "Fp2-M1", "Fp2-M2"],
        &["O1-M1", "O2-M1", "O2-M2"],
        &["EKG", "EKG-E1"],
        &["LAT", "LAT-E1"],
        &["RAT", "RAT-E1"],
    ];

    /// Channels that must each appear exactly once in the EEG-only montage.
    pub const EEG_EXCLUSIVE: &[&str] = &["C3-M2", "O1-M2"];

    /// Equivalence groups for the EEG-only montage, in canonical output order.
    pub const EEG_EQUIVALENCES: &[&[&str]] = &[
        &["C4-M1", "C4-M2"],
        &["E1-M1", "E1-M2"],
        &["E2-M1", "E2-M2"],
        &["F4-M1", "F4-M2", "F8-M1", "Fp2-M1", "Fp2-M2"],
        &["O1-M1", "O2-M1", "O2-M2"],
    ];
}

/// Constants used by annotation alignment.
pub mod annotations {
    /// Event label written by the scoring software when analysis stopped.
    pub const STOP_MARKER: &str = "Stopped_Analyzer_-_Sleep_Events";
    /// Seconds added to each event end before comparing against recording length.
    pub const END_GUARD_SECONDS: f64 = 1.0;
    /// Accepted time-of-day layouts, tried in order.
    pub const TIME_OF_DAY_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

    /// Vendor spellings for the wake stage.
    pub const WAKE_SYNONYMS: &[&str] = &["Sleep_stage_W", "Sleep_stage_4"];
    /// Vendor spellings for N1.
    pub const N1_SYNONYMS: &[&str] = &["Sleep_stage_N1", "Sleep_stage_1"];
    /// Vendor spellings for N2.
    pub const N2_SYNONYMS: &[&str] = &["Sleep_stage_N2", "Sleep_stage_2"];
    /// Vendor spellings for N3.
    pub const N3_SYNONYMS: &[&str] = &["Sleep_stage_N3", "Sleep_stage_3"];
    /// Vendor spellings for REM.
    pub const REM_SYNONYMS: &[&str] = &["Sleep_stage_R", "Sleep_stage_REM"];
}

/// Constants used by epoch feature extraction.
pub mod features {
    /// Fixed epoch length in seconds.
    pub const EPOCH_SECONDS: f64 = 30.0;
    /// Sampling rate every recording is expected to use.
    pub const EXPECTED_SAMPLING_RATE_HZ: f64 = 200.0;
    /// Allowed absolute deviation before a sampling rate counts as mismatched.
    pub const SAMPLING_RATE_TOLERANCE_HZ: f64 = 1e-6;
    /// Lowest frequency kept in the spectrum.
    pub const SPECTRUM_MIN_HZ: f64 = 0.5;
    /// Highest frequency kept in the spectrum.
    pub const SPECTRUM_MAX_HZ: f64 = 30.0;
    /// Number of canonical sleep-stage classes.
    pub const NUM_CLASSES: usize = 5;

    /// Canonical frequency bands as `(name, low_hz, high_hz)`; low inclusive, high exclusive.
    pub const BANDS: [(&str, f64, f64); 5] = [
        ("delta", 0.5, 4.5),
        ("theta", 4.5, 8.5),
        ("alpha", 8.5, 11.5),
        ("sigma", 11.5, 15.5),
        ("beta", 15.5, 30.0),
    ];
}

/// Constants used by the checkpoint file format.
pub mod checkpoint {
    /// Separator between key and value on every checkpoint line.
    pub const KEY_VALUE_DELIMITER: char = '=';
    /// Key of the optional items-since-flush line.
    pub const INSERTED_KEY: &str = "INSERTED";
    /// Terminal line written once the catalog is exhausted.
    pub const DONE_MARKER: &str = "DONE";
    /// Default mode tag used by the feature ingestion run.
    pub const DEFAULT_MODE_TAG: &str = "CHUNKS";
    /// Default checkpoint filename.
    pub const DEFAULT_CHECKPOINT_FILENAME: &str = "sleepfeed.chunks";
    /// Extension used for the temp file replaced on save.
    pub const TEMP_EXTENSION: &str = "tmp";
}

/// Constants used by the batch orchestrator.
pub mod ingestion {
    /// Default number of catalog records dispatched per batch.
    pub const DEFAULT_BATCH_SIZE: usize = 3;
    /// Default number of batches between checkpoint writes.
    pub const DEFAULT_CHECKPOINT_EVERY_BATCHES: u64 = 10;
    /// Default number of inserted feature rows that triggers training and flush.
    pub const DEFAULT_TRAIN_EVERY_INSERTED: u64 = 2_000;
    /// Default probability that an annotated record is reserved for evaluation.
    pub const DEFAULT_HELD_OUT_PROBABILITY: f64 = 0.15;
    /// Default batch size requested from the feature store while training.
    pub const DEFAULT_TRAIN_BATCH_SIZE: usize = 64;
    /// Default number of passes over the stored pool per training call.
    pub const DEFAULT_TRAIN_EPOCHS: usize = 5;
    /// Default run seed.
    pub const DEFAULT_SEED: u64 = 42;
    /// Message used when a worker thread panics.
    pub const TASK_PANICKED_REASON: &str = "record task panicked";
}

/// Constants used by the filesystem recording transport.
pub mod transport {
    /// Column holding channel names in the channels TSV.
    pub const CHANNEL_NAME_COLUMN: &str = "name";
    /// Column holding the event time of day in annotation CSVs.
    pub const ANNOTATION_TIME_COLUMN: &str = "time";
    /// Column holding the event description in annotation CSVs.
    pub const ANNOTATION_EVENT_COLUMN: &str = "event";
    /// Column holding the event duration in annotation CSVs.
    pub const ANNOTATION_DURATION_COLUMN: &str = "duration";
    /// Default filename of the persisted held-out reservation list.
    pub const HELD_OUT_FILENAME: &str = "held_out.json";
}

/// Constants used by EDF decoding.
pub mod edf {
    /// Size of the fixed part of the header in bytes.
    pub const FIXED_HEADER_BYTES: usize = 256;
    /// Size of the per-signal header block in bytes.
    pub const SIGNAL_HEADER_BYTES: usize = 256;
    /// Label used by EDF+ for embedded annotation channels.
    pub const ANNOTATIONS_LABEL: &str = "EDF Annotations";
    /// Two-digit years at or above this value belong to the 1900s.
    pub const CENTURY_PIVOT: u32 = 85;
}

/// Pre-sleep questionnaire keys and answer markers.
pub mod questionnaire {
    /// Answer value marking a ticked checkbox.
    pub const TICKED: &str = "1";
    /// Age in years.
    pub const AGE: &str = "age";
    /// Checkbox for male respondents.
    pub const SEX_MALE: &str = "sexM";
    /// Checkbox for female respondents.
    pub const SEX_FEMALE: &str = "sexF";
    /// Free-text height, usually feet and inches.
    pub const HEIGHT: &str = "height";
    /// Self-reported weight.
    pub const WEIGHT: &str = "weight";
    /// Epworth sleepiness score.
    pub const EPWORTH: &str = "ESS";
    /// Body-mass index.
    pub const BMI: &str = "BMI";
    /// Usual bedtime, clock time with optional am/pm.
    pub const BEDTIME: &str = "getIntoBedAt";
    /// Usual rise time, clock time with optional am/pm.
    pub const RISE_TIME: &str = "getOutOfBedAt";
    /// Sleep-onset latency checkboxes, shortest bucket first.
    pub const FALL_ASLEEP: [&str; 4] = [
        "fallAsleep0_10min",
        "fallAsleep10_30min",
        "fallAsleep30_60min",
        "fallAsleep_more60",
    ];
    /// Night-waking checkboxes, fewest first.
    pub const WAKE_UPS: [&str; 3] = ["wakeUp0", "wakeUp1_3", "wakeUpMore3"];
    /// Checkbox for smokers.
    pub const SMOKE_YES: &str = "smoke_yes";
    /// Checkbox for non-smokers.
    pub const SMOKE_NO: &str = "smoke_no";
    /// Unsuffixed bedtimes with an hour in `(3, 12]` are read as evening.
    pub const EVENING_BEDTIME_HOURS: std::ops::RangeInclusive<u32> = 4..=12;
}
