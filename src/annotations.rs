//! Alignment of vendor event logs onto a recording timeline.
//!
//! Raw logs carry only a time of day per event. Alignment anchors each event
//! to the recording's start day, rolls early-morning events over midnight,
//! truncates the log at the stop marker or the first event that would run
//! past the end of the signal, and keeps only events with a canonical stage.

use chrono::{DateTime, NaiveTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::constants::annotations::{END_GUARD_SECONDS, STOP_MARKER, TIME_OF_DAY_FORMATS};
use crate::data::SleepStage;
use crate::types::EventLabel;

/// One row of a raw annotation log, unordered and unvalidated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawAnnotationEvent {
    /// Wall-clock time of day, e.g. `23:41:30`.
    pub time_of_day: String,
    /// Free-text event description.
    pub label: EventLabel,
    /// Event duration in seconds; `NaN` when the log left it blank.
    pub duration: f64,
}

impl RawAnnotationEvent {
    /// Raw event as read from a log.
    pub fn new(
        time_of_day: impl Into<String>,
        label: impl Into<EventLabel>,
        duration: f64,
    ) -> Self {
        Self {
            time_of_day: time_of_day.into(),
            label: label.into(),
            duration,
        }
    }
}

/// A staged event positioned relative to recording start.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedEvent {
    /// Seconds since recording start; never negative.
    pub offset_seconds: f64,
    /// Canonical stage after synonym collapse.
    pub stage: SleepStage,
    /// Duration in seconds as logged.
    pub duration: f64,
}

/// Converts raw event logs into truncated, stage-labeled event sequences.
#[derive(Clone, Debug)]
pub struct AnnotationAligner {
    stop_marker: Cow<'static, str>,
    end_guard_seconds: f64,
}

impl Default for AnnotationAligner {
    fn default() -> Self {
        Self {
            stop_marker: Cow::Borrowed(STOP_MARKER),
            end_guard_seconds: END_GUARD_SECONDS,
        }
    }
}

impl AnnotationAligner {
    /// Aligner with the default stop marker and end guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the label that marks the end of scored data.
    pub fn with_stop_marker(mut self, marker: impl Into<Cow<'static, str>>) -> Self {
        self.stop_marker = marker.into();
        self
    }

    /// Align `events` against a recording that started at `start` and lasts
    /// `duration_seconds`.
    ///
    /// Never fails; a log with no usable staged events yields an empty vector.
    pub fn align(
        &self,
        events: &[RawAnnotationEvent],
        start: DateTime<Utc>,
        duration_seconds: f64,
    ) -> Vec<AlignedEvent> {
        let offsets: Vec<Option<f64>> = events
            .iter()
            .map(|event| offset_seconds(&event.time_of_day, start))
            .collect();

        let truncate_at = self.truncation_index(events, &offsets, duration_seconds);
        if truncate_at < events.len() {
            debug!(
                kept = truncate_at,
                dropped = events.len() - truncate_at,
                "[sleepfeed:annotations] truncated event log"
            );
        }

        events[..truncate_at]
            .iter()
            .zip(&offsets)
            .filter_map(|(event, offset)| {
                let stage = SleepStage::from_label(&event.label)?;
                let offset = (*offset)?;
                if offset < 0.0 {
                    debug!(
                        time = %event.time_of_day,
                        "[sleepfeed:annotations] staged event precedes recording start"
                    );
                    return None;
                }
                Some(AlignedEvent {
                    offset_seconds: offset,
                    stage,
                    duration: event.duration,
                })
            })
            .collect()
    }

    /// Smallest of: the sole stop-marker position, the first event whose
    /// guarded end overflows the recording, and the event count.
    fn truncation_index(
        &self,
        events: &[RawAnnotationEvent],
        offsets: &[Option<f64>],
        duration_seconds: f64,
    ) -> usize {
        let stops: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, event)| event.label.trim() == self.stop_marker)
            .map(|(idx, _)| idx)
            .collect();
        let by_marker = match stops.as_slice() {
            [only] => *only,
            _ => events.len(),
        };

        let by_overflow = events
            .iter()
            .zip(offsets)
            .position(|(event, offset)| {
                offset.is_some_and(|offset| {
                    offset + event.duration + self.end_guard_seconds > duration_seconds
                })
            })
            .unwrap_or(events.len());

        by_marker.min(by_overflow).min(events.len())
    }
}

/// Seconds between `start` and the event's time of day on the start's
/// calendar day, rolled to the next day when the event hour precedes the
/// start hour.
pub fn offset_seconds(time_of_day: &str, start: DateTime<Utc>) -> Option<f64> {
    let time = parse_time_of_day(time_of_day)?;
    let mut moment = start.date_naive().and_time(time).and_utc();
    if time.hour() < start.hour() {
        moment += TimeDelta::days(1);
    }
    Some((moment - start).num_milliseconds() as f64 / 1000.0)
}

fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    TIME_OF_DAY_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(raw, format).ok())
}

/// Cross-record tally of which labels occur and with which durations.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AnnotationSummary {
    /// Per-label tallies, ordered by label.
    pub labels: BTreeMap<EventLabel, LabelSummary>,
}

/// Per-label entry of an [`AnnotationSummary`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LabelSummary {
    /// Number of records whose log contains the label.
    pub records: usize,
    /// Number of records per distinct duration, keyed by milliseconds.
    pub durations_ms: BTreeMap<i64, usize>,
}

impl AnnotationSummary {
    /// Fold one record's log into the tally.
    pub fn add_record(&mut self, events: &[RawAnnotationEvent]) {
        let mut per_label: BTreeMap<&str, BTreeSet<i64>> = BTreeMap::new();
        for event in events {
            let durations = per_label.entry(event.label.as_str()).or_default();
            if !event.duration.is_nan() {
                durations.insert((event.duration * 1000.0).round() as i64);
            }
        }
        for (label, durations) in per_label {
            let entry = self.labels.entry(label.to_string()).or_default();
            entry.records += 1;
            for duration in durations {
                *entry.durations_ms.entry(duration).or_default() += 1;
            }
        }
    }

    /// Merge another tally into this one.
    pub fn merge(&mut self, other: AnnotationSummary) {
        for (label, summary) in other.labels {
            let entry = self.labels.entry(label).or_default();
            entry.records += summary.records;
            for (duration, count) in summary.durations_ms {
                *entry.durations_ms.entry(duration).or_default() += count;
            }
        }
    }
}
