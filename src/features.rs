//! Epoch slicing and band-power feature extraction.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::annotations::AlignedEvent;
use crate::channels::ChannelSelection;
use crate::config::{ExtractionConfig, SamplingRatePolicy};
use crate::constants::features::{
    BANDS, SAMPLING_RATE_TOLERANCE_HZ, SPECTRUM_MAX_HZ, SPECTRUM_MIN_HZ,
};
use crate::data::FeatureVector;
use crate::errors::IngestError;
use crate::spectral::{Periodogram, SpectralEstimator};
use crate::types::{ChannelName, ClassId};

/// Physical samples of one channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSignal {
    /// Calibrated physical values.
    pub samples: Vec<f64>,
    /// Samples per second.
    pub sampling_rate: f64,
}

/// Decoded multi-channel recording.
#[derive(Clone, Debug, PartialEq)]
pub struct SignalData {
    /// Recording start moment.
    pub start: DateTime<Utc>,
    /// Total recording length in seconds.
    pub duration_seconds: f64,
    /// Channels in file order.
    pub channels: IndexMap<ChannelName, ChannelSignal>,
}

/// Slices aligned events into epochs and turns each into a feature vector.
#[derive(Clone)]
pub struct EpochFeatureExtractor {
    config: ExtractionConfig,
    estimator: Arc<dyn SpectralEstimator>,
}

impl EpochFeatureExtractor {
    /// Extractor backed by the default periodogram estimator.
    pub fn new(config: ExtractionConfig) -> Self {
        Self::with_estimator(config, Arc::new(Periodogram))
    }

    /// Extractor using a custom spectral estimator.
    pub fn with_estimator(config: ExtractionConfig, estimator: Arc<dyn SpectralEstimator>) -> Self {
        Self { config, estimator }
    }

    /// Settings this extractor was built with.
    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Length of every feature vector produced for a selection of `channels`.
    pub fn feature_len(channels: usize) -> usize {
        channels * BANDS.len()
    }

    /// Produce one feature vector per retained epoch plus the index-aligned labels.
    ///
    /// Epochs where any selected channel carries zero power in the analysed
    /// range are discarded, as are epochs running past the end of the data.
    pub fn extract(
        &self,
        signal: &SignalData,
        selection: &ChannelSelection,
        events: Vec<AlignedEvent>,
    ) -> Result<(Vec<FeatureVector>, Vec<ClassId>), IngestError> {
        let channels = self.selected_channels(signal, selection)?;

        let candidates = events.len();
        let vectors: Vec<FeatureVector> = events
            .into_par_iter()
            .filter_map(|event| self.epoch_features(&channels, &event))
            .collect();

        if vectors.len() < candidates {
            debug!(
                kept = vectors.len(),
                discarded = candidates - vectors.len(),
                "[sleepfeed:features] discarded epochs"
            );
        }
        let labels = vectors.iter().map(|vector| vector.label).collect();
        Ok((vectors, labels))
    }

    fn selected_channels<'a>(
        &self,
        signal: &'a SignalData,
        selection: &ChannelSelection,
    ) -> Result<Vec<(&'a str, &'a ChannelSignal)>, IngestError> {
        let expected = self.config.expected_sampling_rate;
        let mut channels = Vec::with_capacity(selection.len());
        for name in selection.iter() {
            let Some((name, channel)) = signal.channels.get_key_value(name) else {
                return Err(IngestError::Decode {
                    what: "signal".into(),
                    reason: format!("selected channel '{name}' absent from signal data"),
                });
            };
            if (channel.sampling_rate - expected).abs() > SAMPLING_RATE_TOLERANCE_HZ {
                match self.config.sampling_rate_policy {
                    SamplingRatePolicy::Strict => {
                        return Err(IngestError::SignalQuality {
                            channel: name.clone(),
                            expected,
                            found: channel.sampling_rate,
                        });
                    }
                    SamplingRatePolicy::Lenient => warn!(
                        channel = %name,
                        expected,
                        found = channel.sampling_rate,
                        "[sleepfeed:features] unexpected sampling rate"
                    ),
                }
            }
            channels.push((name.as_str(), channel));
        }
        Ok(channels)
    }

    fn epoch_features(
        &self,
        channels: &[(&str, &ChannelSignal)],
        event: &AlignedEvent,
    ) -> Option<FeatureVector> {
        let mut per_channel = Vec::with_capacity(channels.len());
        for (_, channel) in channels {
            let rate = channel.sampling_rate;
            let start = (event.offset_seconds * rate).round() as usize;
            let len = (self.config.epoch_seconds * rate).round() as usize;
            let end = start.checked_add(len)?;
            if len == 0 || end > channel.samples.len() {
                return None;
            }

            let spectrum = self
                .estimator
                .power_spectrum(&channel.samples[start..end], rate)
                .restrict(SPECTRUM_MIN_HZ, SPECTRUM_MAX_HZ);
            let total = spectrum.total_power();
            if total <= 0.0 || !total.is_finite() {
                return None;
            }
            let spectrum = spectrum.normalized();
            per_channel.push(BANDS.map(|(_, low, high)| spectrum.band_mean(low, high)));
        }

        // Band-major: every channel's delta, then every channel's theta, and so on.
        let mut values = Vec::with_capacity(Self::feature_len(channels.len()));
        for band in 0..BANDS.len() {
            values.extend(per_channel.iter().map(|means| means[band]));
        }
        Some(FeatureVector {
            values,
            label: event.stage.class_id(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelDescriptor, ChannelRuleset};
    use crate::data::SleepStage;
    use chrono::TimeZone;
    use std::f64::consts::PI;

    const RATE: f64 = 200.0;

    fn sine(freq: f64, seconds: f64) -> Vec<f64> {
        (0..(RATE * seconds) as usize)
            .map(|i| (2.0 * PI * freq * i as f64 / RATE).sin())
            .collect()
    }

    fn signal(channels: Vec<(&str, Vec<f64>, f64)>) -> SignalData {
        let duration_seconds = channels
            .iter()
            .map(|(_, samples, rate)| samples.len() as f64 / rate)
            .fold(0.0, f64::max);
        SignalData {
            start: Utc.with_ymd_and_hms(2024, 3, 9, 22, 0, 0).unwrap(),
            duration_seconds,
            channels: channels
                .into_iter()
                .map(|(name, samples, sampling_rate)| {
                    (
                        name.to_string(),
                        ChannelSignal {
                            samples,
                            sampling_rate,
                        },
                    )
                })
                .collect(),
        }
    }

    fn selection(names: &[&'static str]) -> ChannelSelection {
        let raw: Vec<ChannelDescriptor> = names.iter().map(|n| ChannelDescriptor::new(*n)).collect();
        ChannelRuleset::new(names.iter().copied(), std::iter::empty::<Vec<&'static str>>())
            .select(&raw)
            .unwrap()
    }

    fn event(offset: f64, stage: SleepStage) -> AlignedEvent {
        AlignedEvent {
            offset_seconds: offset,
            stage,
            duration: 30.0,
        }
    }

    fn argmax(values: &[f64]) -> usize {
        values
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |best, (idx, v)| if *v > best.1 { (idx, *v) } else { best })
            .0
    }

    #[test]
    fn band_means_follow_selection_order() {
        let data = signal(vec![
            ("B", sine(2.0, 60.0), RATE),
            ("A", sine(10.0, 60.0), RATE),
        ]);
        let extractor = EpochFeatureExtractor::new(ExtractionConfig::default());
        let (vectors, labels) = extractor
            .extract(
                &data,
                &selection(&["A", "B"]),
                vec![event(0.0, SleepStage::N2), event(30.0, SleepStage::Rem)],
            )
            .unwrap();

        assert_eq!(vectors.len(), 2);
        assert_eq!(labels, vec![2, 0]);
        for vector in &vectors {
            assert_eq!(vector.values.len(), EpochFeatureExtractor::feature_len(2));
            let channel_a: Vec<f64> = vector.values.iter().step_by(2).copied().collect();
            let channel_b: Vec<f64> = vector.values.iter().skip(1).step_by(2).copied().collect();
            assert_eq!(argmax(&channel_a), 2, "alpha dominates channel A");
            assert_eq!(argmax(&channel_b), 0, "delta dominates channel B");
        }
    }

    #[test]
    fn vector_is_laid_out_band_major() {
        let data = signal(vec![
            ("A", sine(2.0, 30.0), RATE),
            ("B", sine(10.0, 30.0), RATE),
        ]);
        let (vectors, _) = EpochFeatureExtractor::new(ExtractionConfig::default())
            .extract(&data, &selection(&["A", "B"]), vec![event(0.0, SleepStage::N1)])
            .unwrap();

        let values = &vectors[0].values;
        let channels = 2;
        // Index = band * channels + channel.
        let channel_a: Vec<f64> = values.iter().step_by(channels).copied().collect();
        let channel_b: Vec<f64> = values.iter().skip(1).step_by(channels).copied().collect();
        assert_eq!(argmax(&channel_a), 0, "delta of channel A sits at index 0");
        assert_eq!(argmax(&channel_b), 2, "alpha of channel B sits at index 5");
        assert_eq!(values[2 * channels + 1], channel_b[2]);
        assert!(values[1] < values[2 * channels + 1]);
    }

    #[test]
    fn flat_channel_discards_epoch() {
        let mut flat_second_half = sine(10.0, 30.0);
        flat_second_half.extend(vec![0.0; (RATE * 30.0) as usize]);
        let data = signal(vec![
            ("A", sine(10.0, 60.0), RATE),
            ("B", flat_second_half, RATE),
        ]);
        let (vectors, labels) = EpochFeatureExtractor::new(ExtractionConfig::default())
            .extract(
                &data,
                &selection(&["A", "B"]),
                vec![event(0.0, SleepStage::Wake), event(30.0, SleepStage::N1)],
            )
            .unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(labels, vec![SleepStage::Wake.class_id()]);
    }

    #[test]
    fn epochs_past_the_data_end_are_skipped() {
        let data = signal(vec![("A", sine(10.0, 45.0), RATE)]);
        let (vectors, _) = EpochFeatureExtractor::new(ExtractionConfig::default())
            .extract(
                &data,
                &selection(&["A"]),
                vec![event(0.0, SleepStage::N3), event(30.0, SleepStage::N3)],
            )
            .unwrap();
        assert_eq!(vectors.len(), 1);
    }

    #[test]
    fn sampling_rate_policy_controls_mismatch() {
        let data = signal(vec![("A", sine(10.0, 30.0), 256.0)]);
        let events = vec![event(0.0, SleepStage::N2)];

        let strict = EpochFeatureExtractor::new(ExtractionConfig {
            sampling_rate_policy: SamplingRatePolicy::Strict,
            ..ExtractionConfig::default()
        });
        let err = strict
            .extract(&data, &selection(&["A"]), events.clone())
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::SignalQuality { found, .. } if found == 256.0
        ));

        let lenient = EpochFeatureExtractor::new(ExtractionConfig::default());
        assert!(lenient.extract(&data, &selection(&["A"]), events).is_ok());
    }

    #[test]
    fn missing_selected_channel_is_a_decode_error() {
        let data = signal(vec![("A", sine(10.0, 30.0), RATE)]);
        let err = EpochFeatureExtractor::new(ExtractionConfig::default())
            .extract(&data, &selection(&["Z"]), vec![event(0.0, SleepStage::N2)])
            .unwrap_err();
        assert!(matches!(err, IngestError::Decode { .. }));
    }

    #[test]
    fn no_events_yields_empty_output() {
        let data = signal(vec![("A", sine(10.0, 30.0), RATE)]);
        let (vectors, labels) = EpochFeatureExtractor::new(ExtractionConfig::default())
            .extract(&data, &selection(&["A"]), Vec::new())
            .unwrap();
        assert!(vectors.is_empty() && labels.is_empty());
    }
}
