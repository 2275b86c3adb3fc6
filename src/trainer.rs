//! Model-trainer collaborator and a nearest-centroid reference trainer.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use crate::constants::features::NUM_CLASSES;
use crate::data::TrainingBatch;
use crate::errors::IngestError;
use crate::store::TrainingStream;

/// Metrics reported by one [`ModelTrainer::fit`] call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FitMetrics {
    /// Share of training samples classified correctly.
    pub accuracy: f64,
    /// `None` when no validation stream was supplied.
    pub validation_accuracy: Option<f64>,
    /// Mean weighted loss over the training samples.
    pub loss: f64,
    /// `None` when no validation stream was supplied.
    pub validation_loss: Option<f64>,
}

/// Learning model fed incrementally by the orchestrator.
pub trait ModelTrainer: Send {
    /// Continue training on `train`, optionally scoring `validation` afterwards.
    fn fit(
        &mut self,
        train: TrainingStream,
        validation: Option<TrainingStream>,
    ) -> Result<FitMetrics, IngestError>;
    /// Persist the model under `tag`.
    fn save(&mut self, tag: &str) -> Result<(), IngestError>;
}

#[derive(Debug, Default)]
struct CentroidState {
    sums: Vec<Vec<f64>>,
    counts: [usize; NUM_CLASSES],
    fits: Vec<FitMetrics>,
    samples_seen: usize,
    saved_tags: Vec<String>,
}

impl CentroidState {
    fn absorb(&mut self, features: &[f64], label: usize) {
        if label >= NUM_CLASSES {
            return;
        }
        if self.sums.is_empty() {
            self.sums = vec![vec![0.0; features.len()]; NUM_CLASSES];
        }
        for (sum, value) in self.sums[label].iter_mut().zip(features) {
            *sum += value;
        }
        self.counts[label] += 1;
        self.samples_seen += 1;
    }

    fn predict(&self, features: &[f64]) -> Option<usize> {
        (0..NUM_CLASSES)
            .filter(|class| self.counts[*class] > 0)
            .map(|class| {
                let count = self.counts[class] as f64;
                let distance: f64 = self.sums[class]
                    .iter()
                    .zip(features)
                    .map(|(sum, value)| (sum / count - value).powi(2))
                    .sum();
                (class, distance)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(class, _)| class)
    }

    /// Returns `(accuracy, weighted error)` over `batches`.
    fn score(&self, batches: &[TrainingBatch]) -> (f64, f64) {
        let (mut correct, mut total) = (0usize, 0usize);
        let (mut weighted_miss, mut weight_sum) = (0.0f64, 0.0f64);
        for batch in batches {
            for ((features, label), weight) in
                batch.features.iter().zip(&batch.labels).zip(&batch.class_weights)
            {
                let hit = self.predict(features) == Some(usize::from(*label));
                total += 1;
                weight_sum += *weight;
                if hit {
                    correct += 1;
                } else {
                    weighted_miss += *weight;
                }
            }
        }
        let accuracy = if total == 0 { 0.0 } else { correct as f64 / total as f64 };
        let loss = if weight_sum == 0.0 { 0.0 } else { weighted_miss / weight_sum };
        (accuracy, loss)
    }
}

/// Nearest-centroid classifier over band-power vectors.
///
/// Clones share state, so callers can hand one clone to the orchestrator and
/// inspect fits and saved tags through another.
#[derive(Clone, Debug, Default)]
pub struct CentroidTrainer {
    inner: Arc<Mutex<CentroidState>>,
}

impl CentroidTrainer {
    /// Untrained model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics of every completed fit, oldest first.
    pub fn fits(&self) -> Vec<FitMetrics> {
        self.lock().map(|state| state.fits.clone()).unwrap_or_default()
    }

    /// Samples absorbed across every fit.
    pub fn samples_seen(&self) -> usize {
        self.lock().map(|state| state.samples_seen).unwrap_or(0)
    }

    /// Tags passed to `save`, oldest first.
    pub fn saved_tags(&self) -> Vec<String> {
        self.lock().map(|state| state.saved_tags.clone()).unwrap_or_default()
    }

    /// Predicted class id for one scaled feature vector.
    pub fn predict(&self, features: &[f64]) -> Option<u8> {
        let state = self.lock().ok()?;
        state.predict(features).and_then(|class| u8::try_from(class).ok())
    }

    fn lock(&self) -> Result<MutexGuard<'_, CentroidState>, IngestError> {
        self.inner
            .lock()
            .map_err(|_| IngestError::Trainer("trainer state lock poisoned".into()))
    }
}

impl ModelTrainer for CentroidTrainer {
    fn fit(
        &mut self,
        train: TrainingStream,
        validation: Option<TrainingStream>,
    ) -> Result<FitMetrics, IngestError> {
        let train: Vec<TrainingBatch> = train.collect();
        let mut state = self.lock()?;
        for batch in &train {
            for (features, label) in batch.features.iter().zip(&batch.labels) {
                state.absorb(features, usize::from(*label));
            }
        }
        let (accuracy, loss) = state.score(&train);
        let (validation_accuracy, validation_loss) = match validation {
            Some(stream) => {
                let batches: Vec<TrainingBatch> = stream.collect();
                let (accuracy, loss) = state.score(&batches);
                (Some(accuracy), Some(loss))
            }
            None => (None, None),
        };
        let metrics = FitMetrics {
            accuracy,
            validation_accuracy,
            loss,
            validation_loss,
        };
        info!(
            accuracy,
            loss,
            samples = state.samples_seen,
            "[sleepfeed:trainer] fit complete"
        );
        state.fits.push(metrics.clone());
        Ok(metrics)
    }

    fn save(&mut self, tag: &str) -> Result<(), IngestError> {
        self.lock()?.saved_tags.push(tag.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(rows: Vec<(Vec<f64>, u8)>) -> TrainingStream {
        let batch = TrainingBatch {
            class_weights: vec![1.0; rows.len()],
            labels: rows.iter().map(|(_, label)| *label).collect(),
            features: rows.into_iter().map(|(features, _)| features).collect(),
        };
        Box::new(vec![batch].into_iter())
    }

    #[test]
    fn separable_classes_are_learned() {
        let mut trainer = CentroidTrainer::new();
        let handle = trainer.clone();
        let metrics = trainer
            .fit(
                stream(vec![
                    (vec![1.0, 0.0], 2),
                    (vec![0.9, 0.1], 2),
                    (vec![0.0, 1.0], 4),
                    (vec![0.1, 0.9], 4),
                ]),
                Some(stream(vec![(vec![0.8, 0.2], 2), (vec![0.2, 0.8], 0)])),
            )
            .unwrap();
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.loss, 0.0);
        assert_eq!(metrics.validation_accuracy, Some(0.5));
        assert_eq!(handle.predict(&[0.95, 0.05]), Some(2));
        assert_eq!(handle.samples_seen(), 4);
        assert_eq!(handle.fits().len(), 1);
    }

    #[test]
    fn save_records_tags_and_empty_fit_is_harmless() {
        let mut trainer = CentroidTrainer::new();
        let metrics = trainer.fit(Box::new(std::iter::empty()), None).unwrap();
        assert_eq!(metrics.validation_loss, None);
        assert_eq!(trainer.predict(&[0.0]), None);
        trainer.save("CHUNKS=3").unwrap();
        assert_eq!(trainer.saved_tags(), vec!["CHUNKS=3".to_string()]);
    }
}
