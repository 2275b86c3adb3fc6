use crate::annotations::AlignedEvent;
use crate::constants::features::NUM_CLASSES;
use crate::errors::IngestError;
use crate::types::ClassId;

/// Per-class weight `1 - freq/total`, indexed by class id.
///
/// Classes that never occur weigh `1.0`; an empty label set weighs every class `1.0`.
pub fn class_weights(labels: &[ClassId]) -> Vec<f64> {
    let mut counts = [0usize; NUM_CLASSES];
    for label in labels {
        if let Some(count) = counts.get_mut(usize::from(*label)) {
            *count += 1;
        }
    }
    let total: usize = counts.iter().sum();
    counts
        .iter()
        .map(|count| {
            if total == 0 {
                1.0
            } else {
                1.0 - *count as f64 / total as f64
            }
        })
        .collect()
}

/// Rescale `values` into `[0, 1]`; a constant vector maps to zeros.
pub fn min_max_scale(values: &[f64]) -> Vec<f64> {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
            (min.min(*v), max.max(*v))
        });
    let span = max - min;
    if !span.is_finite() || span == 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / span).collect()
}

/// Time asleep as a percentage of all staged time.
///
/// Events with a `NaN` duration contribute nothing. Fails with
/// [`IngestError::NoStagedTime`] when no staged duration remains.
pub fn sleep_efficiency(events: &[AlignedEvent]) -> Result<f64, IngestError> {
    let (asleep, awake) = events
        .iter()
        .filter(|event| event.duration.is_finite())
        .fold((0.0, 0.0), |(asleep, awake), event| {
            if event.stage.is_asleep() {
                (asleep + event.duration, awake)
            } else {
                (asleep, awake + event.duration)
            }
        });
    let staged = asleep + awake;
    if staged <= 0.0 {
        return Err(IngestError::NoStagedTime);
    }
    Ok(asleep / staged * 100.0)
}

/// Share of dispatched records that produced features; `0.0` when nothing was dispatched.
pub fn representation_ratio(succeeded: usize, dispatched: usize) -> f64 {
    if dispatched == 0 {
        0.0
    } else {
        succeeded as f64 / dispatched as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SleepStage;

    fn staged(stage: SleepStage, duration: f64) -> AlignedEvent {
        AlignedEvent {
            offset_seconds: 0.0,
            stage,
            duration,
        }
    }

    #[test]
    fn weights_penalize_frequent_classes() {
        let weights = class_weights(&[2, 2, 2, 4]);
        assert_eq!(weights.len(), NUM_CLASSES);
        assert_eq!(weights[2], 0.25);
        assert_eq!(weights[4], 0.75);
        assert_eq!(weights[0], 1.0);
        assert_eq!(class_weights(&[]), vec![1.0; NUM_CLASSES]);
    }

    #[test]
    fn min_max_handles_constant_input() {
        assert_eq!(min_max_scale(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(min_max_scale(&[7.0, 7.0]), vec![0.0, 0.0]);
        assert!(min_max_scale(&[]).is_empty());
    }

    #[test]
    fn efficiency_counts_sleep_over_staged_time() {
        let events = [
            staged(SleepStage::Wake, 30.0),
            staged(SleepStage::N2, 60.0),
            staged(SleepStage::Rem, 30.0),
            staged(SleepStage::N1, f64::NAN),
        ];
        assert_eq!(sleep_efficiency(&events).unwrap(), 75.0);
        assert!(matches!(
            sleep_efficiency(&[staged(SleepStage::N3, f64::NAN)]),
            Err(IngestError::NoStagedTime)
        ));
    }

    #[test]
    fn representation_ratio_of_nothing_is_zero() {
        assert_eq!(representation_ratio(0, 0), 0.0);
        assert_eq!(representation_ratio(3, 4), 0.75);
    }
}
