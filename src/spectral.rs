//! Power-spectrum estimation behind a narrow trait.

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use std::f64::consts::PI;

/// One-sided power spectrum with matching frequency bins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Spectrum {
    /// Bin frequencies in Hz, ascending.
    pub frequencies: Vec<f64>,
    /// Power per bin.
    pub power: Vec<f64>,
}

impl Spectrum {
    /// Keep only bins with `min_hz <= f <= max_hz`.
    pub fn restrict(self, min_hz: f64, max_hz: f64) -> Spectrum {
        let (frequencies, power) = self
            .frequencies
            .into_iter()
            .zip(self.power)
            .filter(|(freq, _)| *freq >= min_hz && *freq <= max_hz)
            .unzip();
        Spectrum { frequencies, power }
    }

    /// Sum of power over all bins.
    pub fn total_power(&self) -> f64 {
        self.power.iter().sum()
    }

    /// Divide every bin by the total power. Caller guarantees a positive total.
    pub fn normalized(mut self) -> Spectrum {
        let total = self.total_power();
        for value in &mut self.power {
            *value /= total;
        }
        self
    }

    /// Mean power over bins with `low_hz <= f < high_hz`; `0.0` when no bin falls inside.
    pub fn band_mean(&self, low_hz: f64, high_hz: f64) -> f64 {
        let (sum, count) = self
            .frequencies
            .iter()
            .zip(&self.power)
            .filter(|(freq, _)| **freq >= low_hz && **freq < high_hz)
            .fold((0.0, 0usize), |(sum, count), (_, power)| (sum + power, count + 1));
        if count == 0 { 0.0 } else { sum / count as f64 }
    }
}

/// Estimates the power spectrum of one channel's epoch.
pub trait SpectralEstimator: Send + Sync {
    /// One-sided power spectrum of `samples` taken at `sampling_rate` Hz.
    fn power_spectrum(&self, samples: &[f64], sampling_rate: f64) -> Spectrum;
}

/// Hann-windowed one-sided periodogram.
#[derive(Clone, Copy, Debug, Default)]
pub struct Periodogram;

impl SpectralEstimator for Periodogram {
    fn power_spectrum(&self, samples: &[f64], sampling_rate: f64) -> Spectrum {
        let n = samples.len();
        if n == 0 || sampling_rate <= 0.0 {
            return Spectrum::default();
        }

        let window = hann(n);
        let window_energy: f64 = window.iter().map(|w| w * w).sum();
        let mut buffer: Vec<Complex<f64>> = samples
            .iter()
            .zip(&window)
            .map(|(sample, w)| Complex::new(sample * w, 0.0))
            .collect();

        let mut planner = FftPlanner::<f64>::new();
        planner.plan_fft_forward(n).process(&mut buffer);

        let scale = 1.0 / (sampling_rate * window_energy);
        let bins = n / 2 + 1;
        let mut frequencies = Vec::with_capacity(bins);
        let mut power = Vec::with_capacity(bins);
        for (k, value) in buffer.iter().take(bins).enumerate() {
            let mut density = value.norm_sqr() * scale;
            let is_nyquist = n % 2 == 0 && k == n / 2;
            if k != 0 && !is_nyquist {
                density *= 2.0;
            }
            frequencies.push(k as f64 * sampling_rate / n as f64);
            power.push(density);
        }
        Spectrum { frequencies, power }
    }
}

fn hann(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / denom).cos())
        .collect()
}
