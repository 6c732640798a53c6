use std::{f32::consts::PI, fmt, ops::Deref, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{Result, VisualiserError};

pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 32_768;
pub const DEFAULT_MIN_DECIBELS: f32 = -100.0;
pub const DEFAULT_MAX_DECIBELS: f32 = -30.0;

/// Parameters of an analyser node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyserSettings {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for AnalyserSettings {
    fn default() -> Self {
        Self::new(512, 0.3)
    }
}

impl AnalyserSettings {
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        Self {
            fft_size,
            smoothing,
            min_decibels: DEFAULT_MIN_DECIBELS,
            max_decibels: DEFAULT_MAX_DECIBELS,
        }
    }

    /// Length of every [`FrequencySnapshot`] read from an analyser with these
    /// settings.
    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&self.fft_size) {
            return Err(VisualiserError::invalid_config(format!(
                "fft size {} must be a power of two in {MIN_FFT_SIZE}..={MAX_FFT_SIZE}",
                self.fft_size
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(VisualiserError::invalid_config(format!(
                "smoothing constant {} must be within [0, 1]",
                self.smoothing
            )));
        }
        if !(self.min_decibels < self.max_decibels) {
            return Err(VisualiserError::invalid_config("min decibels must be below max decibels"));
        }
        Ok(())
    }
}

/// Byte magnitudes (0-255), one per frequency bin. The length is fixed when
/// the snapshot is created and values are only ever overwritten in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencySnapshot {
    bins: Vec<u8>,
}

impl FrequencySnapshot {
    pub fn zeroed(len: usize) -> Self {
        Self { bins: vec![0; len] }
    }

    pub fn from_bins(bins: Vec<u8>) -> Self {
        Self { bins }
    }

    pub fn bins(&self) -> &[u8] {
        &self.bins
    }

    pub(crate) fn bins_mut(&mut self) -> &mut [u8] {
        &mut self.bins
    }
}

impl Deref for FrequencySnapshot {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bins
    }
}

/// Spectrum analyser modelled on the browser analyser node: a Blackman
/// windowed real FFT over the latest `fft_size` samples, exponential
/// smoothing across reads, and a dB to byte mapping.
pub struct AnalyserNode {
    settings: AnalyserSettings,
    history: Vec<f32>,
    write_pos: usize,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    snapshot: FrequencySnapshot,
    fft: FftResources,
}

impl AnalyserNode {
    pub fn new(settings: AnalyserSettings) -> Result<Self> {
        settings.validate()?;
        let size = settings.fft_size;
        let bins = settings.frequency_bin_count();

        Ok(Self {
            settings,
            history: vec![0.0; size],
            write_pos: 0,
            window: (0..size).map(|index| blackman_value(index, size)).collect(),
            smoothed: vec![0.0; bins],
            snapshot: FrequencySnapshot::zeroed(bins),
            fft: FftResources::new(size),
        })
    }

    pub fn settings(&self) -> &AnalyserSettings {
        &self.settings
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.settings.frequency_bin_count()
    }

    /// Appends time-domain samples, keeping only the most recent `fft_size`.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let size = self.history.len();
        for &sample in samples {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % size;
        }
    }

    /// Recomputes the spectrum and returns the refreshed snapshot.
    pub fn refresh(&mut self) -> Result<&FrequencySnapshot> {
        self.update_spectrum()?;
        Ok(&self.snapshot)
    }

    /// Recomputes the spectrum and copies it into `out`. Copies at most
    /// `min(out.len(), bin count)` values and never allocates.
    pub fn get_byte_frequency_data(&mut self, out: &mut [u8]) -> Result<()> {
        self.update_spectrum()?;
        let len = out.len().min(self.snapshot.len());
        out[..len].copy_from_slice(&self.snapshot[..len]);
        Ok(())
    }

    /// Last computed snapshot without recomputing it.
    pub fn snapshot(&self) -> &FrequencySnapshot {
        &self.snapshot
    }

    /// Clears sample history and smoothing state.
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.write_pos = 0;
        self.smoothed.fill(0.0);
        self.snapshot.bins_mut().fill(0);
    }

    fn update_spectrum(&mut self) -> Result<()> {
        let size = self.history.len();
        for index in 0..size {
            let sample = self.history[(self.write_pos + index) % size];
            self.fft.input[index] = sample * self.window[index];
        }

        self.fft
            .plan
            .process_with_scratch(&mut self.fft.input, &mut self.fft.spectrum, &mut self.fft.scratch)
            .map_err(|err| VisualiserError::invalid_state(format!("fft failed: {err}")))?;

        let tau = self.settings.smoothing;
        let min_db = self.settings.min_decibels;
        let range_scale = 255.0 / (self.settings.max_decibels - min_db);
        let norm = 1.0 / size as f32;

        for (bin, (smoothed, out)) in self
            .smoothed
            .iter_mut()
            .zip(self.snapshot.bins_mut().iter_mut())
            .enumerate()
        {
            let magnitude = self.fft.spectrum[bin].norm() * norm;
            let mut value = tau * *smoothed + (1.0 - tau) * magnitude;
            if !value.is_finite() {
                value = 0.0;
            }
            *smoothed = value;
            *out = magnitude_to_byte(value, min_db, range_scale);
        }

        Ok(())
    }
}

impl fmt::Debug for AnalyserNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyserNode")
            .field("settings", &self.settings)
            .field("write_pos", &self.write_pos)
            .field("fft", &self.fft)
            .finish()
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn new(size: usize) -> Self {
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        Self {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn magnitude_to_byte(magnitude: f32, min_db: f32, range_scale: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    (range_scale * (db - min_db)).floor().clamp(0.0, 255.0) as u8
}

fn blackman_value(index: usize, len: usize) -> f32 {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    let x = index as f32 / len as f32;
    a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * frequency * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn snapshot_length_is_half_fft_size() {
        for size in [32, 256, 512, 2048] {
            let mut node = AnalyserNode::new(AnalyserSettings::new(size, 0.0)).unwrap();
            assert_eq!(node.refresh().unwrap().len(), size / 2);
        }
    }

    #[test]
    fn rejects_non_power_of_two_sizes() {
        assert!(AnalyserNode::new(AnalyserSettings::new(500, 0.3)).is_err());
        assert!(AnalyserNode::new(AnalyserSettings::new(16, 0.3)).is_err());
    }

    #[test]
    fn silence_reads_as_zero() {
        let mut node = AnalyserNode::new(AnalyserSettings::default()).unwrap();
        node.push_samples(&[0.0; 512]);
        assert!(node.refresh().unwrap().iter().all(|&bin| bin == 0));
    }

    #[test]
    fn tone_peaks_at_expected_bin() {
        let sample_rate = 44_100.0;
        let size = 512;
        // Bin 20 centre frequency.
        let frequency = 20.0 * sample_rate / size as f32;
        let mut node = AnalyserNode::new(AnalyserSettings::new(size, 0.0)).unwrap();
        let quiet: Vec<f32> = sine(frequency, sample_rate, size)
            .into_iter()
            .map(|sample| sample * 0.001)
            .collect();
        node.push_samples(&quiet);

        let snapshot = node.refresh().unwrap();
        assert!(snapshot[20] > 0);
        assert!(snapshot[20] > snapshot[19]);
        assert!(snapshot[20] > snapshot[21]);
        assert!(snapshot[5] < snapshot[20]);
        assert!(snapshot[100] < snapshot[20]);
    }

    #[test]
    fn smoothing_decays_gradually() {
        let size = 256;
        let tone = sine(2_000.0, 44_100.0, size);

        let mut smooth = AnalyserNode::new(AnalyserSettings::new(size, 0.8)).unwrap();
        let mut raw = AnalyserNode::new(AnalyserSettings::new(size, 0.0)).unwrap();
        for node in [&mut smooth, &mut raw] {
            node.push_samples(&tone);
            node.refresh().unwrap();
            node.push_samples(&vec![0.0; size]);
        }

        let smooth_sum: u32 = smooth.refresh().unwrap().iter().map(|&b| b as u32).sum();
        let raw_sum: u32 = raw.refresh().unwrap().iter().map(|&b| b as u32).sum();
        assert_eq!(raw_sum, 0);
        assert!(smooth_sum > 0);
    }

    #[test]
    fn copies_into_shorter_buffers() {
        let mut node = AnalyserNode::new(AnalyserSettings::new(64, 0.0)).unwrap();
        node.push_samples(&sine(5_000.0, 44_100.0, 64));
        let mut out = [0u8; 8];
        node.get_byte_frequency_data(&mut out).unwrap();
        assert_eq!(&out[..], &node.snapshot()[..8]);
    }
}
