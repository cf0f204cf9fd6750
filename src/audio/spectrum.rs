//! Frequency-domain snapshots from PCM audio

use super::history::EnergyHistoryBuffer;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Anything that can hand out a byte-magnitude frequency snapshot.
///
/// Implemented by the looping track player and the live input handle; the
/// capture service only ever talks to this interface.
pub trait SpectrumSource: Send {
    /// Replace `bins` with the current snapshot (0-255 per frequency bin).
    fn frequency_data(&mut self, bins: &mut Vec<u8>);

    /// Move playback forward by `seconds` of source time. Live sources
    /// advance on their own and ignore this.
    fn advance(&mut self, _seconds: f64) {}

    /// Short label for logs
    fn describe(&self) -> String {
        "spectrum source".to_string()
    }
}

/// Windowed FFT producing byte magnitudes.
///
/// Magnitudes are smoothed over time, converted to decibels and mapped
/// linearly from `[min_db, max_db]` onto 0-255.
pub struct FftSpectrum {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    scratch: Vec<Complex<f32>>,
}

impl FftSpectrum {
    pub fn new(fft_size: usize, smoothing: f32, min_db: f32, max_db: f32) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Hann window
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (fft_size - 1) as f32).cos())
            })
            .collect();

        let max_db = if max_db > min_db { max_db } else { min_db + 1.0 };

        Self {
            fft,
            fft_size,
            window,
            smoothed: vec![0.0; fft_size / 2],
            smoothing: smoothing.clamp(0.0, 0.99),
            min_db,
            max_db,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyze the first `fft_size` samples (zero padded) into `out`.
    pub fn snapshot(&mut self, samples: &[f32], out: &mut Vec<u8>) {
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let s = samples.get(i).copied().unwrap_or(0.0);
            let s = if s.is_finite() { s } else { 0.0 };
            *slot = Complex::new(s * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        let range = self.max_db - self.min_db;
        out.clear();
        out.reserve(self.bin_count());
        for (i, c) in self.scratch.iter().take(self.bin_count()).enumerate() {
            let magnitude = c.norm() * scale;
            let smoothed = self.smoothing * self.smoothed[i] + (1.0 - self.smoothing) * magnitude;
            self.smoothed[i] = smoothed;

            let db = if smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = ((db - self.min_db) / range * 255.0).clamp(0.0, 255.0);
            out.push(if scaled.is_finite() { scaled as u8 } else { 0 });
        }
    }

    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Mono PCM ring shared between a device callback and the analysis side
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    ring: EnergyHistoryBuffer,
}

impl AudioBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: EnergyHistoryBuffer::new(capacity),
        }
    }

    /// Append samples; non-finite values are stored as silence.
    pub fn push_samples(&mut self, data: &[f32]) {
        for &sample in data {
            self.ring.push(sample);
        }
    }

    /// Window of exactly `count` samples (capped at capacity) ending at the
    /// newest one. Left-padded with zeros until enough audio arrived.
    pub fn get_latest(&self, count: usize) -> Vec<f32> {
        let count = count.min(self.ring.capacity());
        let mut window = vec![0.0; count - count.min(self.ring.len())];
        window.extend(self.ring.iter_latest(count));
        window
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_capture_is_zero_padded_to_window() {
        let mut buffer = AudioBuffer::new(8);
        buffer.push_samples(&[0.25, -0.5]);

        assert_eq!(buffer.get_latest(4), vec![0.0, 0.0, 0.25, -0.5]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn window_ends_at_newest_sample_after_wrap() {
        let mut buffer = AudioBuffer::new(4);
        buffer.push_samples(&[0.1, 0.2, 0.3]);
        buffer.push_samples(&[0.4, f32::NAN, 0.6]);

        assert_eq!(buffer.get_latest(3), vec![0.4, 0.0, 0.6]);
        assert_eq!(buffer.get_latest(16).len(), 4);
    }

    #[test]
    fn silence_produces_empty_spectrum() {
        let mut spectrum = FftSpectrum::new(1024, 0.0, -100.0, -30.0);
        let mut bins = Vec::new();
        spectrum.snapshot(&vec![0.0; 1024], &mut bins);

        assert_eq!(bins.len(), 512);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let sample_rate = 48000.0;
        let fft_size = 1024;
        // Exactly bin 32
        let freq = 32.0 * sample_rate / fft_size as f32;
        let samples: Vec<f32> = (0..fft_size)
            .map(|i| 0.8 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect();

        let mut spectrum = FftSpectrum::new(fft_size, 0.0, -100.0, -30.0);
        let mut bins = Vec::new();
        spectrum.snapshot(&samples, &mut bins);

        let (peak_bin, peak) = bins
            .iter()
            .enumerate()
            .max_by_key(|(_, v)| **v)
            .map(|(i, &v)| (i, v))
            .unwrap();
        assert!((31..=33).contains(&peak_bin), "peak at bin {peak_bin}");
        assert!(peak > 200, "peak magnitude {peak}");
        assert!(bins[400] < peak / 2);
    }

    #[test]
    fn short_and_non_finite_input_is_tolerated() {
        let mut spectrum = FftSpectrum::new(256, 0.5, -100.0, -30.0);
        let mut bins = Vec::new();
        spectrum.snapshot(&[f32::NAN, 0.5, f32::INFINITY], &mut bins);
        assert_eq!(bins.len(), 128);
    }
}
