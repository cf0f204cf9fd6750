//! Band extraction from byte-magnitude frequency snapshots

use crate::events::AudioLevels;
use crate::numeric::{clamp01, finite_or};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Mean of `bins[start..end] / 255`.
///
/// `end` is clamped to the snapshot length so short or missing snapshots
/// read as quiet instead of panicking. An empty range yields 0.
pub fn average_range(bins: &[u8], start: usize, end: usize) -> f32 {
    let end = end.min(bins.len());
    if start >= end {
        return 0.0;
    }
    let sum: u32 = bins[start..end].iter().map(|&b| b as u32).sum();
    let count = (end - start) as f32;
    clamp01(sum as f32 / 255.0 / count)
}

/// Bin ranges for the three bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandRanges {
    pub bass: Range<usize>,
    pub mid: Range<usize>,
    pub high: Range<usize>,
}

impl Default for BandRanges {
    fn default() -> Self {
        // 512 bins from a 1024-point FFT at 48kHz (~47Hz per bin):
        // bass < ~375Hz, mid < ~3kHz, high < ~12kHz
        Self {
            bass: 0..8,
            mid: 8..64,
            high: 64..256,
        }
    }
}

/// One analysis reading per tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergySample {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    /// Mean of the three bands
    pub energy: f32,
    /// Energy change since the previous sample
    pub delta: f32,
    /// Exponential moving average of `delta`
    pub trend: f32,
    pub silence: bool,
    /// Milliseconds on the capture clock
    pub timestamp: f64,
}

impl EnergySample {
    pub fn levels(&self) -> AudioLevels {
        AudioLevels {
            bass: self.bass,
            mid: self.mid,
            high: self.high,
            energy: self.energy,
        }
    }
}

/// Turns snapshots into [`EnergySample`]s.
///
/// Band extraction is pure; the analyzer only remembers the previous energy
/// and the delta trend between calls.
#[derive(Debug, Clone)]
pub struct SpectralAnalyzer {
    ranges: BandRanges,
    silence_floor: f32,
    trend_smoothing: f32,
    prev_energy: Option<f32>,
    trend: f32,
}

impl SpectralAnalyzer {
    pub fn new(ranges: BandRanges, silence_floor: f32) -> Self {
        Self {
            ranges,
            silence_floor,
            trend_smoothing: 0.2,
            prev_energy: None,
            trend: 0.0,
        }
    }

    pub fn ranges(&self) -> &BandRanges {
        &self.ranges
    }

    /// Normalized band averages of one snapshot.
    pub fn bands(&self, bins: &[u8]) -> AudioLevels {
        let r = &self.ranges;
        AudioLevels::from_bands(
            average_range(bins, r.bass.start, r.bass.end),
            average_range(bins, r.mid.start, r.mid.end),
            average_range(bins, r.high.start, r.high.end),
        )
    }

    /// Analyze a snapshot and fold it into the running delta/trend state.
    pub fn sample(&mut self, bins: &[u8], timestamp: f64) -> EnergySample {
        let levels = self.bands(bins);
        self.observe(levels, timestamp)
    }

    /// Fold an externally produced level reading (e.g. the synthetic
    /// fallback trace) into the same bookkeeping as a real snapshot.
    pub fn observe(&mut self, levels: AudioLevels, timestamp: f64) -> EnergySample {
        let levels = levels.clamped();
        let energy = levels.energy;
        let delta = match self.prev_energy {
            Some(prev) => energy - prev,
            None => 0.0,
        };
        self.prev_energy = Some(energy);
        self.trend = finite_or(
            self.trend * (1.0 - self.trend_smoothing) + delta * self.trend_smoothing,
            0.0,
        );

        EnergySample {
            bass: levels.bass,
            mid: levels.mid,
            high: levels.high,
            energy,
            delta,
            trend: self.trend,
            silence: energy < self.silence_floor,
            timestamp,
        }
    }

    pub fn reset(&mut self) {
        self.prev_energy = None;
        self.trend = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f32, expected: f32, tolerance: f32) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} +/- {tolerance}, got {actual}"
        );
    }

    #[test]
    fn average_range_stays_normalized() {
        let loud = vec![255u8; 64];
        let mixed: Vec<u8> = (0..64).map(|i| (i * 4) as u8).collect();

        assert_approx(average_range(&loud, 0, 64), 1.0, 1e-6);
        let avg = average_range(&mixed, 0, 64);
        assert!((0.0..=1.0).contains(&avg));
    }

    #[test]
    fn empty_range_reads_zero() {
        let bins = vec![200u8; 16];
        assert_eq!(average_range(&bins, 4, 4), 0.0);
        assert_eq!(average_range(&bins, 10, 2), 0.0);
        assert_eq!(average_range(&[], 0, 8), 0.0);
    }

    #[test]
    fn short_snapshot_clamps_end_index() {
        let bins = vec![255u8; 4];
        // Only the four available bins are averaged
        assert_approx(average_range(&bins, 0, 64), 1.0, 1e-6);
        assert_eq!(average_range(&bins, 8, 64), 0.0);
    }

    #[test]
    fn sample_tracks_delta_and_trend() {
        let mut analyzer = SpectralAnalyzer::new(BandRanges::default(), 0.05);
        let quiet = vec![0u8; 512];
        let loud = vec![255u8; 512];

        let first = analyzer.sample(&quiet, 0.0);
        assert_eq!(first.energy, 0.0);
        assert_eq!(first.delta, 0.0);
        assert!(first.silence);

        let second = analyzer.sample(&loud, 16.0);
        assert_approx(second.energy, 1.0, 1e-6);
        assert_approx(second.delta, 1.0, 1e-6);
        assert_approx(second.trend, 0.2, 1e-6);
        assert!(!second.silence);
        assert_eq!(second.timestamp, 16.0);
    }

    #[test]
    fn energy_is_mean_of_bands() {
        let analyzer = SpectralAnalyzer::new(BandRanges::default(), 0.05);
        let mut bins = vec![0u8; 512];
        for b in bins.iter_mut().take(8) {
            *b = 255;
        }

        let levels = analyzer.bands(&bins);
        assert_approx(levels.bass, 1.0, 1e-6);
        assert_eq!(levels.mid, 0.0);
        assert_eq!(levels.high, 0.0);
        assert_approx(levels.energy, 1.0 / 3.0, 1e-6);
    }

    #[test]
    fn observe_clamps_external_levels() {
        let mut analyzer = SpectralAnalyzer::new(BandRanges::default(), 0.05);
        let sample = analyzer.observe(
            AudioLevels {
                bass: 2.0,
                mid: f32::NAN,
                high: 0.5,
                energy: 0.4,
            },
            0.0,
        );
        assert_eq!(sample.bass, 1.0);
        assert_eq!(sample.mid, 0.0);
        assert_approx(sample.energy, 0.4, 1e-6);
    }
}
