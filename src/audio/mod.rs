//! Audio capture and analysis module

mod analyzer;
mod capture;
mod fallback;
mod history;
mod sources;
mod spectrum;
mod track;

pub use analyzer::{average_range, BandRanges, EnergySample, SpectralAnalyzer};
pub use capture::{AudioCaptureService, CaptureError, CaptureFrame, CaptureMode};
pub use fallback::{fallback_step, FallbackPatternGenerator, FallbackProfile, SystemModifier};
pub use history::EnergyHistoryBuffer;
#[cfg(feature = "live-input")]
pub use sources::{CpalMicrophone, LiveInput};
pub use sources::{
    default_microphone, list_input_devices, InputDevice, LiveInputConfig, MicrophoneProvider,
    NoMicrophone,
};
pub use spectrum::{AudioBuffer, FftSpectrum, SpectrumSource};
pub use track::{
    DecodedTrack, FileTrackLoader, RequestedMode, TrackDescriptor, TrackLoader, TrackPlayer,
};

use crate::director::VisualSystem;
use serde::{Deserialize, Serialize};

/// Capture and analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Bin ranges for bass/mid/high
    pub bands: BandRanges,

    /// Energy below this counts as silence
    pub silence_floor: f32,

    /// Tempo used when a descriptor carries no BPM
    pub default_bpm: f32,

    /// Capture beats per measure event
    pub measure_beats: u32,

    /// Microphone energy history length (ticks)
    pub mic_history: usize,

    /// Standard deviations above the mean a microphone onset needs
    pub mic_sensitivity: f32,

    /// Constant added to the microphone onset threshold
    pub mic_offset: f32,

    /// Shortest accepted gap between microphone beats (seconds)
    pub min_mic_interval: f64,

    /// Longest inter-onset gap still folded into the tempo (seconds)
    pub max_mic_interval: f64,

    /// Weight of an observed interval when folding it into the tempo
    pub mic_tempo_blend: f64,

    /// Seconds of silence before degrading to fallback
    pub silence_timeout: f64,

    /// Rate at which the silence timer drains while energy is healthy
    pub silence_decay: f64,

    /// Metronome envelope decay time (seconds)
    pub metronome_decay: f64,

    /// Fallback context until the host reports one
    pub fallback_system: VisualSystem,
    pub fallback_geometry: usize,

    /// Device selection and FFT settings for live input and track analysis
    pub live: LiveInputConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            bands: BandRanges::default(),
            silence_floor: 0.05,
            default_bpm: 120.0,
            measure_beats: 4,
            mic_history: 48,
            mic_sensitivity: 0.9,
            mic_offset: 0.02,
            min_mic_interval: 0.2,
            max_mic_interval: 1.8,
            mic_tempo_blend: 0.3,
            silence_timeout: 1.2,
            silence_decay: 0.75,
            metronome_decay: 0.12,
            fallback_system: VisualSystem::Faceted,
            fallback_geometry: 0,
            live: LiveInputConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// `default_bpm`, with non-finite or non-positive values replaced so
    /// the beat interval stays positive
    pub fn beat_clock_bpm(&self) -> f32 {
        crate::numeric::finite_or(self.default_bpm, 120.0).max(1.0)
    }
}
