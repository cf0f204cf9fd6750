//! Engine status snapshot

use crate::audio::{CaptureMode, EnergySample};
use crate::director::VisualSystem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serializable view of the engine for debug overlays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub mode: CaptureMode,
    pub audio_enabled: bool,
    pub has_track_loaded: bool,

    /// Latest analysis reading
    pub sample: EnergySample,

    /// Capture beat clock tempo
    pub capture_bpm: f32,

    /// Director tempo estimate
    pub director_bpm: f32,

    pub beat_index: u64,
    pub metronome_level: f32,
    pub output_gain: f32,
    pub silence_ticks: u32,

    /// Active visual system, if the provider reports a known one
    pub active_system: Option<VisualSystem>,
    pub geometry: Option<usize>,

    /// Tempo of the current fallback profile
    pub fallback_tempo: f32,

    /// Smoothed beat energy per system name
    pub levels: BTreeMap<String, f32>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Idle,
            audio_enabled: true,
            has_track_loaded: false,
            sample: EnergySample::default(),
            capture_bpm: 120.0,
            director_bpm: 120.0,
            beat_index: 0,
            metronome_level: 0.0,
            output_gain: 0.0,
            silence_ticks: 0,
            active_system: None,
            geometry: None,
            fallback_tempo: 120.0,
            levels: BTreeMap::new(),
        }
    }
}
