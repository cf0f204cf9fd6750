//! Synthetic energy when no usable audio exists
//!
//! Every geometry has a short base pattern and tempo; every visual system
//! scales it with its own band multipliers and tempo offset. Output is fully
//! deterministic for a given (system, geometry, elapsed time).

use crate::director::VisualSystem;
use crate::events::AudioLevels;
use crate::numeric::clamp01;
use serde::Serialize;

const fn step(bass: f32, mid: f32, high: f32, energy: f32) -> AudioLevels {
    AudioLevels {
        bass,
        mid,
        high,
        energy,
    }
}

/// Base tempo per geometry
const BASE_TEMPOS: [f32; 8] = [120.0, 128.0, 96.0, 110.0, 104.0, 132.0, 100.0, 116.0];

/// Base patterns indexed by geometry
static BASE_PATTERNS: [&[AudioLevels]; 8] = [
    // Tetrahedron: four-on-the-floor
    &[
        step(0.85, 0.40, 0.30, 0.62),
        step(0.45, 0.55, 0.35, 0.48),
        step(0.80, 0.45, 0.40, 0.60),
        step(0.40, 0.60, 0.55, 0.52),
    ],
    // Hypercube: syncopated
    &[
        step(0.90, 0.35, 0.25, 0.65),
        step(0.30, 0.65, 0.45, 0.50),
        step(0.55, 0.40, 0.60, 0.52),
        step(0.85, 0.50, 0.35, 0.63),
        step(0.35, 0.70, 0.55, 0.55),
        step(0.50, 0.45, 0.70, 0.56),
    ],
    // Sphere: slow swell
    &[
        step(0.60, 0.50, 0.30, 0.50),
        step(0.65, 0.60, 0.40, 0.58),
        step(0.70, 0.70, 0.50, 0.66),
        step(0.55, 0.55, 0.45, 0.52),
    ],
    // Torus: rolling mids
    &[
        step(0.70, 0.55, 0.35, 0.58),
        step(0.40, 0.75, 0.40, 0.55),
        step(0.60, 0.60, 0.55, 0.60),
        step(0.35, 0.80, 0.50, 0.58),
        step(0.75, 0.45, 0.30, 0.56),
    ],
    // Klein bottle: uneven
    &[
        step(0.80, 0.30, 0.60, 0.60),
        step(0.35, 0.60, 0.75, 0.58),
        step(0.65, 0.70, 0.40, 0.62),
    ],
    // Fractal: busy highs
    &[
        step(0.75, 0.45, 0.70, 0.66),
        step(0.40, 0.50, 0.85, 0.62),
        step(0.65, 0.40, 0.80, 0.64),
        step(0.35, 0.60, 0.90, 0.66),
        step(0.80, 0.55, 0.65, 0.70),
        step(0.45, 0.45, 0.95, 0.66),
        step(0.70, 0.60, 0.75, 0.70),
        step(0.50, 0.50, 0.85, 0.64),
    ],
    // Wave: breathing
    &[
        step(0.50, 0.45, 0.40, 0.46),
        step(0.65, 0.60, 0.50, 0.60),
        step(0.80, 0.70, 0.55, 0.70),
        step(0.65, 0.60, 0.50, 0.60),
    ],
    // Crystal: sparse accents
    &[
        step(0.90, 0.50, 0.80, 0.74),
        step(0.30, 0.35, 0.55, 0.40),
        step(0.45, 0.40, 0.70, 0.52),
        step(0.30, 0.35, 0.60, 0.42),
    ],
];

/// Per-system scaling of the base patterns
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemModifier {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    pub bpm_offset: f32,
}

impl SystemModifier {
    pub fn for_system(system: VisualSystem) -> Self {
        match system {
            VisualSystem::Faceted => Self {
                bass: 1.0,
                mid: 0.9,
                high: 0.85,
                bpm_offset: 0.0,
            },
            VisualSystem::Quantum => Self {
                bass: 0.85,
                mid: 1.1,
                high: 1.2,
                bpm_offset: 6.0,
            },
            VisualSystem::Holographic => Self {
                bass: 0.9,
                mid: 1.05,
                high: 1.15,
                bpm_offset: -4.0,
            },
            VisualSystem::Polychora => Self {
                bass: 1.2,
                mid: 0.95,
                high: 0.9,
                bpm_offset: -8.0,
            },
        }
    }

    fn apply(&self, base: &AudioLevels) -> AudioLevels {
        let energy_scale = (self.bass + self.mid + self.high) / 3.0;
        AudioLevels {
            bass: clamp01(base.bass * self.bass),
            mid: clamp01(base.mid * self.mid),
            high: clamp01(base.high * self.high),
            energy: clamp01(base.energy * energy_scale),
        }
    }
}

/// Scaled pattern and tempo for one (system, geometry) context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackProfile {
    pub system: VisualSystem,
    pub geometry: usize,
    pub tempo: f32,
    pub steps: Vec<AudioLevels>,
}

impl FallbackProfile {
    pub fn build(system: VisualSystem, geometry: usize) -> Self {
        let slot = geometry % BASE_PATTERNS.len();
        let modifier = SystemModifier::for_system(system);
        Self {
            system,
            geometry,
            tempo: (BASE_TEMPOS[slot] + modifier.bpm_offset).clamp(60.0, 200.0),
            steps: BASE_PATTERNS[slot].iter().map(|s| modifier.apply(s)).collect(),
        }
    }

    /// Seconds between synthetic beats
    pub fn interval(&self) -> f64 {
        60.0 / self.tempo as f64
    }

    /// Step for beat number `n` (wrapping)
    pub fn step(&self, n: usize) -> AudioLevels {
        self.steps[n % self.steps.len()]
    }
}

/// Step emitted by beat `beat_number` of the (system, geometry) pattern.
pub fn fallback_step(system: VisualSystem, geometry: usize, beat_number: usize) -> AudioLevels {
    FallbackProfile::build(system, geometry).step(beat_number)
}

/// Stateful phase keeper over a [`FallbackProfile`]
#[derive(Debug, Clone)]
pub struct FallbackPatternGenerator {
    profile: FallbackProfile,
    phase: f64,
    index: usize,
    last_step: Option<AudioLevels>,
    since_step: f64,
}

impl FallbackPatternGenerator {
    pub fn new(system: VisualSystem, geometry: usize) -> Self {
        Self {
            profile: FallbackProfile::build(system, geometry),
            phase: 0.0,
            index: 0,
            last_step: None,
            since_step: 0.0,
        }
    }

    pub fn profile(&self) -> &FallbackProfile {
        &self.profile
    }

    /// Index of the step the next beat will carry
    pub fn step_index(&self) -> usize {
        self.index
    }

    /// Rebuild the profile for a new context. Phase and step index carry
    /// over; the index wraps into the new pattern length.
    pub fn set_context(&mut self, system: VisualSystem, geometry: usize) {
        if self.profile.system == system && self.profile.geometry == geometry {
            return;
        }
        self.profile = FallbackProfile::build(system, geometry);
        self.index %= self.profile.steps.len();
        log::debug!(
            "Fallback profile rebuilt for {:?}/{} at {:.1} BPM",
            system,
            geometry,
            self.profile.tempo
        );
    }

    pub fn reset_phase(&mut self) {
        self.phase = 0.0;
        self.index = 0;
        self.last_step = None;
        self.since_step = 0.0;
    }

    /// Advance by `dt` seconds; returns the steps of every beat crossed.
    pub fn tick(&mut self, dt: f64) -> Vec<AudioLevels> {
        let interval = self.profile.interval();
        self.phase += dt;
        self.since_step += dt;

        let mut emitted = Vec::new();
        while self.phase >= interval {
            self.phase -= interval;
            let step = self.profile.step(self.index);
            self.index = (self.index + 1) % self.profile.steps.len();
            self.last_step = Some(step);
            self.since_step = self.phase;
            emitted.push(step);
        }
        emitted
    }

    /// Current synthetic level: the last beat's step shaped by a decaying
    /// pulse, or a dim idle glow before the first beat.
    pub fn trace(&self) -> AudioLevels {
        let (base, gain) = match self.last_step {
            Some(step) => {
                let decay = (self.profile.interval() * 0.35).max(1e-3);
                let pulse = (-self.since_step / decay).exp() as f32;
                (step, 0.35 + 0.65 * pulse)
            }
            None => (self.profile.step(0), 0.35),
        };
        AudioLevels {
            bass: clamp01(base.bass * gain),
            mid: clamp01(base.mid * gain),
            high: clamp01(base.high * gain),
            energy: clamp01(base.energy * gain),
        }
    }
}
