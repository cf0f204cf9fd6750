//! Visual systems and their static mapping profile tables

use super::flow::GeometryFlow;
use crate::numeric::lerp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of geometries every visual system renders
pub const GEOMETRY_COUNT: usize = 8;

/// Geometry names, indexed like the profile tables
pub const GEOMETRY_NAMES: [&str; GEOMETRY_COUNT] = [
    "tetrahedron",
    "hypercube",
    "sphere",
    "torus",
    "klein_bottle",
    "fractal",
    "wave",
    "crystal",
];

/// Display name of a geometry index (wraps like the profile tables)
pub fn geometry_name(index: usize) -> &'static str {
    GEOMETRY_NAMES[index % GEOMETRY_COUNT]
}

/// Independent renderers driven by the director
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualSystem {
    Faceted,
    Quantum,
    Holographic,
    Polychora,
}

impl VisualSystem {
    pub const ALL: [VisualSystem; 4] = [
        VisualSystem::Faceted,
        VisualSystem::Quantum,
        VisualSystem::Holographic,
        VisualSystem::Polychora,
    ];

    /// Case-insensitive lookup of a provider-reported system name
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|s| s.name() == lower)
    }

    pub fn name(&self) -> &'static str {
        match self {
            VisualSystem::Faceted => "faceted",
            VisualSystem::Quantum => "quantum",
            VisualSystem::Holographic => "holographic",
            VisualSystem::Polychora => "polychora",
        }
    }
}

impl fmt::Display for VisualSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared output range of one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f32,
    pub max: f32,
}

impl ParamRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Interpolate with `t` clamped to [0, 1]; NaN maps to `min`.
    pub fn lerp(&self, t: f32) -> f32 {
        lerp(self.min, self.max, t)
    }
}

/// Parameter ranges, fallback tempo and geometry flow for one
/// (system, geometry) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MappingProfile {
    pub density: ParamRange,
    /// Degrees; may extend past 360 and is wrapped after interpolation
    pub hue: ParamRange,
    pub chaos: ParamRange,
    pub speed: ParamRange,
    pub morph: ParamRange,
    pub intensity: ParamRange,
    /// Synthetic fallback tempo; equals the fallback generator's base
    /// tempo plus the system's offset
    pub tempo: f32,
    pub flow: GeometryFlow,
}

#[allow(clippy::too_many_arguments)]
const fn profile(
    density: (f32, f32),
    hue: (f32, f32),
    chaos: (f32, f32),
    speed: (f32, f32),
    morph: (f32, f32),
    intensity: (f32, f32),
    tempo: f32,
    flow: GeometryFlow,
) -> MappingProfile {
    MappingProfile {
        density: ParamRange::new(density.0, density.1),
        hue: ParamRange::new(hue.0, hue.1),
        chaos: ParamRange::new(chaos.0, chaos.1),
        speed: ParamRange::new(speed.0, speed.1),
        morph: ParamRange::new(morph.0, morph.1),
        intensity: ParamRange::new(intensity.0, intensity.1),
        tempo,
        flow,
    }
}

use GeometryFlow::{Burst, Forward, Pendulum, Shuffle};

static FACETED: [MappingProfile; GEOMETRY_COUNT] = [
    profile((8.0, 22.0), (180.0, 260.0), (0.0, 0.25), (0.6, 1.4), (0.0, 0.6), (0.5, 0.9), 120.0, Forward),
    profile((10.0, 26.0), (200.0, 320.0), (0.05, 0.35), (0.7, 1.6), (0.1, 0.8), (0.55, 0.95), 128.0, Pendulum),
    profile((6.0, 18.0), (150.0, 230.0), (0.0, 0.2), (0.5, 1.2), (0.0, 0.5), (0.45, 0.85), 96.0, Forward),
    profile((9.0, 24.0), (300.0, 400.0), (0.05, 0.3), (0.6, 1.5), (0.2, 0.9), (0.5, 0.9), 110.0, Pendulum),
    profile((7.0, 20.0), (260.0, 340.0), (0.1, 0.4), (0.6, 1.4), (0.3, 1.0), (0.5, 0.9), 104.0, Shuffle),
    profile((12.0, 30.0), (20.0, 120.0), (0.15, 0.5), (0.8, 1.9), (0.2, 1.0), (0.6, 1.0), 132.0, Burst),
    profile((8.0, 21.0), (170.0, 250.0), (0.0, 0.3), (0.5, 1.3), (0.1, 0.7), (0.45, 0.85), 100.0, Forward),
    profile((11.0, 28.0), (320.0, 430.0), (0.1, 0.45), (0.7, 1.7), (0.2, 0.9), (0.55, 1.0), 116.0, Shuffle),
];

static QUANTUM: [MappingProfile; GEOMETRY_COUNT] = [
    profile((14.0, 34.0), (260.0, 340.0), (0.1, 0.45), (0.8, 1.8), (0.2, 1.2), (0.6, 1.0), 126.0, Shuffle),
    profile((16.0, 40.0), (280.0, 380.0), (0.15, 0.55), (0.9, 2.0), (0.3, 1.4), (0.65, 1.0), 134.0, Burst),
    profile((12.0, 30.0), (220.0, 300.0), (0.05, 0.35), (0.7, 1.5), (0.2, 1.0), (0.55, 0.95), 102.0, Pendulum),
    profile((15.0, 36.0), (300.0, 420.0), (0.1, 0.5), (0.8, 1.9), (0.3, 1.3), (0.6, 1.0), 116.0, Shuffle),
    profile((13.0, 32.0), (240.0, 330.0), (0.2, 0.6), (0.8, 1.8), (0.4, 1.5), (0.6, 1.0), 110.0, Burst),
    profile((18.0, 44.0), (330.0, 450.0), (0.25, 0.7), (1.0, 2.2), (0.4, 1.6), (0.7, 1.0), 138.0, Burst),
    profile((12.0, 28.0), (200.0, 280.0), (0.05, 0.4), (0.7, 1.6), (0.2, 1.1), (0.55, 0.95), 106.0, Forward),
    profile((16.0, 38.0), (250.0, 360.0), (0.15, 0.55), (0.9, 2.0), (0.3, 1.4), (0.65, 1.0), 122.0, Pendulum),
];

static HOLOGRAPHIC: [MappingProfile; GEOMETRY_COUNT] = [
    profile((10.0, 26.0), (300.0, 380.0), (0.05, 0.3), (0.5, 1.3), (0.1, 0.8), (0.6, 1.0), 116.0, Pendulum),
    profile((12.0, 30.0), (320.0, 420.0), (0.1, 0.4), (0.6, 1.5), (0.2, 1.0), (0.65, 1.0), 124.0, Pendulum),
    profile((8.0, 22.0), (180.0, 280.0), (0.0, 0.25), (0.4, 1.1), (0.1, 0.7), (0.55, 0.95), 92.0, Forward),
    profile((11.0, 28.0), (260.0, 350.0), (0.1, 0.35), (0.5, 1.4), (0.2, 0.9), (0.6, 1.0), 106.0, Shuffle),
    profile((9.0, 24.0), (200.0, 300.0), (0.15, 0.45), (0.5, 1.3), (0.3, 1.1), (0.6, 1.0), 100.0, Pendulum),
    profile((14.0, 34.0), (0.0, 100.0), (0.2, 0.55), (0.7, 1.7), (0.3, 1.2), (0.7, 1.0), 128.0, Burst),
    profile((9.0, 23.0), (160.0, 240.0), (0.05, 0.3), (0.4, 1.2), (0.1, 0.8), (0.55, 0.95), 96.0, Forward),
    profile((13.0, 32.0), (280.0, 400.0), (0.1, 0.45), (0.6, 1.6), (0.2, 1.0), (0.65, 1.0), 112.0, Shuffle),
];

static POLYCHORA: [MappingProfile; GEOMETRY_COUNT] = [
    profile((6.0, 18.0), (200.0, 280.0), (0.0, 0.2), (0.4, 1.0), (0.2, 1.0), (0.5, 0.9), 112.0, Forward),
    profile((8.0, 22.0), (230.0, 320.0), (0.05, 0.3), (0.5, 1.2), (0.3, 1.2), (0.55, 0.95), 120.0, Forward),
    profile((5.0, 15.0), (140.0, 220.0), (0.0, 0.2), (0.3, 0.9), (0.2, 0.9), (0.45, 0.85), 88.0, Pendulum),
    profile((7.0, 20.0), (290.0, 390.0), (0.05, 0.3), (0.4, 1.1), (0.3, 1.2), (0.5, 0.9), 102.0, Forward),
    profile((6.0, 17.0), (250.0, 330.0), (0.1, 0.35), (0.4, 1.1), (0.4, 1.4), (0.5, 0.9), 96.0, Pendulum),
    profile((9.0, 25.0), (340.0, 440.0), (0.15, 0.45), (0.6, 1.4), (0.4, 1.5), (0.6, 1.0), 124.0, Shuffle),
    profile((6.0, 18.0), (170.0, 250.0), (0.0, 0.25), (0.3, 1.0), (0.2, 1.0), (0.45, 0.85), 92.0, Forward),
    profile((8.0, 23.0), (300.0, 410.0), (0.1, 0.4), (0.5, 1.3), (0.3, 1.3), (0.55, 0.95), 108.0, Burst),
];

/// Profile table of one visual system
pub fn profile_table(system: VisualSystem) -> &'static [MappingProfile; GEOMETRY_COUNT] {
    match system {
        VisualSystem::Faceted => &FACETED,
        VisualSystem::Quantum => &QUANTUM,
        VisualSystem::Holographic => &HOLOGRAPHIC,
        VisualSystem::Polychora => &POLYCHORA,
    }
}

/// Profile for a geometry index (wraps past the table end)
pub fn mapping_profile(system: VisualSystem, geometry: usize) -> &'static MappingProfile {
    &profile_table(system)[geometry % GEOMETRY_COUNT]
}
