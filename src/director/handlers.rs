//! Per-system mapping of band levels onto renderer parameters

use super::profiles::{MappingProfile, VisualSystem};
use crate::events::AudioLevels;
use crate::numeric::{clamp01, wrap_hue};

pub const GRID_DENSITY: &str = "gridDensity";
pub const HUE: &str = "hue";
pub const CHAOS: &str = "chaos";
pub const SPEED: &str = "speed";
pub const MORPH_FACTOR: &str = "morphFactor";
pub const INTENSITY: &str = "intensity";
pub const GEOMETRY: &str = "geometry";

/// One parameter write produced by a handler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterWrite {
    pub name: &'static str,
    pub value: f32,
}

fn write(name: &'static str, value: f32) -> ParameterWrite {
    ParameterWrite { name, value }
}

/// Parameter values for `system` driven by `levels`.
///
/// Every feature combination is clamped to [0, 1] before interpolating
/// across the profile range; hue is wrapped into [0, 360).
pub fn map_levels(
    system: VisualSystem,
    levels: &AudioLevels,
    profile: &MappingProfile,
) -> Vec<ParameterWrite> {
    let AudioLevels {
        bass,
        mid,
        high,
        energy,
    } = levels.clamped();
    let hue = |t: f32| wrap_hue(profile.hue.lerp(clamp01(t)));

    match system {
        VisualSystem::Faceted => vec![
            write(GRID_DENSITY, profile.density.lerp(clamp01(energy + bass * 0.4))),
            write(HUE, hue(bass * 0.6 + high * 0.4)),
            write(CHAOS, profile.chaos.lerp(clamp01(high * 0.8 + mid * 0.2))),
            write(SPEED, profile.speed.lerp(clamp01(energy * 0.7 + bass * 0.3))),
        ],
        VisualSystem::Quantum => vec![
            write(GRID_DENSITY, profile.density.lerp(clamp01(energy * 0.8 + mid * 0.4))),
            write(MORPH_FACTOR, profile.morph.lerp(clamp01(mid * 0.7 + high * 0.3))),
            write(HUE, hue(high * 0.7 + mid * 0.3)),
            write(INTENSITY, profile.intensity.lerp(clamp01(energy + high * 0.3))),
            write(SPEED, profile.speed.lerp(clamp01(energy * 0.6 + high * 0.4))),
        ],
        VisualSystem::Holographic => vec![
            write(INTENSITY, profile.intensity.lerp(clamp01(energy * 0.9 + bass * 0.3))),
            write(CHAOS, profile.chaos.lerp(clamp01(mid * 0.6 + high * 0.4))),
            write(HUE, hue(mid * 0.5 + high * 0.5)),
            write(MORPH_FACTOR, profile.morph.lerp(clamp01(energy * 0.5 + mid * 0.5))),
            write(SPEED, profile.speed.lerp(clamp01(energy * 0.8 + mid * 0.2))),
        ],
        VisualSystem::Polychora => vec![
            write(GRID_DENSITY, profile.density.lerp(clamp01(bass * 0.7 + energy * 0.3))),
            write(MORPH_FACTOR, profile.morph.lerp(clamp01(energy + bass * 0.2))),
            write(CHAOS, profile.chaos.lerp(clamp01(high * 0.5 + mid * 0.3))),
            write(HUE, hue(bass * 0.5 + high * 0.5)),
            write(SPEED, profile.speed.lerp(clamp01(energy))),
        ],
    }
}

/// Whether a beat with these levels asks for a geometry change
pub fn geometry_trigger(system: VisualSystem, levels: &AudioLevels) -> bool {
    let l = levels.clamped();
    match system {
        VisualSystem::Faceted => l.bass > 0.65 || l.energy > 0.75,
        VisualSystem::Quantum => l.high > 0.6 || l.energy > 0.7,
        VisualSystem::Holographic => (l.mid > 0.6 && l.energy > 0.45) || l.bass > 0.8,
        VisualSystem::Polychora => l.bass > 0.7 || l.energy > 0.8,
    }
}
