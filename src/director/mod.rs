//! Gameplay director: beat detection, tempo estimate and parameter mapping
//!
//! The director polls the capture service once per tick through
//! [`CaptureControl`] and never owns audio I/O. Beats (detected or
//! synthetic) are mapped onto the active visual system's parameters; a
//! per-system trigger and cooldown decide when the geometry moves on.

mod flow;
mod handlers;
mod profiles;
mod sinks;

pub use flow::{next_geometry, GeometryFlow, PendulumDirection};
pub use handlers::{geometry_trigger, map_levels, ParameterWrite};
pub use profiles::{
    geometry_name, mapping_profile, profile_table, MappingProfile, ParamRange, VisualSystem,
    GEOMETRY_COUNT, GEOMETRY_NAMES,
};
pub use sinks::{ActiveSystemProvider, ParameterSink, SharedParameters, SystemRegistry};

use crate::audio::{CaptureMode, EnergyHistoryBuffer, EnergySample};
use crate::events::{AudioLevels, BeatEvent, BeatSource, ProfileKey};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// What the director needs from the capture side each tick
pub trait CaptureControl {
    fn reactive_state(&self) -> EnergySample;
    fn mode(&self) -> CaptureMode;
    fn audio_enabled(&self) -> bool;
    /// Idempotent; no-op when already in fallback
    fn request_fallback(&mut self);
    /// Fallback beats produced since the last call
    fn take_synthetic_beats(&mut self) -> Vec<BeatEvent>;
}

/// Geometry-change cooldowns in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryCooldowns {
    pub faceted: f64,
    pub quantum: f64,
    pub holographic: f64,
    pub polychora: f64,
}

impl GeometryCooldowns {
    pub fn for_system(&self, system: VisualSystem) -> f64 {
        match system {
            VisualSystem::Faceted => self.faceted,
            VisualSystem::Quantum => self.quantum,
            VisualSystem::Holographic => self.holographic,
            VisualSystem::Polychora => self.polychora,
        }
    }
}

impl Default for GeometryCooldowns {
    fn default() -> Self {
        Self {
            faceted: 900.0,
            quantum: 650.0,
            holographic: 1100.0,
            polychora: 1400.0,
        }
    }
}

/// Director tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorConfig {
    /// Energy history length (ticks)
    pub history: usize,

    /// Multiplier on the rolling average for the beat threshold
    pub sensitivity: f32,

    /// Minimum margin of the threshold above the rolling average
    pub threshold_margin: f32,

    /// Minimum positive energy delta for a beat
    pub min_delta: f32,

    /// Minimum gap between detected beats (ms)
    pub min_beat_interval: f64,

    /// Energy below `avg * quiet_ratio` counts as quiet
    pub quiet_ratio: f32,

    /// Absolute quiet floor
    pub quiet_floor: f32,

    /// Quiet ticks before fallback is requested
    pub silence_threshold: u32,

    /// Silence counter decrement per healthy tick
    pub silence_recovery: u32,

    /// Tempo reported before the first measurable interval
    pub initial_bpm: f32,

    /// Weight of a new interval in the tempo estimate
    pub bpm_blend: f32,

    /// Weight of a new beat's energy in the per-system level average
    pub level_smoothing: f32,

    pub cooldowns: GeometryCooldowns,

    /// Seed for shuffle/burst draws; `None` seeds from the OS
    pub rng_seed: Option<u64>,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            history: 96,
            sensitivity: 1.35,
            threshold_margin: 0.05,
            min_delta: 0.02,
            min_beat_interval: 180.0,
            quiet_ratio: 0.6,
            quiet_floor: 0.02,
            silence_threshold: 240,
            silence_recovery: 2,
            initial_bpm: 120.0,
            bpm_blend: 0.25,
            level_smoothing: 0.2,
            cooldowns: GeometryCooldowns::default(),
            rng_seed: None,
        }
    }
}

/// Turns the capture stream into beats and parameter writes
pub struct GameplayDirector {
    config: DirectorConfig,
    provider: Arc<dyn ActiveSystemProvider>,
    sinks: HashMap<VisualSystem, Box<dyn ParameterSink>>,

    history: EnergyHistoryBuffer,
    last_detected: Option<f64>,
    last_registered: Option<f64>,
    current_bpm: f32,
    bpm_seeded: bool,
    silence_ticks: u32,

    levels: HashMap<VisualSystem, f32>,
    last_geometry_change: HashMap<VisualSystem, f64>,
    pendulum: HashMap<VisualSystem, PendulumDirection>,
    rng: StdRng,
}

impl GameplayDirector {
    pub fn new(config: DirectorConfig, provider: Arc<dyn ActiveSystemProvider>) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            history: EnergyHistoryBuffer::new(config.history),
            current_bpm: config.initial_bpm,
            config,
            provider,
            sinks: HashMap::new(),
            last_detected: None,
            last_registered: None,
            bpm_seeded: false,
            silence_ticks: 0,
            levels: HashMap::new(),
            last_geometry_change: HashMap::new(),
            pendulum: HashMap::new(),
            rng,
        }
    }

    pub fn config(&self) -> &DirectorConfig {
        &self.config
    }

    /// Route parameter writes for `system` to `sink`, replacing any previous
    /// sink.
    pub fn attach_sink(&mut self, system: VisualSystem, sink: impl ParameterSink + 'static) {
        self.sinks.insert(system, Box::new(sink));
    }

    pub fn detach_sink(&mut self, system: VisualSystem) -> bool {
        self.sinks.remove(&system).is_some()
    }

    /// Per-tick detection. Returns the beats registered this tick.
    pub fn update(&mut self, capture: &mut dyn CaptureControl, now_ms: f64) -> Vec<BeatEvent> {
        let sample = capture.reactive_state();
        let mode = capture.mode();
        let mut beats = Vec::new();

        if mode == CaptureMode::Idle {
            // No source: nothing to detect on, and a stopped service must
            // not be pushed into fallback.
            let _ = capture.take_synthetic_beats();
            self.silence_ticks = 0;
            return beats;
        }

        if mode == CaptureMode::Fallback {
            self.silence_ticks = 0;
            for synthetic in capture.take_synthetic_beats() {
                beats.push(self.register_beat(
                    BeatSource::Fallback,
                    synthetic.levels(),
                    now_ms,
                    synthetic.profile,
                ));
            }
            self.history.push(sample.energy);
            return beats;
        }

        // Synthetic beats left over from a fallback stretch are stale now
        let _ = capture.take_synthetic_beats();

        let enabled = capture.audio_enabled();
        let avg = self.history.mean();
        let threshold = (avg * self.config.sensitivity).max(avg + self.config.threshold_margin);
        let spaced = self
            .last_detected
            .map_or(true, |last| now_ms - last > self.config.min_beat_interval);

        if enabled && sample.energy > threshold && sample.delta > self.config.min_delta && spaced {
            self.last_detected = Some(now_ms);
            beats.push(self.register_beat(BeatSource::Audio, sample.levels(), now_ms, None));
        }

        let quiet_level = (avg * self.config.quiet_ratio).max(self.config.quiet_floor);
        if !enabled || sample.energy < quiet_level {
            self.silence_ticks += 1;
        } else {
            self.silence_ticks = self
                .silence_ticks
                .saturating_sub(self.config.silence_recovery);
        }
        self.history.push(sample.energy);

        if self.silence_ticks > self.config.silence_threshold {
            log::info!(
                "Silent for {} ticks; requesting fallback",
                self.silence_ticks
            );
            capture.request_fallback();
            self.silence_ticks = 0;
        }

        beats
    }

    /// Fold a beat into the tempo estimate and map it onto the active
    /// system.
    pub fn register_beat(
        &mut self,
        source: BeatSource,
        levels: AudioLevels,
        now_ms: f64,
        profile: Option<ProfileKey>,
    ) -> BeatEvent {
        let levels = levels.clamped();
        let now = match self.last_registered {
            Some(prev) if !(now_ms >= prev) => prev,
            _ if !now_ms.is_finite() => 0.0,
            _ => now_ms,
        };

        if let Some(prev) = self.last_registered {
            let elapsed = now - prev;
            if elapsed > 0.0 {
                let instant = (60_000.0 / elapsed) as f32;
                if self.bpm_seeded {
                    self.current_bpm = self.current_bpm * (1.0 - self.config.bpm_blend)
                        + instant * self.config.bpm_blend;
                } else {
                    self.current_bpm = instant;
                    self.bpm_seeded = true;
                }
            }
        }
        self.last_registered = Some(now);

        let active = self.active_key();
        if let Some(key) = active {
            self.apply_mapping(key, &levels, now);
        }

        BeatEvent::new(now, self.current_bpm, levels, source, profile.or(active))
    }

    fn active_key(&self) -> Option<ProfileKey> {
        let name = self.provider.active_system();
        let system = VisualSystem::from_name(&name)?;
        Some(ProfileKey {
            system,
            geometry: self.provider.active_geometry_index(system.name()),
        })
    }

    fn apply_mapping(&mut self, key: ProfileKey, levels: &AudioLevels, now: f64) {
        let system = key.system;
        let smoothing = self.config.level_smoothing;
        let level = self.levels.entry(system).or_insert(0.0);
        *level = *level * (1.0 - smoothing) + levels.energy * smoothing;

        if !self.sinks.contains_key(&system) {
            log::debug!("No parameter sink for {}; skipping writes", system);
            return;
        }

        let profile = mapping_profile(system, key.geometry);
        let writes = map_levels(system, levels, profile);

        let cooldown = self.config.cooldowns.for_system(system);
        let cooled = self
            .last_geometry_change
            .get(&system)
            .map_or(true, |last| now - last >= cooldown);
        let next = if cooled && geometry_trigger(system, levels) {
            let count = self.provider.geometry_count(system.name());
            let next = self.resolve_geometry_flow(system, key.geometry, profile.flow, count);
            self.last_geometry_change.insert(system, now);
            Some(next)
        } else {
            None
        };

        if let Some(sink) = self.sinks.get_mut(&system) {
            for w in &writes {
                sink.set_parameter(w.name, w.value);
            }
            if let Some(next) = next {
                sink.set_parameter(handlers::GEOMETRY, next as f32);
            }
        }

        if let Some(next) = next {
            log::debug!(
                "{} geometry {} -> {} ({:?})",
                system,
                geometry_name(key.geometry),
                geometry_name(next),
                profile.flow
            );
            self.provider.geometry_changed(system.name(), next);
        }
    }

    /// Next geometry for `system` under `flow`, keeping the system's
    /// pendulum direction.
    pub fn resolve_geometry_flow(
        &mut self,
        system: VisualSystem,
        current: usize,
        flow: GeometryFlow,
        count: usize,
    ) -> usize {
        let direction = self.pendulum.entry(system).or_default();
        next_geometry(flow, current, count, direction, &mut self.rng)
    }

    /// Context the fallback generator should follow
    pub fn fallback_context(&self) -> Option<(VisualSystem, usize)> {
        self.active_key().map(|key| (key.system, key.geometry))
    }

    pub fn current_bpm(&self) -> f32 {
        self.current_bpm
    }

    /// Smoothed beat energy of `system`
    pub fn level(&self, system: VisualSystem) -> f32 {
        self.levels.get(&system).copied().unwrap_or(0.0)
    }

    pub fn silence_ticks(&self) -> u32 {
        self.silence_ticks
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

    /// Scripted capture side
    struct FakeCapture {
        sample: EnergySample,
        mode: CaptureMode,
        enabled: bool,
        fallback_requests: usize,
        synthetic: Vec<BeatEvent>,
    }

    impl FakeCapture {
        fn new(mode: CaptureMode) -> Self {
            Self {
                sample: EnergySample::default(),
                mode,
                enabled: true,
                fallback_requests: 0,
                synthetic: Vec::new(),
            }
        }

        fn feed(&mut self, energy: f32, now_ms: f64) {
            let prev = self.sample.energy;
            self.sample = EnergySample {
                bass: energy,
                mid: energy,
                high: energy,
                energy,
                delta: energy - prev,
                trend: 0.0,
                silence: energy < 0.05,
                timestamp: now_ms,
            };
        }
    }

    impl CaptureControl for FakeCapture {
        fn reactive_state(&self) -> EnergySample {
            self.sample
        }

        fn mode(&self) -> CaptureMode {
            self.mode
        }

        fn audio_enabled(&self) -> bool {
            self.enabled
        }

        fn request_fallback(&mut self) {
            self.fallback_requests += 1;
            self.mode = CaptureMode::Fallback;
        }

        fn take_synthetic_beats(&mut self) -> Vec<BeatEvent> {
            std::mem::take(&mut self.synthetic)
        }
    }

    fn director(seed: u64, registry: &SystemRegistry) -> GameplayDirector {
        let config = DirectorConfig {
            rng_seed: Some(seed),
            ..Default::default()
        };
        GameplayDirector::new(config, Arc::new(registry.clone()))
    }

    /// 60 fps trace with a spike every 30 frames (500 ms)
    fn spike_energy(frame: usize) -> f32 {
        if frame % 30 == 15 {
            0.9
        } else {
            0.1
        }
    }

    fn frame_ms(frame: usize) -> f64 {
        frame as f64 * 1000.0 / 60.0
    }

    #[test]
    fn periodic_spikes_converge_to_120_bpm() {
        let registry = SystemRegistry::default();
        let mut director = director(1, &registry);
        let mut capture = FakeCapture::new(CaptureMode::Track);
        capture.feed(0.1, 0.0);

        let mut beats = Vec::new();
        for frame in 0..(30 * 9) {
            capture.feed(spike_energy(frame), frame_ms(frame));
            beats.extend(director.update(&mut capture, frame_ms(frame)));
        }

        assert!(beats.len() >= 8, "{} beats", beats.len());
        for (i, beat) in beats.iter().enumerate() {
            let spike = frame_ms(30 * i + 15);
            assert!((beat.timestamp - spike).abs() < 180.0);
            assert_eq!(beat.source, BeatSource::Audio);
        }
        assert_approx(beats[7].bpm, 120.0, 5.0);
        assert_approx(director.current_bpm(), 120.0, 5.0);
    }

    #[test]
    fn sustained_silence_requests_fallback_once() {
        let registry = SystemRegistry::default();
        let mut director = director(2, &registry);
        let mut capture = FakeCapture::new(CaptureMode::Microphone);

        for frame in 0..240 {
            capture.feed(0.0, frame_ms(frame));
            director.update(&mut capture, frame_ms(frame));
        }
        assert_eq!(capture.fallback_requests, 0);

        for frame in 240..2000 {
            capture.feed(0.0, frame_ms(frame));
            director.update(&mut capture, frame_ms(frame));
        }
        assert_eq!(capture.fallback_requests, 1);
        assert_eq!(capture.mode, CaptureMode::Fallback);
        assert_eq!(director.silence_ticks(), 0);
    }

    #[test]
    fn disabled_audio_counts_as_silence() {
        let registry = SystemRegistry::default();
        let mut director = director(3, &registry);
        let mut capture = FakeCapture::new(CaptureMode::Track);
        capture.enabled = false;

        let mut beats = Vec::new();
        for frame in 0..300 {
            capture.feed(spike_energy(frame), frame_ms(frame));
            beats.extend(director.update(&mut capture, frame_ms(frame)));
        }
        assert!(beats.is_empty());
        assert_eq!(capture.fallback_requests, 1);
    }

    #[test]
    fn idle_capture_is_never_detected_on() {
        let registry = SystemRegistry::default();
        let params = SharedParameters::new();
        let mut director = director(4, &registry);
        director.attach_sink(VisualSystem::Faceted, params.clone());
        let mut capture = FakeCapture::new(CaptureMode::Idle);

        let mut beats = Vec::new();
        for frame in 0..600 {
            // A frozen loud frame with a positive delta
            capture.feed(0.1, frame_ms(frame));
            capture.feed(0.9, frame_ms(frame));
            beats.extend(director.update(&mut capture, frame_ms(frame)));
        }

        assert!(beats.is_empty());
        assert!(params.is_empty());
        assert_eq!(capture.fallback_requests, 0);
        assert_eq!(capture.mode, CaptureMode::Idle);
    }

    #[test]
    fn fallback_beats_pass_through_handlers() {
        let registry = SystemRegistry::new(VisualSystem::Polychora);
        let params = SharedParameters::new();
        let mut director = director(4, &registry);
        director.attach_sink(VisualSystem::Polychora, params.clone());

        let mut capture = FakeCapture::new(CaptureMode::Fallback);
        let key = ProfileKey {
            system: VisualSystem::Polychora,
            geometry: 0,
        };
        capture.synthetic.push(BeatEvent::new(
            500.0,
            104.0,
            AudioLevels::from_bands(0.9, 0.4, 0.3),
            BeatSource::Fallback,
            Some(key),
        ));

        let beats = director.update(&mut capture, 500.0);
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].source, BeatSource::Fallback);
        assert_eq!(beats[0].profile, Some(key));

        let profile = mapping_profile(VisualSystem::Polychora, 0);
        let density = params.get("gridDensity").unwrap();
        assert!(density >= profile.density.min && density <= profile.density.max);
        // bass 0.9 trips the Polychora trigger; forward flow from 0
        assert_eq!(params.get("geometry"), Some(1.0));
        assert_eq!(registry.geometry(VisualSystem::Polychora), 1);
        assert!(director.level(VisualSystem::Polychora) > 0.0);
    }

    #[test]
    fn geometry_changes_respect_cooldown() {
        let registry = SystemRegistry::new(VisualSystem::Faceted);
        let params = SharedParameters::new();
        let mut director = director(5, &registry);
        director.attach_sink(VisualSystem::Faceted, params.clone());

        let loud = AudioLevels::from_bands(0.9, 0.8, 0.8);
        director.register_beat(BeatSource::Audio, loud, 0.0, None);
        assert_eq!(registry.geometry(VisualSystem::Faceted), 1);

        director.register_beat(BeatSource::Audio, loud, 500.0, None);
        assert_eq!(registry.geometry(VisualSystem::Faceted), 1);

        director.register_beat(BeatSource::Audio, loud, 950.0, None);
        // Geometry 1 uses the pendulum flow, heading up
        assert_eq!(registry.geometry(VisualSystem::Faceted), 2);
    }

    #[test]
    fn missing_sink_or_unknown_system_is_a_noop() {
        let registry = SystemRegistry::new(VisualSystem::Quantum);
        let mut director = director(6, &registry);
        let loud = AudioLevels::from_bands(0.9, 0.9, 0.9);

        let beat = director.register_beat(BeatSource::Audio, loud, 0.0, None);
        assert_eq!(beat.profile.map(|p| p.system), Some(VisualSystem::Quantum));
        assert_eq!(registry.geometry(VisualSystem::Quantum), 0);

        registry.set_active_system("wireframe");
        let beat = director.register_beat(BeatSource::Audio, loud, 100.0, None);
        assert_eq!(beat.profile, None);
        assert_eq!(director.fallback_context(), None);
    }

    #[test]
    fn register_beat_keeps_timestamps_monotonic() {
        let registry = SystemRegistry::default();
        let mut director = director(7, &registry);
        let levels = AudioLevels::from_bands(0.2, 0.2, 0.2);

        let a = director.register_beat(BeatSource::Audio, levels, 1000.0, None);
        let b = director.register_beat(BeatSource::Audio, levels, 900.0, None);
        let c = director.register_beat(BeatSource::Audio, levels, f64::NAN, None);
        assert!(a.timestamp <= b.timestamp && b.timestamp <= c.timestamp);
        assert!(director.current_bpm().is_finite());
    }

    fn replay(seed: Option<u64>) -> (Vec<BeatEvent>, HashMap<String, f32>) {
        let registry = SystemRegistry::new(VisualSystem::Quantum);
        let params = SharedParameters::new();
        let config = DirectorConfig {
            rng_seed: seed,
            ..Default::default()
        };
        let mut director = GameplayDirector::new(config, Arc::new(registry.clone()));
        director.attach_sink(VisualSystem::Quantum, params.clone());
        let mut capture = FakeCapture::new(CaptureMode::Track);

        let mut beats = Vec::new();
        for frame in 0..600 {
            let energy = if frame % 23 == 7 { 0.85 } else { 0.05 + (frame % 5) as f32 * 0.01 };
            capture.feed(energy, frame_ms(frame));
            beats.extend(director.update(&mut capture, frame_ms(frame)));
        }
        (beats, params.snapshot())
    }

    #[test]
    fn replay_is_deterministic_apart_from_random_draws() {
        let (seeded_a, params_a) = replay(Some(11));
        let (seeded_b, params_b) = replay(Some(11));
        assert!(!seeded_a.is_empty());
        assert_eq!(seeded_a, seeded_b);
        assert_eq!(params_a, params_b);

        // Unseeded runs may pick different geometries, never different timing
        let (free_a, _) = replay(None);
        let (free_b, _) = replay(None);
        assert_eq!(free_a.len(), free_b.len());
        for (a, b) in free_a.iter().zip(&free_b) {
            assert_eq!(a.timestamp, b.timestamp);
            assert_eq!(a.bpm, b.bpm);
            assert_eq!(a.levels(), b.levels());
        }
    }

    #[test]
    fn pendulum_direction_is_kept_per_system() {
        let registry = SystemRegistry::default();
        let mut director = director(8, &registry);

        assert_eq!(
            director.resolve_geometry_flow(VisualSystem::Faceted, 7, GeometryFlow::Pendulum, 8),
            6
        );
        // Quantum has its own direction, still heading up
        assert_eq!(
            director.resolve_geometry_flow(VisualSystem::Quantum, 3, GeometryFlow::Pendulum, 8),
            4
        );
        assert_eq!(
            director.resolve_geometry_flow(VisualSystem::Faceted, 6, GeometryFlow::Pendulum, 8),
            5
        );
    }
}
