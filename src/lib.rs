//! Audio-to-parameter choreography engine
//!
//! A capture service turns a track, a live input or a synthetic fallback
//! into energy samples and a beat clock; the gameplay director detects
//! beats, tracks tempo and maps audio features onto the parameters of the
//! active visual system.

pub mod audio;
pub mod config;
pub mod director;
pub mod events;
pub mod numeric;
pub mod state;

use audio::{AudioCaptureService, EnergySample, MicrophoneProvider, TrackDescriptor, TrackLoader};
use director::{ActiveSystemProvider, GameplayDirector, VisualSystem};
use events::{BeatEvent, MeasureEvent};
use state::EngineStatus;

pub use config::{ConfigError, EngineConfig};

use std::sync::Arc;

/// Install the default `env_logger` backend (level from `RUST_LOG`,
/// `info` otherwise). Safe to call more than once.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}

/// Everything one engine tick produced
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub sample: EnergySample,
    /// Beats from the capture clock (track, microphone or fallback)
    pub capture_beats: Vec<BeatEvent>,
    pub measures: Vec<MeasureEvent>,
    /// Beats the director registered and mapped
    pub director_beats: Vec<BeatEvent>,
}

/// Owns one capture service and one director and ticks them in order
pub struct ChoreographyEngine {
    capture: AudioCaptureService,
    director: GameplayDirector,
    elapsed_ms: f64,
}

impl ChoreographyEngine {
    pub fn new(config: EngineConfig, provider: Arc<dyn ActiveSystemProvider>) -> Self {
        let capture = AudioCaptureService::new(config.capture);
        Self::assemble(capture, config.director, provider)
    }

    pub fn with_sources(
        config: EngineConfig,
        loader: Arc<dyn TrackLoader>,
        microphone: Arc<dyn MicrophoneProvider>,
        provider: Arc<dyn ActiveSystemProvider>,
    ) -> Self {
        let capture = AudioCaptureService::with_sources(config.capture, loader, microphone);
        Self::assemble(capture, config.director, provider)
    }

    fn assemble(
        mut capture: AudioCaptureService,
        director_config: director::DirectorConfig,
        provider: Arc<dyn ActiveSystemProvider>,
    ) -> Self {
        let director = GameplayDirector::new(director_config, provider);
        if let Some((system, geometry)) = director.fallback_context() {
            capture.set_fallback_context(system, geometry);
        }
        Self {
            capture,
            director,
            elapsed_ms: 0.0,
        }
    }

    pub fn capture(&self) -> &AudioCaptureService {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut AudioCaptureService {
        &mut self.capture
    }

    pub fn director(&self) -> &GameplayDirector {
        &self.director
    }

    pub fn director_mut(&mut self) -> &mut GameplayDirector {
        &mut self.director
    }

    /// Shorthand for [`AudioCaptureService::configure`]
    pub fn configure(&mut self, descriptor: TrackDescriptor) {
        self.capture.configure(descriptor);
    }

    /// One frame: fallback context sync, capture analysis, then director
    /// detection on the fresh sample.
    pub fn tick(&mut self, dt: f64) -> TickReport {
        let dt = numeric::sanitize_dt(dt);
        if let Some((system, geometry)) = self.director.fallback_context() {
            self.capture.set_fallback_context(system, geometry);
        }

        let frame = self.capture.tick(dt);
        self.elapsed_ms += dt * 1000.0;
        let director_beats = self.director.update(&mut self.capture, self.elapsed_ms);

        TickReport {
            sample: frame.sample,
            capture_beats: frame.beats,
            measures: frame.measures,
            director_beats,
        }
    }

    /// Milliseconds of ticked time
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    pub fn status(&self) -> EngineStatus {
        let context = self.director.fallback_context();
        let levels = VisualSystem::ALL
            .iter()
            .map(|s| (s.name().to_string(), self.director.level(*s)))
            .collect();

        EngineStatus {
            mode: self.capture.mode(),
            audio_enabled: self.capture.audio_enabled(),
            has_track_loaded: self.capture.has_track_loaded(),
            sample: self.capture.reactive_state(),
            capture_bpm: self.capture.bpm(),
            director_bpm: self.director.current_bpm(),
            beat_index: self.capture.beat_index(),
            metronome_level: self.capture.metronome_level(),
            output_gain: self.capture.output_gain(),
            silence_ticks: self.director.silence_ticks(),
            active_system: context.map(|(system, _)| system),
            geometry: context.map(|(_, geometry)| geometry),
            fallback_tempo: self.capture.fallback_profile().tempo,
            levels,
        }
    }
}

impl Default for ChoreographyEngine {
    fn default() -> Self {
        Self::new(
            EngineConfig::default(),
            Arc::new(director::SystemRegistry::default()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio::{CaptureMode, FileTrackLoader, NoMicrophone};
    use director::{SharedParameters, SystemRegistry};
    use events::BeatSource;

    fn engine(registry: &SystemRegistry) -> ChoreographyEngine {
        let mut config = EngineConfig::default();
        config.director.rng_seed = Some(9);
        ChoreographyEngine::with_sources(
            config,
            Arc::new(FileTrackLoader::default()),
            Arc::new(NoMicrophone),
            Arc::new(registry.clone()),
        )
    }

    #[tokio::test]
    async fn missing_track_keeps_the_show_running() {
        init_logging();
        let registry = SystemRegistry::new(VisualSystem::Holographic);
        registry.set_geometry(VisualSystem::Holographic, 2);
        let params = SharedParameters::new();

        let mut engine = engine(&registry);
        engine
            .director_mut()
            .attach_sink(VisualSystem::Holographic, params.clone());
        engine.configure(TrackDescriptor::from_url("file:///no/such/track.wav"));
        engine.capture_mut().settle().await;
        assert_eq!(engine.capture().mode(), CaptureMode::Fallback);

        let mut capture_beats = 0;
        let mut director_beats = Vec::new();
        for _ in 0..240 {
            let report = engine.tick(1.0 / 60.0);
            capture_beats += report.capture_beats.len();
            director_beats.extend(report.director_beats);
        }

        assert!(capture_beats >= 5);
        assert_eq!(director_beats.len(), capture_beats);
        assert!(director_beats.iter().all(|b| b.source == BeatSource::Fallback));
        assert!(params.get("intensity").is_some());
        assert!(params.get("hue").is_some());

        let profile = engine.capture().fallback_profile();
        assert_eq!(profile.system, VisualSystem::Holographic);
    }

    #[test]
    fn fallback_follows_active_system() {
        let registry = SystemRegistry::new(VisualSystem::Faceted);
        let mut engine = engine(&registry);
        engine.capture_mut().activate_fallback(true);
        engine.tick(0.01);
        assert_eq!(engine.capture().fallback_profile().system, VisualSystem::Faceted);

        registry.set_active_system("quantum");
        registry.set_geometry(VisualSystem::Quantum, 3);
        engine.tick(0.01);
        let profile = engine.capture().fallback_profile();
        assert_eq!(profile.system, VisualSystem::Quantum);
        assert_eq!(profile.geometry, 3);
    }

    #[test]
    fn stopped_capture_produces_no_director_beats() {
        let registry = SystemRegistry::new(VisualSystem::Faceted);
        let params = SharedParameters::new();
        let mut engine = engine(&registry);
        engine
            .director_mut()
            .attach_sink(VisualSystem::Faceted, params.clone());
        engine.capture_mut().activate_fallback(true);

        let mut before = 0;
        for _ in 0..120 {
            before += engine.tick(1.0 / 60.0).director_beats.len();
        }
        assert!(before > 0);

        engine.capture_mut().stop();
        let written = params.snapshot();
        for _ in 0..120 {
            let report = engine.tick(1.0 / 60.0);
            assert!(report.director_beats.is_empty());
            assert!(report.capture_beats.is_empty());
        }
        assert_eq!(engine.capture().mode(), CaptureMode::Idle);
        assert_eq!(params.snapshot(), written);
        assert_eq!(engine.status().sample.energy, 0.0);
    }

    #[test]
    fn status_reflects_engine_state() {
        let registry = SystemRegistry::new(VisualSystem::Polychora);
        let mut engine = engine(&registry);
        engine.tick(0.5);

        let status = engine.status();
        assert_eq!(status.mode, CaptureMode::Idle);
        assert_eq!(status.active_system, Some(VisualSystem::Polychora));
        assert_eq!(status.levels.len(), 4);
        assert!((engine.elapsed_ms() - 500.0).abs() < 1e-9);
        assert!(serde_json::to_string(&status).is_ok());
    }
}
