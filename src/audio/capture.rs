//! Capture service: owns the active source, the beat clock and the
//! track / microphone / fallback lifecycle

use super::analyzer::{EnergySample, SpectralAnalyzer};
use super::fallback::{FallbackPatternGenerator, FallbackProfile};
use super::history::EnergyHistoryBuffer;
use super::sources::{default_microphone, MicrophoneProvider};
use super::spectrum::{FftSpectrum, SpectrumSource};
use super::track::{DecodedTrack, FileTrackLoader, TrackDescriptor, TrackLoader, TrackPlayer};
use super::CaptureConfig;
use crate::director::{CaptureControl, VisualSystem};
use crate::events::{
    AudioLevels, BeatEvent, BeatSource, EventBus, MeasureEvent, ProfileKey, Subscription,
};
use crate::numeric::sanitize_dt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Audio capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No audio host available")]
    NoHost,

    #[error("No input device found")]
    NoInputDevice,

    #[error("Input permission denied: {0}")]
    PermissionDenied(String),

    #[error("Input device is not available")]
    DeviceUnavailable,

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Failed to build audio stream: {0}")]
    StreamError(String),

    #[error("Failed to start stream: {0}")]
    PlayError(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Thread error: {0}")]
    ThreadError(String),

    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("Failed to fetch track: {0}")]
    TrackFetch(String),

    #[error("Failed to decode track: {0}")]
    Decode(String),

    #[error("Track descriptor has no URL")]
    MissingUrl,

    #[error("Unsupported track URL: {0}")]
    UnsupportedUrl(String),

    #[error("No async runtime available for source acquisition")]
    NoRuntime,
}

/// Which source currently feeds the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Idle,
    Track,
    Microphone,
    Fallback,
}

/// Output of one capture tick
#[derive(Debug, Clone, Default)]
pub struct CaptureFrame {
    pub sample: EnergySample,
    pub beats: Vec<BeatEvent>,
    pub measures: Vec<MeasureEvent>,
}

enum ActiveSource {
    Idle,
    Track(TrackPlayer),
    Microphone(Box<dyn SpectrumSource>),
    Fallback,
}

impl ActiveSource {
    fn mode(&self) -> CaptureMode {
        match self {
            ActiveSource::Idle => CaptureMode::Idle,
            ActiveSource::Track(_) => CaptureMode::Track,
            ActiveSource::Microphone(_) => CaptureMode::Microphone,
            ActiveSource::Fallback => CaptureMode::Fallback,
        }
    }

    fn spectrum(&mut self) -> Option<&mut dyn SpectrumSource> {
        match self {
            ActiveSource::Track(player) => Some(player as &mut dyn SpectrumSource),
            ActiveSource::Microphone(source) => Some(source.as_mut() as &mut dyn SpectrumSource),
            ActiveSource::Idle | ActiveSource::Fallback => None,
        }
    }
}

enum Outcome {
    Track {
        descriptor: TrackDescriptor,
        result: Result<DecodedTrack, CaptureError>,
    },
    Microphone(Result<Box<dyn SpectrumSource>, CaptureError>),
}

/// Async outcome tagged with the generation that requested it
struct Pending {
    generation: u64,
    outcome: Outcome,
}

/// Microphone onset detection state
struct MicDetector {
    history: EnergyHistoryBuffer,
    last_beat: Option<f64>,
}

/// Owns the one active audio source and the beat clock.
///
/// Ticking is single-threaded. Track loads and device requests run as
/// tokio tasks and are applied at the start of the next `tick` (or by
/// [`settle`](Self::settle)); outcomes from an older generation are dropped.
pub struct AudioCaptureService {
    config: CaptureConfig,
    analyzer: SpectralAnalyzer,
    loader: Arc<dyn TrackLoader>,
    microphone: Arc<dyn MicrophoneProvider>,

    descriptor: TrackDescriptor,
    decoded: Option<Arc<DecodedTrack>>,
    source: ActiveSource,
    fallback: FallbackPatternGenerator,

    generation: u64,
    outcome_tx: mpsc::UnboundedSender<Pending>,
    outcome_rx: mpsc::UnboundedReceiver<Pending>,
    in_flight: usize,

    /// Seconds since construction
    clock: f64,
    audio_enabled: bool,
    sample: EnergySample,
    bins: Vec<u8>,

    beat_interval: f64,
    beat_accumulator: f64,
    beat_index: u64,
    measure_index: u64,
    metronome_level: f32,
    output_gain: f32,
    silence_timer: f64,
    mic: MicDetector,

    synthetic: Vec<BeatEvent>,
    beat_bus: EventBus<BeatEvent>,
    measure_bus: EventBus<MeasureEvent>,
}

impl AudioCaptureService {
    /// Service with the default file loader and microphone provider
    pub fn new(config: CaptureConfig) -> Self {
        let microphone = default_microphone(config.live.clone());
        Self::with_sources(config, Arc::new(FileTrackLoader::default()), microphone)
    }

    pub fn with_sources(
        config: CaptureConfig,
        loader: Arc<dyn TrackLoader>,
        microphone: Arc<dyn MicrophoneProvider>,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let analyzer = SpectralAnalyzer::new(config.bands.clone(), config.silence_floor);
        let fallback =
            FallbackPatternGenerator::new(config.fallback_system, config.fallback_geometry);
        let beat_interval = 60.0 / config.beat_clock_bpm() as f64;
        let mic = MicDetector {
            history: EnergyHistoryBuffer::new(config.mic_history),
            last_beat: None,
        };

        Self {
            config,
            analyzer,
            loader,
            microphone,
            descriptor: TrackDescriptor::default(),
            decoded: None,
            source: ActiveSource::Idle,
            fallback,
            generation: 0,
            outcome_tx,
            outcome_rx,
            in_flight: 0,
            clock: 0.0,
            audio_enabled: true,
            sample: EnergySample::default(),
            bins: Vec::new(),
            beat_interval,
            beat_accumulator: 0.0,
            beat_index: 0,
            measure_index: 0,
            metronome_level: 0.0,
            output_gain: 0.0,
            silence_timer: 0.0,
            mic,
            synthetic: Vec::new(),
            beat_bus: EventBus::new(),
            measure_bus: EventBus::new(),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    // ---- source lifecycle ----

    /// Start loading `descriptor`. Returns immediately; the current mode
    /// stays in effect until the load resolves.
    pub fn configure(&mut self, descriptor: TrackDescriptor) {
        self.generation += 1;
        self.descriptor = descriptor.clone();

        let wants_microphone = descriptor.wants_microphone();
        let url = descriptor
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        match url {
            Some(url) => {
                log::info!("Loading track {}", url);
                let load = self.loader.load(&url);
                let spawned = self.spawn_outcome(async move {
                    Outcome::Track {
                        descriptor,
                        result: load.await,
                    }
                });
                if !spawned {
                    self.degrade_from_track(wants_microphone);
                }
            }
            None if wants_microphone => self.request_microphone(),
            None => {
                log::warn!("{}; using fallback", CaptureError::MissingUrl);
                self.activate_fallback(true);
            }
        }
    }

    /// Activate an already decoded track synchronously.
    pub fn load_decoded(&mut self, track: DecodedTrack, descriptor: TrackDescriptor) {
        self.generation += 1;
        self.descriptor = descriptor;
        self.decoded = Some(Arc::new(track));
        self.activate_track();
    }

    /// Request a live input device. Denial or absence degrades to fallback.
    pub fn request_microphone(&mut self) {
        self.generation += 1;
        log::info!("Requesting microphone");
        let request = self.microphone.request();
        let spawned = self.spawn_outcome(async move { Outcome::Microphone(request.await) });
        if !spawned {
            self.activate_fallback(true);
        }
    }

    /// Restart the configured source from a clean beat clock. Idempotent.
    pub fn start(&mut self) {
        self.release_source();
        self.reset_counters();

        if self.decoded.is_some() {
            self.activate_track();
        } else if self.descriptor.wants_microphone() {
            self.request_microphone();
        } else {
            self.activate_fallback(true);
        }
    }

    /// Release the active source and discard pending loads. Safe to repeat.
    pub fn stop(&mut self) {
        self.generation += 1;
        if self.source.mode() != CaptureMode::Idle {
            log::info!("Stopping capture ({:?})", self.source.mode());
        }
        self.release_source();
        self.synthetic.clear();
    }

    /// Switch to synthetic energy, silencing any audible output.
    pub fn activate_fallback(&mut self, reset_phase: bool) {
        if self.source.mode() != CaptureMode::Fallback {
            log::info!(
                "Fallback active: {}/{} at {:.1} BPM",
                self.fallback.profile().system,
                self.fallback.profile().geometry,
                self.fallback.profile().tempo
            );
        }
        self.source = ActiveSource::Fallback;
        self.output_gain = 0.0;
        self.metronome_level = 0.0;
        self.silence_timer = 0.0;
        if reset_phase {
            self.fallback.reset_phase();
        }
    }

    /// Idempotent fallback request; a stopped service stays stopped.
    pub fn request_fallback(&mut self) {
        match self.source.mode() {
            CaptureMode::Idle | CaptureMode::Fallback => {}
            mode => {
                log::info!("Fallback requested while in {:?}", mode);
                self.activate_fallback(false);
            }
        }
    }

    /// Rebuild the fallback profile for a new visual context. Phase is kept.
    pub fn set_fallback_context(&mut self, system: VisualSystem, geometry: usize) {
        self.fallback.set_context(system, geometry);
    }

    /// Host switch for audio output; disabled audio reads as silence.
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
        self.refresh_gain();
    }

    /// Apply every async outcome still in flight.
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            match self.outcome_rx.recv().await {
                Some(pending) => {
                    self.in_flight -= 1;
                    self.apply(pending);
                }
                None => break,
            }
        }
    }

    // ---- per-frame update ----

    pub fn tick(&mut self, dt: f64) -> CaptureFrame {
        let dt = sanitize_dt(dt);
        self.drain_outcomes();
        self.clock += dt;
        let now_ms = self.timestamp();

        let mut frame = CaptureFrame::default();
        let mode = self.source.mode();

        let advance = match mode {
            CaptureMode::Track => dt * self.descriptor.playback_rate() as f64,
            _ => dt,
        };
        if let Some(source) = self.source.spectrum() {
            source.advance(advance);
            source.frequency_data(&mut self.bins);
            if !self.audio_enabled {
                self.bins.fill(0);
            }
            self.sample = self.analyzer.sample(&self.bins, now_ms);
        }

        match mode {
            CaptureMode::Track => self.update_track(dt, &mut frame),
            CaptureMode::Microphone => self.update_microphone(dt, &mut frame),
            CaptureMode::Fallback => self.update_fallback(dt, &mut frame),
            CaptureMode::Idle => {}
        }

        if mode != CaptureMode::Microphone {
            self.track_silence(dt);
            if !self.audio_enabled
                && self.source.mode() == CaptureMode::Track
                && self.silence_timer > self.config.silence_timeout
            {
                log::warn!("Audio disabled for {:.1}s; switching to fallback", self.silence_timer);
                self.activate_fallback(false);
                self.update_fallback(dt, &mut frame);
            }
        }

        frame.sample = self.sample;
        frame
    }

    fn update_track(&mut self, dt: f64, frame: &mut CaptureFrame) {
        let rate = self.descriptor.playback_rate() as f64;
        let decay = self.config.metronome_decay.max(1e-3);
        self.metronome_level *= (-dt / decay).exp() as f32;

        self.beat_accumulator += dt * rate;
        while self.beat_accumulator >= self.beat_interval {
            self.beat_accumulator -= self.beat_interval;
            self.metronome_level = 1.0;
            let beat = BeatEvent::new(
                self.timestamp(),
                self.bpm(),
                self.sample.levels(),
                BeatSource::Track,
                None,
            );
            self.push_beat(beat, frame);
        }
    }

    fn update_microphone(&mut self, dt: f64, frame: &mut CaptureFrame) {
        let energy = self.sample.energy;
        let avg = self.mic.history.mean();
        let std = self.mic.history.std_dev();
        self.mic.history.push(energy);

        let threshold = avg + std * self.config.mic_sensitivity + self.config.mic_offset;
        let ready = self
            .mic
            .last_beat
            .map_or(true, |last| self.clock - last >= self.config.min_mic_interval);

        if energy > threshold && ready {
            if let Some(last) = self.mic.last_beat {
                let observed = self.clock - last;
                if (self.config.min_mic_interval..=self.config.max_mic_interval)
                    .contains(&observed)
                {
                    self.beat_interval = self.beat_interval * (1.0 - self.config.mic_tempo_blend)
                        + observed * self.config.mic_tempo_blend;
                }
            }
            self.mic.last_beat = Some(self.clock);
            self.silence_timer = 0.0;
            let beat = BeatEvent::new(
                self.timestamp(),
                self.bpm(),
                self.sample.levels(),
                BeatSource::Microphone,
                None,
            );
            self.push_beat(beat, frame);
            return;
        }

        self.track_silence(dt);
        if self.silence_timer > self.config.silence_timeout {
            log::warn!(
                "No microphone beat for {:.1}s; switching to fallback",
                self.silence_timer
            );
            self.activate_fallback(false);
            self.update_fallback(dt, frame);
        }
    }

    fn update_fallback(&mut self, dt: f64, frame: &mut CaptureFrame) {
        let key = ProfileKey {
            system: self.fallback.profile().system,
            geometry: self.fallback.profile().geometry,
        };
        for step in self.fallback.tick(dt) {
            let beat = BeatEvent::new(
                self.timestamp(),
                self.fallback.profile().tempo,
                step,
                BeatSource::Fallback,
                Some(key),
            );
            self.synthetic.push(beat.clone());
            self.push_beat(beat, frame);
        }

        let trace = if self.audio_enabled {
            self.fallback.trace()
        } else {
            AudioLevels::default()
        };
        self.sample = self.analyzer.observe(trace, self.timestamp());
    }

    fn track_silence(&mut self, dt: f64) {
        if self.sample.energy < self.config.silence_floor {
            self.silence_timer += dt;
        } else {
            self.silence_timer =
                (self.silence_timer - dt * self.config.silence_decay).max(0.0);
        }
    }

    fn push_beat(&mut self, beat: BeatEvent, frame: &mut CaptureFrame) {
        self.beat_index += 1;
        self.beat_bus.emit(&beat);

        let per_measure = self.config.measure_beats.max(1) as u64;
        if self.beat_index % per_measure == 0 {
            self.measure_index += 1;
            let measure = MeasureEvent {
                timestamp: beat.timestamp,
                measure_index: self.measure_index,
                beat_index: self.beat_index,
                source: beat.source,
            };
            self.measure_bus.emit(&measure);
            frame.measures.push(measure);
        }
        frame.beats.push(beat);
    }

    // ---- async plumbing ----

    fn spawn_outcome<F>(&mut self, outcome: F) -> bool
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!("{}", CaptureError::NoRuntime);
                return false;
            }
        };
        let tx = self.outcome_tx.clone();
        let generation = self.generation;
        handle.spawn(async move {
            let outcome = outcome.await;
            let _ = tx.send(Pending {
                generation,
                outcome,
            });
        });
        self.in_flight += 1;
        true
    }

    fn drain_outcomes(&mut self) {
        while let Ok(pending) = self.outcome_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            self.apply(pending);
        }
    }

    fn apply(&mut self, pending: Pending) {
        if pending.generation != self.generation {
            log::debug!(
                "Discarding stale outcome (generation {} != {})",
                pending.generation,
                self.generation
            );
            return;
        }

        match pending.outcome {
            Outcome::Track { descriptor, result } => match result {
                Ok(track) => {
                    log::info!(
                        "Track decoded: {:.1}s at {} Hz",
                        track.duration(),
                        track.sample_rate()
                    );
                    self.descriptor = descriptor;
                    self.decoded = Some(Arc::new(track));
                    self.activate_track();
                }
                Err(e) => {
                    log::warn!("Track load failed: {}", e);
                    self.degrade_from_track(descriptor.wants_microphone());
                }
            },
            Outcome::Microphone(result) => match result {
                Ok(source) => {
                    log::info!("Microphone active: {}", source.describe());
                    self.source = ActiveSource::Microphone(source);
                    self.mic.history.clear();
                    self.mic.last_beat = None;
                    self.silence_timer = 0.0;
                    self.analyzer.reset();
                    self.refresh_gain();
                }
                Err(e) => {
                    log::warn!("Microphone unavailable: {}", e);
                    self.activate_fallback(true);
                }
            },
        }
    }

    fn degrade_from_track(&mut self, wants_microphone: bool) {
        if wants_microphone {
            self.request_microphone();
        } else {
            self.activate_fallback(true);
        }
    }

    fn activate_track(&mut self) {
        let Some(track) = self.decoded.clone() else {
            return;
        };
        let spectrum = FftSpectrum::new(
            self.config.live.fft_size,
            self.config.live.smoothing,
            self.config.live.min_db,
            self.config.live.max_db,
        );
        let player = TrackPlayer::new(track, spectrum);
        log::info!("Track active: {}", player.describe());

        self.source = ActiveSource::Track(player);
        self.beat_interval = 60.0 / self.descriptor.bpm_or(self.config.beat_clock_bpm()) as f64;
        self.beat_accumulator = 0.0;
        self.metronome_level = 0.0;
        self.silence_timer = 0.0;
        self.analyzer.reset();
        self.refresh_gain();
    }

    fn release_source(&mut self) {
        self.source = ActiveSource::Idle;
        self.output_gain = 0.0;
        self.metronome_level = 0.0;
        self.sample = EnergySample {
            silence: true,
            timestamp: self.timestamp(),
            ..EnergySample::default()
        };
    }

    fn reset_counters(&mut self) {
        self.beat_index = 0;
        self.measure_index = 0;
        self.beat_accumulator = 0.0;
        self.silence_timer = 0.0;
        self.mic.history.clear();
        self.mic.last_beat = None;
        self.synthetic.clear();
        self.analyzer.reset();
    }

    fn refresh_gain(&mut self) {
        self.output_gain = match self.source {
            ActiveSource::Track(_) if self.audio_enabled => self.descriptor.volume(),
            _ => 0.0,
        };
    }

    fn timestamp(&self) -> f64 {
        self.clock * 1000.0
    }

    // ---- events ----

    pub fn on_beat<F>(&self, listener: F) -> Subscription<BeatEvent>
    where
        F: FnMut(&BeatEvent) + Send + 'static,
    {
        self.beat_bus.subscribe(listener)
    }

    pub fn on_measure<F>(&self, listener: F) -> Subscription<MeasureEvent>
    where
        F: FnMut(&MeasureEvent) + Send + 'static,
    {
        self.measure_bus.subscribe(listener)
    }

    /// Fallback beats not yet consumed by the director
    pub fn take_synthetic_beats(&mut self) -> Vec<BeatEvent> {
        std::mem::take(&mut self.synthetic)
    }

    // ---- queries ----

    pub fn mode(&self) -> CaptureMode {
        self.source.mode()
    }

    pub fn is_microphone_active(&self) -> bool {
        self.mode() == CaptureMode::Microphone
    }

    pub fn is_fallback_active(&self) -> bool {
        self.mode() == CaptureMode::Fallback
    }

    pub fn has_track_loaded(&self) -> bool {
        self.decoded.is_some()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    /// Latest energy sample
    pub fn reactive_state(&self) -> EnergySample {
        self.sample
    }

    /// Seconds per beat of the capture clock
    pub fn beat_interval(&self) -> f64 {
        self.beat_interval
    }

    pub fn bpm(&self) -> f32 {
        (60.0 / self.beat_interval) as f32
    }

    pub fn beat_index(&self) -> u64 {
        self.beat_index
    }

    pub fn metronome_level(&self) -> f32 {
        self.metronome_level
    }

    pub fn output_gain(&self) -> f32 {
        self.output_gain
    }

    pub fn fallback_profile(&self) -> &FallbackProfile {
        self.fallback.profile()
    }

    /// Number of async loads/requests not yet applied
    pub fn pending_requests(&self) -> usize {
        self.in_flight
    }
}

impl CaptureControl for AudioCaptureService {
    fn reactive_state(&self) -> EnergySample {
        self.sample
    }

    fn mode(&self) -> CaptureMode {
        self.source.mode()
    }

    fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    fn request_fallback(&mut self) {
        AudioCaptureService::request_fallback(self);
    }

    fn take_synthetic_beats(&mut self) -> Vec<BeatEvent> {
        AudioCaptureService::take_synthetic_beats(self)
    }
}
