//! Track descriptors, loading/decoding and the looping track player

use super::capture::CaptureError;
use super::spectrum::{FftSpectrum, SpectrumSource};
use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

/// Mode a descriptor can request explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedMode {
    Microphone,
}

/// What to play
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackDescriptor {
    pub url: Option<String>,
    pub bpm: Option<f32>,
    pub playback_rate: Option<f32>,
    pub volume: Option<f32>,
    pub mode: Option<RequestedMode>,
}

impl TrackDescriptor {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn microphone() -> Self {
        Self {
            mode: Some(RequestedMode::Microphone),
            ..Default::default()
        }
    }

    pub fn with_bpm(mut self, bpm: f32) -> Self {
        self.bpm = Some(bpm);
        self
    }

    pub fn wants_microphone(&self) -> bool {
        self.mode == Some(RequestedMode::Microphone)
    }

    /// Beats per minute, falling back to `default` for missing or bogus values
    pub fn bpm_or(&self, default: f32) -> f32 {
        match self.bpm {
            Some(bpm) if bpm.is_finite() && bpm > 0.0 => bpm,
            _ => default,
        }
    }

    pub fn playback_rate(&self) -> f32 {
        match self.playback_rate {
            Some(rate) if rate.is_finite() && rate > 0.0 => rate,
            _ => 1.0,
        }
    }

    pub fn volume(&self) -> f32 {
        match self.volume {
            Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
            _ => 0.8,
        }
    }
}

/// Mono PCM ready for analysis
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTrack {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl DecodedTrack {
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate: sample_rate.max(1),
        }
    }

    /// Decode a WAV file held in memory, downmixing to mono.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, CaptureError> {
        let reader =
            hound::WavReader::new(Cursor::new(bytes)).map_err(|e| CaptureError::Decode(e.to_string()))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| CaptureError::Decode(e.to_string()))?,
            hound::SampleFormat::Int => {
                let bits = spec.bits_per_sample.clamp(1, 32) as i32;
                let scale = 1.0 / (1u64 << (bits - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| CaptureError::Decode(e.to_string()))?
            }
        };

        let mono: Vec<f32> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        if mono.is_empty() {
            return Err(CaptureError::Decode("track contains no samples".to_string()));
        }

        Ok(Self::from_samples(mono, spec.sample_rate))
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Fetches and decodes tracks without blocking the tick loop
pub trait TrackLoader: Send + Sync {
    fn load(&self, url: &str) -> BoxFuture<'static, Result<DecodedTrack, CaptureError>>;
}

/// Loads WAV files from the local filesystem (`file://` URLs or plain paths)
#[derive(Debug, Clone, Default)]
pub struct FileTrackLoader {
    /// Relative paths resolve against this directory when set
    pub base_dir: Option<PathBuf>,
}

impl FileTrackLoader {
    fn resolve(&self, url: &str) -> Result<PathBuf, CaptureError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(CaptureError::MissingUrl);
        }
        let path = match trimmed.strip_prefix("file://") {
            Some(rest) => PathBuf::from(rest),
            None if trimmed.contains("://") => {
                return Err(CaptureError::UnsupportedUrl(trimmed.to_string()))
            }
            None => PathBuf::from(trimmed),
        };
        Ok(match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        })
    }
}

impl TrackLoader for FileTrackLoader {
    fn load(&self, url: &str) -> BoxFuture<'static, Result<DecodedTrack, CaptureError>> {
        let resolved = self.resolve(url);
        async move {
            let path = resolved?;
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CaptureError::TrackNotFound(path.display().to_string())
                } else {
                    CaptureError::TrackFetch(format!("{}: {}", path.display(), e))
                }
            })?;
            log::debug!("Fetched {} bytes from {}", bytes.len(), path.display());

            tokio::task::spawn_blocking(move || DecodedTrack::from_wav_bytes(&bytes))
                .await
                .map_err(|e| CaptureError::Decode(e.to_string()))?
        }
        .boxed()
    }
}

/// Loops a decoded track and snapshots the window ending at the play cursor
pub struct TrackPlayer {
    track: Arc<DecodedTrack>,
    cursor: f64,
    spectrum: FftSpectrum,
    window: Vec<f32>,
}

impl TrackPlayer {
    pub fn new(track: Arc<DecodedTrack>, spectrum: FftSpectrum) -> Self {
        let window = Vec::with_capacity(spectrum.fft_size());
        Self {
            track,
            cursor: 0.0,
            spectrum,
            window,
        }
    }

    pub fn track(&self) -> &Arc<DecodedTrack> {
        &self.track
    }

    /// Play position in seconds
    pub fn position(&self) -> f64 {
        self.cursor / self.track.sample_rate() as f64
    }
}

impl SpectrumSource for TrackPlayer {
    fn frequency_data(&mut self, bins: &mut Vec<u8>) {
        let samples = self.track.samples();
        let n = self.spectrum.fft_size();
        self.window.clear();
        if !samples.is_empty() {
            let len = samples.len();
            let end = self.cursor as usize % len;
            let start = (end + len * (n / len + 1) - n) % len;
            self.window
                .extend((0..n.min(len)).map(|i| samples[(start + i) % len]));
        }
        self.spectrum.snapshot(&self.window, bins);
    }

    fn advance(&mut self, seconds: f64) {
        let len = self.track.samples().len() as f64;
        if len == 0.0 || !seconds.is_finite() || seconds <= 0.0 {
            return;
        }
        self.cursor = (self.cursor + seconds * self.track.sample_rate() as f64).rem_euclid(len);
    }

    fn describe(&self) -> String {
        format!("track ({:.1}s)", self.track.duration())
    }
}
