//! Live input acquisition
//!
//! The capture service asks a [`MicrophoneProvider`] for a live
//! [`SpectrumSource`]. With the `live-input` feature the default provider
//! opens a cpal input stream on a dedicated thread; without it every request
//! fails with [`CaptureError::NoInputDevice`] and the service degrades to the
//! synthetic fallback.

use super::capture::CaptureError;
use super::spectrum::SpectrumSource;
use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Requests access to a live input device
pub trait MicrophoneProvider: Send + Sync {
    fn request(&self) -> BoxFuture<'static, Result<Box<dyn SpectrumSource>, CaptureError>>;
}

/// Provider used when no capture backend is compiled in
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMicrophone;

impl MicrophoneProvider for NoMicrophone {
    fn request(&self) -> BoxFuture<'static, Result<Box<dyn SpectrumSource>, CaptureError>> {
        async { Err(CaptureError::NoInputDevice) }.boxed()
    }
}

/// Input device information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDevice {
    /// Unique identifier for the device
    pub id: String,

    /// Display name
    pub name: String,
}

/// Live input settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveInputConfig {
    /// Device name; `None` picks the host default
    pub device: Option<String>,
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for LiveInputConfig {
    fn default() -> Self {
        Self {
            device: None,
            fft_size: 1024,
            smoothing: 0.8,
            min_db: -100.0,
            max_db: -30.0,
        }
    }
}

/// The provider hosts get unless they inject their own
pub fn default_microphone(config: LiveInputConfig) -> Arc<dyn MicrophoneProvider> {
    #[cfg(feature = "live-input")]
    {
        Arc::new(live::CpalMicrophone::new(config))
    }
    #[cfg(not(feature = "live-input"))]
    {
        log::debug!(
            "Live input not compiled in; microphone requests for {:?} will fall back",
            config.device
        );
        Arc::new(NoMicrophone)
    }
}

/// List available input devices
pub fn list_input_devices() -> Result<Vec<InputDevice>, CaptureError> {
    #[cfg(feature = "live-input")]
    {
        live::list_input_devices()
    }
    #[cfg(not(feature = "live-input"))]
    {
        Ok(Vec::new())
    }
}

#[cfg(feature = "live-input")]
pub use live::{CpalMicrophone, LiveInput};

#[cfg(feature = "live-input")]
mod live {
    use super::{InputDevice, LiveInputConfig, MicrophoneProvider};
    use crate::audio::capture::CaptureError;
    use crate::audio::spectrum::{AudioBuffer, FftSpectrum, SpectrumSource};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, SampleFormat, StreamConfig};
    use futures_util::future::{BoxFuture, FutureExt};
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Commands sent to the input thread
    enum InputCommand {
        Stop,
    }

    /// Opens cpal input streams on request
    pub struct CpalMicrophone {
        config: LiveInputConfig,
    }

    impl CpalMicrophone {
        pub fn new(config: LiveInputConfig) -> Self {
            Self { config }
        }
    }

    impl MicrophoneProvider for CpalMicrophone {
        fn request(&self) -> BoxFuture<'static, Result<Box<dyn SpectrumSource>, CaptureError>> {
            let config = self.config.clone();
            async move {
                let input = LiveInput::open(config).await?;
                Ok(Box::new(input) as Box<dyn SpectrumSource>)
            }
            .boxed()
        }
    }

    /// Live input handle (Send)
    ///
    /// The cpal stream itself is not Send, so a dedicated thread owns it and
    /// only the sample ring is shared.
    pub struct LiveInput {
        command_tx: mpsc::Sender<InputCommand>,
        thread_handle: Option<JoinHandle<()>>,
        buffer: Arc<Mutex<AudioBuffer>>,
        spectrum: FftSpectrum,
        sample_rate: u32,
        device_name: String,
    }

    impl LiveInput {
        async fn open(config: LiveInputConfig) -> Result<Self, CaptureError> {
            let (command_tx, command_rx) = mpsc::channel();
            let (ready_tx, ready_rx) = oneshot::channel();
            let buffer = Arc::new(Mutex::new(AudioBuffer::new(48000 * 2)));
            let buffer_clone = buffer.clone();
            let device = config.device.clone();

            let thread_handle = thread::Builder::new()
                .name("live-input".to_string())
                .spawn(move || run_input_thread(device, command_rx, buffer_clone, ready_tx))
                .map_err(|e| CaptureError::ThreadError(e.to_string()))?;

            match ready_rx.await {
                Ok(Ok((sample_rate, device_name))) => {
                    log::info!("Live input ready: {} ({} Hz)", device_name, sample_rate);
                    Ok(Self {
                        command_tx,
                        thread_handle: Some(thread_handle),
                        buffer,
                        spectrum: FftSpectrum::new(
                            config.fft_size,
                            config.smoothing,
                            config.min_db,
                            config.max_db,
                        ),
                        sample_rate,
                        device_name,
                    })
                }
                Ok(Err(e)) => {
                    reap(thread_handle).await;
                    Err(e)
                }
                Err(_) => {
                    reap(thread_handle).await;
                    Err(CaptureError::ThreadError(
                        "input thread exited before reporting".to_string(),
                    ))
                }
            }
        }

        pub fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        /// Stop the input thread. Safe to call more than once.
        pub fn stop(&mut self) {
            let _ = self.command_tx.send(InputCommand::Stop);
            if let Some(handle) = self.thread_handle.take() {
                let _ = handle.join();
            }
        }
    }

    /// Join an input thread that is already on its way out without parking
    /// an async worker.
    async fn reap(handle: JoinHandle<()>) {
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => log::warn!("Live input thread panicked"),
            Err(e) => log::debug!("Joining live input thread failed: {}", e),
        }
    }

    impl SpectrumSource for LiveInput {
        fn frequency_data(&mut self, bins: &mut Vec<u8>) {
            // Copy under lock, analyze after releasing it so the device
            // callback is never blocked behind the FFT
            let samples = {
                let buf = self.buffer.lock();
                buf.get_latest(self.spectrum.fft_size())
            };
            self.spectrum.snapshot(&samples, bins);
        }

        fn describe(&self) -> String {
            format!("microphone ({})", self.device_name)
        }
    }

    impl Drop for LiveInput {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn run_input_thread(
        device_name: Option<String>,
        command_rx: mpsc::Receiver<InputCommand>,
        buffer: Arc<Mutex<AudioBuffer>>,
        ready_tx: oneshot::Sender<Result<(u32, String), CaptureError>>,
    ) {
        let stream = match open_stream(device_name, buffer) {
            Ok((stream, sample_rate, name)) => {
                let _ = ready_tx.send(Ok((sample_rate, name)));
                stream
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        loop {
            match command_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(InputCommand::Stop) => {
                    log::info!("Live input stopping");
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    log::info!("Live input channel disconnected");
                    break;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }
        }

        if let Err(e) = stream.pause() {
            log::debug!("Pausing input stream failed: {}", e);
        }
    }

    fn open_stream(
        device_name: Option<String>,
        buffer: Arc<Mutex<AudioBuffer>>,
    ) -> Result<(cpal::Stream, u32, String), CaptureError> {
        let host = cpal::default_host();

        let device = match &device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| CaptureError::ConfigError(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::SourceNotFound(name.clone()))?,
            None => host
                .default_input_device()
                .ok_or(CaptureError::NoInputDevice)?,
        };
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = device.default_input_config().map_err(|e| match e {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => CaptureError::DeviceUnavailable,
            other => CaptureError::ConfigError(other.to_string()),
        })?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        log::info!("Live input: {} Hz, {} channels", sample_rate, channels);

        {
            let mut buf = buffer.lock();
            *buf = AudioBuffer::new(sample_rate as usize * 2);
        }

        let stream = match config.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), buffer, channels),
            SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), buffer, channels),
            SampleFormat::U16 => build_stream::<u16>(&device, &config.into(), buffer, channels),
            _ => {
                return Err(CaptureError::ConfigError(
                    "Unsupported sample format".to_string(),
                ))
            }
        }
        .map_err(classify_build_error)?;

        stream
            .play()
            .map_err(|e| CaptureError::PlayError(e.to_string()))?;

        Ok((stream, sample_rate, name))
    }

    fn classify_build_error(e: cpal::BuildStreamError) -> CaptureError {
        match e {
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceUnavailable,
            other => {
                let msg = other.to_string();
                let lower = msg.to_lowercase();
                if lower.contains("permission") || lower.contains("denied") {
                    CaptureError::PermissionDenied(msg)
                } else {
                    CaptureError::StreamError(msg)
                }
            }
        }
    }

    /// Build input stream for given sample type
    fn build_stream<T: cpal::Sample + cpal::SizedSample>(
        device: &Device,
        config: &StreamConfig,
        buffer: Arc<Mutex<AudioBuffer>>,
        channels: usize,
    ) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        f32: cpal::FromSample<T>,
    {
        let channels = channels.max(1);
        device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Downmix interleaved frames to mono f32
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| {
                        let sum: f32 = frame
                            .iter()
                            .map(|s| <f32 as cpal::Sample>::from_sample(*s))
                            .sum();
                        sum / channels as f32
                    })
                    .collect();

                buffer.lock().push_samples(&mono);
            },
            |err| {
                log::error!("Live input stream error: {}", err);
            },
            None,
        )
    }

    /// List input devices (microphones)
    pub fn list_input_devices() -> Result<Vec<InputDevice>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| CaptureError::ConfigError(e.to_string()))?;

        Ok(devices
            .filter_map(|device| device.name().ok())
            .map(|name| InputDevice {
                id: format!("input:{}", name),
                name,
            })
            .collect())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn reaping_leaves_the_runtime_responsive() {
            let (release_tx, release_rx) = mpsc::channel::<()>();
            let handle = thread::spawn(move || {
                let _ = release_rx.recv();
            });

            // Single-threaded runtime: a join on this thread would never
            // let the sleep below complete
            let reaper = tokio::spawn(reap(handle));
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(!reaper.is_finished());

            release_tx.send(()).unwrap();
            reaper.await.unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_microphone_always_fails() {
        let result = NoMicrophone.request().await;
        assert!(matches!(result, Err(CaptureError::NoInputDevice)));
    }

    #[test]
    fn live_input_config_defaults() {
        let config = LiveInputConfig::default();
        assert_eq!(config.fft_size, 1024);
        assert!(config.device.is_none());
    }
}
