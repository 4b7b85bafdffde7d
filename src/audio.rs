//! Decoded speech audio and the sinks that play it.
//!
//! TTS returns base64 16-bit little-endian mono PCM. A sink's `play` future
//! resolves when the utterance ends naturally; dropping it stops playback.
//! [`CpalSink`] drives the speakers; [`PacedSink`] stands in when there is no
//! output device.

use crate::error::{CompanionError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};

/// Sample rate of Gemini TTS output.
pub const TTS_SAMPLE_RATE: u32 = 24_000;

#[derive(Clone, Debug, PartialEq)]
pub struct AudioClip {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Interprets raw bytes as 16-bit little-endian mono PCM. A trailing odd byte is dropped.
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples, sample_rate)
    }

    pub fn from_base64_pcm(data: &str, sample_rate: u32) -> Result<Self> {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| CompanionError::Audio(format!("invalid base64 audio: {e}")))?;
        Ok(Self::from_pcm16_le(&bytes, sample_rate))
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples scaled to `[-1.0, 1.0)` for float output devices.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&sample| f32::from(sample) / 32_768.0).collect()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Output device abstraction.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Unlock step before the first utterance (an output context may start suspended).
    async fn resume(&self) -> Result<()> {
        Ok(())
    }

    /// Plays `clip`, resolving when it ends naturally.
    async fn play(&self, clip: AudioClip) -> Result<()>;
}

/// How often the playback thread checks for the end of a clip or a stop request.
const PLAYBACK_POLL: Duration = Duration::from_millis(10);

/// Plays utterances through the default output device.
pub struct CpalSink {
    device_name: String,
}

impl CpalSink {
    /// Fails when the host has no default output device.
    pub fn new() -> Result<Self> {
        let device = default_output_device()?;
        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");
        Ok(Self { device_name })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

fn default_output_device() -> Result<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| CompanionError::Audio("no default output device".into()))
}

/// Internal buffer for tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

/// Blocks until `clip` has played out or `stop` is raised.
fn play_blocking(clip: &AudioClip, stop: &AtomicBool) -> Result<()> {
    let device = default_output_device()?;
    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: clip.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let buffer = Arc::new(Mutex::new(PlaybackBuffer {
        samples: clip.to_f32(),
        position: 0,
        finished: false,
    }));

    let buffer_clone = Arc::clone(&buffer);
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let Ok(mut buf) = buffer_clone.lock() else {
                    return;
                };
                for sample in data.iter_mut() {
                    if buf.position < buf.samples.len() {
                        *sample = buf.samples[buf.position];
                        buf.position += 1;
                    } else {
                        *sample = 0.0;
                        buf.finished = true;
                    }
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| CompanionError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| CompanionError::Audio(format!("failed to start output stream: {e}")))?;

    loop {
        std::thread::sleep(PLAYBACK_POLL);
        if stop.load(Ordering::SeqCst) {
            debug!("playback stopped early");
            break;
        }
        let buf = buffer
            .lock()
            .map_err(|e| CompanionError::Audio(format!("playback buffer lock poisoned: {e}")))?;
        if buf.finished {
            break;
        }
    }

    drop(stream);
    Ok(())
}

/// Raises the flag when dropped, so a cancelled `play` future silences the device.
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&self, clip: AudioClip) -> Result<()> {
        if clip.is_empty() {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let _guard = StopOnDrop(Arc::clone(&stop));
        tokio::task::spawn_blocking(move || play_blocking(&clip, &stop))
            .await
            .map_err(|e| CompanionError::Audio(format!("playback task failed: {e}")))?
    }
}

/// Headless sink: holds each utterance for its real duration without any device.
#[derive(Default)]
pub struct PacedSink {
    running: AtomicBool,
}

impl PacedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for PacedSink {
    async fn resume(&self) -> Result<()> {
        if !self.running.swap(true, Ordering::SeqCst) {
            debug!("audio output resumed");
        }
        Ok(())
    }

    async fn play(&self, clip: AudioClip) -> Result<()> {
        tokio::time::sleep(clip.duration()).await;
        Ok(())
    }
}

/// Writes every utterance to `<dir>/utterance-<n>.wav`, then paces like [`PacedSink`].
pub struct WavFileSink {
    dir: PathBuf,
    counter: AtomicU64,
}

impl WavFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(1),
        }
    }

    /// `<local data dir>/korema/speech`, or `cache/speech` when the platform has none.
    pub fn default_dir() -> PathBuf {
        if let Some(data_dir) = dirs::data_local_dir() {
            return data_dir.join("korema").join("speech");
        }
        PathBuf::from("cache").join("speech")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn write_wav(path: &Path, clip: &AudioClip) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let audio_err = |e: hound::Error| CompanionError::Audio(format!("failed to write {}: {e}", path.display()));
    let mut writer = hound::WavWriter::create(path, spec).map_err(audio_err)?;
    for sample in clip.samples() {
        writer.write_sample(*sample).map_err(audio_err)?;
    }
    writer.finalize().map_err(audio_err)
}

#[async_trait]
impl AudioSink for WavFileSink {
    async fn resume(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn play(&self, clip: AudioClip) -> Result<()> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("utterance-{n}.wav"));
        let duration = clip.duration();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_wav(&target, &clip))
            .await
            .map_err(|e| CompanionError::Audio(format!("wav writer task failed: {e}")))??;
        info!(path = %path.display(), ?duration, "utterance saved");
        tokio::time::sleep(duration).await;
        Ok(())
    }
}
