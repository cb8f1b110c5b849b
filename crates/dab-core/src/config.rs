use crate::decoder::OfdmConfig;
use crate::params::{DabParameters, TransmissionMode};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RadioConfig {
    #[serde(default)]
    pub transmission_mode: TransmissionMode,
    /// Hint for decoders that parallelise subchannel work. 0 means "pick for me".
    #[serde(default = "default_decoder_threads")]
    pub decoder_threads: usize,
    #[serde(default)]
    pub handoff: FrameHandoff,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub ofdm: OfdmConfig,
}

/// How frames travel from the front end to the decode thread.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameHandoff {
    /// FIFO ring buffer two frames deep. Under sustained backpressure the
    /// front end waits one frame period, then drops the whole frame.
    #[default]
    Streaming,
    /// Double buffer: the decoder always sees the latest complete frame and
    /// older unread frames are overwritten.
    LatestFrame,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_block_seconds")]
    pub block_seconds: f32,
    /// Ring depth of each subchannel source, in sink blocks.
    #[serde(default = "default_source_buffer_blocks")]
    pub source_buffer_blocks: usize,
    #[serde(default = "default_global_gain")]
    pub global_gain: f32,
}

fn default_decoder_threads() -> usize {
    1
}
fn default_sample_rate() -> u32 {
    48_000
}
fn default_block_seconds() -> f32 {
    0.1
}
fn default_source_buffer_blocks() -> usize {
    4
}
fn default_global_gain() -> f32 {
    1.0
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_seconds: default_block_seconds(),
            source_buffer_blocks: default_source_buffer_blocks(),
            global_gain: default_global_gain(),
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            transmission_mode: TransmissionMode::default(),
            decoder_threads: default_decoder_threads(),
            handoff: FrameHandoff::default(),
            audio: AudioConfig::default(),
            ofdm: OfdmConfig::default(),
        }
    }
}

pub fn load_from_file(path: &Path) -> anyhow::Result<RadioConfig> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RadioConfig =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    cfg.runtime()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Validated, derived values the radio block runs with.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub params: DabParameters,
    pub handoff: FrameHandoff,
    pub decoder_threads: usize,
    pub audio_sample_rate: f32,
    pub audio_block_frames: usize,
    pub audio_block_duration: Duration,
    pub source_capacity: usize,
    pub global_gain: f32,
}

impl RadioConfig {
    pub fn runtime(&self) -> anyhow::Result<Runtime> {
        let audio = &self.audio;
        anyhow::ensure!(
            (8_000..=192_000).contains(&audio.sample_rate),
            "audio.sample_rate must be within 8000..=192000 (got {})",
            audio.sample_rate
        );
        anyhow::ensure!(
            audio.block_seconds > 0.0 && audio.block_seconds <= 1.0,
            "audio.block_seconds must be within (0, 1] (got {})",
            audio.block_seconds
        );
        anyhow::ensure!(
            audio.source_buffer_blocks >= 1,
            "audio.source_buffer_blocks must be >= 1"
        );
        anyhow::ensure!(
            audio.global_gain.is_finite() && audio.global_gain >= 0.0,
            "audio.global_gain must be a non-negative number (got {})",
            audio.global_gain
        );

        let ofdm = &self.ofdm;
        anyhow::ensure!(
            ofdm.max_coarse_freq_correction >= 0.0,
            "ofdm.max_coarse_freq_correction must be >= 0"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&ofdm.fine_freq_update_beta),
            "ofdm.fine_freq_update_beta must be within [0, 1]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&ofdm.null_power_threshold),
            "ofdm.null_power_threshold must be within [0, 1]"
        );

        let decoder_threads = match self.decoder_threads {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        };

        let sample_rate = audio.sample_rate as f32;
        let audio_block_frames = ((sample_rate * audio.block_seconds) as usize).max(1);
        Ok(Runtime {
            params: DabParameters::for_mode(self.transmission_mode),
            handoff: self.handoff,
            decoder_threads,
            audio_sample_rate: sample_rate,
            audio_block_frames,
            audio_block_duration: Duration::from_secs_f32(audio.block_seconds),
            source_capacity: audio_block_frames * audio.source_buffer_blocks,
            global_gain: audio.global_gain,
        })
    }
}
