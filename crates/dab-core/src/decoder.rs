//! Seams to the collaborators this crate does not implement: the OFDM front
//! end, the channel decoder and the per-subchannel audio codec it drives.

use crate::params::{DabParameters, ViterbiBit};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type SubchannelId = u8;

/// Called with every completed OFDM frame of soft bits.
pub type FrameCallback = Box<dyn FnMut(&[ViterbiBit]) + Send>;

/// Called when a decoder starts producing data for a subchannel it has not
/// announced before.
pub type SubchannelCallback = Box<dyn FnMut(SubchannelId, &mut dyn Subchannel) + Send>;

/// Called with decoded audio. For DAB+ the payload is interleaved s16le PCM.
pub type AudioDataCallback = Box<dyn FnMut(AudioParams, &[u8]) + Send>;

/// Tunable numeric fields of the OFDM synchroniser.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OfdmConfig {
    #[serde(default = "default_max_coarse_freq_correction")]
    pub max_coarse_freq_correction: f32,
    #[serde(default = "default_fine_freq_update_beta")]
    pub fine_freq_update_beta: f32,
    #[serde(default = "default_impulse_peak_threshold_db")]
    pub impulse_peak_threshold_db: f32,
    #[serde(default = "default_null_power_threshold")]
    pub null_power_threshold: f32,
}

fn default_max_coarse_freq_correction() -> f32 {
    // Eyeballed tuning from a waterfall routinely lands this far off.
    300_000.0
}
fn default_fine_freq_update_beta() -> f32 {
    0.9
}
fn default_impulse_peak_threshold_db() -> f32 {
    20.0
}
fn default_null_power_threshold() -> f32 {
    0.35
}

impl Default for OfdmConfig {
    fn default() -> Self {
        Self {
            max_coarse_freq_correction: default_max_coarse_freq_correction(),
            fine_freq_update_beta: default_fine_freq_update_beta(),
            impulse_peak_threshold_db: default_impulse_peak_threshold_db(),
            null_power_threshold: default_null_power_threshold(),
        }
    }
}

pub trait OfdmDemodulator: Send {
    /// Consumes baseband IQ. Completed frames are delivered through the
    /// attached frame callback, from whichever thread the implementation uses.
    fn process(&mut self, samples: &[Complex32]);

    fn attach_frame_callback(&mut self, callback: FrameCallback);

    fn config_mut(&mut self) -> &mut OfdmConfig;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Dab,
    DabPlus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub is_stereo: bool,
    pub bytes_per_sample: u8,
}

/// Per-subchannel switches, shared between the decoder and its controllers.
#[derive(Debug)]
pub struct SubchannelControls {
    decode_audio: AtomicBool,
    decode_data: AtomicBool,
    play_audio: AtomicBool,
}

impl SubchannelControls {
    pub fn new() -> Self {
        Self {
            decode_audio: AtomicBool::new(true),
            decode_data: AtomicBool::new(true),
            play_audio: AtomicBool::new(true),
        }
    }

    pub fn is_decode_audio(&self) -> bool {
        self.decode_audio.load(Ordering::Relaxed)
    }

    pub fn set_decode_audio(&self, v: bool) {
        self.decode_audio.store(v, Ordering::Relaxed);
    }

    pub fn is_decode_data(&self) -> bool {
        self.decode_data.load(Ordering::Relaxed)
    }

    pub fn set_decode_data(&self, v: bool) {
        self.decode_data.store(v, Ordering::Relaxed);
    }

    pub fn is_play_audio(&self) -> bool {
        self.play_audio.load(Ordering::Relaxed)
    }

    pub fn set_play_audio(&self, v: bool) {
        self.play_audio.store(v, Ordering::Relaxed);
    }

    pub fn is_any_enabled(&self) -> bool {
        self.is_decode_audio() || self.is_decode_data() || self.is_play_audio()
    }
}

impl Default for SubchannelControls {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Subchannel {
    fn kind(&self) -> ChannelKind;

    fn controls(&self) -> Arc<SubchannelControls>;

    fn attach_audio_callback(&mut self, callback: AudioDataCallback);
}

pub trait ChannelDecoder: Send {
    /// Decodes one full frame. Audio and new-subchannel notifications are
    /// raised synchronously from inside this call.
    fn process(&mut self, frame: &[ViterbiBit]);

    fn attach_subchannel_callback(&mut self, callback: SubchannelCallback);
}

/// Builds fresh decoder instances for `RadioBlock::reset`.
pub trait ChannelDecoderFactory: Send + Sync {
    fn create(&self, params: &DabParameters) -> Box<dyn ChannelDecoder>;
}

impl<F> ChannelDecoderFactory for F
where
    F: Fn(&DabParameters) -> Box<dyn ChannelDecoder> + Send + Sync,
{
    fn create(&self, params: &DabParameters) -> Box<dyn ChannelDecoder> {
        self(params)
    }
}
