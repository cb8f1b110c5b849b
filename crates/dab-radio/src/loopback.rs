//! A channel decoder that carries raw PCM through the energy dispersal
//! scrambler, plus the matching frame generator.
//!
//! Frame layout: the whole frame is one PCM payload, packed MSB first,
//! scrambled with the PRBS reseeded at the frame start. It exercises the full
//! frame path without an FEC chain.

use dab_core::decoder::{
    AudioDataCallback, AudioParams, ChannelDecoder, ChannelKind, Subchannel, SubchannelCallback,
    SubchannelControls, SubchannelId,
};
use dab_core::params::{DabParameters, ViterbiBit, SOFT_DECISION_HIGH, SOFT_DECISION_LOW};
use dab_core::scrambler::AdditiveScrambler;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

pub const LOOPBACK_SUBCHANNEL: SubchannelId = 0;

const BYTES_PER_FRAME: usize = 4;

/// PCM rate that makes one frame of payload last exactly one frame period.
pub fn loopback_sample_rate(params: &DabParameters) -> u32 {
    let frames = (params.nb_frame_bits / 8 / BYTES_PER_FRAME) as u64;
    (frames * 1000 / params.frame_duration_ms) as u32
}

pub fn pack_hard_bits(bits: &[ViterbiBit], out: &mut Vec<u8>) {
    out.clear();
    out.extend(
        bits.chunks_exact(8)
            .map(|c| c.iter().fold(0u8, |acc, &b| (acc << 1) | u8::from(b > 0))),
    );
}

pub fn unpack_soft_bits(bytes: &[u8], out: &mut Vec<ViterbiBit>) {
    out.clear();
    for &byte in bytes {
        for i in (0..8).rev() {
            out.push(if (byte >> i) & 1 == 1 {
                SOFT_DECISION_HIGH
            } else {
                SOFT_DECISION_LOW
            });
        }
    }
}

struct LoopbackSubchannel {
    controls: Arc<SubchannelControls>,
    on_audio: Option<AudioDataCallback>,
}

impl Subchannel for LoopbackSubchannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::DabPlus
    }

    fn controls(&self) -> Arc<SubchannelControls> {
        self.controls.clone()
    }

    fn attach_audio_callback(&mut self, callback: AudioDataCallback) {
        self.on_audio = Some(callback);
    }
}

pub struct LoopbackDecoder {
    audio: AudioParams,
    scrambler: AdditiveScrambler,
    payload: Vec<u8>,
    controls: Arc<SubchannelControls>,
    subchannel: Option<LoopbackSubchannel>,
    on_subchannel: Option<SubchannelCallback>,
}

impl LoopbackDecoder {
    pub fn new(params: &DabParameters, controls: Arc<SubchannelControls>) -> Self {
        Self {
            audio: AudioParams {
                sample_rate: loopback_sample_rate(params),
                is_stereo: true,
                bytes_per_sample: 2,
            },
            scrambler: AdditiveScrambler::default(),
            payload: Vec::with_capacity(params.nb_frame_bits / 8),
            controls,
            subchannel: None,
            on_subchannel: None,
        }
    }
}

impl ChannelDecoder for LoopbackDecoder {
    fn process(&mut self, frame: &[ViterbiBit]) {
        if !self.controls.is_any_enabled() {
            return;
        }
        if self.subchannel.is_none() {
            let mut s = LoopbackSubchannel {
                controls: self.controls.clone(),
                on_audio: None,
            };
            if let Some(cb) = self.on_subchannel.as_mut() {
                cb(LOOPBACK_SUBCHANNEL, &mut s);
            }
            tracing::debug!(subchannel = LOOPBACK_SUBCHANNEL, "loopback subchannel up");
            self.subchannel = Some(s);
        }
        let Some(subchannel) = self.subchannel.as_mut() else {
            return;
        };
        if !self.controls.is_decode_audio() {
            return;
        }

        pack_hard_bits(frame, &mut self.payload);
        self.scrambler.reset();
        self.scrambler.apply(&mut self.payload);
        if let Some(cb) = subchannel.on_audio.as_mut() {
            cb(self.audio, &self.payload);
        }
    }

    fn attach_subchannel_callback(&mut self, callback: SubchannelCallback) {
        self.on_subchannel = Some(callback);
    }
}

/// Generates scrambled frames carrying a stereo test tone.
pub struct ToneSynth {
    params: DabParameters,
    scrambler: AdditiveScrambler,
    sample_rate: f32,
    freq_hz: f32,
    amplitude: f32,
    phase: f32,
    noise: i16,
    rng: StdRng,
    payload: Vec<u8>,
}

impl ToneSynth {
    /// `noise` is the peak of uniform noise added to each soft bit.
    pub fn new(
        params: DabParameters,
        freq_hz: f32,
        amplitude: f32,
        noise: i16,
        seed: u64,
    ) -> Self {
        Self {
            sample_rate: loopback_sample_rate(&params) as f32,
            params,
            scrambler: AdditiveScrambler::default(),
            freq_hz,
            amplitude: amplitude.clamp(0.0, 1.0),
            phase: 0.0,
            noise: noise.max(0),
            rng: StdRng::seed_from_u64(seed),
            payload: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn next_frame(&mut self, out: &mut Vec<ViterbiBit>) {
        let nb_frames = self.params.nb_frame_bits / 8 / BYTES_PER_FRAME;
        let step = std::f32::consts::TAU * self.freq_hz / self.sample_rate;
        self.payload.clear();
        for _ in 0..nb_frames {
            let v = (self.phase.sin() * self.amplitude * i16::MAX as f32) as i16;
            // Right channel is phase inverted so the two are distinguishable.
            for s in [v, v.saturating_neg()] {
                self.payload.extend_from_slice(&s.to_ne_bytes());
            }
            self.phase = (self.phase + step) % std::f32::consts::TAU;
        }

        self.scrambler.reset();
        self.scrambler.apply(&mut self.payload);
        unpack_soft_bits(&self.payload, out);
        if self.noise > 0 {
            for b in out.iter_mut() {
                *b = b.saturating_add(self.rng.gen_range(-self.noise..=self.noise));
            }
        }
    }
}
