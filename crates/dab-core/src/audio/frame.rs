use bytemuck::{Pod, Zeroable};
use std::ops::{Add, AddAssign, Mul, MulAssign, Sub};

pub const TOTAL_AUDIO_CHANNELS: usize = 2;

/// One interleaved stereo sample pair, normalised to [-1, +1].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Frame {
    pub channels: [f32; TOTAL_AUDIO_CHANNELS],
}

impl Frame {
    pub const SILENCE: Frame = Frame { channels: [0.0; 2] };

    pub fn new(left: f32, right: f32) -> Self {
        Self {
            channels: [left, right],
        }
    }

    pub fn mono(v: f32) -> Self {
        Self::new(v, v)
    }

    pub fn left(&self) -> f32 {
        self.channels[0]
    }

    pub fn right(&self) -> f32 {
        self.channels[1]
    }
}

impl Add for Frame {
    type Output = Frame;
    fn add(self, rhs: Frame) -> Frame {
        Frame::new(self.channels[0] + rhs.channels[0], self.channels[1] + rhs.channels[1])
    }
}

impl AddAssign for Frame {
    fn add_assign(&mut self, rhs: Frame) {
        self.channels[0] += rhs.channels[0];
        self.channels[1] += rhs.channels[1];
    }
}

impl Sub for Frame {
    type Output = Frame;
    fn sub(self, rhs: Frame) -> Frame {
        Frame::new(self.channels[0] - rhs.channels[0], self.channels[1] - rhs.channels[1])
    }
}

impl Mul<f32> for Frame {
    type Output = Frame;
    fn mul(self, rhs: f32) -> Frame {
        Frame::new(self.channels[0] * rhs, self.channels[1] * rhs)
    }
}

impl MulAssign<f32> for Frame {
    fn mul_assign(&mut self, rhs: f32) {
        self.channels[0] *= rhs;
        self.channels[1] *= rhs;
    }
}

/// Converts native-endian s16 PCM bytes to frames, duplicating mono samples
/// to both channels. A trailing partial sample is ignored.
pub fn frames_from_pcm_s16(bytes: &[u8], is_stereo: bool, out: &mut Vec<Frame>) {
    out.clear();
    let owned: Vec<i16>;
    let samples: &[i16] = match bytemuck::try_cast_slice::<u8, i16>(bytes) {
        Ok(s) => s,
        Err(_) => {
            let usable = bytes.len() & !1;
            owned = bytemuck::pod_collect_to_vec(&bytes[..usable]);
            &owned
        }
    };
    let scale = 1.0 / 32768.0;
    if is_stereo {
        out.extend(
            samples
                .chunks_exact(2)
                .map(|c| Frame::new(c[0] as f32 * scale, c[1] as f32 * scale)),
        );
    } else {
        out.extend(samples.iter().map(|&s| Frame::mono(s as f32 * scale)));
    }
}

/// Interleaves frames into centred s16 samples, clamping out-of-range values.
pub fn frames_to_pcm_s16(frames: &[Frame], out: &mut Vec<i16>) {
    out.clear();
    let interleaved: &[f32] = bytemuck::cast_slice(frames);
    out.extend(interleaved.iter().map(|&s| {
        let v = (s * 32768.0 + 32768.5).floor() as i32 - 32768;
        v.clamp(-32768, 32767) as i16
    }));
}
