use super::frame::{Frame, TOTAL_AUDIO_CHANNELS};
use anyhow::Context;
use rubato::{
    Resampler, SincFixedOut, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::collections::VecDeque;

/// Output frames produced per conversion step.
const CHUNK_FRAMES: usize = 256;

/// Band-limited stereo sample rate converter on top of rubato's fixed-output
/// sinc resampler.
///
/// Input is queued with `push` and converted on demand by `process`, so a
/// caller can ask for exactly as many output frames as it has room for. The
/// filter delay is trimmed from the start of the stream, so output lines up
/// with input.
pub struct SincResampler {
    input_rate: f32,
    output_rate: f32,
    inner: SincFixedOut<f32>,
    pending: Vec<Frame>,
    ready: VecDeque<Frame>,
    /// Leading output frames still to discard.
    skip: usize,
    wave_in: Vec<Vec<f32>>,
    wave_out: Vec<Vec<f32>>,
}

impl SincResampler {
    pub fn new(input_rate: f32, output_rate: f32) -> anyhow::Result<Self> {
        anyhow::ensure!(
            input_rate > 0.0 && output_rate > 0.0,
            "cannot resample {input_rate} Hz to {output_rate} Hz"
        );
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedOut::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.1,
            params,
            CHUNK_FRAMES,
            TOTAL_AUDIO_CHANNELS,
        )
        .with_context(|| format!("build resampler {input_rate} Hz -> {output_rate} Hz"))?;
        let wave_out = inner.output_buffer_allocate(true);
        Ok(Self {
            input_rate,
            output_rate,
            skip: inner.output_delay(),
            inner,
            pending: Vec::new(),
            ready: VecDeque::new(),
            wave_in: vec![Vec::new(); TOTAL_AUDIO_CHANNELS],
            wave_out,
        })
    }

    pub fn input_rate(&self) -> f32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> f32 {
        self.output_rate
    }

    /// Input frames queued but not yet converted.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Additional input frames to queue before `n` outputs can be produced.
    /// Errs on the high side; surplus input stays queued.
    pub fn input_needed(&self, n: usize) -> usize {
        let missing = (n + self.skip).saturating_sub(self.ready.len());
        if missing == 0 {
            return 0;
        }
        let chunks = missing.div_ceil(CHUNK_FRAMES);
        let want = self.inner.input_frames_next() + (chunks - 1) * self.inner.input_frames_max();
        want.saturating_sub(self.pending.len())
    }

    pub fn push(&mut self, input: &[Frame]) {
        self.pending.extend_from_slice(input);
    }

    /// Fills `out` from queued input and returns the number of frames written.
    pub fn process(&mut self, out: &mut [Frame]) -> usize {
        while self.ready.len() < out.len() {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            if let Err(e) = self.convert_chunk(needed) {
                tracing::warn!(error = %e, "resampler chunk failed, input dropped");
                self.pending.clear();
                break;
            }
        }

        let n = out.len().min(self.ready.len());
        for (slot, frame) in out.iter_mut().zip(self.ready.drain(..n)) {
            *slot = frame;
        }
        n
    }

    fn convert_chunk(&mut self, needed: usize) -> anyhow::Result<()> {
        for (ch, wave) in self.wave_in.iter_mut().enumerate() {
            wave.clear();
            wave.extend(self.pending[..needed].iter().map(|f| f.channels[ch]));
        }
        self.pending.drain(..needed);

        let (_, produced) = self
            .inner
            .process_into_buffer(&self.wave_in, &mut self.wave_out, None)
            .context("resample chunk")?;
        let dropped = self.skip.min(produced);
        self.skip -= dropped;
        self.ready.extend(
            (dropped..produced).map(|i| Frame::new(self.wave_out[0][i], self.wave_out[1][i])),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, rate: f32, n: usize) -> Vec<Frame> {
        (0..n)
            .map(|i| Frame::mono((std::f32::consts::TAU * freq * i as f32 / rate).sin()))
            .collect()
    }

    fn rms(frames: &[Frame]) -> f32 {
        let sum: f32 = frames.iter().map(|f| f.left() * f.left()).sum();
        (sum / frames.len() as f32).sqrt()
    }

    fn convert(r: &mut SincResampler, input: &[Frame], n: usize) -> Vec<Frame> {
        r.push(input);
        let mut out = vec![Frame::SILENCE; n];
        let got = r.process(&mut out);
        out.truncate(got);
        out
    }

    #[test]
    fn tone_above_output_nyquist_is_filtered() {
        let mut r = SincResampler::new(75_000.0, 48_000.0).unwrap();
        let out = convert(&mut r, &tone(30_000.0, 75_000.0, 15_000), 8_192);
        assert_eq!(out.len(), 8_192);
        let level = rms(&out[512..]);
        assert!(level < 0.05, "aliased rms {level}");
    }

    #[test]
    fn tone_in_passband_keeps_its_level() {
        let mut r = SincResampler::new(75_000.0, 48_000.0).unwrap();
        let out = convert(&mut r, &tone(1_000.0, 75_000.0, 15_000), 8_192);
        assert_eq!(out.len(), 8_192);
        let level = rms(&out[512..]);
        assert!((level - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.02, "rms {level}");
    }

    #[test]
    fn upsampled_constant_lines_up_with_input() {
        let mut r = SincResampler::new(24_000.0, 48_000.0).unwrap();
        let out = convert(&mut r, &vec![Frame::new(0.5, -0.25); 2_000], 2_048);
        assert_eq!(out.len(), 2_048);
        for f in &out[256..] {
            assert!((f.left() - 0.5).abs() < 1e-2, "left {}", f.left());
            assert!((f.right() + 0.25).abs() < 1e-2, "right {}", f.right());
        }
    }

    #[test]
    fn short_input_stays_queued() {
        let mut r = SincResampler::new(32_000.0, 48_000.0).unwrap();
        assert!(r.input_needed(CHUNK_FRAMES) > 4);
        let out = convert(&mut r, &[Frame::mono(0.1); 4], CHUNK_FRAMES);
        assert!(out.is_empty());
        assert_eq!(r.pending(), 4);
    }

    #[test]
    fn queued_output_carries_over_between_calls() {
        let mut r = SincResampler::new(44_100.0, 48_000.0).unwrap();
        let first = convert(&mut r, &tone(440.0, 44_100.0, 4_000), 100);
        assert_eq!(first.len(), 100);
        assert!(r.pending() > 0);
        let second = convert(&mut r, &[], 100);
        assert_eq!(second.len(), 100);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(SincResampler::new(0.0, 48_000.0).is_err());
        assert!(SincResampler::new(48_000.0, 0.0).is_err());
    }
}
