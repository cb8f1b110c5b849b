use super::frame::Frame;
use super::resampler::SincResampler;
use crate::ring_buffer::ThreadedRingBuffer;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct RateState {
    input_rate: f32,
    output_rate: f32,
    /// Built lazily for the current rate pair; `None` while rates match or
    /// after a change.
    resampler: Option<SincResampler>,
    is_unsupported: bool,
    scratch: Vec<Frame>,
}

impl RateState {
    fn rates_changed(&mut self) {
        self.resampler = None;
        self.is_unsupported = false;
    }
}

/// One input of the mixer, typically one subchannel.
///
/// The writer pushes PCM at whatever rate the codec reports; the mixer pulls
/// it converted to the sink's rate. Each source has its own locks so a stalled
/// writer never holds up the others.
pub struct AudioPipelineSource {
    buffer: ThreadedRingBuffer<Frame>,
    rates: Mutex<RateState>,
}

impl AudioPipelineSource {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: ThreadedRingBuffer::new(capacity),
            rates: Mutex::new(RateState {
                input_rate: 0.0,
                output_rate: 0.0,
                resampler: None,
                is_unsupported: false,
                scratch: Vec::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Frames buffered at the input rate.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn input_rate(&self) -> f32 {
        self.lock_rates().input_rate
    }

    /// Queues `frames` recorded at `sample_rate`.
    ///
    /// A non-blocking write drops whatever does not fit. Returns the number of
    /// frames accepted.
    pub fn write(&self, frames: &[Frame], sample_rate: f32, is_blocking: bool) -> usize {
        {
            let mut rates = self.lock_rates();
            if rates.input_rate != sample_rate {
                tracing::debug!(
                    from = rates.input_rate,
                    to = sample_rate,
                    "audio source input rate changed"
                );
                rates.input_rate = sample_rate;
                rates.rates_changed();
            }
        }
        if is_blocking {
            self.buffer.write(frames)
        } else {
            self.buffer.try_write(frames)
        }
    }

    /// Writes up to `out.len()` frames converted to `output_rate` without
    /// blocking. Returns the number of frames written.
    pub fn read(&self, out: &mut [Frame], output_rate: f32) -> usize {
        let mut guard = self.lock_rates();
        let rates = &mut *guard;
        if rates.output_rate != output_rate {
            rates.output_rate = output_rate;
            rates.rates_changed();
        }
        if rates.input_rate == output_rate {
            return self.buffer.try_read(out);
        }
        if rates.is_unsupported {
            return 0;
        }

        if rates.resampler.is_none() {
            match SincResampler::new(rates.input_rate, output_rate) {
                Ok(r) => rates.resampler = Some(r),
                Err(e) => {
                    if !self.buffer.is_empty() {
                        tracing::warn!(error = %e, "audio source cannot be resampled");
                        rates.is_unsupported = true;
                    }
                    return 0;
                }
            }
        }
        let Some(resampler) = rates.resampler.as_mut() else {
            return 0;
        };

        let needed = resampler.input_needed(out.len());
        if needed > 0 {
            rates.scratch.resize(needed, Frame::SILENCE);
            let got = self.buffer.try_read(&mut rates.scratch[..needed]);
            resampler.push(&rates.scratch[..got]);
        }
        resampler.process(out)
    }

    /// Stops accepting input. Buffered frames can still be read.
    pub fn close(&self) {
        self.buffer.close();
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }

    fn lock_rates(&self) -> MutexGuard<'_, RateState> {
        self.rates.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
