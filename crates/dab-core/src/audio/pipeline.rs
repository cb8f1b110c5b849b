use super::frame::Frame;
use super::source::AudioPipelineSource;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Pull-style delivery contract between the pipeline and its sink:
/// fill the buffer with frames at the given sample rate, return how many were
/// written.
pub type MixCallback = Box<dyn FnMut(&mut [Frame], f32) -> usize + Send>;

/// Destination of the mixed stream. The sink owns the thread that drives the
/// callback.
pub trait AudioSink: Send {
    /// Stops and joins any running delivery before installing `callback`.
    /// `None` only stops.
    fn set_callback(&mut self, callback: Option<MixCallback>);

    fn name(&self) -> &str;
}

struct Mixer {
    sources: Mutex<Vec<Arc<AudioPipelineSource>>>,
    global_gain: AtomicU32,
}

impl Mixer {
    fn lock_sources(&self) -> MutexGuard<'_, Vec<Arc<AudioPipelineSource>>> {
        self.sources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active_sources(&self) -> Vec<Arc<AudioPipelineSource>> {
        let mut sources = self.lock_sources();
        // A drained source is dropped once it is closed or nobody can write
        // to it any more.
        sources.retain(|s| !s.is_empty() || !(s.is_closed() || Arc::strong_count(s) == 1));
        sources.clone()
    }

    fn mix(&self, out: &mut [Frame], sample_rate: f32, scratch: &mut Vec<Frame>) -> usize {
        out.fill(Frame::SILENCE);
        if scratch.len() < out.len() {
            scratch.resize(out.len(), Frame::SILENCE);
        }

        let mut total = 0usize;
        for source in self.active_sources() {
            let n = source.read(&mut scratch[..out.len()], sample_rate);
            for (dst, src) in out.iter_mut().zip(scratch[..n].iter()) {
                *dst += *src;
            }
            total = total.max(n);
        }

        let gain = f32::from_bits(self.global_gain.load(Ordering::Relaxed));
        for f in out[..total].iter_mut() {
            *f *= gain;
        }
        total
    }
}

/// Sums any number of per-subchannel sources, each resampled independently,
/// into one stereo stream for a single sink.
pub struct AudioPipeline {
    mixer: Arc<Mixer>,
    source_capacity: usize,
    sink: Mutex<Option<Box<dyn AudioSink>>>,
}

impl AudioPipeline {
    /// `source_capacity` is the ring depth in frames given to each new source.
    pub fn new(source_capacity: usize) -> Self {
        Self {
            mixer: Arc::new(Mixer {
                sources: Mutex::new(Vec::new()),
                global_gain: AtomicU32::new(1.0f32.to_bits()),
            }),
            source_capacity,
            sink: Mutex::new(None),
        }
    }

    /// Creates and registers a new source.
    pub fn add_source(&self) -> Arc<AudioPipelineSource> {
        let source = Arc::new(AudioPipelineSource::new(self.source_capacity));
        self.add_existing_source(source.clone());
        source
    }

    pub fn add_existing_source(&self, source: Arc<AudioPipelineSource>) {
        let mut sources = self.mixer.lock_sources();
        sources.push(source);
        tracing::debug!(total = sources.len(), "audio source added");
    }

    /// Closes and forgets every source.
    pub fn clear_sources(&self) {
        let drained: Vec<_> = self.mixer.lock_sources().drain(..).collect();
        for source in drained.iter() {
            source.close();
        }
        tracing::debug!(removed = drained.len(), "audio sources cleared");
    }

    pub fn total_sources(&self) -> usize {
        self.mixer.lock_sources().len()
    }

    /// Frames queued across all sources, each at its own input rate.
    pub fn buffered_frames(&self) -> usize {
        self.mixer.lock_sources().iter().map(|s| s.len()).sum()
    }

    pub fn global_gain(&self) -> f32 {
        f32::from_bits(self.mixer.global_gain.load(Ordering::Relaxed))
    }

    pub fn set_global_gain(&self, gain: f32) {
        self.mixer
            .global_gain
            .store(gain.to_bits(), Ordering::Relaxed);
    }

    /// Mixes one block into `out`. This is what the sink callback runs.
    pub fn mix(&self, out: &mut [Frame], sample_rate: f32) -> usize {
        let mut scratch = Vec::new();
        self.mixer.mix(out, sample_rate, &mut scratch)
    }

    /// Replaces the sink. The previous sink's delivery thread is joined first.
    pub fn set_sink(&self, mut sink: Box<dyn AudioSink>) {
        let mut slot = self.lock_sink();
        if let Some(mut old) = slot.take() {
            old.set_callback(None);
        }
        let mixer = self.mixer.clone();
        let mut scratch = Vec::new();
        sink.set_callback(Some(Box::new(move |out: &mut [Frame], sample_rate: f32| {
            mixer.mix(out, sample_rate, &mut scratch)
        })));
        tracing::info!(sink = sink.name(), "audio sink attached");
        *slot = Some(sink);
    }

    /// Stops delivery and returns the detached sink, if any.
    pub fn clear_sink(&self) -> Option<Box<dyn AudioSink>> {
        let mut sink = self.lock_sink().take()?;
        sink.set_callback(None);
        Some(sink)
    }

    pub fn sink_name(&self) -> Option<String> {
        self.lock_sink().as_ref().map(|s| s.name().to_string())
    }

    fn lock_sink(&self) -> MutexGuard<'_, Option<Box<dyn AudioSink>>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        let _ = self.clear_sink();
    }
}
