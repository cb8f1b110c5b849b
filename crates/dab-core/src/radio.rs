//! Owns the channel decoder, the thread that feeds it and the fan-out of
//! decoded audio into the mixer.
//!
//! The decoder can be replaced at any time. The replacement is built next to
//! the running instance and swapped in under a short lock, so the decode
//! thread never waits on a rebuild and never sees an empty slot.

use crate::audio::frame::{frames_from_pcm_s16, Frame};
use crate::audio::{AudioPipeline, AudioPipelineSource};
use crate::config::{FrameHandoff, RadioConfig, Runtime};
use crate::decoder::{
    AudioParams, ChannelDecoder, ChannelDecoderFactory, OfdmConfig, OfdmDemodulator,
    Subchannel, SubchannelCallback, SubchannelId,
};
use crate::double_buffer::DoubleBuffer;
use crate::params::{DabParameters, TransmissionMode, ViterbiBit};
use crate::ring_buffer::ThreadedRingBuffer;
use anyhow::Context;
use dashmap::DashMap;
use num_complex::Complex32;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

type SourceMap = DashMap<SubchannelId, Arc<AudioPipelineSource>>;

enum FrameLink {
    Streaming(ThreadedRingBuffer<ViterbiBit>),
    LatestFrame {
        buffer: DoubleBuffer<ViterbiBit>,
        // The double buffer has a single producer slot.
        producer: Mutex<()>,
    },
}

impl FrameLink {
    fn new(handoff: FrameHandoff, frame_bits: usize) -> Self {
        match handoff {
            FrameHandoff::Streaming => Self::Streaming(ThreadedRingBuffer::new(frame_bits * 2)),
            FrameHandoff::LatestFrame => Self::LatestFrame {
                buffer: DoubleBuffer::new(frame_bits),
                producer: Mutex::new(()),
            },
        }
    }

    /// Best effort. Returns false when the frame was dropped.
    fn send(&self, frame: &[ViterbiBit], params: &DabParameters) -> bool {
        match self {
            Self::Streaming(ring) => {
                ring.try_write_for(frame, params.frame_duration()) == frame.len()
            }
            Self::LatestFrame { buffer, producer } => {
                let _producer = lock(producer);
                match buffer.acquire_inactive_buffer() {
                    Some(mut slot) => {
                        slot.copy_from_slice(frame);
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Waits for the next frame and runs `f` on it. Returns false once the
    /// link is closed.
    fn recv(&self, scratch: &mut [ViterbiBit], f: impl FnOnce(&[ViterbiBit])) -> bool {
        match self {
            Self::Streaming(ring) => {
                if ring.read(scratch) != scratch.len() {
                    return false;
                }
                f(scratch);
                true
            }
            Self::LatestFrame { buffer, .. } => match buffer.acquire_active_buffer() {
                Some(frame) => {
                    f(&frame);
                    true
                }
                None => false,
            },
        }
    }

    fn close(&self) {
        match self {
            Self::Streaming(ring) => ring.close(),
            Self::LatestFrame { buffer, .. } => buffer.close(),
        }
    }
}

struct DecoderInstance {
    generation: u64,
    decoder: Mutex<Box<dyn ChannelDecoder>>,
    sources: Arc<SourceMap>,
}

#[derive(Debug, Default)]
struct Stats {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    frames_decoded: AtomicU64,
    resets: AtomicU64,
}

/// Snapshot of the block for status pages and periodic logging.
#[derive(Debug, Clone, Serialize)]
pub struct RadioStatus {
    pub generation: u64,
    pub transmission_mode: TransmissionMode,
    pub handoff: FrameHandoff,
    pub decoder_threads: usize,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_decoded: u64,
    pub resets: u64,
    pub active_subchannels: usize,
    pub audio_sources: usize,
    pub global_gain: f32,
    pub sink: Option<String>,
}

struct Shared {
    runtime: Runtime,
    link: FrameLink,
    factory: Box<dyn ChannelDecoderFactory>,
    decoder: Mutex<Arc<DecoderInstance>>,
    // Serialises rebuilds so generations are handed out in swap order.
    rebuild: Mutex<u64>,
    live_generation: Arc<AtomicU64>,
    is_reset_requested: AtomicBool,
    audio: Arc<AudioPipeline>,
    stats: Stats,
}

impl Shared {
    fn current(&self) -> Arc<DecoderInstance> {
        lock(&self.decoder).clone()
    }

    fn submit(&self, frame: &[ViterbiBit]) -> bool {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        let expected = self.runtime.params.nb_frame_bits;
        if frame.len() != expected {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(got = frame.len(), expected, "dropping frame with unexpected length");
            return false;
        }
        if !self.link.send(frame, &self.runtime.params) {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("decoder busy, frame dropped");
            return false;
        }
        true
    }

    fn rebuild(&self) -> u64 {
        let mut last = lock(&self.rebuild);
        let generation = *last + 1;
        let mut decoder = self.factory.create(&self.runtime.params);
        // Publish first so old-generation audio that slips past its gate
        // finds the mixer already cleared.
        self.live_generation.store(generation, Ordering::Release);
        self.audio.clear_sources();
        let sources = Arc::new(SourceMap::new());
        decoder.attach_subchannel_callback(subchannel_callback(
            generation,
            self.live_generation.clone(),
            self.audio.clone(),
            sources.clone(),
        ));
        let instance = Arc::new(DecoderInstance {
            generation,
            decoder: Mutex::new(decoder),
            sources,
        });
        let previous = std::mem::replace(&mut *lock(&self.decoder), instance);
        *last = generation;
        drop(last);

        self.stats.resets.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            generation,
            previous = previous.generation,
            "channel decoder rebuilt"
        );
        generation
    }

    fn decode(&self, frame: &[ViterbiBit]) {
        if self.is_reset_requested.swap(false, Ordering::AcqRel) {
            self.rebuild();
        }
        let instance = self.current();
        lock(&instance.decoder).process(frame);
        self.stats.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }
}

fn subchannel_callback(
    generation: u64,
    live_generation: Arc<AtomicU64>,
    audio: Arc<AudioPipeline>,
    sources: Arc<SourceMap>,
) -> SubchannelCallback {
    Box::new(move |id: SubchannelId, subchannel: &mut dyn Subchannel| {
        let kind = subchannel.kind();
        tracing::debug!(generation, subchannel = id, ?kind, "subchannel announced");

        let controls = subchannel.controls();
        let live_generation = live_generation.clone();
        let audio = audio.clone();
        let sources = sources.clone();
        let mut frames = Vec::<Frame>::new();
        subchannel.attach_audio_callback(Box::new(move |params: AudioParams, pcm: &[u8]| {
            if !controls.is_play_audio() {
                return;
            }
            // Audio raised by an instance that has already been replaced.
            if live_generation.load(Ordering::Acquire) != generation {
                return;
            }
            if params.bytes_per_sample != 2 {
                tracing::debug!(
                    subchannel = id,
                    bytes_per_sample = params.bytes_per_sample,
                    "unsupported pcm sample width"
                );
                return;
            }
            let Some(source) = claim_source(generation, &live_generation, &audio, &sources, id)
            else {
                return;
            };
            frames_from_pcm_s16(pcm, params.is_stereo, &mut frames);
            source.write(&frames, params.sample_rate as f32, false);
        }));
    })
}

/// Looks up or lazily creates the mixer source for `id`.
///
/// `None` when `generation` has been replaced in the meantime. A source created
/// in that window would have missed the rebuild's clear, so it is closed again.
fn claim_source(
    generation: u64,
    live_generation: &AtomicU64,
    audio: &AudioPipeline,
    sources: &SourceMap,
    id: SubchannelId,
) -> Option<Arc<AudioPipelineSource>> {
    let source = sources
        .entry(id)
        .or_insert_with(|| {
            tracing::debug!(generation, subchannel = id, "audio source created");
            audio.add_source()
        })
        .clone();
    if live_generation.load(Ordering::Acquire) != generation {
        source.close();
        return None;
    }
    Some(source)
}

/// Front end to speakers: frame link, decode thread, swappable channel
/// decoder and the audio pipeline its subchannels feed.
pub struct RadioBlock {
    shared: Arc<Shared>,
    demodulator: Mutex<Option<Box<dyn OfdmDemodulator>>>,
    ofdm: OfdmConfig,
    decode_thread: Option<JoinHandle<()>>,
}

impl RadioBlock {
    pub fn new<F>(config: &RadioConfig, factory: F) -> anyhow::Result<Self>
    where
        F: ChannelDecoderFactory + 'static,
    {
        let runtime = config.runtime().context("invalid radio configuration")?;
        let audio = Arc::new(AudioPipeline::new(runtime.source_capacity));
        audio.set_global_gain(runtime.global_gain);

        let params = runtime.params;
        let live_generation = Arc::new(AtomicU64::new(0));
        let sources = Arc::new(SourceMap::new());
        let mut decoder = factory.create(&params);
        decoder.attach_subchannel_callback(subchannel_callback(
            1,
            live_generation.clone(),
            audio.clone(),
            sources.clone(),
        ));
        live_generation.store(1, Ordering::Release);

        let shared = Arc::new(Shared {
            link: FrameLink::new(runtime.handoff, params.nb_frame_bits),
            runtime,
            factory: Box::new(factory),
            decoder: Mutex::new(Arc::new(DecoderInstance {
                generation: 1,
                decoder: Mutex::new(decoder),
                sources,
            })),
            rebuild: Mutex::new(1),
            live_generation,
            is_reset_requested: AtomicBool::new(false),
            audio,
            stats: Stats::default(),
        });

        let thread_shared = shared.clone();
        let decode_thread = std::thread::Builder::new()
            .name("dab-decode".to_string())
            .spawn(move || run_decode_loop(thread_shared))
            .context("spawn decode thread")?;

        tracing::info!(
            mode = params.mode.number(),
            frame_bits = params.nb_frame_bits,
            handoff = ?shared.runtime.handoff,
            "radio block started"
        );

        Ok(Self {
            shared,
            demodulator: Mutex::new(None),
            ofdm: config.ofdm.clone(),
            decode_thread: Some(decode_thread),
        })
    }

    pub fn params(&self) -> &DabParameters {
        &self.shared.runtime.params
    }

    pub fn audio(&self) -> &Arc<AudioPipeline> {
        &self.shared.audio
    }

    /// Hands a frame of soft bits to the decode thread without blocking for
    /// longer than one frame period. Returns false when it was dropped.
    pub fn submit_frame(&self, frame: &[ViterbiBit]) -> bool {
        self.shared.submit(frame)
    }

    /// Connects an OFDM front end. Its frames take the same path as
    /// [`RadioBlock::submit_frame`].
    pub fn attach_demodulator(&self, mut demodulator: Box<dyn OfdmDemodulator>) {
        *demodulator.config_mut() = self.ofdm.clone();
        let shared = self.shared.clone();
        demodulator.attach_frame_callback(Box::new(move |frame: &[ViterbiBit]| {
            shared.submit(frame);
        }));
        *lock(&self.demodulator) = Some(demodulator);
        tracing::info!("ofdm demodulator attached");
    }

    /// Feeds baseband IQ to the attached front end. Without one the samples
    /// are ignored.
    pub fn process_iq(&self, samples: &[Complex32]) {
        if let Some(demodulator) = lock(&self.demodulator).as_mut() {
            demodulator.process(samples);
        }
    }

    /// Replaces the channel decoder with a fresh instance and drops every
    /// audio source of the old one. Returns the new generation.
    pub fn reset(&self) -> u64 {
        self.shared.rebuild()
    }

    /// Asks the decode thread to rebuild the decoder before its next frame.
    pub fn request_reset(&self) {
        self.shared.is_reset_requested.store(true, Ordering::Release);
    }

    pub fn generation(&self) -> u64 {
        self.shared.current().generation
    }

    /// Runs `f` with exclusive access to the current decoder. The decode
    /// thread waits meanwhile, so keep it short.
    pub fn with_decoder<R>(&self, f: impl FnOnce(&mut dyn ChannelDecoder) -> R) -> R {
        let instance = self.shared.current();
        let mut decoder = lock(&instance.decoder);
        f(&mut **decoder)
    }

    pub fn status(&self) -> RadioStatus {
        let shared = &self.shared;
        let instance = shared.current();
        let stats = &shared.stats;
        RadioStatus {
            generation: instance.generation,
            transmission_mode: shared.runtime.params.mode,
            handoff: shared.runtime.handoff,
            decoder_threads: shared.runtime.decoder_threads,
            frames_received: stats.frames_received.load(Ordering::Relaxed),
            frames_dropped: stats.frames_dropped.load(Ordering::Relaxed),
            frames_decoded: stats.frames_decoded.load(Ordering::Relaxed),
            resets: stats.resets.load(Ordering::Relaxed),
            active_subchannels: instance.sources.len(),
            audio_sources: shared.audio.total_sources(),
            global_gain: shared.audio.global_gain(),
            sink: shared.audio.sink_name(),
        }
    }
}

impl Drop for RadioBlock {
    fn drop(&mut self) {
        lock(&self.demodulator).take();
        self.shared.link.close();
        if let Some(handle) = self.decode_thread.take() {
            if handle.join().is_err() {
                tracing::error!("decode thread panicked");
            }
        }
        self.shared.audio.clear_sources();
        tracing::info!("radio block stopped");
    }
}

fn run_decode_loop(shared: Arc<Shared>) {
    let mut scratch = vec![0 as ViterbiBit; shared.runtime.params.nb_frame_bits];
    while shared.link.recv(&mut scratch, |frame| shared.decode(frame)) {}
    tracing::debug!("frame link closed, decode thread exiting");
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    struct CountingDecoder {
        frames: Arc<AtomicUsize>,
    }

    impl ChannelDecoder for CountingDecoder {
        fn process(&mut self, _frame: &[ViterbiBit]) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }

        fn attach_subchannel_callback(&mut self, _callback: SubchannelCallback) {}
    }

    fn mode_ii() -> RadioConfig {
        RadioConfig {
            transmission_mode: TransmissionMode::Ii,
            ..RadioConfig::default()
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn counting_radio(config: &RadioConfig) -> (RadioBlock, Arc<AtomicUsize>) {
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = frames.clone();
        let radio = RadioBlock::new(config, move |_: &DabParameters| {
            Box::new(CountingDecoder {
                frames: counter.clone(),
            }) as Box<dyn ChannelDecoder>
        })
        .unwrap();
        (radio, frames)
    }

    #[test]
    fn frames_reach_the_decoder() {
        let (radio, frames) = counting_radio(&mode_ii());
        let frame = vec![0 as ViterbiBit; radio.params().nb_frame_bits];
        assert!(radio.submit_frame(&frame));
        assert!(radio.submit_frame(&frame));
        assert!(wait_until(|| radio.status().frames_decoded == 2));
        assert_eq!(frames.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn wrong_length_frames_are_dropped() {
        let (radio, frames) = counting_radio(&mode_ii());
        assert!(!radio.submit_frame(&[1, 2, 3]));
        let status = radio.status();
        assert_eq!(status.frames_received, 1);
        assert_eq!(status.frames_dropped, 1);
        assert_eq!(frames.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn requested_reset_happens_on_decode_thread() {
        let (radio, frames) = counting_radio(&mode_ii());
        assert_eq!(radio.generation(), 1);
        radio.request_reset();
        assert_eq!(radio.generation(), 1);
        let frame = vec![0 as ViterbiBit; radio.params().nb_frame_bits];
        radio.submit_frame(&frame);
        assert!(wait_until(|| frames.load(Ordering::SeqCst) == 1));
        assert_eq!(radio.generation(), 2);
        assert_eq!(radio.status().resets, 1);
    }

    #[test]
    fn reset_bumps_generation_and_status_serialises() {
        let (radio, _) = counting_radio(&mode_ii());
        assert_eq!(radio.reset(), 2);
        assert_eq!(radio.reset(), 3);
        let json = serde_json::to_value(radio.status()).unwrap();
        assert_eq!(json["generation"], 3);
        assert_eq!(json["resets"], 2);
        assert_eq!(json["handoff"], "streaming");
        assert_eq!(json["transmission_mode"], "ii");
    }

    #[test]
    fn with_decoder_reaches_current_instance() {
        let (radio, frames) = counting_radio(&mode_ii());
        radio.with_decoder(|d| d.process(&[]));
        assert_eq!(frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn source_claimed_after_rebuild_is_closed() {
        let audio = AudioPipeline::new(64);
        let live = AtomicU64::new(1);
        let sources = SourceMap::new();
        let current = claim_source(1, &live, &audio, &sources, 4).unwrap();
        assert_eq!(audio.total_sources(), 1);

        // Rebuild order: publish the new generation, then clear the mixer.
        live.store(2, Ordering::Release);
        audio.clear_sources();
        assert!(current.is_closed());

        // Old-generation audio that got past its gate before the store.
        assert!(claim_source(1, &live, &audio, &sources, 9).is_none());
        let late = sources.get(&9).map(|s| s.clone()).unwrap();
        assert!(late.is_closed());
        let mut out = vec![Frame::SILENCE; 8];
        audio.mix(&mut out, 48_000.0);
        assert_eq!(audio.total_sources(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = mode_ii();
        config.audio.block_seconds = 0.0;
        let err = RadioBlock::new(&config, |_: &DabParameters| {
            Box::new(CountingDecoder {
                frames: Arc::new(AtomicUsize::new(0)),
            }) as Box<dyn ChannelDecoder>
        })
        .err()
        .expect("config must be rejected");
        assert!(format!("{err:#}").contains("block_seconds"));
    }
}
