use super::frame::Frame;
use super::pipeline::{AudioSink, MixCallback};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Receives each block the sink produced, together with its sample rate.
pub type BlockWriter = Box<dyn FnMut(&[Frame], f32) + Send>;

struct Settings {
    sample_rate: AtomicU32,
    block_seconds: AtomicU32,
}

impl Settings {
    fn sample_rate(&self) -> f32 {
        f32::from_bits(self.sample_rate.load(Ordering::Relaxed))
    }

    fn block_seconds(&self) -> f32 {
        f32::from_bits(self.block_seconds.load(Ordering::Relaxed))
    }
}

/// Sink that drives the mix callback from its own thread at block cadence and
/// hands every non-empty block to a writer.
///
/// When a tick yields nothing the thread sleeps for one block instead of
/// spinning.
pub struct ThreadedAudioSink {
    name: String,
    settings: Arc<Settings>,
    writer: Arc<std::sync::Mutex<BlockWriter>>,
    running: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl ThreadedAudioSink {
    pub fn new(
        name: impl Into<String>,
        sample_rate: f32,
        block_seconds: f32,
        writer: BlockWriter,
    ) -> Self {
        Self {
            name: name.into(),
            settings: Arc::new(Settings {
                sample_rate: AtomicU32::new(sample_rate.to_bits()),
                block_seconds: AtomicU32::new(block_seconds.to_bits()),
            }),
            writer: Arc::new(std::sync::Mutex::new(writer)),
            running: None,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.settings.sample_rate()
    }

    /// Picked up on the next tick.
    pub fn set_sample_rate(&self, sample_rate: f32) {
        self.settings
            .sample_rate
            .store(sample_rate.to_bits(), Ordering::Relaxed);
    }

    pub fn block_seconds(&self) -> f32 {
        self.settings.block_seconds()
    }

    pub fn set_block_seconds(&self, block_seconds: f32) {
        self.settings
            .block_seconds
            .store(block_seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn stop(&mut self) {
        let Some((flag, handle)) = self.running.take() else {
            return;
        };
        flag.store(false, Ordering::Relaxed);
        if handle.join().is_err() {
            tracing::error!(sink = %self.name, "audio sink thread panicked");
        }
    }
}

impl AudioSink for ThreadedAudioSink {
    fn set_callback(&mut self, callback: Option<MixCallback>) {
        self.stop();
        let Some(callback) = callback else {
            return;
        };

        let flag = Arc::new(AtomicBool::new(true));
        let settings = self.settings.clone();
        let writer = self.writer.clone();
        let thread_flag = flag.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{}-out", self.name))
            .spawn(move || run_delivery(thread_flag, settings, writer, callback));
        match spawned {
            Ok(handle) => self.running = Some((flag, handle)),
            Err(e) => {
                tracing::error!(sink = %self.name, error = ?e, "failed to spawn audio sink thread")
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ThreadedAudioSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_delivery(
    is_running: Arc<AtomicBool>,
    settings: Arc<Settings>,
    writer: Arc<std::sync::Mutex<BlockWriter>>,
    mut callback: MixCallback,
) {
    let mut block = Vec::<Frame>::new();
    while is_running.load(Ordering::Relaxed) {
        let sample_rate = settings.sample_rate();
        let block_seconds = settings.block_seconds().max(1e-3);
        let block_size = ((sample_rate * block_seconds) as usize).max(1);
        block.resize(block_size, Frame::SILENCE);

        let tick = Instant::now();
        let total = callback(&mut block[..], sample_rate).min(block_size);
        let pace = if total > 0 {
            if let Ok(mut w) = writer.lock() {
                (*w)(&block[..total], sample_rate);
            }
            Duration::from_secs_f32(total as f32 / sample_rate.max(1.0))
        } else {
            Duration::from_secs_f32(block_seconds)
        };
        let elapsed = tick.elapsed();
        if pace > elapsed {
            std::thread::sleep(pace - elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn delivers_blocks_from_callback() {
        let (tx, rx) = mpsc::channel::<usize>();
        let mut sink = ThreadedAudioSink::new(
            "test",
            1000.0,
            0.01,
            Box::new(move |frames: &[Frame], _: f32| {
                let _ = tx.send(frames.len());
            }),
        );
        sink.set_callback(Some(Box::new(|out: &mut [Frame], _| {
            out.fill(Frame::mono(0.5));
            out.len()
        })));
        let n = rx.recv_timeout(Duration::from_secs(2)).expect("block delivered");
        assert_eq!(n, 10);
        sink.set_callback(None);
        assert!(!sink.is_running());
    }

    #[test]
    fn empty_ticks_still_invoke_callback_without_spinning() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sink =
            ThreadedAudioSink::new("idle", 1000.0, 0.02, Box::new(|_: &[Frame], _: f32| {}));
        let counter = calls.clone();
        sink.set_callback(Some(Box::new(move |_: &mut [Frame], _| {
            counter.fetch_add(1, Ordering::Relaxed);
            0
        })));
        std::thread::sleep(Duration::from_millis(100));
        sink.set_callback(None);
        let n = calls.load(Ordering::Relaxed);
        assert!(n >= 1, "callback never fired");
        assert!(n <= 20, "delivery thread spun {n} times");
    }

    #[test]
    fn replacing_callback_keeps_one_thread() {
        let mut sink =
            ThreadedAudioSink::new("swap", 1000.0, 0.01, Box::new(|_: &[Frame], _: f32| {}));
        let active = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let active = active.clone();
            sink.set_callback(Some(Box::new(move |_: &mut [Frame], _| {
                active.fetch_add(1, Ordering::SeqCst);
                active.fetch_sub(1, Ordering::SeqCst);
                0
            })));
            assert!(sink.is_running());
        }
        drop(sink);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
