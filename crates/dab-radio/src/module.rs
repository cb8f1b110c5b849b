//! Host-facing adapter: owns the persisted enable flag and the running radio
//! block, and exposes start / stop / render.

use crate::input::{FrameReader, SoftBitFormat};
use crate::loopback::LoopbackDecoder;
use crate::output::pcm_writer;
use crate::shutdown;
use crate::state::ModuleState;
use anyhow::Context;
use dab_core::audio::ThreadedAudioSink;
use dab_core::config::RadioConfig;
use dab_core::decoder::{ChannelDecoder, SubchannelControls};
use dab_core::params::{DabParameters, ViterbiBit};
use dab_core::radio::{RadioBlock, RadioStatus};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Running {
    radio: Arc<RadioBlock>,
    frames_written: Arc<AtomicU64>,
}

pub struct DabModule {
    config: RadioConfig,
    state_path: PathBuf,
    state: ModuleState,
    controls: Arc<SubchannelControls>,
    running: Option<Running>,
}

impl DabModule {
    pub fn new(config: RadioConfig, state_path: &Path) -> anyhow::Result<Self> {
        let state = ModuleState::load_or_create(state_path)?;
        Ok(Self {
            config,
            state_path: state_path.to_path_buf(),
            state,
            controls: Arc::new(SubchannelControls::new()),
            running: None,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled
    }

    pub fn set_enabled(&mut self, is_enabled: bool) -> anyhow::Result<()> {
        if self.state.is_enabled == is_enabled {
            return Ok(());
        }
        self.state.is_enabled = is_enabled;
        self.state.save(&self.state_path)?;
        tracing::info!(is_enabled, path = %self.state_path.display(), "module state saved");
        Ok(())
    }

    /// Builds the radio block and routes its mixed audio to `output` as
    /// interleaved s16 PCM.
    pub fn start(
        &mut self,
        output: Box<dyn Write + Send>,
        output_name: String,
    ) -> anyhow::Result<Arc<RadioBlock>> {
        anyhow::ensure!(self.is_enabled(), "module is disabled");
        anyhow::ensure!(self.running.is_none(), "module already started");

        let controls = self.controls.clone();
        let radio = RadioBlock::new(&self.config, move |params: &DabParameters| {
            Box::new(LoopbackDecoder::new(params, controls.clone())) as Box<dyn ChannelDecoder>
        })
        .context("start radio block")?;

        let frames_written = Arc::new(AtomicU64::new(0));
        let audio = &self.config.audio;
        let sink = ThreadedAudioSink::new(
            output_name.clone(),
            audio.sample_rate as f32,
            audio.block_seconds,
            pcm_writer(output, output_name, frames_written.clone()),
        );
        radio.audio().set_sink(Box::new(sink));

        let radio = Arc::new(radio);
        self.running = Some(Running {
            radio: radio.clone(),
            frames_written,
        });
        Ok(radio)
    }

    /// Lets queued audio play out for at most `grace`, then tears the block
    /// down.
    pub fn stop(&mut self, grace: Duration) {
        let Some(running) = self.running.take() else {
            return;
        };
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            let status = running.radio.status();
            let is_link_drained =
                status.frames_received == status.frames_decoded + status.frames_dropped;
            if is_link_drained && running.radio.audio().buffered_frames() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let _ = running.radio.audio().clear_sink();
        tracing::info!(
            frames_written = running.frames_written.load(Ordering::Relaxed),
            "module stopped"
        );
    }

    /// Current status, also logged. `None` while stopped.
    pub fn render(&self) -> Option<RadioStatus> {
        let running = self.running.as_ref()?;
        let status = running.radio.status();
        tracing::info!(
            generation = status.generation,
            received = status.frames_received,
            decoded = status.frames_decoded,
            dropped = status.frames_dropped,
            subchannels = status.active_subchannels,
            frames_written = running.frames_written.load(Ordering::Relaxed),
            "status"
        );
        Some(status)
    }
}

/// Reads frames from `reader` into the radio until EOF or shutdown.
///
/// With `pace` set, frames are submitted no faster than one per frame period,
/// the cadence a live front end would have. Returns the number of frames
/// read.
pub fn pump_frames(
    radio: &RadioBlock,
    reader: Box<dyn Read + Send>,
    format: SoftBitFormat,
    pace: bool,
) -> anyhow::Result<u64> {
    let period = radio.params().frame_duration();
    let mut frames = FrameReader::new(reader, format);
    let mut frame = vec![0 as ViterbiBit; radio.params().nb_frame_bits];
    let mut next = Instant::now();
    let mut total = 0u64;

    while !shutdown::is_shutdown_requested() {
        if !frames.read_frame(&mut frame)? {
            tracing::info!(frames = total, "input finished");
            break;
        }
        radio.submit_frame(&frame);
        total += 1;

        if pace {
            next += period;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                next = now;
            }
        }
    }
    Ok(total)
}
