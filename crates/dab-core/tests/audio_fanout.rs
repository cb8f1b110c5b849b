use dab_core::audio::{AudioSink, Frame, MixCallback, ThreadedAudioSink};
use dab_core::config::RadioConfig;
use dab_core::decoder::{
    AudioDataCallback, AudioParams, ChannelDecoder, ChannelKind, Subchannel, SubchannelCallback,
    SubchannelControls, SubchannelId,
};
use dab_core::params::{DabParameters, TransmissionMode, ViterbiBit};
use dab_core::radio::RadioBlock;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

struct ToneSubchannel {
    controls: Arc<SubchannelControls>,
    on_audio: Option<AudioDataCallback>,
}

impl Subchannel for ToneSubchannel {
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

/// Emits a fixed stereo PCM block on every listed subchannel per frame.
struct ToneDecoder {
    ids: Vec<SubchannelId>,
    controls: Arc<SubchannelControls>,
    sample_rate: u32,
    on_subchannel: Option<SubchannelCallback>,
    subchannels: Vec<(SubchannelId, ToneSubchannel)>,
}

impl ChannelDecoder for ToneDecoder {
    fn process(&mut self, _frame: &[ViterbiBit]) {
        if self.subchannels.is_empty() {
            for &id in self.ids.iter() {
                let mut sub = ToneSubchannel {
                    controls: self.controls.clone(),
                    on_audio: None,
                };
                if let Some(cb) = self.on_subchannel.as_mut() {
                    cb(id, &mut sub);
                }
                self.subchannels.push((id, sub));
            }
        }
        let pcm: Vec<i16> = [8192i16, -8192].repeat(480);
        let params = AudioParams {
            sample_rate: self.sample_rate,
            is_stereo: true,
            bytes_per_sample: 2,
        };
        for (_, sub) in self.subchannels.iter_mut() {
            if let Some(cb) = sub.on_audio.as_mut() {
                cb(params, bytemuck::cast_slice(&pcm));
            }
        }
    }

    fn attach_subchannel_callback(&mut self, callback: SubchannelCallback) {
        self.on_subchannel = Some(callback);
    }
}

fn tone_radio(ids: &[SubchannelId], controls: Arc<SubchannelControls>) -> RadioBlock {
    let config = RadioConfig {
        transmission_mode: TransmissionMode::Ii,
        ..RadioConfig::default()
    };
    let ids = ids.to_vec();
    RadioBlock::new(&config, move |_: &DabParameters| {
        Box::new(ToneDecoder {
            ids: ids.clone(),
            controls: controls.clone(),
            sample_rate: 48_000,
            on_subchannel: None,
            subchannels: Vec::new(),
        }) as Box<dyn ChannelDecoder>
    })
    .unwrap()
}

fn decode_one(radio: &RadioBlock) {
    let before = radio.status().frames_decoded;
    assert!(radio.submit_frame(&vec![0; radio.params().nb_frame_bits]));
    let deadline = Instant::now() + Duration::from_secs(5);
    while radio.status().frames_decoded == before {
        assert!(Instant::now() < deadline, "frame was never decoded");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn each_subchannel_gets_its_own_source() {
    let radio = tone_radio(&[1, 4], Arc::new(SubchannelControls::new()));
    assert_eq!(radio.audio().total_sources(), 0);

    decode_one(&radio);
    decode_one(&radio);
    let status = radio.status();
    assert_eq!(status.active_subchannels, 2);
    assert_eq!(status.audio_sources, 2);

    let mut out = vec![Frame::SILENCE; 480];
    assert_eq!(radio.audio().mix(&mut out, 48_000.0), 480);
    // Two identical sources at +/-0.25 sum to +/-0.5.
    assert!((out[0].left() - 0.5).abs() < 1e-6);
    assert!((out[0].right() + 0.5).abs() < 1e-6);
}

#[test]
fn muted_subchannel_creates_no_source() {
    let controls = Arc::new(SubchannelControls::new());
    controls.set_play_audio(false);
    let radio = tone_radio(&[2], controls.clone());
    decode_one(&radio);
    assert_eq!(radio.audio().total_sources(), 0);

    controls.set_play_audio(true);
    decode_one(&radio);
    assert_eq!(radio.audio().total_sources(), 1);
}

#[test]
fn reset_drops_sources_of_the_old_instance() {
    let radio = tone_radio(&[5], Arc::new(SubchannelControls::new()));
    decode_one(&radio);
    assert_eq!(radio.audio().total_sources(), 1);

    radio.reset();
    assert_eq!(radio.audio().total_sources(), 0);
    assert_eq!(radio.status().active_subchannels, 0);

    decode_one(&radio);
    assert_eq!(radio.audio().total_sources(), 1);
}

#[test]
fn global_gain_comes_from_config() {
    let mut config = RadioConfig {
        transmission_mode: TransmissionMode::Ii,
        ..RadioConfig::default()
    };
    config.audio.global_gain = 0.25;
    let radio = RadioBlock::new(&config, |_: &DabParameters| {
        Box::new(ToneDecoder {
            ids: vec![0],
            controls: Arc::new(SubchannelControls::new()),
            sample_rate: 24_000,
            on_subchannel: None,
            subchannels: Vec::new(),
        }) as Box<dyn ChannelDecoder>
    })
    .unwrap();
    assert_eq!(radio.status().global_gain, 0.25);

    decode_one(&radio);
    // 24 kHz in, 48 kHz out. Skip the converter's settling at the start.
    let mut out = vec![Frame::SILENCE; 512];
    let n = radio.audio().mix(&mut out, 48_000.0);
    assert!(n > 256, "mixed {n}");
    assert!(out[128..n]
        .iter()
        .all(|f| (f.left() - 0.0625).abs() < 1e-3 && (f.right() + 0.0625).abs() < 1e-3));
}

#[test]
fn threaded_sink_plays_decoded_audio() {
    let radio = tone_radio(&[0], Arc::new(SubchannelControls::new()));
    let (tx, rx) = mpsc::channel::<Vec<Frame>>();
    let sink = ThreadedAudioSink::new(
        "capture",
        48_000.0,
        0.005,
        Box::new(move |frames: &[Frame], _: f32| {
            let _ = tx.send(frames.to_vec());
        }),
    );
    radio.audio().set_sink(Box::new(sink));
    assert_eq!(radio.status().sink.as_deref(), Some("capture"));

    decode_one(&radio);
    let block = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("sink delivered a block");
    assert!(!block.is_empty());
    assert!((block[0].left() - 0.25).abs() < 1e-6);

    let detached = radio.audio().clear_sink();
    assert!(detached.is_some());
}

/// A sink that never runs a thread, driven by hand.
struct ManualSink {
    callback: Arc<Mutex<Option<MixCallback>>>,
}

impl AudioSink for ManualSink {
    fn set_callback(&mut self, callback: Option<MixCallback>) {
        *self.callback.lock().unwrap() = callback;
    }

    fn name(&self) -> &str {
        "manual"
    }
}

#[test]
fn replacing_the_sink_detaches_the_old_one() {
    let radio = tone_radio(&[0], Arc::new(SubchannelControls::new()));
    let first = Arc::new(Mutex::new(None));
    radio.audio().set_sink(Box::new(ManualSink {
        callback: first.clone(),
    }));
    assert!(first.lock().unwrap().is_some());

    let second = Arc::new(Mutex::new(None));
    radio.audio().set_sink(Box::new(ManualSink {
        callback: second.clone(),
    }));
    assert!(first.lock().unwrap().is_none());

    decode_one(&radio);
    let mut out = vec![Frame::SILENCE; 64];
    let n = second.lock().unwrap().as_mut().map(|cb| cb(&mut out[..], 48_000.0));
    assert_eq!(n, Some(64));
}
