use dab_core::config::{load_from_file, FrameHandoff, RadioConfig};
use dab_core::params::TransmissionMode;
use std::path::PathBuf;

fn write_temp(name: &str, body: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("dab-core-{}-{name}.json", std::process::id()));
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn empty_object_uses_defaults() {
    let cfg: RadioConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(cfg, RadioConfig::default());

    let rt = cfg.runtime().unwrap();
    assert_eq!(rt.params.mode, TransmissionMode::I);
    assert_eq!(rt.params.nb_frame_bits, 230_400);
    assert_eq!(rt.handoff, FrameHandoff::Streaming);
    assert_eq!(rt.audio_block_frames, 4_800);
    assert!((rt.audio_block_duration.as_secs_f64() - 0.1).abs() < 1e-6);
    assert_eq!(rt.source_capacity, 4 * 4_800);
}

#[test]
fn file_overrides_are_applied() {
    let path = write_temp(
        "overrides",
        r#"{
            "transmission_mode": "iii",
            "handoff": "latest_frame",
            "audio": { "sample_rate": 32000, "block_seconds": 0.05 },
            "ofdm": { "fine_freq_update_beta": 0.5 }
        }"#,
    );
    let cfg = load_from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(cfg.transmission_mode, TransmissionMode::Iii);
    assert_eq!(cfg.handoff, FrameHandoff::LatestFrame);
    assert_eq!(cfg.audio.global_gain, 1.0);
    assert_eq!(cfg.ofdm.fine_freq_update_beta, 0.5);
    assert_eq!(cfg.ofdm.null_power_threshold, 0.35);

    let rt = cfg.runtime().unwrap();
    assert_eq!(rt.audio_block_frames, 1_600);
    assert_eq!(rt.params.nb_frame_bits, 384 * 152);
}

#[test]
fn invalid_values_are_reported_with_the_file_name() {
    let path = write_temp("invalid", r#"{ "audio": { "sample_rate": 100 } }"#);
    let err = load_from_file(&path).unwrap_err();
    std::fs::remove_file(&path).ok();

    let msg = format!("{err:#}");
    assert!(msg.contains("invalid.json"), "{msg}");
    assert!(msg.contains("audio.sample_rate"), "{msg}");
}

#[test]
fn unknown_mode_fails_to_parse() {
    let path = write_temp("bad-mode", r#"{ "transmission_mode": "v" }"#);
    let err = load_from_file(&path).unwrap_err();
    std::fs::remove_file(&path).ok();
    assert!(format!("{err:#}").contains("parse"));
}

#[test]
fn zero_decoder_threads_picks_a_count() {
    let cfg = RadioConfig {
        decoder_threads: 0,
        ..RadioConfig::default()
    };
    assert!(cfg.runtime().unwrap().decoder_threads >= 1);
}

#[test]
fn missing_file_is_an_error() {
    let err = load_from_file(std::path::Path::new("/nonexistent/dab.json")).unwrap_err();
    assert!(format!("{err:#}").contains("read /nonexistent/dab.json"));
}
