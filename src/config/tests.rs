use super::defaults::{MAX_PORT_COUNT, MAX_STT_POOL_SIZE};
use super::validation::check_number_shape;
use super::{AppConfig, AudioSourceKind, DetectionConfig};
use clap::Parser;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};
use std::{env, path::PathBuf};

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let path = env::temp_dir().join(format!("linecheck_cfg_{nanos}_{name}"));
    fs::write(&path, contents).expect("write temp file");
    path
}

#[test]
fn defaults_validate() {
    let mut cfg = AppConfig::parse_from(["test-app"]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.audio_source, AudioSourceKind::Auto);
    assert_eq!(cfg.stt_pool_size, 4);
    assert_eq!(cfg.lang, "vi");
}

#[test]
fn candidate_ports_follow_prefix_range() {
    let cfg = AppConfig::parse_from([
        "test-app",
        "--port-prefix",
        "COM",
        "--port-first",
        "3",
        "--port-last",
        "5",
    ]);
    assert_eq!(cfg.candidate_ports(), vec!["COM3", "COM4", "COM5"]);
}

#[test]
fn explicit_ports_override_range() {
    let cfg = AppConfig::parse_from(["test-app", "--port", "/dev/a", "--port", "/dev/b"]);
    assert_eq!(cfg.candidate_ports(), vec!["/dev/a", "/dev/b"]);
}

#[test]
fn rejects_inverted_port_range() {
    let mut cfg = AppConfig::parse_from(["test-app", "--port-first", "9", "--port-last", "2"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_oversized_port_range() {
    let last = (MAX_PORT_COUNT + 1).to_string();
    let mut cfg = AppConfig::parse_from(["test-app", "--port-first", "0", "--port-last", &last]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_baud_out_of_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--baud", "300"]);
    assert!(cfg.validate().is_err());

    let mut cfg = AppConfig::parse_from(["test-app", "--esp32-baud", "5000000"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn esp32_channel_is_one_or_two() {
    let mut cfg = AppConfig::parse_from(["test-app", "--esp32-channel", "2"]);
    assert!(cfg.validate().is_ok());

    let mut cfg = AppConfig::parse_from(["test-app", "--esp32-channel", "3"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_stt_pool_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--stt-pool-size", "0"]);
    assert!(cfg.validate().is_err());

    let too_many = (MAX_STT_POOL_SIZE + 1).to_string();
    let mut cfg = AppConfig::parse_from(["test-app", "--stt-pool-size", &too_many]);
    assert!(cfg.validate().is_err());
}

#[test]
fn lang_accepts_codes_and_auto() {
    for lang in ["vi", "en", "auto", "haw"] {
        let mut cfg = AppConfig::parse_from(["test-app", "--lang", lang]);
        assert!(cfg.validate().is_ok(), "{lang} should validate");
    }
    for lang in ["v", "en$", "vietnamese"] {
        let mut cfg = AppConfig::parse_from(["test-app", "--lang", lang]);
        assert!(cfg.validate().is_err(), "{lang} should be rejected");
    }
}

#[test]
fn rejects_missing_model_and_thresholds_paths() {
    let mut cfg = AppConfig::parse_from(["test-app", "--whisper-model-path", "/no/such/model.bin"]);
    assert!(cfg.validate().is_err());

    let mut cfg = AppConfig::parse_from(["test-app", "--thresholds", "/no/such/file.yaml"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn number_shape_checks() {
    assert!(check_number_shape("0961234567").is_ok());
    assert!(check_number_shape("+84 961 234 567").is_ok());
    assert!(check_number_shape("096-123.4567").is_ok());
    assert!(check_number_shape("").is_err());
    assert!(check_number_shape("09a1234567").is_err());
    assert!(check_number_shape("09+1234567").is_err());
}

#[test]
fn load_numbers_merges_positional_and_file() {
    let path = temp_file("numbers.txt", "# header\n0911111111\n\n 0922222222 \n");
    let cfg = AppConfig::parse_from([
        "test-app",
        "0961234567",
        "--numbers-file",
        path.to_str().expect("utf8 path"),
    ]);
    let numbers = cfg.load_numbers().expect("numbers load");
    assert_eq!(numbers, vec!["0961234567", "0911111111", "0922222222"]);
    let _ = fs::remove_file(path);
}

#[test]
fn load_numbers_reports_bad_line() {
    let path = temp_file("bad_numbers.txt", "0911111111\nnot-a-number\n");
    let cfg = AppConfig::parse_from([
        "test-app",
        "--numbers-file",
        path.to_str().expect("utf8 path"),
    ]);
    let err = cfg.load_numbers().expect_err("bad line rejected");
    assert!(format!("{err:#}").contains(":2"));
    let _ = fs::remove_file(path);
}

#[test]
fn detection_defaults_match_tuned_values() {
    let cfg = DetectionConfig::default();
    assert_eq!(cfg.envelope.threshold, 2700);
    assert_eq!(cfg.envelope.max_gap_samples, 12);
    assert_eq!(cfg.envelope.sample_rate, 1000);
    assert!((cfg.matcher.threshold - 9.3).abs() < f32::EPSILON);
    assert_eq!(cfg.session.race_window_ms, 20_000);
    assert_eq!(cfg.session.fast_poll_window_ms, 10_000);
    assert_eq!(cfg.link.ack_timeout_ms, 2_000);
}

#[test]
fn detection_yaml_overrides_subset() {
    let cfg = DetectionConfig::from_yaml_str(
        "envelope:\n  threshold: 3000\nmatcher:\n  threshold: 8.5\n",
    )
    .expect("yaml parses");
    assert_eq!(cfg.envelope.threshold, 3000);
    assert_eq!(cfg.envelope.max_gap_samples, 12);
    assert!((cfg.matcher.threshold - 8.5).abs() < f32::EPSILON);
    assert_eq!(cfg.session, DetectionConfig::default().session);
}

#[test]
fn detection_yaml_rejects_unknown_keys_and_bad_bounds() {
    assert!(DetectionConfig::from_yaml_str("envelop:\n  threshold: 1\n").is_err());
    assert!(DetectionConfig::from_yaml_str(
        "patterns:\n  ringtone_gap_min_s: 7.0\n  ringtone_gap_max_s: 6.0\n"
    )
    .is_err());
    assert!(DetectionConfig::from_yaml_str("session:\n  race_join_ms: 100\n").is_err());
}

#[test]
fn detection_load_reads_file() {
    let path = temp_file("thresholds.yaml", "session:\n  gsm_poll_interval_ms: 300\n");
    let cfg = DetectionConfig::load(Some(&path)).expect("file loads");
    assert_eq!(cfg.session.gsm_poll_interval_ms, 300);
    let _ = fs::remove_file(path);
}

#[test]
fn empty_yaml_is_defaults() {
    assert_eq!(
        DetectionConfig::from_yaml_str("  \n").expect("empty ok"),
        DetectionConfig::default()
    );
}
