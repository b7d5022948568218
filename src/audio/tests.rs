use super::envelope::{classify, detect_regions, post_process, segment};
use super::recorder::append_downmixed_samples;
use super::resample::{
    basic_resample, design_low_pass, downsampling_tap_count, fir_filter, resample_linear,
};
use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::env;
use std::f32::consts::PI;

const HIGH: u16 = 3_000;
const LOW: u16 = 200;

/// Build an envelope from `(value, sample_count)` runs.
fn runs(parts: &[(u16, usize)]) -> Vec<u16> {
    parts
        .iter()
        .flat_map(|(value, count)| std::iter::repeat(*value).take(*count))
        .collect()
}

fn region(start: usize, end: usize) -> EnvelopeRegion {
    EnvelopeRegion {
        start,
        end,
        avg_amplitude: f32::from(HIGH),
    }
}

/// Regions of `duration` samples separated by `gap` samples, starting at 0.
fn spaced_regions(count: usize, duration: usize, gap: usize) -> Vec<EnvelopeRegion> {
    (0..count)
        .map(|idx| {
            let start = idx * (duration + gap);
            region(start, start + duration)
        })
        .collect()
}

#[test]
fn all_below_threshold_is_silence() {
    let cfg = EnvelopeConfig::default();
    let samples = vec![LOW; 20_000];
    let regions = segment(&samples, &cfg);
    assert!(regions.is_empty());
    assert_eq!(
        classify(&regions, cfg.sample_rate, &PatternRules::default()),
        AudioPattern::Silence
    );
}

#[test]
fn single_long_region_is_blocked() {
    let cfg = EnvelopeConfig::default();
    let samples = runs(&[(LOW, 1_000), (HIGH, 4_000), (LOW, 1_000)]);
    let regions = segment(&samples, &cfg);
    assert_eq!(regions.len(), 1);
    assert_eq!((regions[0].start, regions[0].end), (1_000, 4_999));
    assert_eq!(regions[0].duration_ms(cfg.sample_rate), 3_999);
    assert_eq!(
        classify(&regions, cfg.sample_rate, &PatternRules::default()),
        AudioPattern::Blocked
    );
}

#[test]
fn single_short_region_is_ringtone() {
    let regions = vec![region(0, 1_500)];
    assert_eq!(
        classify(&regions, 1_000, &PatternRules::default()),
        AudioPattern::Ringtone
    );
}

#[test]
fn five_short_bursts_are_voice_machine() {
    let regions = spaced_regions(5, 500, 800);
    assert_eq!(
        classify(&regions, 1_000, &PatternRules::default()),
        AudioPattern::VoiceMachine
    );
}

#[test]
fn ringback_cadence_is_ringtone() {
    let regions = spaced_regions(3, 1_000, 5_000);
    assert_eq!(
        classify(&regions, 1_000, &PatternRules::default()),
        AudioPattern::Ringtone
    );
}

#[test]
fn fast_busy_cadence_is_blocked() {
    let regions = spaced_regions(3, 900, 500);
    assert_eq!(
        classify(&regions, 1_000, &PatternRules::default()),
        AudioPattern::Blocked
    );
}

#[test]
fn unmatched_shapes_default_to_ringtone() {
    // Two long regions far apart match no rule.
    let regions = spaced_regions(2, 3_000, 9_000);
    assert_eq!(
        classify(&regions, 1_000, &PatternRules::default()),
        AudioPattern::Ringtone
    );
}

#[test]
fn overridden_rules_change_the_decision() {
    let rules = PatternRules {
        blocked_single_s: 5.0,
        ..PatternRules::default()
    };
    assert_eq!(
        classify(&[region(0, 4_000)], 1_000, &rules),
        AudioPattern::Ringtone
    );
}

#[test]
fn short_dips_do_not_split_a_region() {
    let cfg = EnvelopeConfig::default();
    let samples = runs(&[(HIGH, 400), (LOW, cfg.max_gap_samples), (HIGH, 400)]);
    let regions = detect_regions(&samples, &cfg);
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].len(), 800 + cfg.max_gap_samples);
}

#[test]
fn long_dips_close_the_region_before_the_gap() {
    let cfg = EnvelopeConfig {
        min_region_ms: 1,
        ..EnvelopeConfig::default()
    };
    let samples = runs(&[(HIGH, 400), (LOW, 100), (HIGH, 400), (LOW, 5)]);
    let spans: Vec<_> = detect_regions(&samples, &cfg)
        .iter()
        .map(|r| (r.start, r.end))
        .collect();
    // The trailing region is still open at the end and runs to the last sample.
    assert_eq!(spans, vec![(0, 399), (500, 905)]);
}

#[test]
fn region_at_the_minimum_length_boundary() {
    let cfg = EnvelopeConfig::default();
    let min_len = (cfg.min_region_ms * cfg.sample_rate / 1_000) as usize;
    let just_short = runs(&[(HIGH, min_len), (LOW, 50)]);
    assert!(detect_regions(&just_short, &cfg).is_empty());

    let long_enough = runs(&[(HIGH, min_len + 1), (LOW, 50)]);
    let regions = detect_regions(&long_enough, &cfg);
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].len(), min_len);
}

#[test]
fn noise_bursts_are_discarded() {
    let cfg = EnvelopeConfig::default();
    let samples = runs(&[(LOW, 100), (HIGH, 200), (LOW, 100)]);
    assert!(detect_regions(&samples, &cfg).is_empty());
}

#[test]
fn post_process_drops_merges_and_splits() {
    let cfg = EnvelopeConfig::default();
    let samples = runs(&[
        (HIGH, 1_500),
        (LOW, 300),
        (HIGH, 1_500),
        (LOW, 3_000),
        (HIGH, 500),
    ]);
    let raw = detect_regions(&samples, &cfg);
    assert_eq!(raw.len(), 3);

    let processed = post_process(&samples, &raw, &cfg);
    // The 500-sample burst is dropped; the first two merge into 3299 samples and are
    // split again at the start of the dip.
    let spans: Vec<_> = processed.iter().map(|r| (r.start, r.end)).collect();
    assert_eq!(spans, vec![(0, 1_500), (1_500, 3_299)]);
}

#[test]
fn merged_region_below_split_limit_stays_whole() {
    let cfg = EnvelopeConfig::default();
    let samples = runs(&[(HIGH, 900), (LOW, 500), (HIGH, 900)]);
    let processed = segment(&samples, &cfg);
    assert_eq!(processed.len(), 1);
    assert_eq!((processed[0].start, processed[0].end), (0, 2_300));
    let expected = (1_800.0 * f32::from(HIGH) + 500.0 * f32::from(LOW)) / 2_300.0;
    assert!((processed[0].avg_amplitude - expected).abs() < 0.5);
}

fn random_envelope(rng: &mut StdRng) -> Vec<u16> {
    let mut samples = Vec::new();
    let target = rng.gen_range(0..30_000);
    while samples.len() < target {
        let loud = rng.gen_bool(0.4);
        let len = rng.gen_range(1..2_500);
        for _ in 0..len {
            let value = if loud {
                rng.gen_range(2_400..4_096)
            } else {
                rng.gen_range(0..2_900)
            };
            samples.push(value);
        }
    }
    samples
}

#[test]
fn segments_are_sorted_disjoint_and_non_empty() {
    let cfg = EnvelopeConfig::default();
    let mut rng = StdRng::seed_from_u64(0x11ec_4ec0);
    for _ in 0..60 {
        let samples = random_envelope(&mut rng);
        for regions in [detect_regions(&samples, &cfg), segment(&samples, &cfg)] {
            for region in &regions {
                assert!(region.start < region.end, "{region:?}");
                assert!(region.end <= samples.len());
            }
            for pair in regions.windows(2) {
                assert!(pair[0].end <= pair[1].start, "{pair:?}");
            }
        }
    }
}

#[test]
fn segment_is_deterministic() {
    let cfg = EnvelopeConfig::default();
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..20 {
        let samples = random_envelope(&mut rng);
        assert_eq!(segment(&samples, &cfg), segment(&samples, &cfg));
    }
}

#[test]
fn downmixes_multi_channel_audio() {
    let mut buf = Vec::new();
    append_downmixed_samples(&mut buf, &[1.0f32, 3.0, -2.0, 2.0, 5.0], 2, |s| s);
    assert_eq!(buf, vec![2.0, 0.0, 5.0]);
}

#[test]
fn downmix_converts_integer_samples() {
    let mut buf = Vec::new();
    append_downmixed_samples(&mut buf, &[16_384i16, -16_384], 1, |s| {
        s as f32 / 32_768.0
    });
    assert_eq!(buf, vec![0.5, -0.5]);
}

#[test]
fn resample_is_identity_at_equal_rates() {
    let input = vec![0.1, 0.2, 0.3];
    assert_eq!(resample(&input, 16_000, 16_000), input);
    assert!(resample(&[], 8_000, 16_000).is_empty());
}

#[test]
fn resample_scales_length() {
    let input = vec![0.0f32; 4_800];
    let out = resample(&input, 48_000, 16_000);
    assert!((out.len() as i64 - 1_600).abs() <= 1, "len {}", out.len());

    let out = resample(&vec![0.0f32; 800], 8_000, 16_000);
    assert!((out.len() as i64 - 1_600).abs() <= 1, "len {}", out.len());
}

#[test]
fn basic_resample_rejects_out_of_range_rates() {
    let input = vec![0.5f32; 10];
    assert_eq!(basic_resample(&input, 500, 16_000), input);
}

#[test]
fn resample_linear_interpolates_midpoints() {
    assert_eq!(resample_linear(&[0.0, 1.0], 2.0), vec![0.0, 0.5, 1.0, 1.0]);
}

#[test]
fn tap_count_is_odd_and_bounded() {
    for (from, to) in [(16_000, 16_000), (48_000, 16_000), (192_000, 1_000)] {
        let taps = downsampling_tap_count(from, to);
        assert_eq!(taps % 2, 1);
        assert!((11..=129).contains(&taps));
    }
}

#[test]
fn low_pass_is_normalized_and_keeps_dc() {
    let coeffs = design_low_pass(0.1, 31);
    let sum: f32 = coeffs.iter().sum();
    assert!((sum - 1.0).abs() < 1e-4);

    let filtered = fir_filter(&[0.5; 200], &coeffs);
    assert!((filtered[100] - 0.5).abs() < 1e-3);
}

#[test]
fn low_pass_attenuates_high_tone() {
    let rate = 16_000.0;
    let tone: Vec<f32> = (0..4_000)
        .map(|n| (2.0 * PI * 6_000.0 * n as f32 / rate).sin())
        .collect();
    let filtered = fir_filter(&tone, &design_low_pass(1_000.0 / rate, 101));
    let energy = |s: &[f32]| s[500..3_500].iter().map(|v| v * v).sum::<f32>();
    assert!(energy(&filtered) < energy(&tone) * 0.01);
}

#[test]
fn wav_save_and_load_keep_samples() {
    let dir = env::temp_dir().join(format!("linecheck_wav_{}", std::process::id()));
    let path = dir.join("clip.wav");
    let samples: Vec<f32> = (0..160).map(|n| (n as f32 / 160.0) - 0.5).collect();
    save_wav(&path, &samples, 8_000).expect("save");

    let clip = load_wav_mono(&path).expect("load");
    assert_eq!(clip.sample_rate, 8_000);
    assert_eq!(clip.samples.len(), samples.len());
    for (a, b) in clip.samples.iter().zip(&samples) {
        assert!((a - b).abs() < 1e-3);
    }
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn load_wav_reports_missing_file() {
    let err = load_wav_mono(std::path::Path::new("/nonexistent/linecheck.wav"))
        .expect_err("missing file");
    assert!(format!("{err:#}").contains("failed to open WAV"));
}

#[test]
fn recording_path_uses_phone_and_timestamp() {
    let path = recording_path(std::path::Path::new("/tmp/rec"), "+84 961-234-567");
    let name = path.file_name().and_then(|n| n.to_str()).expect("name");
    assert!(name.starts_with("+84961234567_"), "{name}");
    assert!(name.ends_with(".wav"));
}
