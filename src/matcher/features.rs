//! Noise-robust cepstral features for announcement matching.
//!
//! Pipeline: level normalization, resampling, pre-emphasis, spectral subtraction
//! against a noise profile from the clip head, a zero-phase speech bandpass, then
//! 20 MFCCs with first and second regression derivatives.

use super::MatcherConfig;
use crate::audio::{design_low_pass, fir_filter, resample};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

const N_MELS: usize = 128;
const TOP_DB: f32 = 80.0;
const AMIN: f32 = 1e-10;
const BANDPASS_TAPS: usize = 401;
/// Half-width of the regression window for derivatives (9 frames).
const DELTA_HALF_WIDTH: isize = 4;

/// Feature frames for a whole clip, plus the level-normalized signal the quiet
/// check runs on. Both are at `cfg.target_rate`.
#[derive(Debug, Clone)]
pub(crate) struct ClipFeatures {
    pub frames: Vec<Vec<f32>>,
    pub normalized: Vec<f32>,
}

pub(crate) fn extract(samples: &[f32], sample_rate: u32, cfg: &MatcherConfig) -> ClipFeatures {
    let normalized = resample(&remove_dc_and_scale(samples), sample_rate, cfg.target_rate);
    let cleaned = preprocess(&normalized, cfg);
    let frames = with_derivatives(mfcc(&cleaned, cfg));
    ClipFeatures { frames, normalized }
}

/// Zero mean, unit standard deviation.
pub(crate) fn remove_dc_and_scale(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
    let std = var.sqrt();
    let scale = if std > 0.0 { 1.0 / std } else { 1.0 };
    samples.iter().map(|s| (s - mean) * scale).collect()
}

pub(crate) fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

fn preprocess(signal: &[f32], cfg: &MatcherConfig) -> Vec<f32> {
    let peak = signal.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    let scale = if peak > 0.0 { 1.0 / peak } else { 1.0 };
    let mut emphasized = Vec::with_capacity(signal.len());
    let mut prev = 0.0f32;
    for (idx, sample) in signal.iter().enumerate() {
        let current = sample * scale;
        emphasized.push(if idx == 0 {
            current
        } else {
            current - cfg.preemphasis * prev
        });
        prev = current;
    }
    let denoised = spectral_subtract(&emphasized, cfg);
    bandpass(&denoised, cfg)
}

fn hann(len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / len as f32).cos())
        .collect()
}

fn hamming(len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f32 / len as f32).cos())
        .collect()
}

/// Centered frames with reflection padding, windowed and transformed.
fn stft(
    signal: &[f32],
    n_fft: usize,
    hop: usize,
    window: &[f32],
    planner: &mut FftPlanner<f32>,
) -> Vec<Vec<Complex<f32>>> {
    let padded = reflect_pad(signal, n_fft / 2);
    if padded.len() < n_fft {
        return Vec::new();
    }
    let fft = planner.plan_fft_forward(n_fft);
    let count = 1 + (padded.len() - n_fft) / hop;
    (0..count)
        .map(|frame| {
            let start = frame * hop;
            let mut buffer: Vec<Complex<f32>> = padded[start..start + n_fft]
                .iter()
                .zip(window)
                .map(|(s, w)| Complex::new(s * w, 0.0))
                .collect();
            fft.process(&mut buffer);
            buffer
        })
        .collect()
}

fn reflect_pad(signal: &[f32], pad: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(signal.len() + 2 * pad);
    if signal.len() <= pad {
        out.resize(pad, 0.0);
        out.extend_from_slice(signal);
        out.resize(signal.len() + 2 * pad, 0.0);
        return out;
    }
    out.extend((1..=pad).rev().map(|i| signal[i]));
    out.extend_from_slice(signal);
    let last = signal.len() - 1;
    out.extend((1..=pad).map(|i| signal[last - i]));
    out
}

/// Weighted overlap-add inverse of [`stft`], trimmed to `len` samples.
fn istft(
    frames: &[Vec<Complex<f32>>],
    n_fft: usize,
    hop: usize,
    window: &[f32],
    len: usize,
    planner: &mut FftPlanner<f32>,
) -> Vec<f32> {
    let ifft = planner.plan_fft_inverse(n_fft);
    let total = n_fft + hop * frames.len().saturating_sub(1);
    let mut out = vec![0.0f32; total];
    let mut norm = vec![0.0f32; total];
    for (idx, frame) in frames.iter().enumerate() {
        let mut buffer = frame.clone();
        ifft.process(&mut buffer);
        let start = idx * hop;
        for (k, value) in buffer.iter().enumerate() {
            out[start + k] += value.re / n_fft as f32 * window[k];
            norm[start + k] += window[k] * window[k];
        }
    }
    for (sample, weight) in out.iter_mut().zip(&norm) {
        if *weight > 1e-8 {
            *sample /= weight;
        }
    }
    let offset = n_fft / 2;
    out.into_iter().skip(offset).take(len).collect()
}

/// Power subtraction with a floor; phase is kept.
fn spectral_subtract(signal: &[f32], cfg: &MatcherConfig) -> Vec<f32> {
    let n_fft = cfg.noise_n_fft;
    let hop = cfg.noise_hop.max(1);
    let window = hann(n_fft);
    let mut planner = FftPlanner::new();

    let mut noise_len = (cfg.noise_ms as usize * cfg.target_rate as usize) / 1_000;
    if signal.len() < noise_len {
        noise_len = signal.len() / 2;
    }
    let noise_frames = stft(&signal[..noise_len], n_fft, hop, &window, &mut planner);
    let frames = stft(signal, n_fft, hop, &window, &mut planner);
    if noise_frames.is_empty() || frames.is_empty() {
        return signal.to_vec();
    }

    let mut noise_power = vec![0.0f32; n_fft];
    for frame in &noise_frames {
        for (acc, bin) in noise_power.iter_mut().zip(frame) {
            *acc += bin.norm_sqr();
        }
    }
    for value in &mut noise_power {
        *value /= noise_frames.len() as f32;
    }

    let cleaned: Vec<Vec<Complex<f32>>> = frames
        .into_iter()
        .map(|frame| {
            frame
                .into_iter()
                .zip(&noise_power)
                .map(|(bin, noise)| {
                    let power = bin.norm_sqr();
                    let clean = (power - cfg.alpha * noise).max(cfg.beta * power);
                    let magnitude = power.sqrt();
                    if magnitude > 0.0 {
                        bin * (clean.sqrt() / magnitude)
                    } else {
                        bin
                    }
                })
                .collect()
        })
        .collect();
    istft(&cleaned, n_fft, hop, &window, signal.len(), &mut planner)
}

/// Zero-phase FIR bandpass: the difference of two low-passes, run forward and back.
fn bandpass(signal: &[f32], cfg: &MatcherConfig) -> Vec<f32> {
    let rate = cfg.target_rate as f32;
    let high = design_low_pass((cfg.band_high_hz / rate).min(0.499), BANDPASS_TAPS);
    let low = design_low_pass(cfg.band_low_hz / rate, BANDPASS_TAPS);
    let kernel: Vec<f32> = high.iter().zip(&low).map(|(h, l)| h - l).collect();

    let mut forward = fir_filter(signal, &kernel);
    forward.reverse();
    let mut both = fir_filter(&forward, &kernel);
    both.reverse();
    both
}

fn hz_to_mel(hz: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1_000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f32.ln() / 27.0;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1_000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f32.ln() / 27.0;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * F_SP
    }
}

/// Slaney-normalized triangular filters over `n_fft / 2 + 1` bins.
pub(crate) fn mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: u32) -> Vec<Vec<f32>> {
    let bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f32> = (0..bins)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect();
    let max_mel = hz_to_mel(sample_rate as f32 / 2.0);
    let points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f32 / (n_mels + 1) as f32))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (left, center, right) = (points[m], points[m + 1], points[m + 2]);
            let enorm = 2.0 / (right - left);
            fft_freqs
                .iter()
                .map(|f| {
                    let lower = (f - left) / (center - left);
                    let upper = (right - f) / (right - center);
                    lower.min(upper).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

fn mfcc(signal: &[f32], cfg: &MatcherConfig) -> Vec<Vec<f32>> {
    let rate = cfg.target_rate as usize;
    let frame_len = (cfg.frame_ms as usize * rate / 1_000).max(1);
    let hop = (cfg.hop_ms as usize * rate / 1_000).max(1);
    let n_fft = frame_len * 2;
    let mut planner = FftPlanner::new();
    let spectra = stft(signal, n_fft, hop, &hamming(n_fft), &mut planner);
    if spectra.is_empty() {
        return Vec::new();
    }
    let bank = mel_filterbank(N_MELS, n_fft, cfg.target_rate);

    let mut mel_db: Vec<Vec<f32>> = spectra
        .iter()
        .map(|frame| {
            let power: Vec<f32> = frame[..n_fft / 2 + 1].iter().map(|b| b.norm_sqr()).collect();
            bank.iter()
                .map(|filter| {
                    let energy: f32 = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
                    10.0 * energy.max(AMIN).log10()
                })
                .collect()
        })
        .collect();
    let peak = mel_db
        .iter()
        .flatten()
        .fold(f32::NEG_INFINITY, |acc, v| acc.max(*v));
    for value in mel_db.iter_mut().flatten() {
        *value = value.max(peak - TOP_DB);
    }

    mel_db.iter().map(|frame| dct_ortho(frame, cfg.n_mfcc)).collect()
}

/// First `keep` coefficients of an orthonormal DCT-II.
fn dct_ortho(input: &[f32], keep: usize) -> Vec<f32> {
    let n = input.len() as f32;
    (0..keep)
        .map(|k| {
            let sum: f32 = input
                .iter()
                .enumerate()
                .map(|(i, x)| x * (PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n)).cos())
                .sum();
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            sum * scale
        })
        .collect()
}

/// Append first and second derivatives estimated by local polynomial fits over a
/// 9-frame window; edges repeat the boundary frame.
pub(crate) fn with_derivatives(frames: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    if frames.is_empty() {
        return frames;
    }
    let len = frames.len() as isize;
    let dims = frames[0].len();
    let at = |t: isize| frame_at(&frames, t);

    let first_norm: f32 = (1..=DELTA_HALF_WIDTH).map(|n| 2.0 * (n * n) as f32).sum();
    let width = (2 * DELTA_HALF_WIDTH + 1) as f32;
    let mean_sq = first_norm / width;
    let second_norm: f32 = (-DELTA_HALF_WIDTH..=DELTA_HALF_WIDTH)
        .map(|n| ((n * n) as f32 - mean_sq).powi(2))
        .sum();

    (0..len)
        .map(|t| {
            let mut out = Vec::with_capacity(dims * 3);
            out.extend_from_slice(at(t));
            for d in 0..dims {
                let slope: f32 = (1..=DELTA_HALF_WIDTH)
                    .map(|n| n as f32 * (at(t + n)[d] - at(t - n)[d]))
                    .sum();
                out.push(slope / first_norm);
            }
            for d in 0..dims {
                let curve: f32 = (-DELTA_HALF_WIDTH..=DELTA_HALF_WIDTH)
                    .map(|n| ((n * n) as f32 - mean_sq) * at(t + n)[d])
                    .sum();
                out.push(2.0 * curve / second_norm);
            }
            out
        })
        .collect()
}

fn frame_at(frames: &[Vec<f32>], t: isize) -> &[f32] {
    &frames[t.clamp(0, frames.len() as isize - 1) as usize]
}

/// Per-dimension mean and variance normalization over time.
pub(crate) fn cmvn(frames: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let Some(dims) = frames.first().map(Vec::len) else {
        return Vec::new();
    };
    let n = frames.len() as f32;
    let mut mean = vec![0.0f32; dims];
    for frame in frames {
        for (acc, v) in mean.iter_mut().zip(frame) {
            *acc += v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n);
    let mut std = vec![0.0f32; dims];
    for frame in frames {
        for ((acc, v), m) in std.iter_mut().zip(frame).zip(&mean) {
            *acc += (v - m).powi(2);
        }
    }
    std.iter_mut().for_each(|s| *s = (*s / n).sqrt() + 1e-8);

    frames
        .iter()
        .map(|frame| {
            frame
                .iter()
                .zip(mean.iter().zip(&std))
                .map(|(v, (m, s))| (v - m) / s)
                .collect()
        })
        .collect()
}
