//! Announcement template matching for calls whose audio is a recorded PCM clip.
//!
//! The carrier plays fixed voice announcements for unreachable and invalid numbers.
//! A short reference recording of each is slid across the call audio; the best DTW
//! distance under the threshold names the announcement. No match means the line is
//! treated as active.

mod dtw;
mod features;

pub use dtw::dtw_distance;

use crate::audio::{load_wav_mono, WavClip};
use crate::error::CheckError;
use crate::log_debug;
use anyhow::{Context, Result};
use features::{cmvn, extract, rms};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatcherConfig {
    /// Best DTW distance at or below this counts as a match.
    pub threshold: f32,
    /// Template length used for matching; longer reference clips are trimmed.
    pub window_ms: u32,
    pub step_ms: u32,
    /// Windows whose level-normalized RMS falls below this are skipped.
    pub quiet_rms: f32,
    pub band_low_hz: f32,
    pub band_high_hz: f32,
    pub target_rate: u32,
    pub n_mfcc: usize,
    pub frame_ms: u32,
    pub hop_ms: u32,
    pub preemphasis: f32,
    /// Leading audio used as the noise profile.
    pub noise_ms: u32,
    pub noise_n_fft: usize,
    pub noise_hop: usize,
    /// Over-subtraction factor.
    pub alpha: f32,
    /// Spectral floor as a fraction of the original power.
    pub beta: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: 9.3,
            window_ms: 3_000,
            step_ms: 100,
            quiet_rms: 0.1,
            band_low_hz: 100.0,
            band_high_hz: 3_800.0,
            target_rate: crate::audio::TARGET_RATE,
            n_mfcc: 20,
            frame_ms: 25,
            hop_ms: 10,
            preemphasis: 0.97,
            noise_ms: 2_000,
            noise_n_fft: 2_048,
            noise_hop: 512,
            alpha: 2.0,
            beta: 0.01,
        }
    }
}

impl MatcherConfig {
    fn hop_samples(&self) -> usize {
        (self.hop_ms as usize * self.target_rate as usize / 1_000).max(1)
    }

    fn step_frames(&self) -> usize {
        (self.step_ms / self.hop_ms.max(1)).max(1) as usize
    }
}

/// Announcements with a reference recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateLabel {
    /// "Thue bao quy khach vua goi tam thoi khong lien lac duoc"
    Unreachable,
    /// "So may quy khach vua goi khong dung"
    InvalidNumber,
}

impl TemplateLabel {
    pub const ALL: [TemplateLabel; 2] = [TemplateLabel::Unreachable, TemplateLabel::InvalidNumber];

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Unreachable => "template_thue_bao.wav",
            Self::InvalidNumber => "template_so_khong_dung.wav",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchScore {
    pub label: TemplateLabel,
    /// Infinite when no window was loud enough to compare.
    pub distance: f32,
    pub offset_s: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchDecision {
    pub scores: Vec<MatchScore>,
    pub label: Option<TemplateLabel>,
}

struct Template {
    label: TemplateLabel,
    frames: Vec<Vec<f32>>,
    samples: usize,
}

pub struct TemplateMatcher {
    cfg: MatcherConfig,
    templates: Vec<Template>,
}

impl TemplateMatcher {
    /// Load whichever reference WAVs exist in `dir`; fails when there are none.
    pub fn load_dir(dir: &Path, cfg: MatcherConfig) -> Result<Self> {
        let mut clips = Vec::new();
        for label in TemplateLabel::ALL {
            let path = dir.join(label.file_name());
            if !path.is_file() {
                log_debug(&format!("matcher: template {} missing", path.display()));
                continue;
            }
            clips.push((label, load_wav_mono(&path)?));
        }
        Self::from_clips(clips, cfg)
            .with_context(|| format!("no usable templates in '{}'", dir.display()))
    }

    pub fn from_clips(clips: Vec<(TemplateLabel, WavClip)>, cfg: MatcherConfig) -> Result<Self> {
        let mut templates = Vec::new();
        for (label, clip) in clips {
            let keep = (cfg.window_ms as usize * clip.sample_rate as usize / 1_000).max(1);
            let head = &clip.samples[..clip.samples.len().min(keep)];
            let features = extract(head, clip.sample_rate, &cfg);
            if features.frames.is_empty() {
                log_debug(&format!("matcher: template {label:?} produced no frames"));
                continue;
            }
            templates.push(Template {
                label,
                frames: cmvn(&features.frames),
                samples: features.normalized.len(),
            });
        }
        if templates.is_empty() {
            return Err(CheckError::HardwareUnavailable("no announcement templates".to_string()).into());
        }
        Ok(Self { cfg, templates })
    }

    pub fn labels(&self) -> Vec<TemplateLabel> {
        self.templates.iter().map(|t| t.label).collect()
    }

    /// Best distance per template across all sliding windows of the clip.
    pub fn score(&self, samples: &[f32], sample_rate: u32) -> Vec<MatchScore> {
        let clip = extract(samples, sample_rate, &self.cfg);
        let hop = self.cfg.hop_samples();
        let step = self.cfg.step_frames();

        self.templates
            .iter()
            .map(|template| {
                let width = template.frames.len();
                let mut best = MatchScore {
                    label: template.label,
                    distance: f32::INFINITY,
                    offset_s: 0.0,
                };
                if clip.frames.len() < width {
                    return best;
                }
                for start in (0..=clip.frames.len() - width).step_by(step) {
                    let from = (start * hop).min(clip.normalized.len());
                    let to = (from + template.samples).min(clip.normalized.len());
                    if rms(&clip.normalized[from..to]) < self.cfg.quiet_rms {
                        continue;
                    }
                    let window = cmvn(&clip.frames[start..start + width]);
                    let distance = dtw_distance(&template.frames, &window);
                    if distance < best.distance {
                        best.distance = distance;
                        best.offset_s = from as f32 / self.cfg.target_rate as f32;
                    }
                }
                best
            })
            .collect()
    }

    pub fn classify(&self, samples: &[f32], sample_rate: u32) -> MatchDecision {
        let scores = self.score(samples, sample_rate);
        let label = decide(&scores, self.cfg.threshold);
        MatchDecision { scores, label }
    }
}

/// Label of the closest template, if its distance is at or under `threshold`.
pub fn decide(scores: &[MatchScore], threshold: f32) -> Option<TemplateLabel> {
    scores
        .iter()
        .filter(|score| score.distance.is_finite())
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
        .filter(|best| best.distance <= threshold)
        .map(|best| best.label)
}
