//! Amplitude-envelope segmentation of ADC call audio.
//!
//! The ESP32 samples a rectified audio envelope at about 1 kHz. Tones and speech show
//! up as flat-topped "regions" above a threshold; their count, lengths and spacing
//! separate ringback, busy/blocked tones and voice prompts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvelopeConfig {
    /// ADC value at or above which a sample counts as signal.
    pub threshold: u16,
    pub sample_rate: u32,
    /// Raw regions shorter than this are noise.
    pub min_region_ms: u32,
    /// Sub-threshold samples tolerated inside one region.
    pub max_gap_samples: usize,
    /// Post-processing drops regions (and split halves) shorter than this.
    pub min_kept_ms: u32,
    pub merge_gap_ms: u32,
    /// Merged regions longer than this are split at their quietest sample.
    pub split_above_ms: u32,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            threshold: 2_700,
            sample_rate: 1_000,
            min_region_ms: 300,
            max_gap_samples: 12,
            min_kept_ms: 800,
            merge_gap_ms: 1_000,
            split_above_ms: 2_500,
        }
    }
}

impl EnvelopeConfig {
    fn samples_for(&self, ms: u32) -> usize {
        (u64::from(ms) * u64::from(self.sample_rate) / 1_000) as usize
    }
}

/// Decision table for [`classify`]. Durations and gaps are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatternRules {
    pub blocked_single_s: f32,
    pub ringtone_max_avg_duration_s: f32,
    pub ringtone_gap_min_s: f32,
    pub ringtone_gap_max_s: f32,
    pub voice_min_regions: usize,
    pub voice_duration_min_s: f32,
    pub voice_duration_max_s: f32,
    pub voice_max_gap_s: f32,
    pub blocked_min_regions: usize,
    pub blocked_duration_min_s: f32,
    pub blocked_duration_max_s: f32,
    pub blocked_gap_min_s: f32,
    pub blocked_gap_max_s: f32,
}

impl Default for PatternRules {
    fn default() -> Self {
        Self {
            blocked_single_s: 3.5,
            ringtone_max_avg_duration_s: 2.0,
            ringtone_gap_min_s: 4.0,
            ringtone_gap_max_s: 6.0,
            voice_min_regions: 4,
            voice_duration_min_s: 0.3,
            voice_duration_max_s: 1.0,
            voice_max_gap_s: 1.2,
            blocked_min_regions: 3,
            blocked_duration_min_s: 0.8,
            blocked_duration_max_s: 1.0,
            blocked_gap_min_s: 0.3,
            blocked_gap_max_s: 1.0,
        }
    }
}

/// Half-open sample range `[start, end)` of one above-threshold burst.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnvelopeRegion {
    pub start: usize,
    pub end: usize,
    pub avg_amplitude: f32,
}

impl EnvelopeRegion {
    fn over(samples: &[u16], start: usize, end: usize) -> Self {
        let slice = &samples[start..end];
        let sum: u64 = slice.iter().map(|v| u64::from(*v)).sum();
        Self {
            start,
            end,
            avg_amplitude: sum as f32 / slice.len().max(1) as f32,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn duration_s(&self, sample_rate: u32) -> f32 {
        self.len() as f32 / sample_rate.max(1) as f32
    }

    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        self.len() as u64 * 1_000 / u64::from(sample_rate.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPattern {
    Ringtone,
    Blocked,
    VoiceMachine,
    Silence,
}

impl AudioPattern {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ringtone => "ringtone",
            Self::Blocked => "blocked",
            Self::VoiceMachine => "voice_machine",
            Self::Silence => "silence",
        }
    }
}

/// Threshold scan with a gap tolerance. Returned regions are disjoint, sorted and
/// non-empty.
pub fn detect_regions(samples: &[u16], cfg: &EnvelopeConfig) -> Vec<EnvelopeRegion> {
    let min_len = cfg.samples_for(cfg.min_region_ms).max(1);
    let mut regions = Vec::new();
    let mut start: Option<usize> = None;
    let mut below = 0usize;

    let close = |from: usize, end: usize, regions: &mut Vec<EnvelopeRegion>| {
        if end.saturating_sub(from) >= min_len {
            regions.push(EnvelopeRegion::over(samples, from, end));
        }
    };

    for (idx, value) in samples.iter().enumerate() {
        if *value >= cfg.threshold {
            start.get_or_insert(idx);
            below = 0;
        } else if let Some(open) = start {
            below += 1;
            if below > cfg.max_gap_samples {
                // Closed regions stop one sample short of the dip.
                close(open, idx - below, &mut regions);
                start = None;
                below = 0;
            }
        }
    }
    if let Some(open) = start {
        close(open, samples.len(), &mut regions);
    }
    regions
}

/// Drop short regions, merge close neighbours, then split long merged regions at
/// their quietest sample.
pub fn post_process(
    samples: &[u16],
    regions: &[EnvelopeRegion],
    cfg: &EnvelopeConfig,
) -> Vec<EnvelopeRegion> {
    let min_kept = cfg.samples_for(cfg.min_kept_ms).max(1);
    let merge_gap = cfg.samples_for(cfg.merge_gap_ms);
    let split_above = cfg.samples_for(cfg.split_above_ms);

    let mut merged: Vec<(EnvelopeRegion, bool)> = Vec::new();
    for region in regions.iter().filter(|r| r.len() >= min_kept) {
        match merged.last_mut() {
            Some((prev, was_merged)) if region.start.saturating_sub(prev.end) <= merge_gap => {
                *prev = EnvelopeRegion::over(samples, prev.start, region.end.max(prev.end));
                *was_merged = true;
            }
            _ => merged.push((*region, false)),
        }
    }

    let mut out = Vec::with_capacity(merged.len());
    for (region, was_merged) in merged {
        if !was_merged || region.len() <= split_above {
            out.push(region);
            continue;
        }
        let split = quietest_index(samples, &region);
        for (start, end) in [(region.start, split), (split, region.end)] {
            if end > start && end - start >= min_kept {
                out.push(EnvelopeRegion::over(samples, start, end));
            }
        }
    }
    out
}

/// Interior index of the minimum sample; the first one wins on ties.
fn quietest_index(samples: &[u16], region: &EnvelopeRegion) -> usize {
    let interior = (region.start + 1)..region.end.saturating_sub(1).max(region.start + 1);
    let mut best = region.start + region.len() / 2;
    let mut best_value = u16::MAX;
    for idx in interior {
        if samples[idx] < best_value {
            best_value = samples[idx];
            best = idx;
        }
    }
    best
}

/// Full segmentation: raw regions followed by post-processing.
pub fn segment(samples: &[u16], cfg: &EnvelopeConfig) -> Vec<EnvelopeRegion> {
    let raw = detect_regions(samples, cfg);
    post_process(samples, &raw, cfg)
}

/// Rules are evaluated in order; anything unmatched is treated as ringback.
pub fn classify(regions: &[EnvelopeRegion], sample_rate: u32, rules: &PatternRules) -> AudioPattern {
    match regions {
        [] => return AudioPattern::Silence,
        [only] => {
            return if only.duration_s(sample_rate) > rules.blocked_single_s {
                AudioPattern::Blocked
            } else {
                AudioPattern::Ringtone
            };
        }
        _ => {}
    }

    let count = regions.len();
    let avg_duration =
        regions.iter().map(|r| r.duration_s(sample_rate)).sum::<f32>() / count as f32;
    let rate = sample_rate.max(1) as f32;
    let avg_gap = regions
        .windows(2)
        .map(|pair| pair[1].start.saturating_sub(pair[0].end) as f32 / rate)
        .sum::<f32>()
        / (count - 1) as f32;

    if avg_duration <= rules.ringtone_max_avg_duration_s
        && (rules.ringtone_gap_min_s..=rules.ringtone_gap_max_s).contains(&avg_gap)
    {
        return AudioPattern::Ringtone;
    }
    if count >= rules.voice_min_regions
        && (rules.voice_duration_min_s..=rules.voice_duration_max_s).contains(&avg_duration)
        && avg_gap <= rules.voice_max_gap_s
    {
        return AudioPattern::VoiceMachine;
    }
    if count >= rules.blocked_min_regions
        && (rules.blocked_duration_min_s..=rules.blocked_duration_max_s).contains(&avg_duration)
        && (rules.blocked_gap_min_s..=rules.blocked_gap_max_s).contains(&avg_gap)
    {
        return AudioPattern::Blocked;
    }
    AudioPattern::Ringtone
}
