use crate::audio::{EnvelopeConfig, PatternRules};
use crate::esp32::LinkTimings;
use crate::matcher::MatcherConfig;
use crate::modem::AtTimings;
use crate::session::SessionTimings;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Every empirically tuned threshold and timing in one place.
///
/// Defaults reproduce the values the hardware was tuned with. A YAML file may
/// override any subset; missing keys keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    pub at: AtTimings,
    pub link: LinkTimings,
    pub envelope: EnvelopeConfig,
    pub patterns: PatternRules,
    pub matcher: MatcherConfig,
    pub session: SessionTimings,
}

impl DetectionConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read thresholds file '{}'", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("invalid thresholds file '{}'", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text).context("failed to parse YAML")?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let env = &self.envelope;
        if env.sample_rate == 0 {
            bail!("envelope.sample_rate must be positive");
        }
        if env.split_above_ms < env.min_kept_ms {
            bail!("envelope.split_above_ms must be >= envelope.min_kept_ms");
        }
        let rules = &self.patterns;
        if rules.ringtone_gap_min_s > rules.ringtone_gap_max_s
            || rules.voice_duration_min_s > rules.voice_duration_max_s
            || rules.blocked_duration_min_s > rules.blocked_duration_max_s
            || rules.blocked_gap_min_s > rules.blocked_gap_max_s
        {
            bail!("patterns: every *_min_s bound must not exceed its *_max_s bound");
        }
        let matcher = &self.matcher;
        if matcher.band_low_hz >= matcher.band_high_hz {
            bail!("matcher.band_low_hz must be below matcher.band_high_hz");
        }
        if matcher.step_ms == 0 || matcher.window_ms == 0 {
            bail!("matcher.step_ms and matcher.window_ms must be positive");
        }
        let session = &self.session;
        if session.no_answer_min_ms > session.no_answer_max_ms {
            bail!("session.no_answer_min_ms must not exceed session.no_answer_max_ms");
        }
        if session.race_join_ms < session.race_window_ms {
            bail!("session.race_join_ms must cover session.race_window_ms");
        }
        if session.gsm_poll_interval_ms == 0 || session.fast_poll_interval_ms == 0 {
            bail!("session poll intervals must be positive");
        }
        Ok(())
    }
}
