use super::{CallOutcome, DecidedBy, Decision};
use crate::audio::{
    classify, recording_path, save_wav, segment, AudioPattern, CapturedAudio, EnvelopeConfig,
    PatternRules,
};
use crate::config::DetectionConfig;
use crate::error::CheckError;
use crate::matcher::{TemplateLabel, TemplateMatcher};
use crate::stt::{classify_keywords, transcribe_clip, SttPool};
use crate::{log_debug, log_debug_content};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Detectors for a completed capture. Shared read-only by every port worker.
#[derive(Clone, Default)]
pub struct AudioAnalysis {
    pub envelope: EnvelopeConfig,
    pub patterns: PatternRules,
    pub matcher: Option<Arc<TemplateMatcher>>,
    pub stt: Option<Arc<SttPool>>,
    pub recordings_dir: Option<PathBuf>,
}

impl AudioAnalysis {
    pub fn from_detection(detection: &DetectionConfig) -> Self {
        Self {
            envelope: detection.envelope.clone(),
            patterns: detection.patterns.clone(),
            ..Self::default()
        }
    }

    pub fn with_matcher(mut self, matcher: Option<Arc<TemplateMatcher>>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_stt(mut self, stt: Option<Arc<SttPool>>) -> Self {
        self.stt = stt;
        self
    }

    pub fn with_recordings_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.recordings_dir = dir;
        self
    }

    pub fn decide(&self, phone: &str, audio: &CapturedAudio) -> Result<Decision> {
        match audio {
            CapturedAudio::Adc {
                samples,
                sample_rate,
                ..
            } => self.decide_envelope(samples, *sample_rate),
            CapturedAudio::Pcm {
                samples,
                sample_rate,
            } => self.decide_recording(phone, samples, *sample_rate),
        }
    }

    fn decide_envelope(&self, samples: &[u16], sample_rate: u32) -> Result<Decision> {
        if samples.is_empty() {
            return Err(CheckError::ClassificationAmbiguous("no ADC samples captured".into()).into());
        }
        let cfg = EnvelopeConfig {
            sample_rate,
            ..self.envelope.clone()
        };
        let regions = segment(samples, &cfg);
        let pattern = classify(&regions, sample_rate, &self.patterns);
        log_debug(&format!(
            "envelope: {} samples, {} regions -> {}",
            samples.len(),
            regions.len(),
            pattern.label()
        ));
        Ok(Decision::new(pattern_outcome(pattern), DecidedBy::Envelope(pattern)))
    }

    fn decide_recording(&self, phone: &str, samples: &[f32], sample_rate: u32) -> Result<Decision> {
        if let Some(dir) = &self.recordings_dir {
            let path = recording_path(dir, phone);
            match save_wav(&path, samples, sample_rate) {
                Ok(()) => log_debug_content(&format!("saved call audio to {}", path.display())),
                Err(err) => log_debug(&format!("failed to save call audio: {err:#}")),
            }
        }

        if let Some(matcher) = &self.matcher {
            let decision = matcher.classify(samples, sample_rate);
            log_debug(&format!("template scores: {:?}", decision.scores));
            if let Some(label) = decision.label {
                return Ok(Decision::new(template_outcome(label), DecidedBy::Template(label)));
            }
        }

        if let Some(stt) = &self.stt {
            let text = transcribe_clip(stt, samples, sample_rate)?;
            let label = classify_keywords(&text);
            return Ok(Decision::new(label.outcome(), DecidedBy::Transcript(label)));
        }

        if self.matcher.is_none() {
            return Err(
                CheckError::ClassificationAmbiguous("no recording classifier available".into()).into(),
            );
        }
        Ok(Decision::fallback(CallOutcome::Active))
    }
}

pub fn pattern_outcome(pattern: AudioPattern) -> CallOutcome {
    match pattern {
        AudioPattern::Blocked => CallOutcome::InvalidNumber,
        AudioPattern::Ringtone | AudioPattern::VoiceMachine | AudioPattern::Silence => {
            CallOutcome::Active
        }
    }
}

pub fn template_outcome(label: TemplateLabel) -> CallOutcome {
    match label {
        TemplateLabel::Unreachable => CallOutcome::NoSubscriber,
        TemplateLabel::InvalidNumber => CallOutcome::InvalidNumber,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::find_check_error;
    use crate::stt::{ModelPool, Transcribe};

    struct Fixed(&'static str);

    impl Transcribe for Fixed {
        fn transcribe(&self, _: &[f32]) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn adc(samples: Vec<u16>) -> CapturedAudio {
        CapturedAudio::Adc {
            channel: 1,
            samples,
            sample_rate: 1_000,
        }
    }

    #[test]
    fn long_tone_on_the_adc_is_invalid_number() {
        let mut samples = vec![100u16; 1_000];
        samples.extend(std::iter::repeat(3_500).take(4_000));
        samples.extend(std::iter::repeat(100).take(1_000));
        let decision = AudioAnalysis::default()
            .decide("0961234567", &adc(samples))
            .expect("decision");
        assert_eq!(decision.outcome, CallOutcome::InvalidNumber);
        assert_eq!(decision.by, DecidedBy::Envelope(AudioPattern::Blocked));
    }

    #[test]
    fn quiet_adc_is_active() {
        let decision = AudioAnalysis::default()
            .decide("0961234567", &adc(vec![50; 20_000]))
            .expect("decision");
        assert_eq!(decision.outcome, CallOutcome::Active);
        assert_eq!(decision.by, DecidedBy::Envelope(AudioPattern::Silence));
    }

    #[test]
    fn empty_capture_is_ambiguous() {
        let err = AudioAnalysis::default()
            .decide("0961234567", &adc(Vec::new()))
            .expect_err("empty");
        assert!(matches!(
            find_check_error(&err),
            Some(CheckError::ClassificationAmbiguous(_))
        ));
    }

    #[test]
    fn transcript_fallback_classifies_keywords() {
        let pool = ModelPool::new(vec![
            Box::new(Fixed("số máy quý khách vừa gọi không đúng")) as Box<dyn Transcribe>
        ])
        .expect("pool");
        let analysis = AudioAnalysis::default().with_stt(Some(Arc::new(pool)));
        let audio = CapturedAudio::Pcm {
            samples: vec![0.0; 1_600],
            sample_rate: 16_000,
        };
        let decision = analysis.decide("0961234567", &audio).expect("decision");
        assert_eq!(decision.outcome, CallOutcome::InvalidNumber);
        assert!(matches!(decision.by, DecidedBy::Transcript(_)));
    }

    #[test]
    fn recording_without_classifiers_is_ambiguous() {
        let audio = CapturedAudio::Pcm {
            samples: vec![0.0; 160],
            sample_rate: 16_000,
        };
        assert!(AudioAnalysis::default().decide("0961234567", &audio).is_err());
    }

    #[test]
    fn labels_map_to_outcomes() {
        assert_eq!(pattern_outcome(AudioPattern::VoiceMachine), CallOutcome::Active);
        assert_eq!(pattern_outcome(AudioPattern::Blocked), CallOutcome::InvalidNumber);
        assert_eq!(
            template_outcome(TemplateLabel::Unreachable),
            CallOutcome::NoSubscriber
        );
        assert_eq!(
            template_outcome(TemplateLabel::InvalidNumber),
            CallOutcome::InvalidNumber
        );
    }
}
