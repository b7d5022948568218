//! Call-audio capture and envelope analysis.
//!
//! Audio reaches the checker either as ADC envelope samples from the ESP32 bridge or
//! as PCM from a local sound card. Both sit behind [`AudioSource`], which the call
//! session drives with a cancellation check between buffers.

/// Analysis rate for PCM features and transcription.
pub const TARGET_RATE: u32 = 16_000;

mod envelope;
mod recorder;
mod resample;
mod source;
#[cfg(test)]
mod tests;
mod wav;

pub use envelope::{
    classify, detect_regions, post_process, segment, AudioPattern, EnvelopeConfig,
    EnvelopeRegion, PatternRules,
};
pub use recorder::LocalRecorder;
pub use resample::resample;
pub(crate) use resample::{design_low_pass, fir_filter};
pub use source::Esp32Source;
pub use wav::{load_wav_mono, recording_path, save_wav, WavClip};

use anyhow::Result;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum CapturedAudio {
    /// Envelope samples from one ESP32 channel.
    Adc {
        channel: u8,
        samples: Vec<u16>,
        sample_rate: u32,
    },
    /// Mono PCM in `[-1, 1]`.
    Pcm { samples: Vec<f32>, sample_rate: u32 },
}

impl CapturedAudio {
    pub fn sample_count(&self) -> usize {
        match self {
            Self::Adc { samples, .. } => samples.len(),
            Self::Pcm { samples, .. } => samples.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Completed(CapturedAudio),
    /// Stopped early; partial audio is discarded.
    Cancelled,
}

/// A device that can record one call window.
pub trait AudioSource: Send {
    fn name(&self) -> String;

    /// Record for `window`, polling `cancelled` at least once per buffer.
    fn capture(&mut self, window: Duration, cancelled: &dyn Fn() -> bool) -> Result<CaptureOutcome>;
}
