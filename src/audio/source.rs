use super::{AudioSource, CaptureOutcome, CapturedAudio};
use crate::esp32::Esp32Link;
use anyhow::Result;
use std::time::Duration;

/// One ADC channel of the ESP32 bridge.
pub struct Esp32Source {
    link: Esp32Link,
    channel: u8,
}

impl Esp32Source {
    pub fn new(link: Esp32Link, channel: u8) -> Self {
        Self { link, channel }
    }
}

impl AudioSource for Esp32Source {
    fn name(&self) -> String {
        format!("esp32:{}:ch{}", self.link.port_id(), self.channel)
    }

    fn capture(&mut self, window: Duration, cancelled: &dyn Fn() -> bool) -> Result<CaptureOutcome> {
        let mut collected = self.link.collect_samples(&[self.channel], window, cancelled)?;
        if collected.cancelled {
            return Ok(CaptureOutcome::Cancelled);
        }
        Ok(CaptureOutcome::Completed(CapturedAudio::Adc {
            channel: self.channel,
            samples: collected.samples.remove(&self.channel).unwrap_or_default(),
            sample_rate: self.link.sample_rate(),
        }))
    }
}
