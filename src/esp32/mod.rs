//! Client for the ESP32 bridge that samples call audio envelopes over its ADC.
//!
//! Control traffic is line-based text (`start_multi 1,2` / `MULTI_STREAM_START:2`);
//! once streaming, the bridge sends bare 3-byte frames with no delimiters. A bridge
//! that does not acknowledge within the ack timeout is marked unavailable and callers
//! fall back to signaling-only detection.

mod frame;
#[cfg(test)]
mod tests;

pub use frame::{decode_frame, parse_text_sample, AdcSample, FrameDecoder, FRAME_LEN};

use crate::error::CheckError;
use crate::log_debug;
use crate::transport::{ByteTransport, SerialTransport};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

/// The bridge firmware streams at most two channels at once.
pub const MAX_STREAM_CHANNELS: usize = 2;

pub type ChannelSamples = BTreeMap<u8, Vec<u16>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkTimings {
    pub ack_timeout_ms: u64,
    /// Sleep between drains when no bytes are waiting.
    pub poll_interval_ms: u64,
    /// ADC rate the firmware samples at.
    pub sample_rate_hz: u32,
}

impl Default for LinkTimings {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 2_000,
            poll_interval_ms: 5,
            sample_rate_hz: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    Binary,
    /// Legacy `CHn:value` lines, single channel.
    Text,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub port: String,
    pub available: bool,
    pub mode: StreamMode,
    pub streaming: bool,
    pub active_channels: Vec<u8>,
}

/// Result of one capture window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collected {
    pub samples: ChannelSamples,
    pub cancelled: bool,
}

pub struct Esp32Link {
    transport: Box<dyn ByteTransport>,
    timings: LinkTimings,
    mode: StreamMode,
    available: bool,
    streaming: bool,
    active_channels: Vec<u8>,
    /// Bytes read past the last ack line; the head of the sample stream.
    pending: Vec<u8>,
}

impl Esp32Link {
    /// Switch the bridge into binary streaming. Never fails: a silent bridge is
    /// returned marked unavailable.
    pub fn connect(transport: Box<dyn ByteTransport>, timings: LinkTimings) -> Self {
        let mut link = Self {
            transport,
            timings,
            mode: StreamMode::Binary,
            available: false,
            streaming: false,
            active_channels: Vec::new(),
            pending: Vec::new(),
        };
        match link.handshake("binary_on", &["BINARY_MODE_ON", "TEXT_MODE_ON"]) {
            Ok(Some(ack)) => {
                link.available = true;
                if ack.starts_with("TEXT_MODE_ON") {
                    link.mode = StreamMode::Text;
                }
                log_debug(&format!("esp32 {}: connected ({ack})", link.port_id()));
            }
            Ok(None) => {
                let err = CheckError::HardwareUnavailable(format!(
                    "esp32 on {} did not acknowledge binary_on",
                    link.port_id()
                ));
                log_debug(&err.to_string());
            }
            Err(err) => log_debug(&format!(
                "esp32 {}: handshake failed: {err:#}",
                link.port_id()
            )),
        }
        link
    }

    pub fn open(port: &str, baud: u32, timeout: Duration, timings: LinkTimings) -> Result<Self> {
        let transport = SerialTransport::open(port, baud, timeout)?;
        Ok(Self::connect(Box::new(transport), timings))
    }

    pub fn port_id(&self) -> &str {
        self.transport.name()
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn sample_rate(&self) -> u32 {
        self.timings.sample_rate_hz
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            port: self.port_id().to_string(),
            available: self.available,
            mode: self.mode,
            streaming: self.streaming,
            active_channels: self.active_channels.clone(),
        }
    }

    /// Returns whether the bridge acknowledged the switch.
    pub fn set_binary_mode(&mut self, enabled: bool) -> Result<bool> {
        let (command, expected) = if enabled {
            ("binary_on", "BINARY_MODE_ON")
        } else {
            ("binary_off", "TEXT_MODE_ON")
        };
        let ack = self.handshake(command, &["BINARY_MODE_ON", "TEXT_MODE_ON"])?;
        match ack {
            Some(line) if line.starts_with(expected) => {
                self.mode = if enabled {
                    StreamMode::Binary
                } else {
                    StreamMode::Text
                };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Start streaming up to two channels; returns the channel count the bridge reports.
    pub fn start_multi(&mut self, channels: &[u8]) -> Result<usize> {
        let channels = limit_channels(channels);
        let list = channels
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let ack = self
            .handshake(&format!("start_multi {list}"), &["MULTI_STREAM_START:"])?
            .ok_or_else(|| self.unavailable("start_multi"))?;
        let count = ack
            .trim_start_matches("MULTI_STREAM_START:")
            .trim()
            .parse::<usize>()
            .with_context(|| format!("malformed stream ack {ack:?}"))?;
        self.streaming = true;
        self.active_channels = channels;
        Ok(count)
    }

    /// Legacy single-channel text stream.
    pub fn start_stream(&mut self, channel: u8) -> Result<()> {
        self.handshake(&format!("start_stream {channel}"), &["STREAM_START"])?
            .ok_or_else(|| self.unavailable("start_stream"))?;
        self.streaming = true;
        self.active_channels = vec![channel];
        Ok(())
    }

    /// Returns whether `STREAM_STOP` was seen; sample bytes still in flight are discarded.
    pub fn stop_stream(&mut self) -> Result<bool> {
        self.streaming = false;
        self.active_channels.clear();
        let ack = self.handshake("stop_stream", &["STREAM_STOP"])?;
        self.pending.clear();
        Ok(ack.is_some())
    }

    /// Stream `channels` for `duration`, polling `cancelled` once per drain.
    /// The stream is stopped on every path.
    pub fn collect_samples(
        &mut self,
        channels: &[u8],
        duration: Duration,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Collected> {
        if !self.available {
            return Err(self.unavailable("collect_samples"));
        }
        let channels = limit_channels(channels);
        let started = match self.mode {
            StreamMode::Binary => self.start_multi(&channels).map(|_| ()),
            StreamMode::Text => match channels.first() {
                Some(channel) => self.start_stream(*channel),
                None => Ok(()),
            },
        };
        if let Err(err) = started {
            let _ = self.stop_stream();
            return Err(err);
        }

        let result = self.pump(&channels, duration, cancelled);
        match self.stop_stream() {
            Ok(true) => {}
            Ok(false) => log_debug(&format!("esp32 {}: no STREAM_STOP ack", self.port_id())),
            Err(err) => log_debug(&format!("esp32 {}: stop failed: {err:#}", self.port_id())),
        }
        result
    }

    fn pump(
        &mut self,
        channels: &[u8],
        duration: Duration,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Collected> {
        let mut collected = Collected {
            samples: channels.iter().map(|ch| (*ch, Vec::new())).collect(),
            cancelled: false,
        };
        let mut decoder = FrameDecoder::default();
        let mut text_line = String::new();
        let mut decoded = Vec::new();
        let mut raw = std::mem::take(&mut self.pending);
        let poll = Duration::from_millis(self.timings.poll_interval_ms.max(1));
        let started = Instant::now();

        while started.elapsed() < duration {
            if cancelled() {
                collected.cancelled = true;
                break;
            }
            if raw.is_empty() {
                self.transport.read_available(&mut raw)?;
            }
            if raw.is_empty() {
                thread::sleep(poll);
                continue;
            }
            match self.mode {
                StreamMode::Binary => decoder.push(&raw, &mut decoded),
                StreamMode::Text => {
                    text_line.push_str(&String::from_utf8_lossy(&raw));
                    while let Some(end) = text_line.find('\n') {
                        if let Some(sample) = parse_text_sample(&text_line[..end]) {
                            decoded.push(sample);
                        }
                        text_line.drain(..=end);
                    }
                }
            }
            raw.clear();
            for sample in decoded.drain(..) {
                if let Some(buffer) = collected.samples.get_mut(&sample.channel) {
                    buffer.push(sample.value);
                }
            }
        }
        Ok(collected)
    }

    /// Write `command` and wait for a line starting with one of `acks`.
    /// Returns `None` when the ack timeout passes without one.
    fn handshake(&mut self, command: &str, acks: &[&str]) -> Result<Option<String>> {
        self.transport.write_all(format!("{command}\n").as_bytes())?;
        let deadline = Instant::now() + Duration::from_millis(self.timings.ack_timeout_ms);
        let poll = Duration::from_millis(self.timings.poll_interval_ms.max(1));
        loop {
            if let Some(line) = take_ack_line(&mut self.pending, acks) {
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            if self.transport.read_available(&mut self.pending)? == 0 {
                thread::sleep(poll);
            }
        }
    }

    fn unavailable(&self, what: &str) -> anyhow::Error {
        CheckError::HardwareUnavailable(format!("esp32 on {} ({what})", self.port_id())).into()
    }
}

fn limit_channels(channels: &[u8]) -> Vec<u8> {
    if channels.len() > MAX_STREAM_CHANNELS {
        log_debug(&format!(
            "esp32: {} channels requested, streaming the first {MAX_STREAM_CHANNELS}",
            channels.len()
        ));
    }
    channels.iter().copied().take(MAX_STREAM_CHANNELS).collect()
}

/// Find the first complete line containing an ack token. Everything up to the end of
/// that line is consumed; bytes after it stay buffered for the sample stream.
fn take_ack_line(buffer: &mut Vec<u8>, acks: &[&str]) -> Option<String> {
    let (start, _) = acks
        .iter()
        .filter_map(|ack| find_bytes(buffer, ack.as_bytes()).map(|at| (at, *ack)))
        .min_by_key(|(at, _)| *at)?;
    let end = start + buffer[start..].iter().position(|byte| *byte == b'\n')?;
    let line = String::from_utf8_lossy(&buffer[start..end])
        .trim()
        .to_string();
    buffer.drain(..=end);
    Some(line)
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

