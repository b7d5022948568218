//! Local sound-card capture via CPAL, for modems whose audio line is wired to the PC.
//!
//! Audio is downmixed to mono f32 on the callback thread and handed over a bounded
//! channel, so the capture loop can check for cancellation between buffers.

use super::{AudioSource, CaptureOutcome, CapturedAudio};
use crate::error::CheckError;
use crate::log_debug;
use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const CHUNK_QUEUE: usize = 64;
const RECV_TICK: Duration = Duration::from_millis(50);

pub struct LocalRecorder {
    device: cpal::Device,
}

impl LocalRecorder {
    /// Input device names, for `--list-input-devices` and the doctor report.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices().context("no input devices available")?;
        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }

    pub fn new(preferred_device: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match preferred_device {
            Some(name) => {
                let mut devices = host.input_devices().context("no input devices available")?;
                devices
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| {
                        CheckError::HardwareUnavailable(format!("input device '{name}' not found"))
                    })?
            }
            None => host.default_input_device().ok_or_else(|| {
                CheckError::HardwareUnavailable("no default input device".to_string())
            })?,
        };
        Ok(Self { device })
    }

    pub fn device_name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string())
    }

    /// Record mono audio for `window`; `None` when `cancelled` fired first.
    pub fn record(
        &self,
        window: Duration,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Option<(Vec<f32>, u32)>> {
        let default_config = self.device.default_input_config()?;
        let format = default_config.sample_format();
        let device_config: StreamConfig = default_config.into();
        let sample_rate = device_config.sample_rate.0;
        let channels = usize::from(device_config.channels.max(1));
        log_debug(&format!(
            "recorder {}: format={format:?} rate={sample_rate}Hz channels={channels}",
            self.device_name()
        ));

        let (sender, receiver) = bounded::<Vec<f32>>(CHUNK_QUEUE);
        let dropped = Arc::new(AtomicUsize::new(0));
        let err_fn = |err| log_debug(&format!("audio_stream_error: {err}"));
        let stream = match format {
            SampleFormat::F32 => {
                let forward = chunk_forwarder::<f32>(sender, Arc::clone(&dropped));
                self.device.build_input_stream(
                    &device_config,
                    move |data: &[f32], _| forward(data, channels, |s| s),
                    err_fn,
                    None,
                )?
            }
            SampleFormat::I16 => {
                let forward = chunk_forwarder::<i16>(sender, Arc::clone(&dropped));
                self.device.build_input_stream(
                    &device_config,
                    move |data: &[i16], _| forward(data, channels, |s| s as f32 / 32_768.0),
                    err_fn,
                    None,
                )?
            }
            SampleFormat::U16 => {
                let forward = chunk_forwarder::<u16>(sender, Arc::clone(&dropped));
                self.device.build_input_stream(
                    &device_config,
                    move |data: &[u16], _| {
                        forward(data, channels, |s| (s as f32 - 32_768.0) / 32_768.0)
                    },
                    err_fn,
                    None,
                )?
            }
            other => return Err(anyhow!("unsupported sample format: {other:?}")),
        };

        stream.play()?;
        let started = Instant::now();
        let mut audio = Vec::with_capacity((window.as_secs_f64() * f64::from(sample_rate)) as usize);
        let mut was_cancelled = false;
        while started.elapsed() < window {
            if cancelled() {
                was_cancelled = true;
                break;
            }
            match receiver.recv_timeout(RECV_TICK) {
                Ok(chunk) => audio.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log_debug("recorder: audio stream disconnected");
                    break;
                }
            }
        }
        if let Err(err) = stream.pause() {
            log_debug(&format!("failed to pause audio stream: {err}"));
        }
        drop(stream);

        let dropped = dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            log_debug(&format!("recorder: {dropped} buffers dropped"));
        }
        if was_cancelled {
            return Ok(None);
        }
        if audio.is_empty() {
            return Err(anyhow!(
                "no samples captured from '{}'. {}",
                self.device_name(),
                mic_permission_hint()
            ));
        }
        Ok(Some((audio, sample_rate)))
    }
}

impl AudioSource for LocalRecorder {
    fn name(&self) -> String {
        format!("local:{}", self.device_name())
    }

    fn capture(&mut self, window: Duration, cancelled: &dyn Fn() -> bool) -> Result<CaptureOutcome> {
        Ok(match self.record(window, cancelled)? {
            Some((samples, sample_rate)) => {
                CaptureOutcome::Completed(CapturedAudio::Pcm {
                    samples,
                    sample_rate,
                })
            }
            None => CaptureOutcome::Cancelled,
        })
    }
}

/// Callback body: downmix one device buffer and queue it, counting drops when full.
fn chunk_forwarder<T: Copy + 'static>(
    sender: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
) -> impl Fn(&[T], usize, fn(T) -> f32) + Send + 'static {
    move |data: &[T], channels: usize, convert: fn(T) -> f32| {
        let mut chunk = Vec::with_capacity(data.len() / channels.max(1) + 1);
        append_downmixed_samples(&mut chunk, data, channels, convert);
        if let Err(TrySendError::Full(_)) = sender.try_send(chunk) {
            dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Average interleaved frames to mono, applying `convert` to each sample.
pub(super) fn append_downmixed_samples<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access for your terminal)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}
