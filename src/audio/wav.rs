use super::recorder::append_downmixed_samples;
use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Mono PCM in `[-1, 1]` with its sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct WavClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Read a 16-bit integer or 32-bit float WAV, averaging channels to mono.
pub fn load_wav_mono(path: &Path) -> Result<WavClip> {
    let mut reader = WavReader::open(path)
        .with_context(|| format!("failed to open WAV '{}'", path.display()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));
    let mut samples = Vec::with_capacity(reader.len() as usize / channels);

    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => {
            let raw = reader
                .samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("corrupt WAV data in '{}'", path.display()))?;
            append_downmixed_samples(&mut samples, &raw, channels, |s| s as f32 / 32_768.0);
        }
        (SampleFormat::Int, bits @ (24 | 32)) => {
            let scale = (1i64 << (bits - 1)) as f32;
            let raw = reader
                .samples::<i32>()
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("corrupt WAV data in '{}'", path.display()))?;
            append_downmixed_samples(&mut samples, &raw, channels, |s| s as f32 / scale);
        }
        (SampleFormat::Float, 32) => {
            let raw = reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("corrupt WAV data in '{}'", path.display()))?;
            append_downmixed_samples(&mut samples, &raw, channels, |s| s);
        }
        (format, bits) => bail!(
            "unsupported WAV format {format:?}/{bits} bits in '{}'",
            path.display()
        ),
    }

    Ok(WavClip {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Write mono samples as 16-bit PCM.
pub fn save_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
    }
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create WAV '{}'", path.display()))?;
    for sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * 32_767.0) as i16)?;
    }
    writer
        .finalize()
        .with_context(|| format!("failed to finalize WAV '{}'", path.display()))
}

/// `<dir>/<phone>_<unix-seconds>.wav`, with anything but digits and `+` dropped from the phone.
pub fn recording_path(dir: &Path, phone: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let phone: String = phone
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '+')
        .collect();
    dir.join(format!("{phone}_{ts}.wav"))
}
