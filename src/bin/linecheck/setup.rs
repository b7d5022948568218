//! Turns validated flags into the pool's collaborators: modem opener, audio source,
//! and the detectors that read captured audio.

use linecheck::audio::{AudioSource, Esp32Source, LocalRecorder};
use linecheck::config::{AppConfig, AudioSourceKind, DetectionConfig};
use linecheck::esp32::Esp32Link;
use linecheck::matcher::TemplateMatcher;
use linecheck::modem::{open_modem, AtChannel};
use linecheck::pool::ModemOpener;
use linecheck::session::AudioAnalysis;
use linecheck::stt::load_whisper_pool;
use linecheck::{log_debug, log_port};
use std::sync::Arc;

/// Opens a modem, then clears stale calls and enables answer reporting.
pub(crate) fn modem_opener(config: &AppConfig, detection: &DetectionConfig) -> ModemOpener {
    let baud = config.baud;
    let timeout = config.serial_timeout();
    let timings = detection.at.clone();
    Arc::new(move |port: &str| -> anyhow::Result<AtChannel> {
        let mut channel = open_modem(port, baud, timeout, &timings)?;
        if let Err(err) = channel.refresh() {
            log_port(port, &format!("modem refresh incomplete: {err:#}"));
        }
        Ok(channel)
    })
}

/// Modem ports to probe. The ESP32 bridge port is never probed with `AT`.
pub(crate) fn modem_candidates(config: &AppConfig) -> Vec<String> {
    let mut candidates = config.candidate_ports();
    if let Some(esp32) = &config.esp32_port {
        candidates.retain(|port| port != esp32);
    }
    candidates
}

/// Resolve `--audio-source` to the backend that actually opened. Missing hardware is
/// never fatal; the audio-checked carrier then falls back to signaling only.
pub(crate) fn open_audio_source(
    config: &AppConfig,
    detection: &DetectionConfig,
) -> Option<(AudioSourceKind, Box<dyn AudioSource>)> {
    let kind = config.audio_source;
    if matches!(kind, AudioSourceKind::Esp32 | AudioSourceKind::Auto) {
        if let Some(source) = open_esp32(config, detection) {
            return Some((AudioSourceKind::Esp32, source));
        }
        if kind == AudioSourceKind::Esp32 {
            eprintln!("ESP32 bridge unavailable; continuing with call signaling only");
            return None;
        }
    }
    if matches!(kind, AudioSourceKind::Local | AudioSourceKind::Auto) {
        match LocalRecorder::new(config.input_device.as_deref()) {
            Ok(recorder) => {
                log_debug(&format!("audio: local input {}", recorder.device_name()));
                return Some((AudioSourceKind::Local, Box::new(recorder)));
            }
            Err(err) => {
                log_debug(&format!("audio: local input unavailable: {err:#}"));
                if kind == AudioSourceKind::Local {
                    eprintln!("Audio input unavailable ({err:#}); continuing with call signaling only");
                }
            }
        }
    }
    None
}

fn open_esp32(config: &AppConfig, detection: &DetectionConfig) -> Option<Box<dyn AudioSource>> {
    let port = config.esp32_port.as_deref()?;
    match Esp32Link::open(
        port,
        config.esp32_baud,
        config.serial_timeout(),
        detection.link.clone(),
    ) {
        Ok(link) if link.is_available() => {
            log_debug(&format!("audio: esp32 on {port}, channel {}", config.esp32_channel));
            Some(Box::new(Esp32Source::new(link, config.esp32_channel)))
        }
        Ok(_) => None,
        Err(err) => {
            log_debug(&format!("audio: esp32 on {port} failed to open: {err:#}"));
            None
        }
    }
}

/// Detectors for completed captures. Templates and Whisper only read local PCM.
pub(crate) fn audio_analysis(
    config: &AppConfig,
    detection: &DetectionConfig,
    backend: Option<AudioSourceKind>,
) -> AudioAnalysis {
    let analysis = AudioAnalysis::from_detection(detection)
        .with_recordings_dir(config.recordings_dir.clone());
    if backend != Some(AudioSourceKind::Local) {
        return analysis;
    }

    let matcher = match TemplateMatcher::load_dir(&config.template_dir, detection.matcher.clone()) {
        Ok(matcher) => {
            log_debug(&format!("matcher: templates {:?}", matcher.labels()));
            Some(Arc::new(matcher))
        }
        Err(err) => {
            eprintln!("Announcement templates unavailable: {err:#}");
            None
        }
    };
    let stt = config.whisper_model_path.as_deref().and_then(|model| {
        match load_whisper_pool(model, &config.lang, config.stt_pool_size) {
            Ok(pool) => Some(Arc::new(pool)),
            Err(err) => {
                eprintln!("Whisper unavailable, transcript fallback off: {err:#}");
                None
            }
        }
    });
    analysis.with_matcher(matcher).with_stt(stt)
}

/// `--audio-port` when it answered the scan, else the first usable port.
pub(crate) fn audio_port<'a>(config: &AppConfig, usable: &'a [String]) -> Option<&'a str> {
    if let Some(wanted) = &config.audio_port {
        if let Some(port) = usable.iter().find(|port| *port == wanted) {
            return Some(port.as_str());
        }
        eprintln!("Audio port {wanted} did not answer; using the first usable port");
    }
    usable.first().map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn config(args: &[&str]) -> AppConfig {
        AppConfig::parse_from(std::iter::once("linecheck").chain(args.iter().copied()))
    }

    #[test]
    fn esp32_port_is_not_probed_as_a_modem() {
        let cfg = config(&[
            "--port",
            "/dev/ttyUSB0",
            "--port",
            "/dev/ttyUSB1",
            "--esp32-port",
            "/dev/ttyUSB1",
        ]);
        assert_eq!(modem_candidates(&cfg), vec!["/dev/ttyUSB0".to_string()]);
    }

    #[test]
    fn audio_port_falls_back_to_first_usable() {
        let usable = vec!["/dev/ttyUSB2".to_string(), "/dev/ttyUSB3".to_string()];
        assert_eq!(audio_port(&config(&[]), &usable), Some("/dev/ttyUSB2"));
        let wanted = config(&["--audio-port", "/dev/ttyUSB3"]);
        assert_eq!(audio_port(&wanted, &usable), Some("/dev/ttyUSB3"));
        let missing = config(&["--audio-port", "/dev/ttyUSB9"]);
        assert_eq!(audio_port(&missing, &usable), Some("/dev/ttyUSB2"));
        assert_eq!(audio_port(&missing, &[]), None);
    }

    #[test]
    fn adc_or_no_audio_skips_templates_and_whisper() {
        let cfg = config(&[]);
        for backend in [None, Some(AudioSourceKind::Esp32)] {
            let analysis = audio_analysis(&cfg, &DetectionConfig::default(), backend);
            assert!(analysis.matcher.is_none());
            assert!(analysis.stt.is_none());
        }
    }
}
