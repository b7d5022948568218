use crate::audio::LocalRecorder;
use crate::config::AppConfig;
use crate::esp32::{Esp32Link, LinkStatus};
use crate::matcher::TemplateLabel;
use crate::telemetry::tracing_log_path;
use crate::transport::SerialTransport;
use crate::{crash_log_path, log_file_path};
use std::path::Path;
use std::{env, fmt::Display};

pub struct DoctorReport {
    lines: Vec<String>,
}

impl DoctorReport {
    pub fn new(title: &str) -> Self {
        Self {
            lines: vec![title.to_string()],
        }
    }

    pub fn section(&mut self, title: &str) {
        self.lines.push(String::new());
        self.lines.push(format!("{title}:"));
    }

    pub fn push_kv(&mut self, key: &str, value: impl Display) {
        self.lines.push(format!("  {key}: {value}"));
    }

    pub fn push_line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn push_list(&mut self, key: &str, items: &[String]) {
        self.push_kv(&format!("{key}_count"), items.len());
        if items.is_empty() {
            self.push_kv(key, "none");
            return;
        }
        self.push_line(format!("  {key}:"));
        for item in items {
            self.push_line(format!("    - {item}"));
        }
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// Everything a user needs to see before blaming a modem: flags, tuning, devices.
pub fn doctor_report(config: &AppConfig) -> DoctorReport {
    let mut report = DoctorReport::new("Linecheck Doctor");
    report.push_kv("version", env!("CARGO_PKG_VERSION"));
    report.push_kv("os", format!("{}/{}", env::consts::OS, env::consts::ARCH));

    let mut validated = config.clone();
    let validation_result = validated.validate();
    let resolved = validation_result
        .as_ref()
        .map(|_| &validated)
        .unwrap_or(config);

    report.section("Config");
    match &validation_result {
        Ok(()) => report.push_kv("validation", "ok"),
        Err(err) => report.push_kv("validation", format!("error: {err}")),
    }
    let logs_enabled = resolved.logs && !resolved.no_logs;
    report.push_kv("logs", if logs_enabled { "enabled" } else { "disabled" });
    report.push_kv("log_content", if resolved.log_content { "enabled" } else { "disabled" });
    report.push_kv("log_file", log_file_path().display());
    report.push_kv("crash_log", crash_log_path().display());
    report.push_kv("trace_log", tracing_log_path().display());
    report.push_kv("call_pause_ms", resolved.call_pause_ms);
    report.push_kv("reset_on_exit", !resolved.no_reset);

    report.section("Detection");
    report.push_kv(
        "thresholds",
        resolved
            .thresholds
            .as_deref()
            .map_or_else(|| "defaults".to_string(), |p| p.display().to_string()),
    );
    match resolved.detection_config() {
        Ok(detection) => {
            report.push_kv("envelope_threshold", detection.envelope.threshold);
            report.push_kv("adc_sample_rate_hz", detection.link.sample_rate_hz);
            report.push_kv("dtw_threshold", detection.matcher.threshold);
            report.push_kv("race_window_ms", detection.session.race_window_ms);
            report.push_kv("fast_poll_window_ms", detection.session.fast_poll_window_ms);
        }
        Err(err) => report.push_kv("status", format!("error: {err:#}")),
    }

    report.section("Serial");
    let candidates = resolved.candidate_ports();
    match (candidates.first(), candidates.last()) {
        (Some(first), Some(last)) if candidates.len() > 1 => {
            report.push_kv("candidates", format!("{} ({first} .. {last})", candidates.len()))
        }
        (Some(only), _) => report.push_kv("candidates", format!("1 ({only})")),
        _ => report.push_kv("candidates", 0),
    }
    report.push_kv("baud", resolved.baud);
    report.push_kv("audio_port", resolved.audio_port.as_deref().unwrap_or("lowest usable"));
    report.push_kv(
        "esp32_port",
        resolved
            .esp32_port
            .as_deref()
            .map_or_else(|| "unset".to_string(), |p| {
                format!("{p} @ {} baud, channel {}", resolved.esp32_baud, resolved.esp32_channel)
            }),
    );
    match SerialTransport::available_ports() {
        Ok(ports) => report.push_list("os_ports", &ports),
        Err(err) => report.push_kv("os_ports", format!("error: {err:#}")),
    }
    if let Some(port) = resolved.esp32_port.as_deref() {
        let detection = resolved.detection_config().unwrap_or_default();
        match Esp32Link::open(port, resolved.esp32_baud, resolved.serial_timeout(), detection.link) {
            Ok(link) => push_link_status(&mut report, &link.status()),
            Err(err) => report.push_kv("esp32_link", format!("error: {err:#}")),
        }
    }

    report.section("Audio");
    report.push_kv("source", resolved.audio_source.label());
    report.push_kv("input_device", resolved.input_device.as_deref().unwrap_or("default"));
    match LocalRecorder::list_devices() {
        Ok(devices) => report.push_list("devices", &devices),
        Err(err) => report.push_kv("devices", format!("error: {err:#}")),
    }
    report.push_kv(
        "recordings_dir",
        resolved
            .recordings_dir
            .as_deref()
            .map_or_else(|| "unset".to_string(), |p| p.display().to_string()),
    );

    report.section("Templates");
    report.push_kv("dir", resolved.template_dir.display());
    for label in TemplateLabel::ALL {
        report.push_kv(label.file_name(), presence(&resolved.template_dir.join(label.file_name())));
    }

    report.section("Speech");
    match resolved.whisper_model_path.as_deref() {
        Some(path) => report.push_kv("whisper_model", format!("{path} ({})", presence(Path::new(path)))),
        None => report.push_kv("whisper_model", "unset (transcript fallback off)"),
    }
    report.push_kv("pool_size", resolved.stt_pool_size);
    report.push_kv("lang", &resolved.lang);

    report
}

fn push_link_status(report: &mut DoctorReport, status: &LinkStatus) {
    let state = if status.available {
        "connected"
    } else {
        "no handshake ack"
    };
    report.push_kv("esp32_link", format!("{state} on {}", status.port));
    report.push_kv("esp32_mode", format!("{:?}", status.mode).to_lowercase());
}

fn presence(path: &Path) -> &'static str {
    if path.is_file() {
        "present"
    } else {
        "missing"
    }
}
