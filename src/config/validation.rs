use super::defaults::{
    MAX_BAUD, MAX_CALL_PAUSE_MS, MAX_NUMBER_LEN, MAX_PORT_COUNT, MAX_STT_POOL_SIZE, MIN_BAUD,
};
use super::{AppConfig, DetectionConfig};
use anyhow::{bail, Context, Result};
use std::{fs, path::Path, time::Duration};

impl AppConfig {
    /// Check CLI values before any port is opened.
    pub fn validate(&mut self) -> Result<()> {
        if self.ports.is_empty() {
            if self.port_prefix.trim().is_empty() {
                bail!("--port-prefix must not be empty");
            }
            if self.port_first > self.port_last {
                bail!(
                    "--port-first ({}) must not exceed --port-last ({})",
                    self.port_first,
                    self.port_last
                );
            }
            if self.port_last - self.port_first >= MAX_PORT_COUNT {
                bail!("port range may cover at most {MAX_PORT_COUNT} ports");
            }
        } else if self.ports.len() > MAX_PORT_COUNT as usize {
            bail!(
                "--port repeated too many times (max {MAX_PORT_COUNT}, got {})",
                self.ports.len()
            );
        }
        for port in &self.ports {
            if port.trim().is_empty() || port.chars().any(char::is_control) {
                bail!("--port values must be non-empty device paths, got {port:?}");
            }
        }

        for (flag, baud) in [("--baud", self.baud), ("--esp32-baud", self.esp32_baud)] {
            if !(MIN_BAUD..=MAX_BAUD).contains(&baud) {
                bail!("{flag} must be between {MIN_BAUD} and {MAX_BAUD}, got {baud}");
            }
        }
        if !(1..=2).contains(&self.esp32_channel) {
            bail!("--esp32-channel must be 1 or 2, got {}", self.esp32_channel);
        }
        if !(10..=5_000).contains(&self.serial_timeout_ms) {
            bail!(
                "--serial-timeout-ms must be between 10 and 5000, got {}",
                self.serial_timeout_ms
            );
        }
        if !(1..=MAX_STT_POOL_SIZE).contains(&self.stt_pool_size) {
            bail!(
                "--stt-pool-size must be between 1 and {MAX_STT_POOL_SIZE}, got {}",
                self.stt_pool_size
            );
        }
        if self.call_pause_ms > MAX_CALL_PAUSE_MS {
            bail!("--call-pause-ms must be at most {MAX_CALL_PAUSE_MS}");
        }

        if self.lang.trim().is_empty() {
            bail!("--lang must not be empty");
        }
        let lang_ok = self.lang.eq_ignore_ascii_case("auto")
            || ((2..=3).contains(&self.lang.len())
                && self.lang.chars().all(|ch| ch.is_ascii_alphabetic()));
        if !lang_ok {
            bail!(
                "--lang must be a two or three letter language code or 'auto', got '{}'",
                self.lang
            );
        }

        if let Some(model) = &self.whisper_model_path {
            if !Path::new(model).exists() {
                bail!("whisper model path '{model}' does not exist");
            }
        }
        if let Some(path) = &self.thresholds {
            if !path.is_file() {
                bail!("--thresholds file '{}' does not exist", path.display());
            }
        }
        if let Some(path) = &self.numbers_file {
            if !path.is_file() {
                bail!("--numbers-file '{}' does not exist", path.display());
            }
        }
        if let Some(dir) = &self.recordings_dir {
            if dir.exists() && !dir.is_dir() {
                bail!("--recordings-dir '{}' is not a directory", dir.display());
            }
        }

        for number in &self.numbers {
            check_number_shape(number)?;
        }
        Ok(())
    }

    /// Ports to probe, in index order.
    pub fn candidate_ports(&self) -> Vec<String> {
        if !self.ports.is_empty() {
            return self.ports.clone();
        }
        (self.port_first..=self.port_last)
            .map(|index| format!("{}{index}", self.port_prefix))
            .collect()
    }

    /// Positional numbers followed by the numbers file, duplicates kept in order.
    pub fn load_numbers(&self) -> Result<Vec<String>> {
        let mut numbers: Vec<String> = self
            .numbers
            .iter()
            .map(|n| n.trim().to_string())
            .collect();
        if let Some(path) = &self.numbers_file {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read numbers file '{}'", path.display()))?;
            for (line_no, line) in text.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                check_number_shape(line)
                    .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
                numbers.push(line.to_string());
            }
        }
        Ok(numbers)
    }

    /// Detection tuning with the optional YAML overrides applied.
    pub fn detection_config(&self) -> Result<DetectionConfig> {
        DetectionConfig::load(self.thresholds.as_deref())
    }

    pub fn serial_timeout(&self) -> Duration {
        Duration::from_millis(self.serial_timeout_ms)
    }

    pub fn call_pause(&self) -> Duration {
        Duration::from_millis(self.call_pause_ms)
    }
}

pub(super) fn check_number_shape(number: &str) -> Result<()> {
    let trimmed = number.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_NUMBER_LEN {
        bail!("phone number {number:?} must be 1..={MAX_NUMBER_LEN} characters");
    }
    let valid = trimmed.chars().enumerate().all(|(idx, ch)| {
        ch.is_ascii_digit() || matches!(ch, ' ' | '-' | '.') || (idx == 0 && ch == '+')
    });
    if !valid {
        bail!("phone number {number:?} may only contain digits, a leading '+', and separators");
    }
    Ok(())
}
