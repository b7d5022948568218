//! Command-line parsing, validation, and detection tuning.

mod defaults;
mod detection;
#[cfg(test)]
mod tests;
mod validation;

use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

pub use defaults::{
    default_audio_source, DEFAULT_CALL_PAUSE_MS, DEFAULT_ESP32_BAUD, DEFAULT_ESP32_CHANNEL,
    DEFAULT_MODEM_BAUD,
    DEFAULT_PORT_FIRST, DEFAULT_PORT_LAST, DEFAULT_PORT_PREFIX, DEFAULT_SERIAL_TIMEOUT_MS,
    DEFAULT_STT_LANG, DEFAULT_STT_POOL_SIZE, DEFAULT_TEMPLATE_DIR,
};
pub use detection::DetectionConfig;

/// CLI options for the line checker. Validated values keep device access predictable.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "linecheck",
    about = "Linecheck: classify phone lines through a bank of GSM modems",
    author,
    version
)]
pub struct AppConfig {
    /// Phone numbers to check
    #[arg(value_name = "NUMBER")]
    pub numbers: Vec<String>,

    /// File with one phone number per line (blank lines and '#' comments ignored)
    #[arg(long = "numbers-file", value_name = "PATH")]
    pub numbers_file: Option<PathBuf>,

    /// Serial device prefix used to build the scan range
    #[arg(long = "port-prefix", env = "LINECHECK_PORT_PREFIX", default_value = DEFAULT_PORT_PREFIX)]
    pub port_prefix: String,

    /// First port index to probe
    #[arg(long = "port-first", default_value_t = DEFAULT_PORT_FIRST)]
    pub port_first: u32,

    /// Last port index to probe (inclusive)
    #[arg(long = "port-last", default_value_t = DEFAULT_PORT_LAST)]
    pub port_last: u32,

    /// Explicit modem port (repeatable); overrides the prefix range
    #[arg(long = "port", action = ArgAction::Append, value_name = "PORT")]
    pub ports: Vec<String>,

    /// Modem baud rate
    #[arg(long, env = "LINECHECK_BAUD", default_value_t = DEFAULT_MODEM_BAUD)]
    pub baud: u32,

    /// Serial read timeout (milliseconds)
    #[arg(long = "serial-timeout-ms", default_value_t = DEFAULT_SERIAL_TIMEOUT_MS)]
    pub serial_timeout_ms: u64,

    /// Serial port of the ESP32 ADC bridge
    #[arg(long = "esp32-port", env = "LINECHECK_ESP32_PORT")]
    pub esp32_port: Option<String>,

    /// ESP32 bridge baud rate
    #[arg(long = "esp32-baud", default_value_t = DEFAULT_ESP32_BAUD)]
    pub esp32_baud: u32,

    /// ADC channel (1 or 2) wired to the audio port's modem
    #[arg(long = "esp32-channel", default_value_t = DEFAULT_ESP32_CHANNEL)]
    pub esp32_channel: u8,

    /// Where call audio comes from on the audio-checked carrier
    #[arg(long = "audio-source", value_enum, default_value_t = default_audio_source())]
    pub audio_source: AudioSourceKind,

    /// Preferred local audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Modem port wired to the audio hardware (defaults to the lowest-index port)
    #[arg(long = "audio-port", env = "LINECHECK_AUDIO_PORT")]
    pub audio_port: Option<String>,

    /// Directory holding the reference announcement WAV templates
    #[arg(long = "template-dir", default_value = DEFAULT_TEMPLATE_DIR)]
    pub template_dir: PathBuf,

    /// Whisper model path; enables the transcript fallback when set
    #[arg(long = "whisper-model-path", env = "LINECHECK_WHISPER_MODEL")]
    pub whisper_model_path: Option<String>,

    /// Number of Whisper instances shared by all ports
    #[arg(long = "stt-pool-size", default_value_t = DEFAULT_STT_POOL_SIZE)]
    pub stt_pool_size: usize,

    /// Language passed to Whisper
    #[arg(long, default_value = DEFAULT_STT_LANG)]
    pub lang: String,

    /// YAML file overriding detection thresholds and timings
    #[arg(long = "thresholds", value_name = "PATH")]
    pub thresholds: Option<PathBuf>,

    /// Keep local call recordings as WAV files in this directory
    #[arg(long = "recordings-dir", value_name = "DIR")]
    pub recordings_dir: Option<PathBuf>,

    /// Pause between consecutive calls on one port (milliseconds)
    #[arg(long = "call-pause-ms", default_value_t = DEFAULT_CALL_PAUSE_MS)]
    pub call_pause_ms: u64,

    /// Skip the AT+CFUN=1,1 modem reset at shutdown
    #[arg(long = "no-reset", default_value_t = false)]
    pub no_reset: bool,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Print environment diagnostics and exit
    #[arg(long = "doctor", default_value_t = false)]
    pub doctor: bool,

    /// Probe ports, print the usable ones, and exit
    #[arg(long = "scan-only", default_value_t = false)]
    pub scan_only: bool,

    /// Query signal, operator, and balance for each usable modem, then exit
    #[arg(long = "modem-info", default_value_t = false)]
    pub modem_info: bool,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "LINECHECK_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "LINECHECK_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow phone numbers and transcripts in the debug log
    #[arg(
        long = "log-content",
        env = "LINECHECK_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,
}

/// Available call-audio backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudioSourceKind {
    /// ESP32 bridge when it answers the handshake, else the local input, else none
    Auto,
    Esp32,
    Local,
    /// Signaling only
    None,
}

impl AudioSourceKind {
    pub fn label(self) -> &'static str {
        match self {
            AudioSourceKind::Auto => "auto",
            AudioSourceKind::Esp32 => "esp32",
            AudioSourceKind::Local => "local",
            AudioSourceKind::None => "none",
        }
    }
}
