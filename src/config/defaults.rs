use super::AudioSourceKind;

#[cfg(windows)]
pub const DEFAULT_PORT_PREFIX: &str = "COM";
#[cfg(not(windows))]
pub const DEFAULT_PORT_PREFIX: &str = "/dev/ttyUSB";
pub const DEFAULT_PORT_FIRST: u32 = 0;
pub const DEFAULT_PORT_LAST: u32 = 31;
pub const DEFAULT_MODEM_BAUD: u32 = 115_200;
pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_ESP32_BAUD: u32 = 250_000;
pub const DEFAULT_ESP32_CHANNEL: u8 = 1;
pub const DEFAULT_STT_POOL_SIZE: usize = 4;
pub const DEFAULT_STT_LANG: &str = "vi";
pub const DEFAULT_TEMPLATE_DIR: &str = "templates";
pub const DEFAULT_CALL_PAUSE_MS: u64 = 1000;

pub(super) const MAX_PORT_COUNT: u32 = 64;
pub(super) const MAX_STT_POOL_SIZE: usize = 16;
pub(super) const MAX_CALL_PAUSE_MS: u64 = 60_000;
pub(super) const MIN_BAUD: u32 = 1_200;
pub(super) const MAX_BAUD: u32 = 4_000_000;
pub(super) const MAX_NUMBER_LEN: usize = 20;

pub const fn default_audio_source() -> AudioSourceKind {
    AudioSourceKind::Auto
}
