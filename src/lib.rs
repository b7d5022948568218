//! Phone-line checker driving a bank of GSM modems.
//!
//! Each number is dialed on one modem while the call-status monitor races an audio
//! detector; the first conclusive signal decides whether the line is active, has no
//! subscriber, or is invalid.

pub mod app;
pub mod audio;
pub mod carrier;
pub mod config;
pub mod doctor;
pub mod error;
pub mod esp32;
pub mod matcher;
pub mod modem;
pub mod pool;
pub mod session;
pub mod stt;
pub mod telemetry;
pub mod transport;

mod lock;

pub use app::{
    crash_log_path, init_logging, log_call, log_debug, log_debug_content, log_file_path,
    log_panic, log_port, mask_number, panic_payload_text,
};
pub(crate) use lock::lock_or_recover;
