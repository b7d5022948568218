//! Process-wide logging plumbing shared by the library and the binary.

mod logging;

pub(crate) use logging::logs_enabled;
pub use logging::{
    crash_log_path, init_logging, log_call, log_debug, log_debug_content, log_file_path,
    log_panic, log_port, mask_number, panic_payload_text,
};
