use crate::config::AppConfig;
use std::{
    env, fs,
    io::{self, Write},
    panic,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, OnceLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

const LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
const CRASH_LOG_MAX_BYTES: u64 = 256 * 1024;
static LOG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_CONTENT_ENABLED: AtomicBool = AtomicBool::new(false);
static SINK: OnceLock<Mutex<Option<LogSink>>> = OnceLock::new();

pub fn log_file_path() -> PathBuf {
    env::temp_dir().join("linecheck.log")
}

/// Panic locations and versions only, unless `--log-content` is on.
pub fn crash_log_path() -> PathBuf {
    env::temp_dir().join("linecheck_crash.log")
}

/// Open `path` for appending `incoming` bytes, starting the file over once it would
/// pass `cap`. Returns the file and its size before the write.
fn open_capped(path: &Path, cap: u64, incoming: u64) -> io::Result<(fs::File, u64)> {
    let existing = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let mut options = fs::OpenOptions::new();
    options.create(true);
    if existing.saturating_add(incoming) > cap {
        options.write(true).truncate(true);
        Ok((options.open(path)?, 0))
    } else {
        options.append(true);
        Ok((options.open(path)?, existing))
    }
}

struct LogSink {
    file: fs::File,
    written: u64,
}

impl LogSink {
    fn append(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.written.saturating_add(len) > LOG_MAX_BYTES {
            match open_capped(&log_file_path(), 0, len) {
                Ok((file, _)) => {
                    self.file = file;
                    self.written = 0;
                }
                Err(_) => return,
            }
        }
        if self.file.write_all(line.as_bytes()).is_ok() {
            self.written = self.written.saturating_add(len);
        }
    }
}

fn sink() -> &'static Mutex<Option<LogSink>> {
    SINK.get_or_init(|| Mutex::new(None))
}

pub(crate) fn logs_enabled(config: &AppConfig) -> bool {
    config.logs && !config.no_logs
}

/// Apply `--logs`, `--no-logs` and `--log-content`.
pub fn init_logging(config: &AppConfig) {
    let enabled = logs_enabled(config);
    apply_log_flags(enabled, enabled && config.log_content);
}

fn apply_log_flags(enabled: bool, content_enabled: bool) {
    LOG_ENABLED.store(enabled, Ordering::Relaxed);
    LOG_CONTENT_ENABLED.store(content_enabled, Ordering::Relaxed);

    // Not lock_or_recover: that helper logs through this sink.
    let mut slot = sink().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = if enabled {
        open_capped(&log_file_path(), LOG_MAX_BYTES, 0)
            .ok()
            .map(|(file, written)| LogSink { file, written })
    } else {
        None
    };
}

fn millis_since_epoch() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Append a timestamped line to the debug log; stdout stays reserved for results.
pub fn log_debug(msg: &str) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let line = format!("[{}] {msg}\n", millis_since_epoch());
    let mut slot = sink().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(sink) = slot.as_mut() {
        sink.append(&line);
    }
}

/// Write logs that may contain subscriber data (phone numbers, transcripts).
pub fn log_debug_content(msg: &str) {
    if LOG_CONTENT_ENABLED.load(Ordering::Relaxed) {
        log_debug(msg);
    }
}

fn port_line(port: &str, msg: &str) -> String {
    format!("[{port}] {msg}")
}

/// Debug line tagged with the modem or bridge port it concerns.
pub fn log_port(port: &str, msg: &str) {
    if LOG_ENABLED.load(Ordering::Relaxed) {
        log_debug(&port_line(port, msg));
    }
}

/// Call event on `port`. The number keeps only its carrier prefix and last two digits
/// unless `--log-content` is on.
pub fn log_call(port: &str, phone: &str, msg: &str) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let shown = if LOG_CONTENT_ENABLED.load(Ordering::Relaxed) {
        phone.to_string()
    } else {
        mask_number(phone)
    };
    log_debug(&port_line(port, &format!("{shown}: {msg}")));
}

pub fn mask_number(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 5 {
        return "*".repeat(chars.len());
    }
    chars
        .iter()
        .enumerate()
        .map(|(idx, ch)| if idx < 3 || idx + 2 >= chars.len() { *ch } else { '*' })
        .collect()
}

pub fn log_panic(info: &panic::PanicHookInfo<'_>) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let location = info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "unknown".to_string());
    let payload = if LOG_CONTENT_ENABLED.load(Ordering::Relaxed) {
        panic_payload_text(info.payload())
    } else {
        "payload omitted".to_string()
    };
    let line = format!(
        "[{}] panic at {location}: {payload} (linecheck {})\n",
        millis_since_epoch() / 1_000,
        env!("CARGO_PKG_VERSION")
    );
    if let Ok((mut file, _)) = open_capped(&crash_log_path(), CRASH_LOG_MAX_BYTES, line.len() as u64) {
        let _ = file.write_all(line.as_bytes());
    }
}

/// Render a panic payload caught by `catch_unwind` or a panic hook.
pub fn panic_payload_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
pub(crate) fn set_logging_for_tests(enabled: bool, content_enabled: bool) {
    apply_log_flags(enabled, content_enabled);
}
