use anyhow::Result;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

/// Set by the SIGINT handler; the result loop turns it into a pool stop.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static PANIC_HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

#[cfg(unix)]
extern "C" fn handle_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// First Ctrl-C stops the pool at the next number boundary; calls in progress still
/// hang up cleanly.
#[cfg(unix)]
pub(crate) fn install_sigint_handler() -> Result<()> {
    unsafe {
        // SAFETY: handle_sigint only stores to an atomic, which is async-signal-safe.
        let handler = handle_sigint as *const () as libc::sighandler_t;
        if libc::signal(libc::SIGINT, handler) == libc::SIG_ERR {
            linecheck::log_debug("failed to install SIGINT handler");
            return Err(anyhow::anyhow!("failed to install SIGINT handler"));
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn install_sigint_handler() -> Result<()> {
    Ok(())
}

pub(crate) fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

pub(crate) fn install_panic_hook() {
    PANIC_HOOK_INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            linecheck::log_panic(info);
            let location = info
                .location()
                .map(|loc| format!("{}:{}", loc.file(), loc.line()))
                .unwrap_or_else(|| "unknown".to_string());
            linecheck::log_debug(&format!("panic at {location}"));
            linecheck::log_debug_content(&format!("panic: {info}"));
            previous(info);
        }));
    });
}
