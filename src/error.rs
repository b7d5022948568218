//! Failure taxonomy for device and classification errors.
//!
//! Device code raises these inside `anyhow::Error`; the session boundary downcasts
//! them to choose the default outcome for the call.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
    /// Port could not be opened or never answered `AT`.
    #[error("port {port} unreachable: {reason}")]
    Connection { port: String, reason: String },

    /// Modem replied, but not with what the command expects.
    #[error("port {port} rejected {command}: {reply:?}")]
    Protocol {
        port: String,
        command: String,
        reply: String,
    },

    #[error("port {port} timed out waiting for {what} after {waited:?}")]
    Timeout {
        port: String,
        what: &'static str,
        waited: Duration,
    },

    /// Optional hardware (ESP32 link, audio input) is absent.
    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("classification ambiguous: {0}")]
    ClassificationAmbiguous(String),
}

impl CheckError {
    /// True when the modem itself is not responding, as opposed to a detector failing.
    pub fn is_modem_silent(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Protocol { .. })
    }
}

/// Find a `CheckError` anywhere in an `anyhow` chain.
pub fn find_check_error(err: &anyhow::Error) -> Option<&CheckError> {
    err.chain().find_map(|cause| cause.downcast_ref::<CheckError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn check_error_survives_context_wrapping() {
        let err = Err::<(), _>(CheckError::Protocol {
            port: "/dev/ttyUSB0".to_string(),
            command: "AT".to_string(),
            reply: String::new(),
        })
        .context("probe failed")
        .unwrap_err();
        let found = find_check_error(&err).expect("typed error in chain");
        assert!(found.is_modem_silent());
    }

    #[test]
    fn detector_failures_are_not_modem_silence() {
        assert!(!CheckError::HardwareUnavailable("esp32".into()).is_modem_silent());
        assert!(!CheckError::ClassificationAmbiguous("dtw".into()).is_modem_silent());
    }
}
