use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use linecheck::audio::LocalRecorder;
use serde::Serialize;
use std::io::{self, Write};
use std::time::Duration;

pub(crate) fn list_input_devices() -> Result<()> {
    // LINECHECK_TEST_DEVICES stands in for the sound card in CLI tests.
    let devices = if let Ok(raw) = std::env::var("LINECHECK_TEST_DEVICES") {
        parse_device_list(&raw)
    } else {
        LocalRecorder::list_devices().unwrap_or_else(|err| {
            eprintln!("Failed to list audio input devices: {err:#}");
            Vec::new()
        })
    };

    if devices.is_empty() {
        println!("No audio input devices detected.");
    } else {
        println!("Available audio input devices:");
        for name in devices {
            println!("  - {name}");
        }
    }
    Ok(())
}

fn parse_device_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// One JSON document per line on stdout; logs never go there.
pub(crate) fn print_json_line(value: &impl Serialize) -> Result<()> {
    let line = serde_json::to_string(value).context("failed to encode result")?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{line}").context("failed to write to stdout")?;
    stdout.flush().context("failed to flush stdout")
}

/// Pass results to `emit` until the sender disconnects. The interrupt is checked before
/// every receive, so a steady stream of results cannot delay `stop`.
pub(crate) fn forward_results<T>(
    results: &Receiver<T>,
    poll: Duration,
    mut interrupted: impl FnMut() -> bool,
    mut stop: impl FnMut(),
    mut emit: impl FnMut(&T) -> Result<()>,
) -> Result<()> {
    loop {
        if interrupted() {
            stop();
        }
        match results.recv_timeout(poll) {
            Ok(item) => emit(&item)?,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}
