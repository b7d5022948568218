//! Linecheck entrypoint: probe the modem bank, check every number, print results.
//!
//! stdout carries one JSON object per checked number followed by a summary object.
//! Human-facing notes go to stderr; debug and trace logs go to files under the temp
//! dir when `--logs` is set.

mod cli_utils;
mod setup;
mod signals;

use anyhow::{bail, Result};
use clap::Parser;
use linecheck::config::AppConfig;
use linecheck::doctor::doctor_report;
use linecheck::modem::{open_modem, query_info};
use linecheck::pool::{scan, PoolSettings, PortPool};
use linecheck::telemetry::init_tracing;
use linecheck::{init_logging, log_debug, log_file_path};
use serde_json::json;
use std::time::{Duration, Instant};

use crate::cli_utils::{forward_results, list_input_devices, print_json_line};
use crate::signals::{install_panic_hook, install_sigint_handler, take_interrupt};

/// How often the result loop wakes to check for Ctrl-C.
const RESULT_POLL: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    let mut config = AppConfig::parse();
    if config.doctor {
        println!("{}", doctor_report(&config).render());
        return Ok(());
    }
    if config.list_input_devices {
        list_input_devices()?;
        return Ok(());
    }

    config.validate()?;
    init_logging(&config);
    init_tracing(&config);
    install_panic_hook();
    log_debug("=== Linecheck Started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));

    let detection = config.detection_config()?;
    let numbers = if config.scan_only || config.modem_info {
        Vec::new()
    } else {
        let numbers = config.load_numbers()?;
        if numbers.is_empty() {
            bail!("no phone numbers given (pass them as arguments or use --numbers-file)");
        }
        numbers
    };

    let candidates = setup::modem_candidates(&config);
    let baud = config.baud;
    let timeout = config.serial_timeout();
    let at = detection.at.clone();
    let started = Instant::now();
    let usable = scan(&candidates, |port| {
        open_modem(port, baud, timeout, &at).map(|_| ())
    });
    eprintln!(
        "{} of {} ports answered in {:.1}s",
        usable.len(),
        candidates.len(),
        started.elapsed().as_secs_f32()
    );
    if usable.is_empty() {
        bail!("no usable modem among {} candidate ports", candidates.len());
    }

    if config.scan_only {
        for port in &usable {
            println!("{port}");
        }
        return Ok(());
    }
    if config.modem_info {
        for port in &usable {
            match open_modem(port, baud, timeout, &at) {
                Ok(mut channel) => print_json_line(&query_info(&mut channel))?,
                Err(err) => eprintln!("{port}: {err:#}"),
            }
        }
        return Ok(());
    }

    let audio = setup::open_audio_source(&config, &detection);
    let backend = audio.as_ref().map(|(kind, _)| *kind);
    let analysis = setup::audio_analysis(&config, &detection, backend);
    let settings = PoolSettings {
        timings: detection.session.clone(),
        call_pause: config.call_pause(),
        reset_on_shutdown: !config.no_reset,
    };
    let mut pool = PortPool::new(
        usable.clone(),
        setup::modem_opener(&config, &detection),
        settings,
        analysis,
    )?;
    match (audio, setup::audio_port(&config, &usable)) {
        (Some((kind, source)), Some(port)) => {
            eprintln!("Audio: {} on {port}", kind.label());
            pool = pool.with_audio(port, source)?;
        }
        _ => eprintln!("Audio: none; every carrier uses call signaling"),
    }

    if let Err(err) = install_sigint_handler() {
        eprintln!("Ctrl-C will abort without cleanup: {err:#}");
    }
    let run = pool.start(numbers);
    forward_results(
        run.results(),
        RESULT_POLL,
        take_interrupt,
        || {
            eprintln!("Stopping after the calls in progress...");
            run.stop();
        },
        |result| print_json_line(result),
    )?;
    let summary = run.join();
    print_json_line(&json!({ "summary": summary }))?;
    log_debug(&format!(
        "=== Linecheck Finished: {}/{} checked ===",
        summary.checked, summary.total
    ));
    Ok(())
}
