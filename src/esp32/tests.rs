use super::*;
use crate::error::{find_check_error, CheckError};
use crate::transport::scripted::{ScriptHandle, ScriptedTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn fast_timings() -> LinkTimings {
    LinkTimings {
        ack_timeout_ms: 20,
        poll_interval_ms: 1,
        sample_rate_hz: 1_000,
    }
}

fn frames(samples: &[(u8, u16)]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|(ch, value)| {
            let [hi, lo] = value.to_be_bytes();
            [*ch, hi, lo]
        })
        .collect()
}

/// Bridge that acks everything and starts streaming right after the stream ack.
fn streaming_bridge(first_burst: Vec<u8>) -> (Esp32Link, ScriptHandle) {
    let (transport, handle) = ScriptedTransport::new("/dev/ttyESP", move |line, _| {
        match line {
            "binary_on" => b"BINARY_MODE_ON\r\n".to_vec(),
            "binary_off" => b"TEXT_MODE_ON\r\n".to_vec(),
            "stop_stream" => b"STREAM_STOP\r\n".to_vec(),
            _ if line.starts_with("start_multi") => {
                let mut reply = b"MULTI_STREAM_START:2\r\n".to_vec();
                reply.extend_from_slice(&first_burst);
                reply
            }
            _ => Vec::new(),
        }
    });
    (Esp32Link::connect(Box::new(transport), fast_timings()), handle)
}

#[test]
fn connect_switches_to_binary() {
    let (link, handle) = streaming_bridge(Vec::new());
    assert!(link.is_available());
    assert_eq!(link.status().mode, StreamMode::Binary);
    assert_eq!(handle.written(), vec!["binary_on"]);
}

#[test]
fn silent_bridge_is_unavailable_not_fatal() {
    let (transport, _) = ScriptedTransport::silent("/dev/ttyESP");
    let mut link = Esp32Link::connect(Box::new(transport), fast_timings());
    assert!(!link.is_available());
    let err = link
        .collect_samples(&[1], Duration::from_millis(5), &|| false)
        .expect_err("unavailable");
    assert!(matches!(
        find_check_error(&err),
        Some(CheckError::HardwareUnavailable(_))
    ));
}

#[test]
fn collects_frames_including_bytes_after_ack() {
    let burst = frames(&[(1, 100), (2, 200), (3, 999)]);
    let (mut link, handle) = streaming_bridge(burst);
    // A frame split across two reads, then a complete one.
    let tail = frames(&[(1, 2700), (2, 4095)]);
    handle.schedule(Duration::from_millis(0), &tail[..4]);
    handle.schedule(Duration::from_millis(2), &tail[4..]);

    let collected = link
        .collect_samples(&[1, 2], Duration::from_millis(30), &|| false)
        .expect("collect");
    assert!(!collected.cancelled);
    assert_eq!(collected.samples.get(&1), Some(&vec![100, 2700]));
    assert_eq!(collected.samples.get(&2), Some(&vec![200, 4095]));
    assert!(!collected.samples.contains_key(&3));
    assert_eq!(
        handle.written(),
        vec!["binary_on", "start_multi 1,2", "stop_stream"]
    );
    assert!(!link.status().streaming);
}

#[test]
fn more_than_two_channels_are_truncated() {
    let (mut link, handle) = streaming_bridge(Vec::new());
    let collected = link
        .collect_samples(&[1, 2, 3], Duration::from_millis(5), &|| false)
        .expect("collect");
    assert_eq!(collected.samples.len(), 2);
    assert!(handle.written().contains(&"start_multi 1,2".to_string()));
}

#[test]
fn cancellation_stops_the_stream_early() {
    let (mut link, handle) = streaming_bridge(frames(&[(1, 10)]));
    let flag = Arc::new(AtomicBool::new(false));
    let trigger = Arc::clone(&flag);
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(10));
        trigger.store(true, Ordering::SeqCst);
    });
    let started = Instant::now();
    let collected = link
        .collect_samples(&[1], Duration::from_secs(5), &|| flag.load(Ordering::SeqCst))
        .expect("collect");
    canceller.join().expect("canceller thread");
    assert!(collected.cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(handle.written().last().map(String::as_str), Some("stop_stream"));
}

#[test]
fn missing_stream_ack_is_hardware_unavailable() {
    let (transport, handle) = ScriptedTransport::new("/dev/ttyESP", |line, _| match line {
        "binary_on" => b"BINARY_MODE_ON\n".to_vec(),
        _ => Vec::new(),
    });
    let mut link = Esp32Link::connect(Box::new(transport), fast_timings());
    let err = link
        .collect_samples(&[1], Duration::from_millis(5), &|| false)
        .expect_err("no stream ack");
    assert!(matches!(
        find_check_error(&err),
        Some(CheckError::HardwareUnavailable(_))
    ));
    assert_eq!(handle.written().last().map(String::as_str), Some("stop_stream"));
}

#[test]
fn text_mode_fallback_reads_lines() {
    let (transport, _) = ScriptedTransport::new("/dev/ttyESP", |line, _| match line {
        "binary_on" => b"TEXT_MODE_ON\n".to_vec(),
        "start_stream 1" => b"STREAM_START\nCH1:100\nCH2:5\nCH1: 2800\n".to_vec(),
        "stop_stream" => b"STREAM_STOP\n".to_vec(),
        _ => Vec::new(),
    });
    let mut link = Esp32Link::connect(Box::new(transport), fast_timings());
    assert_eq!(link.status().mode, StreamMode::Text);
    let collected = link
        .collect_samples(&[1, 2], Duration::from_millis(10), &|| false)
        .expect("collect");
    assert_eq!(collected.samples.get(&1), Some(&vec![100, 2800]));
}

#[test]
fn binary_mode_toggle_reports_ack() {
    let (mut link, _) = streaming_bridge(Vec::new());
    assert!(link.set_binary_mode(false).expect("toggle"));
    assert_eq!(link.status().mode, StreamMode::Text);
    assert!(link.set_binary_mode(true).expect("toggle"));
    assert_eq!(link.status().mode, StreamMode::Binary);
}

#[test]
fn ack_line_keeps_trailing_stream_bytes() {
    let mut buffer = b"noise\nMULTI_STREAM_START:2\r\n\x01\x0a\x8c".to_vec();
    let line = take_ack_line(&mut buffer, &["MULTI_STREAM_START:"]).expect("ack");
    assert_eq!(line, "MULTI_STREAM_START:2");
    assert_eq!(buffer, vec![0x01, 0x0a, 0x8c]);
}

#[test]
fn ack_line_needs_newline() {
    let mut buffer = b"STREAM_ST".to_vec();
    assert_eq!(take_ack_line(&mut buffer, &["STREAM_STOP"]), None);
    buffer.extend_from_slice(b"OP");
    assert_eq!(take_ack_line(&mut buffer, &["STREAM_STOP"]), None);
    buffer.push(b'\n');
    assert_eq!(
        take_ack_line(&mut buffer, &["STREAM_STOP"]).as_deref(),
        Some("STREAM_STOP")
    );
    assert!(buffer.is_empty());
}
