use super::*;
use crate::error::{find_check_error, CheckError};
use crate::transport::scripted::ScriptedTransport;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_timings() -> AtTimings {
    AtTimings {
        command_timeout_ms: 40,
        hangup_timeout_ms: 40,
        ussd_timeout_ms: 80,
        read_tick_ms: 2,
        retry_pause_ms: 1,
    }
}

fn channel_with(
    responder: impl FnMut(&str, Duration) -> Vec<u8> + Send + 'static,
) -> (AtChannel, crate::transport::scripted::ScriptHandle) {
    let (transport, handle) = ScriptedTransport::new("/dev/ttyTEST0", responder);
    (AtChannel::new(Box::new(transport), fast_timings()), handle)
}

#[test]
fn send_returns_reply_with_final_code() {
    let (mut channel, handle) = channel_with(|line, _| format!("{line}\r\r\nOK\r\n").into_bytes());
    let reply = channel
        .send("AT", Duration::from_millis(40))
        .expect("send ok");
    assert!(reply.contains("OK"));
    assert_eq!(handle.written(), vec!["AT"]);
}

#[test]
fn probe_accepts_ok() {
    let (transport, _) = ScriptedTransport::always_ok("/dev/ttyTEST1");
    let mut channel = AtChannel::new(Box::new(transport), fast_timings());
    assert!(channel.probe().is_ok());
}

#[test]
fn probe_retries_once_then_reports_connection_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let (mut channel, handle) = channel_with(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Vec::new()
    });
    let err = channel.probe().expect_err("silent modem");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(handle.written().len(), 2);
    assert!(matches!(
        find_check_error(&err),
        Some(CheckError::Connection { .. })
    ));
}

#[test]
fn second_attempt_can_recover() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let (mut channel, _) = channel_with(move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            b"\r\nERROR\r\n".to_vec()
        } else {
            b"\r\nOK\r\n".to_vec()
        }
    });
    assert!(channel.send_checked("AT+CSQ").is_ok());
}

#[test]
fn send_checked_error_reply_is_protocol_error() {
    let (mut channel, _) = channel_with(|_, _| b"\r\n+CME ERROR: 10\r\n".to_vec());
    let err = channel.send_checked("AT+CNUM").expect_err("error reply");
    match find_check_error(&err) {
        Some(CheckError::Protocol { command, reply, .. }) => {
            assert_eq!(command, "AT+CNUM");
            assert!(reply.contains("CME ERROR"));
        }
        other => panic!("unexpected error kind: {other:?}"),
    }
}

#[test]
fn send_checked_silence_is_timeout() {
    let (transport, _) = ScriptedTransport::silent("/dev/ttyTEST2");
    let mut channel = AtChannel::new(Box::new(transport), fast_timings());
    let err = channel.send_checked("AT").expect_err("silence");
    assert!(matches!(
        find_check_error(&err),
        Some(CheckError::Timeout { .. })
    ));
}

#[test]
fn dial_writes_voice_call_command() {
    let (mut channel, handle) = channel_with(|_, _| Vec::new());
    channel.dial("0961234567").expect("dial");
    assert_eq!(handle.written(), vec!["ATD0961234567;"]);
}

#[test]
fn poll_reads_clcc_status() {
    let (mut channel, _) = channel_with(|line, _| {
        if line == "AT+CLCC" {
            b"\r\n+CLCC: 1,0,3,0,0,\"0961234567\",129\r\n\r\nOK\r\n".to_vec()
        } else {
            Vec::new()
        }
    });
    let poll = channel
        .poll_call_status(Duration::from_millis(2))
        .expect("poll");
    assert_eq!(poll.status, Some(3));
    assert_eq!(poll.answer, None);
}

#[test]
fn unsolicited_colp_survives_buffer_clear() {
    let (mut channel, handle) = channel_with(|line, _| {
        if line == "AT+CLCC" {
            b"\r\n+CLCC: 1,0,2,0,0,\"0961234567\",129\r\n\r\nOK\r\n".to_vec()
        } else {
            Vec::new()
        }
    });
    handle.push_inbound(b"\r\n+COLP: \"0961234567\",129\r\n");
    let poll = channel
        .poll_call_status(Duration::from_millis(2))
        .expect("poll");
    assert_eq!(poll.status, Some(2));
    assert_eq!(poll.answer, Some(AnswerSignal::Colp));

    let next = channel
        .poll_call_status(Duration::from_millis(2))
        .expect("poll");
    assert_eq!(next.answer, None);
}

#[test]
fn drain_unsolicited_returns_pending_text() {
    let (mut channel, handle) = channel_with(|_, _| Vec::new());
    handle.push_inbound(b"\r\nRING\r\n");
    let text = channel.drain_unsolicited().expect("drain");
    assert!(text.contains("RING"));
    assert!(channel.drain_unsolicited().expect("drain").is_empty());
}

#[test]
fn info_queries_parse_replies() {
    let (mut channel, _) = channel_with(|line, _| {
        let body = match line {
            "AT+CSQ" => "+CSQ: 18,0\r\n",
            "AT+COPS?" => "+COPS: 0,0,\"Viettel\",7\r\n",
            "AT+CNUM" => "+CNUM: \"\",\"+84961234567\",145\r\n",
            _ => "",
        };
        format!("\r\n{body}\r\nOK\r\n").into_bytes()
    });
    assert_eq!(
        channel.signal_quality().expect("csq").and_then(|q| q.dbm()),
        Some(-77)
    );
    assert_eq!(channel.operator().expect("cops").as_deref(), Some("Viettel"));
    assert_eq!(
        channel.own_number().expect("cnum").as_deref(),
        Some("+84961234567")
    );
}

#[test]
fn ussd_waits_for_network_reply() {
    let (mut channel, handle) = channel_with(|_, _| b"\r\nOK\r\n".to_vec());
    handle.schedule(
        Duration::from_millis(15),
        b"\r\n+CUSD: 0,\"TB +84961234567 TKC 20000 d\",15\r\n",
    );
    let reply = channel.ussd("*101#").expect("ussd").expect("reply");
    assert_eq!(reply.balance, Some(20_000));
    assert_eq!(reply.phone_number.as_deref(), Some("+84961234567"));
    assert_eq!(handle.written(), vec!["AT+CUSD=1,\"*101#\",15"]);
}

#[test]
fn query_info_picks_balance_code_from_operator() {
    let (mut channel, handle) = channel_with(|line, _| {
        let body = match line {
            "AT+CSQ" => "+CSQ: 99,99\r\n",
            "AT+COPS?" => "+COPS: 0,0,\"Vietnamobile\",2\r\n",
            "AT+CNUM" => "",
            _ if line.starts_with("AT+CUSD") => {
                "+CUSD: 0,\"So TB +84921234567, TKC 500 d\",15\r\n"
            }
            _ => "",
        };
        format!("\r\nOK\r\n{body}").into_bytes()
    });
    let info = query_info(&mut channel);
    assert_eq!(info.signal_dbm, None);
    assert_eq!(info.operator.as_deref(), Some("Vietnamobile"));
    assert_eq!(info.own_number.as_deref(), Some("+84921234567"));
    assert!(handle
        .written()
        .iter()
        .any(|cmd| cmd == "AT+CUSD=1,\"*102#\",15"));
}

#[test]
fn refresh_runs_reset_sequence() {
    let (transport, handle) = ScriptedTransport::always_ok("/dev/ttyTEST3");
    let mut channel = AtChannel::new(Box::new(transport), fast_timings());
    channel.refresh().expect("refresh");
    assert_eq!(
        handle.written(),
        vec!["AT+CHUP", "ATZ", "AT&F", "AT+COLP=1", "AT+CMEE=2", "ATV1", "AT&W"]
    );
}

#[test]
fn write_failure_propagates() {
    let (mut channel, handle) = channel_with(|_, _| Vec::new());
    handle.set_fail_writes(true);
    assert!(channel.dial("0911111111").is_err());
}
