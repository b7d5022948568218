use super::parse::{
    detect_answer, final_result, parse_clcc, parse_cnum, parse_cops, parse_csq, parse_cusd,
    AnswerSignal, FinalResult, SignalQuality, UssdReply,
};
use crate::error::CheckError;
use crate::log_port;
use crate::transport::ByteTransport;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

const MAX_UNSOLICITED_BYTES: usize = 4096;

/// Read windows for the command/response exchange, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AtTimings {
    /// Upper bound for a regular command to reach its final result code.
    pub command_timeout_ms: u64,
    pub hangup_timeout_ms: u64,
    pub ussd_timeout_ms: u64,
    /// Sleep between reads while waiting for a reply.
    pub read_tick_ms: u64,
    pub retry_pause_ms: u64,
}

impl Default for AtTimings {
    fn default() -> Self {
        Self {
            command_timeout_ms: 3_000,
            hangup_timeout_ms: 1_000,
            ussd_timeout_ms: 10_000,
            read_tick_ms: 50,
            retry_pause_ms: 200,
        }
    }
}

impl AtTimings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// One CLCC poll, plus any answer token seen since the previous command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPoll {
    pub status: Option<u8>,
    pub answer: Option<AnswerSignal>,
    pub raw: String,
}

/// Request/response driver for one modem. Not shared across ports.
pub struct AtChannel {
    transport: Box<dyn ByteTransport>,
    timings: AtTimings,
    unsolicited: String,
}

impl AtChannel {
    pub fn new(transport: Box<dyn ByteTransport>, timings: AtTimings) -> Self {
        Self {
            transport,
            timings,
            unsolicited: String::new(),
        }
    }

    pub fn port_id(&self) -> &str {
        self.transport.name()
    }

    /// Write `cmd` and collect the reply until a final result code or `timeout`.
    pub fn send(&mut self, cmd: &str, timeout: Duration) -> Result<String> {
        self.write_command(cmd)?;
        self.read_until(timeout, |text| final_result(text).is_some())
    }

    /// Write `cmd`, wait `wait`, and return whatever arrived. Used by tight polling loops.
    pub fn send_quick(&mut self, cmd: &str, wait: Duration) -> Result<String> {
        self.write_command(cmd)?;
        thread::sleep(wait);
        let mut raw = Vec::new();
        self.transport.read_available(&mut raw)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Send a command that must end in `OK`, retrying once.
    pub fn send_checked(&mut self, cmd: &str) -> Result<String> {
        let timeout = self.timings.command_timeout();
        let mut last_reply = String::new();
        for attempt in 1..=2 {
            let reply = self.send(cmd, timeout)?;
            match final_result(&reply) {
                Some(FinalResult::Ok) => return Ok(reply),
                other => log_port(
                    self.port_id(),
                    &format!("{cmd} attempt {attempt} ended with {other:?}"),
                ),
            }
            last_reply = reply;
            thread::sleep(Duration::from_millis(self.timings.retry_pause_ms));
        }
        if last_reply.trim().is_empty() {
            return Err(CheckError::Timeout {
                port: self.port_id().to_string(),
                what: "final result code",
                waited: timeout * 2,
            }
            .into());
        }
        Err(CheckError::Protocol {
            port: self.port_id().to_string(),
            command: cmd.to_string(),
            reply: last_reply.trim().to_string(),
        }
        .into())
    }

    /// `AT` must come back `OK`. A silent modem becomes a `Connection` error.
    pub fn probe(&mut self) -> Result<()> {
        match self.send_checked("AT") {
            Ok(_) => Ok(()),
            Err(err) => Err(CheckError::Connection {
                port: self.port_id().to_string(),
                reason: format!("{err:#}"),
            }
            .into()),
        }
    }

    /// Start a voice call. The reply is read later by the call-status poller.
    pub fn dial(&mut self, number: &str) -> Result<()> {
        self.write_command(&format!("ATD{number};"))
    }

    pub fn hang_up(&mut self) -> Result<String> {
        self.send("ATH", Duration::from_millis(self.timings.hangup_timeout_ms))
    }

    pub fn poll_call_status(&mut self, wait: Duration) -> Result<CallPoll> {
        let raw = self.send_quick("AT+CLCC", wait)?;
        let pending = std::mem::take(&mut self.unsolicited);
        let answer = detect_answer(&pending).or_else(|| detect_answer(&raw));
        Ok(CallPoll {
            status: parse_clcc(&raw),
            answer,
            raw,
        })
    }

    /// Text that arrived outside any command exchange since the last call.
    pub fn drain_unsolicited(&mut self) -> Result<String> {
        self.stash_pending()?;
        Ok(std::mem::take(&mut self.unsolicited))
    }

    /// Enable answer reporting and verbose errors, then persist the profile.
    pub fn configure_for_calls(&mut self) -> Result<()> {
        for cmd in ["AT+COLP=1", "AT+CMEE=2", "ATV1", "AT&W"] {
            if let Err(err) = self.send_checked(cmd) {
                log_port(self.port_id(), &format!("{cmd} not accepted: {err:#}"));
            }
        }
        Ok(())
    }

    /// Drop any stuck call and restore factory defaults before configuring.
    pub fn refresh(&mut self) -> Result<()> {
        let timeout = self.timings.command_timeout();
        self.send("AT+CHUP", timeout)?;
        self.send_checked("ATZ")?;
        self.send_checked("AT&F")?;
        self.configure_for_calls()
    }

    pub fn factory_reset(&mut self) -> Result<()> {
        self.send("AT+CFUN=1,1", self.timings.command_timeout())?;
        Ok(())
    }

    pub fn signal_quality(&mut self) -> Result<Option<SignalQuality>> {
        Ok(parse_csq(&self.send_checked("AT+CSQ")?))
    }

    pub fn operator(&mut self) -> Result<Option<String>> {
        Ok(parse_cops(&self.send_checked("AT+COPS?")?))
    }

    pub fn own_number(&mut self) -> Result<Option<String>> {
        Ok(parse_cnum(&self.send_checked("AT+CNUM")?))
    }

    /// Run a USSD query and wait for the network's `+CUSD` reply.
    pub fn ussd(&mut self, code: &str) -> Result<Option<UssdReply>> {
        self.write_command(&format!("AT+CUSD=1,\"{code}\",15"))?;
        let timeout = Duration::from_millis(self.timings.ussd_timeout_ms);
        let reply = self.read_until(timeout, |text| {
            cusd_complete(text) || matches!(final_result(text), Some(FinalResult::Error(_)))
        })?;
        Ok(parse_cusd(&reply))
    }

    fn write_command(&mut self, cmd: &str) -> Result<()> {
        self.stash_pending()?;
        self.transport.clear_input()?;
        self.transport.write_all(format!("{cmd}\r\n").as_bytes())
    }

    /// Keep bytes that arrived between commands so `+COLP` survives the input clear.
    fn stash_pending(&mut self) -> Result<()> {
        let mut raw = Vec::new();
        if self.transport.read_available(&mut raw)? > 0 {
            self.unsolicited.push_str(&String::from_utf8_lossy(&raw));
        }
        if self.unsolicited.len() > MAX_UNSOLICITED_BYTES {
            let mut cut = self.unsolicited.len() - MAX_UNSOLICITED_BYTES;
            while !self.unsolicited.is_char_boundary(cut) {
                cut += 1;
            }
            self.unsolicited.drain(..cut);
        }
        Ok(())
    }

    fn read_until(&mut self, timeout: Duration, done: impl Fn(&str) -> bool) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let tick = Duration::from_millis(self.timings.read_tick_ms.max(1));
        let mut raw = Vec::new();
        loop {
            self.transport.read_available(&mut raw)?;
            let text = String::from_utf8_lossy(&raw);
            if done(&text) || Instant::now() >= deadline {
                return Ok(text.into_owned());
            }
            thread::sleep(tick);
        }
    }
}

/// A `+CUSD` reply is complete once its line ends: `..."<text>",<dcs>` or a bare status.
fn cusd_complete(text: &str) -> bool {
    let Some(at) = text.find("+CUSD:") else {
        return false;
    };
    let tail = &text[at + "+CUSD:".len()..];
    if !tail.ends_with('\n') {
        return false;
    }
    let tail = tail.trim_end();
    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|ch| ch.is_ascii_digit());
    match tail.rfind('"') {
        Some(close) if tail.find('"') != Some(close) => tail[close + 1..]
            .strip_prefix(',')
            .is_some_and(|dcs| all_digits(dcs.trim())),
        Some(_) => false,
        None => all_digits(tail.trim()),
    }
}
