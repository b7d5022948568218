//! Parsers for AT responses. All of them take the raw text read from the port,
//! which may include echoed commands and unrelated unsolicited lines.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Call state reported in the third field of a `+CLCC` line.
///
/// Meanings past Alerting vary by firmware; 6 is what the deployed modems
/// report once the network drops the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClccStatus {
    Active,
    Held,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
    Disconnected,
}

impl ClccStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => ClccStatus::Active,
            1 => ClccStatus::Held,
            2 => ClccStatus::Dialing,
            3 => ClccStatus::Alerting,
            4 => ClccStatus::Incoming,
            5 => ClccStatus::Waiting,
            6 => ClccStatus::Disconnected,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        match self {
            ClccStatus::Active => 0,
            ClccStatus::Held => 1,
            ClccStatus::Dialing => 2,
            ClccStatus::Alerting => 3,
            ClccStatus::Incoming => 4,
            ClccStatus::Waiting => 5,
            ClccStatus::Disconnected => 6,
        }
    }
}

/// Status code of the first well-formed `+CLCC:` line, or `None` when no call is listed.
pub fn parse_clcc(text: &str) -> Option<u8> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("+CLCC:"))
        .find_map(|fields| fields.split(',').nth(2)?.trim().parse::<u8>().ok())
}

/// Far-end answer indications that may appear unsolicited while a call is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSignal {
    Colp,
    Connect,
}

pub fn detect_answer(text: &str) -> Option<AnswerSignal> {
    text.lines().map(str::trim).find_map(|line| {
        if line.starts_with("+COLP:") {
            Some(AnswerSignal::Colp)
        } else if line == "CONNECT" || line.starts_with("CONNECT ") {
            Some(AnswerSignal::Connect)
        } else {
            None
        }
    })
}

/// Terminal result code closing a command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalResult {
    Ok,
    Error(String),
    /// Call-progress result such as `NO CARRIER` or `BUSY`.
    CallEnded(String),
}

pub fn final_result(text: &str) -> Option<FinalResult> {
    text.lines().map(str::trim).find_map(|line| match line {
        "OK" => Some(FinalResult::Ok),
        "ERROR" => Some(FinalResult::Error(line.to_string())),
        "NO CARRIER" | "BUSY" | "NO ANSWER" | "NO DIALTONE" => {
            Some(FinalResult::CallEnded(line.to_string()))
        }
        _ if line.starts_with("+CME ERROR:") || line.starts_with("+CMS ERROR:") => {
            Some(FinalResult::Error(line.to_string()))
        }
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalQuality {
    /// 0..=31, `None` when the modem reports 99 (unknown).
    pub rssi: Option<u8>,
    pub ber: Option<u8>,
}

impl SignalQuality {
    pub fn dbm(&self) -> Option<i32> {
        self.rssi.map(|rssi| -113 + 2 * i32::from(rssi))
    }
}

pub fn parse_csq(text: &str) -> Option<SignalQuality> {
    let fields = text
        .lines()
        .find_map(|line| line.trim().strip_prefix("+CSQ:"))?;
    let mut parts = fields.split(',').map(|part| part.trim().parse::<u8>().ok());
    let rssi = parts.next()??;
    let ber = parts.next().flatten();
    let known = |value: u8| (value != 99).then_some(value);
    Some(SignalQuality {
        rssi: known(rssi).filter(|value| *value <= 31),
        ber: ber.and_then(known),
    })
}

/// Operator name from `+COPS?`.
pub fn parse_cops(text: &str) -> Option<String> {
    let fields = text
        .lines()
        .find_map(|line| line.trim().strip_prefix("+COPS:"))?;
    quoted_fields(fields).into_iter().next()
}

/// Subscriber number from `+CNUM`, when the SIM stores one.
pub fn parse_cnum(text: &str) -> Option<String> {
    let fields = text
        .lines()
        .find_map(|line| line.trim().strip_prefix("+CNUM:"))?;
    quoted_fields(fields).into_iter().find(|field| {
        let digits = field.trim_start_matches('+');
        !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit())
    })
}

fn quoted_fields(text: &str) -> Vec<String> {
    text.split('"')
        .skip(1)
        .step_by(2)
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UssdReply {
    pub status: Option<u8>,
    pub content: String,
    pub phone_number: Option<String>,
    /// Main account balance in dong.
    pub balance: Option<u64>,
}

/// Parse a `+CUSD: <m>,"<text>",<dcs>` reply. The text may span several lines.
pub fn parse_cusd(text: &str) -> Option<UssdReply> {
    let start = text.find("+CUSD:")?;
    let body = &text[start + "+CUSD:".len()..];
    let status = body
        .split([',', '\r', '\n'])
        .next()
        .and_then(|field| field.trim().parse::<u8>().ok());
    let content = match (body.find('"'), body.rfind('"')) {
        (Some(open), Some(close)) if close > open => body[open + 1..close].trim().to_string(),
        _ => String::new(),
    };

    static PHONE_RE: OnceLock<Regex> = OnceLock::new();
    static BALANCE_RE: OnceLock<Regex> = OnceLock::new();
    let phone_re =
        PHONE_RE.get_or_init(|| Regex::new(r"\+84\d{9,10}").expect("phone regex should compile"));
    let balance_re = BALANCE_RE.get_or_init(|| {
        Regex::new(r"TKC\s+([\d.,]+)\s*d").expect("balance regex should compile")
    });

    let phone_number = phone_re
        .find(&content)
        .map(|found| found.as_str().to_string());
    let balance = balance_re
        .captures(&content)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| {
            digits
                .as_str()
                .chars()
                .filter(char::is_ascii_digit)
                .collect::<String>()
                .parse::<u64>()
                .ok()
        });
    Some(UssdReply {
        status,
        content,
        phone_number,
        balance,
    })
}
