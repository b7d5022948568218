//! AT command channel to one GSM modem and the parsers for its replies.

mod channel;
mod parse;
#[cfg(test)]
mod tests;

pub use channel::{AtChannel, AtTimings, CallPoll};
pub use parse::{
    detect_answer, final_result, parse_clcc, parse_cnum, parse_cops, parse_csq, parse_cusd,
    AnswerSignal, ClccStatus, FinalResult, SignalQuality, UssdReply,
};

use crate::carrier::CarrierClass;
use crate::log_port;
use crate::transport::SerialTransport;
use anyhow::Result;
use serde::Serialize;
use std::time::Duration;

/// Open a modem port and confirm it answers `AT`.
pub fn open_modem(
    port: &str,
    baud: u32,
    timeout: Duration,
    timings: &AtTimings,
) -> Result<AtChannel> {
    let transport = SerialTransport::open(port, baud, timeout)?;
    let mut channel = AtChannel::new(Box::new(transport), timings.clone());
    channel.probe()?;
    Ok(channel)
}

/// SIM and network status for `--modem-info`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModemInfo {
    pub port: String,
    pub signal: Option<SignalQuality>,
    pub signal_dbm: Option<i32>,
    pub operator: Option<String>,
    pub own_number: Option<String>,
    pub ussd: Option<UssdReply>,
    pub errors: Vec<String>,
}

/// Collect what the modem will tell us; individual failures are recorded, not fatal.
pub fn query_info(channel: &mut AtChannel) -> ModemInfo {
    let mut info = ModemInfo {
        port: channel.port_id().to_string(),
        ..ModemInfo::default()
    };
    match channel.signal_quality() {
        Ok(signal) => {
            info.signal_dbm = signal.and_then(|q| q.dbm());
            info.signal = signal;
        }
        Err(err) => info.errors.push(format!("csq: {err:#}")),
    }
    match channel.operator() {
        Ok(name) => info.operator = name,
        Err(err) => info.errors.push(format!("cops: {err:#}")),
    }
    match channel.own_number() {
        Ok(number) => info.own_number = number,
        Err(err) => info.errors.push(format!("cnum: {err:#}")),
    }
    let code = carrier_from_operator(info.operator.as_deref()).balance_code();
    match channel.ussd(code) {
        Ok(reply) => {
            if info.own_number.is_none() {
                info.own_number = reply.as_ref().and_then(|r| r.phone_number.clone());
            }
            info.ussd = reply;
        }
        Err(err) => info.errors.push(format!("cusd: {err:#}")),
    }
    if !info.errors.is_empty() {
        log_port(&info.port, &format!("modem info partial: {:?}", info.errors));
    }
    info
}

fn carrier_from_operator(name: Option<&str>) -> CarrierClass {
    let name = name.unwrap_or_default().to_ascii_lowercase();
    if name.contains("vietnamobile") {
        CarrierClass::Vietnamobile
    } else if name.contains("viettel") {
        CarrierClass::Viettel
    } else if name.contains("mobifone") {
        CarrierClass::Mobifone
    } else if name.contains("vinaphone") || name.contains("vnpt") {
        CarrierClass::Vina
    } else {
        CarrierClass::Unknown
    }
}
