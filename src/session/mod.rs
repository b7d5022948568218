//! One phone call from dial to hang-up, producing exactly one [`CallOutcome`].
//!
//! States: Idle, Dialing, Racing, Deciding, HangingUp, Done. On the audio path the
//! call-status monitor and the audio capture race on two scoped threads sharing a
//! [`CancelToken`] and a result slot; an answer seen by the monitor always wins.
//! `ATH` is sent on every path, including errors and panics.

mod analysis;
mod monitor;
mod race;

pub use analysis::AudioAnalysis;
pub use monitor::{AnswerEvidence, FastPollTracker, GsmMonitor};

use crate::audio::{AudioPattern, AudioSource};
use crate::carrier::{self, CarrierClass, DetectionStrategy};
use crate::error::{find_check_error, CheckError};
use crate::matcher::TemplateLabel;
use crate::modem::AtChannel;
use crate::stt::TranscriptLabel;
use crate::{log_call, log_port, panic_payload_text};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Answered, ringing, or otherwise reachable.
    Active,
    /// Unreachable or out of service.
    NoSubscriber,
    InvalidNumber,
}

impl CallOutcome {
    pub fn label(self) -> &'static str {
        match self {
            CallOutcome::Active => "active",
            CallOutcome::NoSubscriber => "no_subscriber",
            CallOutcome::InvalidNumber => "invalid_number",
        }
    }
}

/// Which detector produced the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "by", content = "label")]
pub enum DecidedBy {
    /// Unknown carrier; never dialed.
    NotDialed,
    /// CLCC status 0 or `+COLP` / `CONNECT` while racing the audio capture.
    Answered,
    /// Status sequence on the signaling-only path.
    Signaling,
    Envelope(AudioPattern),
    Template(TemplateLabel),
    Transcript(TranscriptLabel),
    /// No detector concluded; the safe default was used.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub outcome: CallOutcome,
    #[serde(flatten)]
    pub by: DecidedBy,
}

impl Decision {
    pub fn new(outcome: CallOutcome, by: DecidedBy) -> Self {
        Self { outcome, by }
    }

    pub fn fallback(outcome: CallOutcome) -> Self {
        Self::new(outcome, DecidedBy::Fallback)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Dialing,
    Racing,
    Deciding,
    HangingUp,
    Done,
}

/// Call cadence in milliseconds. Polling intervals are part of detection accuracy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionTimings {
    /// Wait after `ATD` before monitoring starts.
    pub settle_ms: u64,
    /// Wait after the pre-dial `ATH`.
    pub pre_dial_pause_ms: u64,
    pub gsm_poll_interval_ms: u64,
    pub gsm_clcc_wait_ms: u64,
    /// Length of the monitor and the audio capture on the audio path.
    pub race_window_ms: u64,
    /// Hard bound on waiting for both racers; they are cancelled past it.
    pub race_join_ms: u64,
    pub fast_poll_window_ms: u64,
    pub fast_poll_clcc_wait_ms: u64,
    pub fast_poll_interval_ms: u64,
    /// Dialing followed by a drop within this range means no subscriber.
    pub no_answer_min_ms: u64,
    pub no_answer_max_ms: u64,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            settle_ms: 1_000,
            pre_dial_pause_ms: 1_000,
            gsm_poll_interval_ms: 500,
            gsm_clcc_wait_ms: 300,
            race_window_ms: 20_000,
            race_join_ms: 25_000,
            fast_poll_window_ms: 10_000,
            fast_poll_clcc_wait_ms: 500,
            fast_poll_interval_ms: 500,
            no_answer_min_ms: 1_000,
            no_answer_max_ms: 3_000,
        }
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Cooperative cancellation flag, polled by capture loops and workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one call needs, borrowed from the port worker that owns it.
pub struct CallSession<'a> {
    channel: &'a mut AtChannel,
    audio: Option<&'a mut dyn AudioSource>,
    timings: &'a SessionTimings,
    analysis: &'a AudioAnalysis,
    state: SessionState,
}

impl<'a> CallSession<'a> {
    pub fn new(
        channel: &'a mut AtChannel,
        audio: Option<&'a mut dyn AudioSource>,
        timings: &'a SessionTimings,
        analysis: &'a AudioAnalysis,
    ) -> Self {
        Self {
            channel,
            audio,
            timings,
            analysis,
            state: SessionState::Idle,
        }
    }

    /// Check one number. Never fails; errors and panics become the safe default.
    pub fn run(&mut self, phone: &str) -> Decision {
        self.state = SessionState::Idle;
        let carrier = carrier::classify(phone);
        let Some(strategy) = carrier.strategy() else {
            log_call(self.channel.port_id(), phone, "unknown carrier, not dialing");
            let decision = Decision::new(CallOutcome::NoSubscriber, DecidedBy::NotDialed);
            self.transition(phone, SessionState::Done);
            self.report(phone, carrier, decision);
            return decision;
        };
        let strategy = match strategy {
            DetectionStrategy::DualChannelAudio if self.audio.is_none() => {
                DetectionStrategy::FastPoll
            }
            other => other,
        };

        let attempt = panic::catch_unwind(AssertUnwindSafe(|| self.call(phone, strategy)));
        let decision = match attempt {
            Ok(Ok(decision)) => decision,
            Ok(Err(err)) => {
                log_call(
                    self.channel.port_id(),
                    phone,
                    &format!("call failed in {:?}: {err:#}", self.state),
                );
                Decision::fallback(fallback_outcome(&err))
            }
            Err(payload) => {
                log_port(
                    self.channel.port_id(),
                    &format!(
                        "call panicked in {:?}: {}",
                        self.state,
                        panic_payload_text(payload.as_ref())
                    ),
                );
                Decision::fallback(CallOutcome::Active)
            }
        };

        self.transition(phone, SessionState::HangingUp);
        if let Err(err) = self.channel.hang_up() {
            log_port(self.channel.port_id(), &format!("ATH failed: {err:#}"));
        }
        self.transition(phone, SessionState::Done);
        self.report(phone, carrier, decision);
        decision
    }

    fn call(&mut self, phone: &str, strategy: DetectionStrategy) -> Result<Decision> {
        if let Err(err) = self.channel.probe() {
            log_port(self.channel.port_id(), &format!("modem not ready: {err:#}"));
            return Ok(Decision::fallback(CallOutcome::NoSubscriber));
        }
        if let Err(err) = self.channel.hang_up() {
            log_port(self.channel.port_id(), &format!("pre-dial ATH failed: {err:#}"));
        }
        thread::sleep(ms(self.timings.pre_dial_pause_ms));

        self.transition(phone, SessionState::Dialing);
        let dialed = carrier::normalize_number(phone);
        if let Err(err) = self.channel.dial(&dialed) {
            return Err(CheckError::Connection {
                port: self.channel.port_id().to_string(),
                reason: format!("dial failed: {err:#}"),
            }
            .into());
        }
        thread::sleep(ms(self.timings.settle_ms));

        self.transition(phone, SessionState::Racing);
        match (strategy, self.audio.as_deref_mut()) {
            (DetectionStrategy::DualChannelAudio, Some(audio)) => {
                let verdict = race::run(self.channel, audio, self.timings)?;
                self.transition(phone, SessionState::Deciding);
                verdict.decide(phone, self.analysis)
            }
            _ => {
                let decision = monitor::fast_poll(self.channel, self.timings)?;
                self.transition(phone, SessionState::Deciding);
                Ok(decision)
            }
        }
    }

    fn transition(&mut self, phone: &str, next: SessionState) {
        self.state = next;
        tracing::info!(
            port = %self.channel.port_id(),
            phone = %phone,
            state = ?next,
            "session state"
        );
    }

    fn report(&self, phone: &str, carrier: CarrierClass, decision: Decision) {
        tracing::info!(
            port = %self.channel.port_id(),
            phone = %phone,
            carrier = carrier.label(),
            outcome = decision.outcome.label(),
            by = ?decision.by,
            "call decided"
        );
        log_call(
            self.channel.port_id(),
            phone,
            &format!("{carrier} call -> {} ({:?})", decision.outcome.label(), decision.by),
        );
    }
}

/// A modem that stopped answering means the number could not be reached; any other
/// failure fails open.
pub fn fallback_outcome(err: &anyhow::Error) -> CallOutcome {
    match find_check_error(err) {
        Some(check) if check.is_modem_silent() => CallOutcome::NoSubscriber,
        _ => CallOutcome::Active,
    }
}
