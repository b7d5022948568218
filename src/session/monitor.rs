use super::{ms, CallOutcome, CancelToken, DecidedBy, Decision, SessionTimings};
use crate::log_port;
use crate::modem::{AnswerSignal, AtChannel, ClccStatus};
use anyhow::Result;
use std::thread;
use std::time::{Duration, Instant};

/// Why the monitor believes the far end picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerEvidence {
    ClccActive,
    Signal(AnswerSignal),
}

/// Signaling-only decision from a sequence of CLCC statuses.
///
/// Alerting or an answer means the line is live. Dialing that drops to disconnected
/// between `no_answer_min` and `no_answer_max` later is the network rejecting the
/// call. Any other drop is treated as live; a window with no alerting is not.
#[derive(Debug, Clone)]
pub struct FastPollTracker {
    no_answer_min: Duration,
    no_answer_max: Duration,
    dialing_since: Option<Duration>,
}

impl FastPollTracker {
    pub fn new(timings: &SessionTimings) -> Self {
        Self {
            no_answer_min: ms(timings.no_answer_min_ms),
            no_answer_max: ms(timings.no_answer_max_ms),
            dialing_since: None,
        }
    }

    /// Feed one poll taken `at` after monitoring started.
    pub fn observe(&mut self, at: Duration, status: Option<u8>) -> Option<CallOutcome> {
        match status.and_then(ClccStatus::from_code)? {
            ClccStatus::Active | ClccStatus::Alerting => Some(CallOutcome::Active),
            ClccStatus::Dialing => {
                self.dialing_since.get_or_insert(at);
                None
            }
            ClccStatus::Disconnected => {
                let rejected = self.dialing_since.is_some_and(|since| {
                    let dropped_after = at.saturating_sub(since);
                    (self.no_answer_min..=self.no_answer_max).contains(&dropped_after)
                });
                Some(if rejected {
                    CallOutcome::NoSubscriber
                } else {
                    CallOutcome::Active
                })
            }
            ClccStatus::Held | ClccStatus::Incoming | ClccStatus::Waiting => None,
        }
    }

    /// The window ran out without alerting.
    pub fn timed_out(&self) -> CallOutcome {
        CallOutcome::NoSubscriber
    }
}

/// Poll CLCC at the fast cadence until the tracker decides or the window ends.
pub(super) fn fast_poll(channel: &mut AtChannel, timings: &SessionTimings) -> Result<Decision> {
    let window = ms(timings.fast_poll_window_ms);
    let wait = ms(timings.fast_poll_clcc_wait_ms);
    let interval = ms(timings.fast_poll_interval_ms);
    let mut tracker = FastPollTracker::new(timings);
    let started = Instant::now();

    while started.elapsed() < window {
        let poll = channel.poll_call_status(wait)?;
        if poll.answer.is_some() {
            return Ok(Decision::new(CallOutcome::Active, DecidedBy::Signaling));
        }
        if let Some(outcome) = tracker.observe(started.elapsed(), poll.status) {
            return Ok(Decision::new(outcome, DecidedBy::Signaling));
        }
        thread::sleep(interval);
    }
    log_port(channel.port_id(), &format!("no alerting within {window:?}"));
    Ok(Decision::new(tracker.timed_out(), DecidedBy::Signaling))
}

/// Watches call signaling while the audio is being captured.
pub struct GsmMonitor<'a> {
    channel: &'a mut AtChannel,
    timings: &'a SessionTimings,
}

impl<'a> GsmMonitor<'a> {
    pub fn new(channel: &'a mut AtChannel, timings: &'a SessionTimings) -> Self {
        Self { channel, timings }
    }

    /// Poll until an answer, the race window, or cancellation. On an answer the
    /// token is cancelled and the call is hung up before returning.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<Option<AnswerEvidence>> {
        let window = ms(self.timings.race_window_ms);
        let wait = ms(self.timings.gsm_clcc_wait_ms);
        let interval = ms(self.timings.gsm_poll_interval_ms);
        let started = Instant::now();

        while started.elapsed() < window && !cancel.is_cancelled() {
            let poll = self.channel.poll_call_status(wait)?;
            let evidence = match (poll.status, poll.answer) {
                (Some(0), _) => Some(AnswerEvidence::ClccActive),
                (_, Some(signal)) => Some(AnswerEvidence::Signal(signal)),
                _ => None,
            };
            if let Some(evidence) = evidence {
                cancel.cancel();
                log_port(
                    self.channel.port_id(),
                    &format!("answered ({evidence:?}) after {:?}", started.elapsed()),
                );
                if let Err(err) = self.channel.hang_up() {
                    log_port(self.channel.port_id(), &format!("ATH after answer failed: {err:#}"));
                }
                return Ok(Some(evidence));
            }
            thread::sleep(interval);
        }
        Ok(None)
    }
}
