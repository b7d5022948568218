use super::monitor::{AnswerEvidence, GsmMonitor};
use super::{ms, AudioAnalysis, CallOutcome, CancelToken, DecidedBy, Decision, SessionTimings};
use crate::audio::{AudioSource, CaptureOutcome, CapturedAudio};
use crate::modem::AtChannel;
use crate::{lock_or_recover, log_port, panic_payload_text};
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

enum Slot {
    Answered(AnswerEvidence),
    Audio(CapturedAudio),
}

/// Shared result of the two racers. An answer replaces captured audio; captured
/// audio never replaces an answer.
#[derive(Default)]
pub(super) struct ResultSlot {
    inner: Mutex<Option<Slot>>,
}

impl ResultSlot {
    fn answered(&self, evidence: AnswerEvidence) {
        *lock_or_recover(&self.inner, "race slot") = Some(Slot::Answered(evidence));
    }

    fn offer_audio(&self, audio: CapturedAudio) -> bool {
        let mut slot = lock_or_recover(&self.inner, "race slot");
        if slot.is_some() {
            return false;
        }
        *slot = Some(Slot::Audio(audio));
        true
    }

    fn take(&self) -> Option<Slot> {
        lock_or_recover(&self.inner, "race slot").take()
    }
}

/// What the race left for the Deciding state.
pub(super) enum RaceVerdict {
    Answered(AnswerEvidence),
    Audio(CapturedAudio),
    /// Monitor window ended without an answer and no audio completed.
    Undecided,
}

impl RaceVerdict {
    pub(super) fn decide(self, phone: &str, analysis: &AudioAnalysis) -> Result<Decision> {
        match self {
            RaceVerdict::Answered(_) => Ok(Decision::new(CallOutcome::Active, DecidedBy::Answered)),
            RaceVerdict::Audio(audio) => analysis.decide(phone, &audio),
            RaceVerdict::Undecided => Ok(Decision::fallback(CallOutcome::Active)),
        }
    }
}

/// Signals the waiting thread when a racer exits, including by panic.
struct Finished<'a>(&'a Sender<()>);

impl Drop for Finished<'_> {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

/// Run the call-status monitor against the audio capture and wait for both, at most
/// `race_join_ms`; past that both are cancelled and joined.
pub(super) fn run(
    channel: &mut AtChannel,
    audio: &mut dyn AudioSource,
    timings: &SessionTimings,
) -> Result<RaceVerdict> {
    let port = channel.port_id().to_string();
    let source = audio.name();
    let window = ms(timings.race_window_ms);
    let join_deadline = Instant::now() + ms(timings.race_join_ms);

    let cancel = CancelToken::new();
    let slot = ResultSlot::default();
    let (done_tx, done_rx) = bounded::<()>(2);

    let (gsm, capture) = thread::scope(|scope| {
        let (cancel, slot, done_tx, port) = (&cancel, &slot, &done_tx, port.as_str());

        let gsm = scope.spawn(move || {
            let _finished = Finished(done_tx);
            let result = GsmMonitor::new(channel, timings).run(cancel);
            if let Ok(Some(evidence)) = &result {
                slot.answered(*evidence);
            }
            result
        });

        let capture = scope.spawn(move || {
            let _finished = Finished(done_tx);
            match audio.capture(window, &|| cancel.is_cancelled())? {
                CaptureOutcome::Completed(captured) if !cancel.is_cancelled() => {
                    if !slot.offer_audio(captured) {
                        log_port(port, "audio completed after the call was answered");
                    }
                }
                // Partial audio from a cancelled capture is never classified.
                CaptureOutcome::Completed(_) | CaptureOutcome::Cancelled => {}
            }
            Ok::<(), anyhow::Error>(())
        });

        for _ in 0..2 {
            if done_rx.recv_deadline(join_deadline).is_err() {
                log_port(port, "race join timed out; cancelling");
                cancel.cancel();
                break;
            }
        }
        (gsm.join(), capture.join())
    });

    match gsm {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => log_port(&port, &format!("call monitor failed: {err:#}")),
        Err(payload) => log_port(
            &port,
            &format!("call monitor panicked: {}", panic_payload_text(payload.as_ref())),
        ),
    }
    let capture = match capture {
        Ok(result) => result,
        Err(payload) => Err(anyhow!(
            "audio capture panicked: {}",
            panic_payload_text(payload.as_ref())
        )),
    };

    match slot.take() {
        Some(Slot::Answered(evidence)) => Ok(RaceVerdict::Answered(evidence)),
        Some(Slot::Audio(audio)) => Ok(RaceVerdict::Audio(audio)),
        None => match capture {
            Ok(()) => Ok(RaceVerdict::Undecided),
            Err(err) => {
                log_port(&port, &format!("capture from {source} failed: {err:#}"));
                Err(err)
            }
        },
    }
}
