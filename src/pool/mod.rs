//! Modem bank: probes ports, deals numbers to one worker thread per port, and
//! streams one [`CheckResult`] per number back to the caller.
//!
//! Each worker opens its own port and runs its queue sequentially through
//! [`CallSession`]. A monitor thread folds results into [`Progress`] and forwards
//! them. Stopping takes effect at the next number boundary.

mod partition;
mod progress;

pub use partition::{partition, PortPlan};
pub use progress::{Progress, ProgressSnapshot};

use crate::audio::AudioSource;
use crate::carrier::{self, CarrierClass};
use crate::error::CheckError;
use crate::modem::AtChannel;
use crate::session::{
    AudioAnalysis, CallOutcome, CallSession, CancelToken, DecidedBy, Decision, SessionTimings,
};
use crate::{log_call, log_debug, log_port, panic_payload_text};
use anyhow::{bail, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Opens and prepares the modem on one port. Called on the worker's own thread.
pub type ModemOpener = Arc<dyn Fn(&str) -> Result<AtChannel> + Send + Sync>;

/// Result for one input number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub phone: String,
    pub carrier: CarrierClass,
    pub port: String,
    pub outcome: CallOutcome,
    #[serde(flatten)]
    pub decided_by: DecidedBy,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub timings: SessionTimings,
    /// Pause between consecutive calls on one port.
    pub call_pause: Duration,
    /// Send `AT+CFUN=1,1` to every opened modem when its worker finishes.
    pub reset_on_shutdown: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            timings: SessionTimings::default(),
            call_pause: Duration::from_secs(1),
            reset_on_shutdown: true,
        }
    }
}

/// Probe every candidate and keep the ones that answer, in candidate order.
/// Probes run in parallel; a failing port is logged and left out.
pub fn scan<F>(candidates: &[String], probe: F) -> Vec<String>
where
    F: Fn(&str) -> Result<()> + Sync,
{
    let probe = &probe;
    let results: Vec<(String, Result<()>)> = thread::scope(|scope| {
        let handles: Vec<_> = candidates
            .iter()
            .map(|port| (port, scope.spawn(move || probe(port))))
            .collect();
        handles
            .into_iter()
            .map(|(port, handle)| {
                let result = handle.join().unwrap_or_else(|payload| {
                    Err(CheckError::Connection {
                        port: port.clone(),
                        reason: format!("probe panicked: {}", panic_payload_text(payload.as_ref())),
                    }
                    .into())
                });
                (port.clone(), result)
            })
            .collect()
    });

    let mut usable = Vec::new();
    for (port, result) in results {
        match result {
            Ok(()) => usable.push(port),
            Err(err) => log_port(&port, &format!("excluded by scan: {err:#}")),
        }
    }
    tracing::info!(
        candidates = candidates.len(),
        usable = usable.len(),
        "port scan finished"
    );
    usable
}

/// Usable ports plus everything a worker needs to check numbers on them.
pub struct PortPool {
    ports: Vec<String>,
    opener: ModemOpener,
    settings: Arc<PoolSettings>,
    analysis: Arc<AudioAnalysis>,
    audio: Option<(String, Box<dyn AudioSource>)>,
}

impl PortPool {
    pub fn new(
        ports: Vec<String>,
        opener: ModemOpener,
        settings: PoolSettings,
        analysis: AudioAnalysis,
    ) -> Result<Self> {
        if ports.is_empty() {
            bail!("no usable modem ports");
        }
        Ok(Self {
            ports,
            opener,
            settings: Arc::new(settings),
            analysis: Arc::new(analysis),
            audio: None,
        })
    }

    /// Attach the audio source to `port`, which then takes every audio-checked number.
    pub fn with_audio(mut self, port: &str, source: Box<dyn AudioSource>) -> Result<Self> {
        if !self.ports.iter().any(|p| p == port) {
            bail!("audio port {port} is not among the usable ports");
        }
        self.audio = Some((port.to_string(), source));
        Ok(self)
    }

    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    pub fn audio_port(&self) -> Option<&str> {
        self.audio.as_ref().map(|(port, _)| port.as_str())
    }

    /// Start checking `numbers`. Results stream from [`PoolRun::results`] until every
    /// worker has finished.
    pub fn start(self, numbers: Vec<String>) -> PoolRun {
        self.start_with(numbers, spawn_worker)
    }

    fn start_with<S>(self, numbers: Vec<String>, spawn: S) -> PoolRun
    where
        S: Fn(String, Worker) -> io::Result<JoinHandle<()>>,
    {
        let total = numbers.len();
        let plans = partition(&numbers, &self.ports, self.audio_port());
        let progress = Arc::new(Progress::new(total));
        let stop = CancelToken::new();
        let capacity = total.max(1);
        let (worker_tx, worker_rx) = bounded::<CheckResult>(capacity);
        let (result_tx, result_rx) = bounded::<CheckResult>(capacity);

        let mut audio = self.audio.map(|(_, source)| source);
        let mut workers = Vec::new();
        for plan in plans {
            if plan.numbers.is_empty() {
                continue;
            }
            log_port(
                &plan.port,
                &format!(
                    "assigned {} numbers{}",
                    plan.numbers.len(),
                    if plan.audio { " (audio)" } else { "" }
                ),
            );
            let worker = Worker {
                source: if plan.audio { audio.take() } else { None },
                plan,
                opener: Arc::clone(&self.opener),
                settings: Arc::clone(&self.settings),
                analysis: Arc::clone(&self.analysis),
                results: worker_tx.clone(),
                stop: stop.clone(),
            };
            let port = worker.plan.port.clone();
            let pending = worker.plan.numbers.clone();
            match spawn(format!("port-{port}"), worker) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    log_port(&port, &format!("worker thread failed to start: {err}"));
                    report_fallback(&worker_tx, &port, &pending);
                }
            }
        }
        drop(worker_tx);

        let monitor = {
            let progress = Arc::clone(&progress);
            thread::spawn(move || monitor_results(worker_rx, result_tx, &progress))
        };

        PoolRun {
            results: result_rx,
            progress,
            stop,
            workers,
            monitor: Some(monitor),
        }
    }
}

/// Handle on a started pool.
pub struct PoolRun {
    results: Receiver<CheckResult>,
    progress: Arc<Progress>,
    stop: CancelToken,
    workers: Vec<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl PoolRun {
    /// Disconnects once every worker has finished.
    pub fn results(&self) -> &Receiver<CheckResult> {
        &self.results
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Workers finish their current call and take no further numbers.
    pub fn stop(&self) {
        log_debug("pool: stop requested");
        self.stop.cancel();
    }

    /// Wait for every worker, then return the final counters.
    pub fn join(mut self) -> ProgressSnapshot {
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if let Err(payload) = handle.join() {
                log_debug(&format!(
                    "pool: {name} panicked: {}",
                    panic_payload_text(payload.as_ref())
                ));
            }
        }
        if let Some(handle) = self.monitor.take() {
            if let Err(payload) = handle.join() {
                log_debug(&format!(
                    "pool: monitor panicked: {}",
                    panic_payload_text(payload.as_ref())
                ));
            }
        }
        self.progress.snapshot()
    }
}

fn monitor_results(rx: Receiver<CheckResult>, tx: Sender<CheckResult>, progress: &Progress) {
    for result in rx {
        let snapshot = progress.record(result.outcome);
        tracing::info!(
            port = %result.port,
            outcome = result.outcome.label(),
            checked = snapshot.checked,
            total = snapshot.total,
            "pool progress"
        );
        // A caller that dropped the receiver still gets final counts from `join`.
        let _ = tx.send(result);
    }
    log_debug(&format!("pool: all workers finished: {:?}", progress.snapshot()));
}

struct Worker {
    plan: PortPlan,
    source: Option<Box<dyn AudioSource>>,
    opener: ModemOpener,
    settings: Arc<PoolSettings>,
    analysis: Arc<AudioAnalysis>,
    results: Sender<CheckResult>,
    stop: CancelToken,
}

impl Worker {
    fn run(mut self) {
        let port = self.plan.port.clone();
        let mut channel = match (self.opener)(&port) {
            Ok(channel) => channel,
            Err(err) => {
                log_port(&port, &format!("failed to open: {err:#}"));
                report_fallback(&self.results, &port, &self.plan.numbers);
                return;
            }
        };

        let numbers = std::mem::take(&mut self.plan.numbers);
        for (index, phone) in numbers.iter().enumerate() {
            if index > 0 && !self.stop.is_cancelled() {
                thread::sleep(self.settings.call_pause);
            }
            if self.stop.is_cancelled() {
                log_port(
                    &port,
                    &format!("stopping with {} numbers left", numbers.len() - index),
                );
                break;
            }
            let started = Instant::now();
            let audio: Option<&mut dyn AudioSource> = match self.source.as_mut() {
                Some(source) => Some(&mut **source),
                None => None,
            };
            let decision = CallSession::new(
                &mut channel,
                audio,
                &self.settings.timings,
                &self.analysis,
            )
            .run(phone);
            if !self.send(phone, &port, decision, started) {
                break;
            }
        }

        if self.settings.reset_on_shutdown {
            if let Err(err) = channel.factory_reset() {
                log_port(&port, &format!("reset failed: {err:#}"));
            }
        }
    }

    fn send(&self, phone: &str, port: &str, decision: Decision, started: Instant) -> bool {
        send_result(&self.results, phone, port, decision, started)
    }
}

fn spawn_worker(name: String, worker: Worker) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(move || worker.run())
}

/// Numbers whose port never ran still get one NoSubscriber result each.
fn report_fallback(results: &Sender<CheckResult>, port: &str, numbers: &[String]) {
    for phone in numbers {
        let decision = Decision::fallback(CallOutcome::NoSubscriber);
        if !send_result(results, phone, port, decision, Instant::now()) {
            break;
        }
    }
}

fn send_result(
    results: &Sender<CheckResult>,
    phone: &str,
    port: &str,
    decision: Decision,
    started: Instant,
) -> bool {
    let result = CheckResult {
        phone: phone.to_string(),
        carrier: carrier::classify(phone),
        port: port.to_string(),
        outcome: decision.outcome,
        decided_by: decision.by,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    log_call(port, phone, &format!("result {}", decision.outcome.label()));
    results.send(result).is_ok()
}
