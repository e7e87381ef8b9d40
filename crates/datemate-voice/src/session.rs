//! **ConversationSession**: the async driver around `SessionMachine`.
//!
//! One actor task owns the machine, the capture source, every timer and the
//! in-flight adapter task. Callers talk to it through a `SessionHandle`;
//! adapters report back over channels, never through a reference to the
//! session. The actor exits on `Ended`, dropping its timers with it.

use crate::capture::{CaptureSignal, CaptureSink, SpeechCaptureSource};
use crate::error::{SessionError, VoiceError, VoiceResult};
use crate::generator::ResponseGenerator;
use crate::machine::{EndedBy, Effect, SessionConfig, SessionEvent, SessionMachine};
use crate::scoring::{ScoreReport, ScoringStage};
use crate::state::{DegradedReason, SessionState};
use crate::synthesizer::SpeechSynthesizer;
use crate::turn::Turn;
use datemate_core::{DateConfig, Persona};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

/// What a finished session hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub turns: Vec<Turn>,
    pub report: ScoreReport,
    pub degraded: Option<DegradedReason>,
    pub ended_by: EndedBy,
}

enum Command {
    Start(oneshot::Sender<Result<(), SessionError>>),
    Stop(oneshot::Sender<()>),
}

enum TaskResult {
    Generated { ticket: u64, result: VoiceResult<String> },
    Spoken { ticket: u64, result: VoiceResult<()> },
}

enum Input {
    Command(Option<Command>),
    Capture(CaptureSignal),
    Task(TaskResult),
    Tick,
    Settled(u64),
}

struct SettleTimer {
    ticket: u64,
    sleep: Pin<Box<Sleep>>,
}

/// A mock date ready to run.
pub struct ConversationSession<C: SpeechCaptureSource + 'static> {
    machine: SessionMachine,
    capture: C,
    generator: Arc<dyn ResponseGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    scoring: ScoringStage,
}

impl<C: SpeechCaptureSource + 'static> ConversationSession<C> {
    pub fn new(
        persona: &Persona,
        config: &DateConfig,
        capture: C,
        generator: Arc<dyn ResponseGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        scoring: ScoringStage,
    ) -> Self {
        Self {
            machine: SessionMachine::new(SessionConfig::from(config), persona.system_prompt()),
            capture,
            generator,
            synthesizer,
            scoring,
        }
    }

    /// Start the session actor. The session stays `Idle` until `start()`.
    pub fn spawn(self) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(self.machine.state().clone());
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let driver = Driver {
            machine: self.machine,
            capture: self.capture,
            generator: self.generator,
            synthesizer: self.synthesizer,
            scoring: self.scoring,
            cmd_rx,
            cmd_open: true,
            capture_tx,
            capture_rx,
            results_tx,
            results_rx,
            events_tx,
            state_tx,
            outcome_tx,
            countdown: None,
            settle: None,
            inflight: None,
            finished: None,
        };
        tokio::spawn(driver.run());

        let handle = SessionHandle {
            commands: cmd_tx,
            state: state_rx,
            outcome: outcome_rx,
        };
        (handle, events_rx)
    }
}

/// Control surface of a running session. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    outcome: watch::Receiver<Option<SessionOutcome>>,
}

impl SessionHandle {
    /// Begin the date. Returns once capture is running (or failed to start).
    /// A no-op while already active.
    pub async fn start(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Start(tx))
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())?
    }

    /// End the date now. Safe to call repeatedly or after the session ended.
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Stop(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Wait for the session to end and return its outcome.
    pub async fn wait(&self) -> Result<SessionOutcome, SessionError> {
        let mut outcome = self.outcome.clone();
        let done = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| self.closed())?;
        done.clone().ok_or_else(|| self.closed())
    }

    fn closed(&self) -> SessionError {
        SessionError::new(self.state.borrow().phase, VoiceError::SessionClosed)
    }
}

struct Driver<C: SpeechCaptureSource> {
    machine: SessionMachine,
    capture: C,
    generator: Arc<dyn ResponseGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    scoring: ScoringStage,

    cmd_rx: mpsc::Receiver<Command>,
    cmd_open: bool,
    capture_tx: mpsc::UnboundedSender<CaptureSignal>,
    capture_rx: mpsc::UnboundedReceiver<CaptureSignal>,
    results_tx: mpsc::UnboundedSender<TaskResult>,
    results_rx: mpsc::UnboundedReceiver<TaskResult>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
    outcome_tx: watch::Sender<Option<SessionOutcome>>,

    countdown: Option<Interval>,
    settle: Option<SettleTimer>,
    inflight: Option<JoinHandle<()>>,
    finished: Option<EndedBy>,
}

impl<C: SpeechCaptureSource + 'static> Driver<C> {
    async fn run(mut self) {
        debug!("Session actor started");
        loop {
            let input = tokio::select! {
                cmd = self.cmd_rx.recv(), if self.cmd_open => Input::Command(cmd),
                Some(signal) = self.capture_rx.recv() => Input::Capture(signal),
                Some(result) = self.results_rx.recv() => Input::Task(result),
                _ = next_tick(&mut self.countdown) => Input::Tick,
                ticket = settle_elapsed(&mut self.settle) => Input::Settled(ticket),
            };

            match input {
                Input::Command(Some(Command::Start(reply))) => {
                    let result = match self.machine.on_start() {
                        Ok(effects) => self.apply(effects).await,
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(result);
                }
                Input::Command(Some(Command::Stop(reply))) => {
                    let effects = self.machine.on_stop();
                    self.apply_infallible(effects).await;
                    let _ = reply.send(());
                }
                Input::Command(None) => {
                    // every handle dropped: an active date still runs out its timer
                    self.cmd_open = false;
                    if !self.machine.phase().is_active() {
                        debug!("All handles dropped before start, closing session");
                        break;
                    }
                }
                Input::Capture(signal) => {
                    let effects = self.machine.on_capture(signal);
                    self.apply_infallible(effects).await;
                }
                Input::Task(TaskResult::Generated { ticket, result }) => {
                    let effects = self.machine.on_generation(ticket, result);
                    self.apply_infallible(effects).await;
                }
                Input::Task(TaskResult::Spoken { ticket, result }) => {
                    let effects = self.machine.on_synthesis(ticket, result);
                    self.apply_infallible(effects).await;
                }
                Input::Tick => {
                    let effects = self.machine.on_tick();
                    self.apply_infallible(effects).await;
                }
                Input::Settled(ticket) => {
                    self.settle = None;
                    let effects = self.machine.on_cooldown_elapsed(ticket);
                    self.apply_infallible(effects).await;
                }
            }

            if let Some(ended_by) = self.finished {
                self.finish(ended_by);
                break;
            }
        }
        self.stop_timers();
        debug!("Session actor exited");
    }

    async fn apply_infallible(&mut self, effects: Vec<Effect>) {
        if let Err(e) = self.apply(effects).await {
            warn!("Unexpected session error: {}", e);
        }
    }

    /// Carry out effects in order. Capture acquisition is awaited inline, so no
    /// other input is processed while the device is being opened.
    async fn apply(&mut self, effects: Vec<Effect>) -> Result<(), SessionError> {
        let mut queue: VecDeque<Effect> = effects.into();
        let mut outcome = Ok(());

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::AcquireCapture { ticket } => {
                    let sink = CaptureSink::new(ticket, self.capture_tx.clone());
                    let result = self.capture.start(sink).await;
                    match self.machine.on_capture_acquired(ticket, result) {
                        Ok(more) => queue.extend(more),
                        Err(e) => outcome = Err(e),
                    }
                }
                Effect::ReleaseCapture => self.capture.stop().await,
                Effect::Generate { ticket, request } => {
                    let generator = Arc::clone(&self.generator);
                    let tx = self.results_tx.clone();
                    self.spawn_task(async move {
                        let result = generator.generate(&request).await;
                        let _ = tx.send(TaskResult::Generated { ticket, result });
                    });
                }
                Effect::Speak { ticket, text } => {
                    let synthesizer = Arc::clone(&self.synthesizer);
                    let tx = self.results_tx.clone();
                    self.spawn_task(async move {
                        let result = synthesizer.speak(&text).await;
                        let _ = tx.send(TaskResult::Spoken { ticket, result });
                    });
                }
                Effect::Settle { ticket, delay } => {
                    debug!("Settling for {:?}", delay);
                    self.settle = Some(SettleTimer {
                        ticket,
                        sleep: Box::pin(tokio::time::sleep(delay)),
                    });
                }
                Effect::StartCountdown => {
                    let tick = self.machine.config().tick;
                    let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.countdown = Some(interval);
                }
                Effect::StopTimers => self.stop_timers(),
                Effect::Emit(event) => {
                    // observers reading a snapshot on an event see the state that produced it
                    self.state_tx.send_replace(self.machine.state().clone());
                    let _ = self.events_tx.send(event);
                }
                Effect::Finish(ended_by) => self.finished = Some(ended_by),
            }
        }

        self.state_tx.send_replace(self.machine.state().clone());
        outcome
    }

    fn spawn_task<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(previous) = self.inflight.replace(tokio::spawn(task)) {
            previous.abort();
        }
    }

    fn stop_timers(&mut self) {
        self.countdown = None;
        self.settle = None;
        if let Some(task) = self.inflight.take() {
            task.abort();
        }
    }

    fn finish(&mut self, ended_by: EndedBy) {
        let state = self.machine.state();
        let report = self.scoring.score(&state.turns);
        info!(
            "🏁 Mock date ended ({:?}) after {} turns",
            ended_by,
            state.turns.len()
        );
        let outcome = SessionOutcome {
            turns: state.turns.clone(),
            report,
            degraded: state.degraded,
            ended_by,
        };
        self.state_tx.send_replace(state.clone());
        self.outcome_tx.send_replace(Some(outcome));
    }
}

async fn next_tick(countdown: &mut Option<Interval>) {
    match countdown {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn settle_elapsed(settle: &mut Option<SettleTimer>) -> u64 {
    match settle {
        Some(timer) => {
            timer.sleep.as_mut().await;
            timer.ticket
        }
        None => std::future::pending::<u64>().await,
    }
}
