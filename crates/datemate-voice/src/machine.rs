//! The turn-taking state machine, free of I/O.
//!
//! `SessionMachine` consumes inputs (commands, capture signals, adapter results,
//! timer firings) and returns the `Effect`s the driver must carry out. Every
//! asynchronous operation it requests carries a ticket; a result is applied only
//! if its ticket is the one the machine is waiting on in the matching phase.
//! Anything else is stale and dropped, which is what keeps `turns` frozen after
//! `Ended` and prevents a slow reply from landing in a later round.

use crate::capture::{CaptureEvent, CaptureSignal};
use crate::error::{SessionError, VoiceError, VoiceResult};
use crate::generator::GenerationRequest;
use crate::state::{ActivePhase, DegradedReason, Phase, SessionState};
use crate::turn::{recent_history, Speaker, Turn};
use datemate_core::DateConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timing and request knobs the machine needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub duration: Duration,
    pub tick: Duration,
    pub settle_base: Duration,
    pub settle_per_char: Duration,
    pub history_exchanges: usize,
    pub max_tokens: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&DateConfig::default())
    }
}

impl From<&DateConfig> for SessionConfig {
    fn from(cfg: &DateConfig) -> Self {
        Self {
            duration: cfg.session.duration(),
            tick: cfg.session.tick(),
            settle_base: Duration::from_millis(cfg.pacing.settle_base_ms),
            settle_per_char: Duration::from_millis(cfg.pacing.settle_per_char_ms),
            history_exchanges: cfg.generation.history_exchanges,
            max_tokens: cfg.generation.max_tokens,
        }
    }
}

impl SessionConfig {
    /// Pause after a reply: base + per-character time.
    pub fn settle_delay(&self, reply: &str) -> Duration {
        let chars = u32::try_from(reply.chars().count()).unwrap_or(u32::MAX);
        self.settle_base
            .saturating_add(self.settle_per_char.saturating_mul(chars))
    }
}

/// How a session reached `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndedBy {
    Timer,
    User,
    /// The input device went away while resuming capture.
    CaptureLost,
}

/// Observable notifications, in the order the machine produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged { from: Phase, to: Phase },
    TranscriptUpdated(String),
    TurnRecorded(Turn),
    CountdownTick(Duration),
    Degraded(DegradedReason),
    /// A user turn got no agent reply this round.
    ReplySkipped(SessionError),
    /// Capture could not be resumed; the session ends right after.
    CaptureLost(SessionError),
    Ended(EndedBy),
}

/// Work requested from the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start capture, reporting with `ticket`, then call `on_capture_acquired`.
    AcquireCapture { ticket: u64 },
    ReleaseCapture,
    Generate { ticket: u64, request: GenerationRequest },
    Speak { ticket: u64, text: String },
    /// Call `on_cooldown_elapsed(ticket)` after `delay`.
    Settle { ticket: u64, delay: Duration },
    StartCountdown,
    /// Drop the countdown and settle timers and abort in-flight adapter calls.
    StopTimers,
    Emit(SessionEvent),
    Finish(EndedBy),
}

#[derive(Debug)]
pub struct SessionMachine {
    config: SessionConfig,
    system_prompt: String,
    state: SessionState,
    next_ticket: u64,
    pending: Option<u64>,
    ended_by: Option<EndedBy>,
}

impl SessionMachine {
    pub fn new(config: SessionConfig, system_prompt: impl Into<String>) -> Self {
        let state = SessionState::new(config.duration);
        Self {
            config,
            system_prompt: system_prompt.into(),
            state,
            next_ticket: 0,
            pending: None,
            ended_by: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn ended_by(&self) -> Option<EndedBy> {
        self.ended_by
    }

    /// Ticket of the operation currently awaited, if any.
    pub fn pending_ticket(&self) -> Option<u64> {
        self.pending
    }

    /// Explicit start. A no-op while starting or active.
    pub fn on_start(&mut self) -> Result<Vec<Effect>, SessionError> {
        match self.state.phase {
            Phase::Ended => Err(SessionError::new(Phase::Ended, VoiceError::SessionClosed)),
            Phase::Active(_) => {
                debug!("Start ignored, session already active");
                Ok(Vec::new())
            }
            Phase::Idle if self.pending.is_some() => Ok(Vec::new()),
            Phase::Idle => {
                let ticket = self.issue();
                Ok(vec![Effect::AcquireCapture { ticket }])
            }
        }
    }

    /// Result of an `AcquireCapture`. Failing the very first acquisition is
    /// returned to the caller and leaves the session `Idle`; failing a later one
    /// ends the session.
    pub fn on_capture_acquired(
        &mut self,
        ticket: u64,
        result: VoiceResult<()>,
    ) -> Result<Vec<Effect>, SessionError> {
        let mut fx = Vec::new();
        if self.pending != Some(ticket) {
            debug!("Stale capture acquisition (ticket {})", ticket);
            if result.is_ok() {
                fx.push(Effect::ReleaseCapture);
            }
            return Ok(fx);
        }

        match (self.state.phase, result) {
            (Phase::Idle, Ok(())) => {
                info!("💬 Mock date started ({}s)", self.config.duration.as_secs());
                self.state.remaining = self.config.duration;
                self.state.transcript.clear();
                fx.push(Effect::StartCountdown);
                self.enter(Phase::Active(ActivePhase::Listening), &mut fx);
            }
            (Phase::Idle, Err(e)) => {
                warn!("Cannot start session: {}", e);
                self.pending = None;
                return Err(SessionError::new(Phase::Idle, e));
            }
            (Phase::Active(ActivePhase::Listening), Ok(())) => {}
            (Phase::Active(ActivePhase::Listening), Err(e)) => {
                warn!("Capture lost while resuming: {}", e);
                let lost = SessionError::new(self.state.phase, e);
                fx.push(Effect::Emit(SessionEvent::CaptureLost(lost)));
                self.end(EndedBy::CaptureLost, &mut fx);
            }
            (phase, _) => debug!("Capture acquisition ignored in {}", phase),
        }
        Ok(fx)
    }

    pub fn on_capture(&mut self, signal: CaptureSignal) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.is_current(ActivePhase::Listening, signal.ticket) {
            debug!("Stale capture signal (ticket {})", signal.ticket);
            return fx;
        }

        match signal.event {
            CaptureEvent::TranscriptUpdated(text) => {
                if text != self.state.transcript {
                    self.state.transcript = text.clone();
                    fx.push(Effect::Emit(SessionEvent::TranscriptUpdated(text)));
                }
            }
            CaptureEvent::UtteranceFinal(text) => {
                let text = text.trim().to_string();
                if text.is_empty() || text == self.state.last_utterance_text {
                    debug!("Ignoring empty or repeated utterance {:?}", text);
                    self.listen(&mut fx);
                    return fx;
                }

                self.state.last_utterance_text = text.clone();
                let turn = Turn::user(text.clone());
                self.state.turns.push(turn.clone());
                fx.push(Effect::Emit(SessionEvent::TurnRecorded(turn)));

                let request = GenerationRequest {
                    system_prompt: self.system_prompt.clone(),
                    history: recent_history(&self.state.turns, self.config.history_exchanges),
                    utterance: text,
                    max_tokens: self.config.max_tokens,
                };
                self.enter(Phase::Active(ActivePhase::Generating), &mut fx);
                let ticket = self.issue();
                fx.push(Effect::Generate { ticket, request });
            }
        }
        fx
    }

    pub fn on_generation(&mut self, ticket: u64, result: VoiceResult<String>) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.is_current(ActivePhase::Generating, ticket) {
            debug!("Stale generation result (ticket {})", ticket);
            return fx;
        }

        let reply = match result {
            Ok(reply) => reply.trim().to_string(),
            Err(e) => {
                warn!("Reply skipped: {}", e);
                let skipped = SessionError::new(self.state.phase, e);
                fx.push(Effect::Emit(SessionEvent::ReplySkipped(skipped)));
                self.listen(&mut fx);
                return fx;
            }
        };
        if reply.is_empty() {
            let skipped = SessionError::new(self.state.phase, VoiceError::EmptyReply);
            fx.push(Effect::Emit(SessionEvent::ReplySkipped(skipped)));
            self.listen(&mut fx);
            return fx;
        }

        let turn = Turn::agent(reply.clone());
        self.state.turns.push(turn.clone());
        fx.push(Effect::Emit(SessionEvent::TurnRecorded(turn)));
        self.enter(Phase::Active(ActivePhase::Speaking), &mut fx);

        if self.state.is_text_only() {
            debug!("Text-only mode, skipping synthesis");
            self.cooldown(&mut fx);
        } else {
            let ticket = self.issue();
            fx.push(Effect::Speak { ticket, text: reply });
        }
        fx
    }

    pub fn on_synthesis(&mut self, ticket: u64, result: VoiceResult<()>) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.is_current(ActivePhase::Speaking, ticket) {
            debug!("Stale synthesis result (ticket {})", ticket);
            return fx;
        }

        if let Err(e) = result {
            let reason = match e {
                VoiceError::SynthesisQuotaExceeded => DegradedReason::QuotaExceeded,
                _ => DegradedReason::SynthesisUnavailable,
            };
            warn!("Synthesis failed ({}), continuing degraded", e);
            // quota is the stronger condition and is never downgraded
            let upgrade = match self.state.degraded {
                None => true,
                Some(DegradedReason::SynthesisUnavailable) => reason == DegradedReason::QuotaExceeded,
                Some(DegradedReason::QuotaExceeded) => false,
            };
            if upgrade {
                self.state.degraded = Some(reason);
                fx.push(Effect::Emit(SessionEvent::Degraded(reason)));
            }
        }
        self.cooldown(&mut fx);
        fx
    }

    pub fn on_cooldown_elapsed(&mut self, ticket: u64) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.is_current(ActivePhase::Cooldown, ticket) {
            debug!("Stale settle timer (ticket {})", ticket);
            return fx;
        }
        self.listen(&mut fx);
        fx
    }

    /// One countdown tick. Reaching zero ends the session in the same step.
    pub fn on_tick(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.state.phase.is_active() {
            return fx;
        }
        self.state.remaining = self.state.remaining.saturating_sub(self.config.tick);
        fx.push(Effect::Emit(SessionEvent::CountdownTick(self.state.remaining)));
        if self.state.remaining.is_zero() {
            info!("⏰ Time is up");
            self.end(EndedBy::Timer, &mut fx);
        }
        fx
    }

    pub fn on_stop(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.state.phase.is_ended() {
            return fx;
        }
        info!("Session stopped by user");
        self.end(EndedBy::User, &mut fx);
        fx
    }

    fn issue(&mut self) -> u64 {
        self.next_ticket += 1;
        self.pending = Some(self.next_ticket);
        self.next_ticket
    }

    fn is_current(&self, phase: ActivePhase, ticket: u64) -> bool {
        self.state.phase == Phase::Active(phase) && self.pending == Some(ticket)
    }

    fn enter(&mut self, to: Phase, fx: &mut Vec<Effect>) {
        let from = self.state.phase;
        if from == to {
            return;
        }
        debug!("Phase {} -> {}", from, to);
        self.state.phase = to;
        fx.push(Effect::Emit(SessionEvent::PhaseChanged { from, to }));
    }

    fn listen(&mut self, fx: &mut Vec<Effect>) {
        self.state.transcript.clear();
        self.enter(Phase::Active(ActivePhase::Listening), fx);
        let ticket = self.issue();
        fx.push(Effect::AcquireCapture { ticket });
    }

    fn cooldown(&mut self, fx: &mut Vec<Effect>) {
        let reply = self
            .state
            .turns
            .last()
            .filter(|t| t.speaker == Speaker::Agent)
            .map(|t| t.text.as_str())
            .unwrap_or_default();
        let delay = self.config.settle_delay(reply);
        self.enter(Phase::Active(ActivePhase::Cooldown), fx);
        let ticket = self.issue();
        fx.push(Effect::Settle { ticket, delay });
    }

    fn end(&mut self, by: EndedBy, fx: &mut Vec<Effect>) {
        self.pending = None;
        self.ended_by = Some(by);
        fx.push(Effect::StopTimers);
        fx.push(Effect::ReleaseCapture);
        self.enter(Phase::Ended, fx);
        fx.push(Effect::Emit(SessionEvent::Ended(by)));
        fx.push(Effect::Finish(by));
    }
}
