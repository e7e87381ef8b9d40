//! Session phases and the observable session state.

use crate::turn::Turn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sub-phases of an active session. Exactly one adapter may be busy per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivePhase {
    /// Capturing the user's speech.
    Listening,
    /// Waiting for the reply model.
    Generating,
    /// Playing the synthesized reply.
    Speaking,
    /// Settle delay before listening again.
    Cooldown,
}

/// Top-level session lifecycle: `Idle → Active → Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Active(ActivePhase),
    Ended,
}

impl Phase {
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Active(_))
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Phase::Ended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Active(ActivePhase::Listening) => "listening",
            Phase::Active(ActivePhase::Generating) => "generating",
            Phase::Active(ActivePhase::Speaking) => "speaking",
            Phase::Active(ActivePhase::Cooldown) => "cooldown",
            Phase::Ended => "ended",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why synthesis is degraded. Once set, the flag stays for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// Vendor quota exhausted: later replies are text-only.
    QuotaExceeded,
    /// A synthesis or playback call failed; later replies still try audio.
    SynthesisUnavailable,
}

/// Snapshot of a session, owned by the session and published after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: Phase,
    pub remaining: Duration,
    pub turns: Vec<Turn>,
    /// Text of the last accepted utterance, for duplicate suppression.
    pub last_utterance_text: String,
    /// Live partial transcript of the utterance being captured.
    pub transcript: String,
    pub degraded: Option<DegradedReason>,
}

impl SessionState {
    pub fn new(duration: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            remaining: duration,
            turns: Vec::new(),
            last_utterance_text: String::new(),
            transcript: String::new(),
            degraded: None,
        }
    }

    /// User-visible degraded-mode flag.
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    /// Replies skip synthesis entirely.
    pub fn is_text_only(&self) -> bool {
        self.degraded == Some(DegradedReason::QuotaExceeded)
    }

    /// `mm:ss` countdown label.
    pub fn remaining_label(&self) -> String {
        let secs = self.remaining.as_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}
