//! # DateMate Voice - Mock-Date Turn Taking
//!
//! This crate runs the spoken practice date: it listens to the user, asks the
//! persona's reply model for an answer, speaks it, waits a moment, and listens
//! again until the countdown runs out. The finished transcript is scored.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     ConversationSession (actor)                   │
//! │                                                                   │
//! │  ┌──────────────┐   final    ┌──────────────┐  reply ┌──────────┐ │
//! │  │   Capture    │──────────→ │  Generator   │──────→ │Synthesizer│ │
//! │  │ (gap 2.5+.5s)│            │ (chat API)   │        │  (TTS)   │ │
//! │  └──────────────┘            └──────────────┘        └──────────┘ │
//! │         ↑                                                 │       │
//! │         └────────────── settle 3s + 50ms/char ←───────────┘       │
//! │                                                                   │
//! │  SessionMachine: Listening → Generating → Speaking → Cooldown     │
//! │  Countdown (1 Hz, 300s) ──→ Ended ──→ ScoringStage                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The machine is pure; `session` executes its effects. Real hardware adapters
//! live behind the `device` feature. `flag_source` feeds the red flag / green
//! flag quiz from the same reply model.

pub mod capture;
#[cfg(feature = "device")]
pub mod device;
pub mod error;
pub mod flag_source;
pub mod generator;
pub mod machine;
pub mod player;
pub mod scoring;
pub mod session;
pub mod state;
pub mod synthesizer;
pub mod turn;
pub mod utterance;

pub use capture::{
    CaptureEvent, CaptureSignal, CaptureSink, RecognitionUpdate, Recognizer, RecognizerCapture,
    RecognizerTally, ScriptEnd, ScriptStep, ScriptedRecognizer, ScriptedUtterance, SpeechCaptureSource,
};
#[cfg(feature = "device")]
pub use device::{MicrophoneConfig, MicrophoneRecognizer, RodioPlayer};
pub use error::{SessionError, VoiceError, VoiceResult};
pub use flag_source::{build_pool, FlagSource, GeneratedFlags};
pub use generator::{ChatCompletionsGenerator, GenerationRequest, ResponseGenerator, ScriptedGenerator};
pub use machine::{EndedBy, Effect, SessionConfig, SessionEvent, SessionMachine};
pub use player::{AudioPlayer, CountingPlayer, SilentPlayer};
pub use scoring::{
    aggregate, CriterionScore, FixedScores, ScoreReport, ScoringStage, ScoringStrategy,
    UniformRandomStrategy,
};
pub use session::{ConversationSession, SessionHandle, SessionOutcome};
pub use state::{ActivePhase, DegradedReason, Phase, SessionState};
pub use synthesizer::{HttpSynthesizer, ScriptedSynthesizer, SpeechSynthesizer};
pub use turn::{Speaker, Turn};
pub use utterance::{UtteranceConfig, UtteranceDetector};
