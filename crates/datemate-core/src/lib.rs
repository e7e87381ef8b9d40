//! # DateMate Core
//!
//! Shared types for the mock-date practice app: personas, the identity and
//! persona-storage collaborators, the layered `DateConfig` consumed by the
//! voice session in `datemate-voice`, and the red flag / green flag quiz.

pub mod config;
pub mod error;
pub mod flags;
pub mod persona;
pub mod store;

pub use config::{
    CaptureSettings, DateConfig, GenerationSettings, PacingSettings, ScoringSettings,
    SessionSettings, SynthesisSettings, RAW_SCORE_CEILING,
};
pub use error::{CoreError, CoreResult};
pub use flags::{
    parse_flag_lines, AnswerOutcome, Flag, FlagColor, FlagGame, FlagPool, FlagScore, POOL_SIZE,
    ROUND_SIZE,
};
pub use persona::{Persona, PersonaDraft, MAX_PERSONA_AGE, MIN_PERSONA_AGE};
pub use store::{IdentityProvider, InMemoryPersonaStore, PersonaStore, StaticIdentity};
