//! Persona records: the AI character a user goes on a mock date with.
//!
//! A `PersonaDraft` is what the creation form collects; the store turns it into a
//! `Persona` with an id, owner and creation time. Once loaded for a session, a
//! persona is read-only and is only borrowed by the conversation loop.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Youngest age a persona may be created with.
pub const MIN_PERSONA_AGE: u8 = 18;
/// Oldest age a persona may be created with.
pub const MAX_PERSONA_AGE: u8 = 120;

/// Form input for a new persona, before it is owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaDraft {
    pub name: String,
    pub age: u8,
    pub profession: String,
    /// Free-form description: interests, temperament, background.
    #[serde(default)]
    pub details: String,
}

impl PersonaDraft {
    pub fn new(
        name: impl Into<String>,
        age: u8,
        profession: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            age,
            profession: profession.into(),
            details: details.into(),
        }
    }

    /// Check the draft before it is stored. Text fields are trimmed by `into_persona`.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidPersona("name must not be empty".to_string()));
        }
        if !(MIN_PERSONA_AGE..=MAX_PERSONA_AGE).contains(&self.age) {
            return Err(CoreError::InvalidPersona(format!(
                "age must be between {} and {}, got {}",
                MIN_PERSONA_AGE, MAX_PERSONA_AGE, self.age
            )));
        }
        Ok(())
    }

    /// Validate and stamp the draft as a persona owned by `user_id`.
    pub fn into_persona(self, user_id: &str) -> CoreResult<Persona> {
        self.validate()?;
        Ok(Persona {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: self.name.trim().to_string(),
            age: self.age,
            profession: self.profession.trim().to_string(),
            details: self.details.trim().to_string(),
            created_at: Utc::now(),
        })
    }
}

/// A stored persona. Immutable for the duration of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub age: u8,
    pub profession: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

impl Persona {
    /// System prompt that puts the reply model in character for a date.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!("You are {}, a {} year old", self.name, self.age);
        if self.profession.is_empty() {
            prompt.push('.');
        } else {
            prompt.push_str(&format!(" {}.", self.profession));
        }
        if !self.details.is_empty() {
            prompt.push(' ');
            prompt.push_str(&self.details);
            if !self.details.ends_with(['.', '!', '?']) {
                prompt.push('.');
            }
        }
        prompt.push_str(
            " You are on a date with the user, so talk accordingly. \
             Provide short to moderate and sweet answers and do ask questions sometimes \
             like people do on usual dates.",
        );
        prompt
    }
}
