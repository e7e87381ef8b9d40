//! Identity and persona storage collaborators.
//!
//! The voice core only needs a `Persona` value and a user id. These traits are the
//! seam where a hosted auth/document-database backend plugs in; the in-memory
//! implementations back tests, the demo, and offline use.

use crate::error::{CoreError, CoreResult};
use crate::persona::{Persona, PersonaDraft};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::RwLock;
use tracing::{debug, info};

/// Who is signed in.
pub trait IdentityProvider: Send + Sync {
    /// The authenticated user's id, if any.
    fn current_user_id(&self) -> Option<String>;

    /// Like `current_user_id`, but a missing user is an error.
    fn require_user_id(&self) -> CoreResult<String> {
        self.current_user_id().ok_or(CoreError::Unauthenticated)
    }
}

/// Identity fixed at construction; `sign_out` clears it.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    user_id: RwLock<Option<String>>,
}

impl StaticIdentity {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            user_id: RwLock::new(Some(user_id.into())),
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut guard) = self.user_id.write() {
            *guard = None;
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.read().ok().and_then(|g| g.clone())
    }
}

/// Persona CRUD as the session layer sees it.
#[async_trait]
pub trait PersonaStore: Send + Sync {
    /// Validate and persist a new persona for `user_id`.
    async fn create(&self, user_id: &str, draft: PersonaDraft) -> CoreResult<Persona>;

    /// All personas owned by `user_id`, newest first.
    async fn list_by_user(&self, user_id: &str) -> CoreResult<Vec<Persona>>;

    /// Look up a persona by id.
    async fn get(&self, persona_id: &str) -> CoreResult<Persona>;
}

/// Process-local persona store keyed by owner.
#[derive(Debug, Default)]
pub struct InMemoryPersonaStore {
    by_user: DashMap<String, Vec<Persona>>,
}

impl InMemoryPersonaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize every stored persona, e.g. for archiving alongside session turns.
    pub fn export_json(&self) -> CoreResult<String> {
        let mut all: Vec<Persona> = self
            .by_user
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(serde_json::to_string_pretty(&all)?)
    }

    /// Rebuild a store from `export_json` output.
    pub fn import_json(json: &str) -> CoreResult<Self> {
        let personas: Vec<Persona> = serde_json::from_str(json)?;
        let store = Self::new();
        for persona in personas {
            store
                .by_user
                .entry(persona.user_id.clone())
                .or_default()
                .push(persona);
        }
        Ok(store)
    }
}

#[async_trait]
impl PersonaStore for InMemoryPersonaStore {
    async fn create(&self, user_id: &str, draft: PersonaDraft) -> CoreResult<Persona> {
        if user_id.trim().is_empty() {
            return Err(CoreError::Unauthenticated);
        }
        let persona = draft.into_persona(user_id)?;
        self.by_user
            .entry(user_id.to_string())
            .or_default()
            .push(persona.clone());
        info!("New persona added: {} ({})", persona.name, persona.id);
        Ok(persona)
    }

    async fn list_by_user(&self, user_id: &str) -> CoreResult<Vec<Persona>> {
        let mut personas = self
            .by_user
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        personas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        debug!("Listed {} personas for {}", personas.len(), user_id);
        Ok(personas)
    }

    async fn get(&self, persona_id: &str) -> CoreResult<Persona> {
        self.by_user
            .iter()
            .find_map(|entry| entry.value().iter().find(|p| p.id == persona_id).cloned())
            .ok_or_else(|| CoreError::PersonaNotFound(persona_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_out_clears_identity() {
        let identity = StaticIdentity::signed_in("user-1");
        assert_eq!(identity.current_user_id().as_deref(), Some("user-1"));
        identity.sign_out();
        assert!(matches!(identity.require_user_id(), Err(CoreError::Unauthenticated)));
    }

    #[test]
    fn create_requires_a_user() {
        let store = InMemoryPersonaStore::new();
        let result = tokio_test::block_on(store.create("", PersonaDraft::new("A", 25, "", "")));
        assert!(matches!(result, Err(CoreError::Unauthenticated)));
    }

    #[test]
    fn personas_are_scoped_per_user() {
        let store = InMemoryPersonaStore::new();
        tokio_test::block_on(async {
            store.create("alice", PersonaDraft::new("Ravi", 27, "chef", "")).await.unwrap();
            store.create("bob", PersonaDraft::new("Mia", 31, "pilot", "")).await.unwrap();
            let alice = store.list_by_user("alice").await.unwrap();
            assert_eq!(alice.len(), 1);
            assert_eq!(alice[0].name, "Ravi");
            assert!(store.list_by_user("carol").await.unwrap().is_empty());
        });
    }

    #[test]
    fn get_unknown_persona_fails() {
        let store = InMemoryPersonaStore::new();
        let result = tokio_test::block_on(store.get("missing"));
        assert!(matches!(result, Err(CoreError::PersonaNotFound(_))));
    }
}
