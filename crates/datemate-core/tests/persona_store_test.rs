//! Persona lifecycle through the identity and store collaborators.

use datemate_core::{
    IdentityProvider, InMemoryPersonaStore, PersonaDraft, PersonaStore, StaticIdentity,
};

#[tokio::test]
async fn signed_in_user_creates_and_lists_personas() {
    let identity = StaticIdentity::signed_in("user-42");
    let store = InMemoryPersonaStore::new();
    let user = identity.require_user_id().unwrap();

    let first = store
        .create(&user, PersonaDraft::new("Asha", 24, "architect", "Loves hiking"))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = store
        .create(&user, PersonaDraft::new("Leo", 29, "barista", ""))
        .await
        .unwrap();

    let listed = store.list_by_user(&user).await.unwrap();
    assert_eq!(listed.len(), 2);
    // newest first
    assert_eq!(listed[0].id, second.id);
    assert_eq!(listed[1].id, first.id);

    let fetched = store.get(&first.id).await.unwrap();
    assert_eq!(fetched, first);
}

#[tokio::test]
async fn export_and_import_preserve_ownership() {
    let store = InMemoryPersonaStore::new();
    store
        .create("alice", PersonaDraft::new("Nia", 26, "doctor", "Enjoys jazz"))
        .await
        .unwrap();
    store
        .create("bob", PersonaDraft::new("Tom", 33, "teacher", ""))
        .await
        .unwrap();

    let json = store.export_json().unwrap();
    let restored = InMemoryPersonaStore::import_json(&json).unwrap();

    let alice = restored.list_by_user("alice").await.unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].name, "Nia");
    assert_eq!(restored.list_by_user("bob").await.unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_draft_is_not_stored() {
    let store = InMemoryPersonaStore::new();
    let result = store.create("alice", PersonaDraft::new("", 30, "", "")).await;
    assert!(result.is_err());
    assert!(store.list_by_user("alice").await.unwrap().is_empty());
}
