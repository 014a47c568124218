//! Credential registry integration tests.

use pretty_assertions::assert_eq;
use querymux::credentials::{
    connection_password_id, CredentialRegistry, CredentialStore, MemoryStore,
};
use std::sync::Arc;
use std::time::Duration;

/// Scenario: Save, read, and delete through the registry
#[tokio::test]
async fn test_registry_round_trip() {
    let registry = CredentialRegistry::new();
    registry
        .register("pgsql", Arc::new(MemoryStore::new()))
        .unwrap();

    let id = connection_password_id("prod");
    registry.save("pgsql", &id, "hunter2").await.unwrap();

    let credential = registry.read("pgsql", &id).await.unwrap().unwrap();
    assert_eq!(credential.credential_id, id);
    assert_eq!(credential.password, "hunter2");

    registry.delete("pgsql", &id).await.unwrap();
    assert_eq!(registry.read("pgsql", &id).await.unwrap(), None);
}

/// Scenario: Stored ids are namespaced per provider
/// Given two providers sharing one backing store
/// When both save under the same credential id
/// Then each reads back its own value
#[tokio::test]
async fn test_namespacing_with_shared_store() {
    let store = Arc::new(MemoryStore::new());
    let registry = CredentialRegistry::new();
    registry.register("pgsql", store.clone()).unwrap();
    registry.register("mysql", store.clone()).unwrap();

    registry.save("pgsql", "conn:db", "pg-pass").await.unwrap();
    registry.save("mysql", "conn:db", "my-pass").await.unwrap();

    let pg = registry.read("pgsql", "conn:db").await.unwrap().unwrap();
    let my = registry.read("mysql", "conn:db").await.unwrap().unwrap();
    assert_eq!(pg.password, "pg-pass");
    assert_eq!(my.password, "my-pass");

    // The shared store sees two distinct namespaced entries
    assert!(store.read("pgsql|conn:db").await.unwrap().is_some());
    assert!(store.read("mysql|conn:db").await.unwrap().is_some());
}

/// Scenario: Reads against an unregistered namespace wait, not fail
/// Given a namespace with no provider
/// When a read is issued
/// Then it blocks until a provider registers
#[tokio::test]
async fn test_read_blocks_until_provider_registers() {
    let registry = Arc::new(CredentialRegistry::new());

    // Without a registration the read does not resolve
    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        registry.read("pgsql", "conn:a"),
    )
    .await;
    assert!(blocked.is_err());

    let reader = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.read("pgsql", "conn:a").await })
    };
    tokio::task::yield_now().await;

    let store = Arc::new(MemoryStore::new());
    store.save("pgsql|conn:a", "late").await.unwrap();
    registry.register("pgsql", store).unwrap();

    let credential = reader.await.unwrap().unwrap().unwrap();
    assert_eq!(credential.password, "late");
}

/// Scenario: Unregistering a provider frees its namespace
#[tokio::test]
async fn test_unregister_then_reregister() {
    let registry = CredentialRegistry::new();
    let handle = registry
        .register("pgsql", Arc::new(MemoryStore::new()))
        .unwrap();
    registry.save("pgsql", "conn:a", "first").await.unwrap();

    registry.unregister(handle).unwrap();

    // A fresh provider takes over the namespace with its own storage
    registry
        .register("pgsql", Arc::new(MemoryStore::new()))
        .unwrap();
    assert_eq!(registry.read("pgsql", "conn:a").await.unwrap(), None);
}
