//! Credential storage for connection passwords.
//!
//! Two layers live here. `CredentialStore` is the storage seam: the
//! keyring-backed store keeps passwords in the OS keychain, and the
//! in-memory store backs headless tests. `CredentialRegistry` is the
//! extension-facing bridge: providers register under a namespace, callers
//! waiting on a provider block until its registration lands, and every
//! credential id is namespaced so providers cannot read each other's
//! secrets.

use crate::error::{QueryMuxError, Result};
use async_trait::async_trait;
use keyring::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::warn;

/// A stored credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub credential_id: String,
    pub password: String,
}

/// Storage seam for connection passwords.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stores a password under the credential id, replacing any previous
    /// value.
    async fn save(&self, credential_id: &str, password: &str) -> Result<()>;

    /// Reads a password. Absent credentials are Ok(None), not an error.
    async fn read(&self, credential_id: &str) -> Result<Option<Credential>>;

    /// Deletes a password. Deleting an absent credential is not an error.
    async fn delete(&self, credential_id: &str) -> Result<()>;
}

/// Credential store backed by the OS keyring.
pub struct KeyringStore {
    service: String,
    available: bool,
}

impl KeyringStore {
    /// Creates a keyring store, probing keyring availability.
    pub fn new(service: impl Into<String>) -> Self {
        let service = service.into();
        let available = Self::probe_keyring(&service);
        if !available {
            warn!("OS keyring unavailable; credentials will not be stored");
        }
        Self { service, available }
    }

    /// Returns whether the OS keyring is usable.
    pub fn is_available(&self) -> bool {
        self.available
    }

    fn probe_keyring(service: &str) -> bool {
        let test_entry = match Entry::new(service, "__probe__") {
            Ok(e) => e,
            Err(_) => return false,
        };

        match test_entry.set_password("test") {
            Ok(()) => {
                let _ = test_entry.delete_credential();
                true
            }
            Err(_) => false,
        }
    }

    fn entry(&self, credential_id: &str) -> Result<Entry> {
        Entry::new(&self.service, credential_id)
            .map_err(|e| QueryMuxError::credential(format!("Failed to access keyring: {e}")))
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn save(&self, credential_id: &str, password: &str) -> Result<()> {
        if !self.available {
            return Err(QueryMuxError::credential(
                "Keyring unavailable; cannot store credential",
            ));
        }
        self.entry(credential_id)?
            .set_password(password)
            .map_err(|e| QueryMuxError::credential(format!("Failed to store credential: {e}")))
    }

    async fn read(&self, credential_id: &str) -> Result<Option<Credential>> {
        if !self.available {
            return Ok(None);
        }
        match self.entry(credential_id)?.get_password() {
            Ok(password) => Ok(Some(Credential {
                credential_id: credential_id.to_string(),
                password,
            })),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(QueryMuxError::credential(format!(
                "Failed to read credential: {e}"
            ))),
        }
    }

    async fn delete(&self, credential_id: &str) -> Result<()> {
        if !self.available {
            return Ok(());
        }
        match self.entry(credential_id)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => {
                warn!("Failed to delete credential from keyring: {e}");
                Ok(())
            }
        }
    }
}

/// In-memory credential store for tests and keyring-less environments.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn save(&self, credential_id: &str, password: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("entries lock")
            .insert(credential_id.to_string(), password.to_string());
        Ok(())
    }

    async fn read(&self, credential_id: &str) -> Result<Option<Credential>> {
        Ok(self
            .entries
            .lock()
            .expect("entries lock")
            .get(credential_id)
            .map(|password| Credential {
                credential_id: credential_id.to_string(),
                password: password.clone(),
            }))
    }

    async fn delete(&self, credential_id: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("entries lock")
            .remove(credential_id);
        Ok(())
    }
}

/// Handle identifying a registered credential provider.
pub type ProviderHandle = u64;

struct RegisteredProvider {
    handle: ProviderHandle,
    store: Arc<dyn CredentialStore>,
}

struct RegistryInner {
    providers: HashMap<String, RegisteredProvider>,
}

/// Registry of namespaced credential providers.
///
/// Each provider owns one namespace; stored ids are prefixed with
/// `{namespace}|` so two providers can use the same credential id without
/// colliding. Reads against a namespace that has not registered yet wait
/// for the registration instead of failing.
pub struct CredentialRegistry {
    inner: Mutex<RegistryInner>,
    next_handle: AtomicU64,
    registered: Notify,
}

impl CredentialRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                providers: HashMap::new(),
            }),
            next_handle: AtomicU64::new(1),
            registered: Notify::new(),
        }
    }

    /// Registers a provider for a namespace and returns its handle.
    ///
    /// The namespace must be non-empty; re-registering a namespace
    /// replaces the previous provider.
    pub fn register(
        &self,
        namespace: &str,
        store: Arc<dyn CredentialStore>,
    ) -> Result<ProviderHandle> {
        if namespace.is_empty() {
            return Err(QueryMuxError::credential(
                "Credential provider namespace must not be empty",
            ));
        }

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock()
            .expect("registry lock")
            .providers
            .insert(namespace.to_string(), RegisteredProvider { handle, store });
        self.registered.notify_waiters();
        Ok(handle)
    }

    /// Removes the provider registered under the handle.
    pub fn unregister(&self, handle: ProviderHandle) -> Result<()> {
        let mut inner = self.inner.lock().expect("registry lock");
        let namespace = inner
            .providers
            .iter()
            .find(|(_, p)| p.handle == handle)
            .map(|(ns, _)| ns.clone())
            .ok_or_else(|| {
                QueryMuxError::credential(format!("No credential provider with handle {handle}"))
            })?;
        inner.providers.remove(&namespace);
        Ok(())
    }

    /// Returns the provider for a namespace, waiting for its registration
    /// if it has not arrived yet.
    async fn provider(&self, namespace: &str) -> Arc<dyn CredentialStore> {
        loop {
            // Arm the notification before checking, so a registration that
            // lands between the check and the await is not missed.
            let notified = self.registered.notified();
            if let Some(provider) = self
                .inner
                .lock()
                .expect("registry lock")
                .providers
                .get(namespace)
            {
                return provider.store.clone();
            }
            notified.await;
        }
    }

    /// Stores a password under `{namespace}|{credential_id}`.
    pub async fn save(&self, namespace: &str, credential_id: &str, password: &str) -> Result<()> {
        let store = self.provider(namespace).await;
        store
            .save(&namespaced_id(namespace, credential_id), password)
            .await
    }

    /// Reads a password stored under `{namespace}|{credential_id}`.
    pub async fn read(&self, namespace: &str, credential_id: &str) -> Result<Option<Credential>> {
        let store = self.provider(namespace).await;
        let credential = store.read(&namespaced_id(namespace, credential_id)).await?;
        // Strip the namespace so callers get back the id they passed in
        Ok(credential.map(|c| Credential {
            credential_id: credential_id.to_string(),
            password: c.password,
        }))
    }

    /// Deletes a password stored under `{namespace}|{credential_id}`.
    pub async fn delete(&self, namespace: &str, credential_id: &str) -> Result<()> {
        let store = self.provider(namespace).await;
        store.delete(&namespaced_id(namespace, credential_id)).await
    }
}

impl Default for CredentialRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn namespaced_id(namespace: &str, credential_id: &str) -> String {
    format!("{namespace}|{credential_id}")
}

/// Generates the credential id for a named connection's password.
pub fn connection_password_id(connection_name: &str) -> String {
    format!("conn:{connection_name}")
}
