use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use keyring::Entry;
use thiserror::Error;

/// Keyring service name all entries are stored under
pub const SERVICE_NAME: &str = "vpn-session";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SecretStoreError {
    #[error("no entry for key {0}")]
    NotFound(String),

    #[error("secret store failure: {0}")]
    Backend(String),
}

/// Named secret entries, values are opaque strings.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<String, SecretStoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError>;

    /// Fails with `NotFound` if the key is absent.
    fn delete(&self, key: &str) -> Result<(), SecretStoreError>;
}

/// Secret store backed by the OS keychain.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, SecretStoreError> {
        Entry::new(&self.service, key)
            .map_err(|e| SecretStoreError::Backend(format!("failed to create keyring entry: {e}")))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

fn keyring_error(key: &str, error: keyring::Error) -> SecretStoreError {
    match error {
        keyring::Error::NoEntry => SecretStoreError::NotFound(key.to_string()),
        other => SecretStoreError::Backend(other.to_string()),
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, key: &str) -> Result<String, SecretStoreError> {
        self.entry(key)?
            .get_password()
            .map_err(|e| keyring_error(key, e))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| keyring_error(key, e))
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        self.entry(key)?
            .delete_credential()
            .map_err(|e| keyring_error(key, e))
    }
}

/// In-process secret store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SecretStore for MemoryStore {
    fn get(&self, key: &str) -> Result<String, SecretStoreError> {
        self.entries()
            .get(key)
            .cloned()
            .ok_or_else(|| SecretStoreError::NotFound(key.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        self.entries()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| SecretStoreError::NotFound(key.to_string()))
    }
}

impl<S: SecretStore + ?Sized> SecretStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<String, SecretStoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        (**self).delete(key)
    }
}
