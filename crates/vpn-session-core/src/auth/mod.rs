//! Authentication state persistence.
//!
//! This module provides:
//! - `SecretStore`: named secret entries (`KeyringStore` for the OS
//!   keychain, `MemoryStore` in-process)
//! - `SessionStore`: the identity / session-material / vpn-material slots
//!   and their consistency rules

pub mod credentials;
pub mod session;

pub use credentials::{KeyringStore, MemoryStore, SecretStore, SecretStoreError};
pub use session::{SessionMaterial, SessionStore, StoredSession, VpnCredentials};
