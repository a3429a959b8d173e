//! Resilient API session core for a VPN client.
//!
//! Wraps an authenticated API transport with error recovery (rate-limit
//! backoff, credential refresh, alternate routes when the API is blocked),
//! keeps session credentials in the system keyring and caches the server
//! list, client configuration and streaming catalog on disk.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod session;

pub use api::{ApiCall, ApiError, HttpTransport, Strategy, Transport, TransportError};
pub use auth::{KeyringStore, MemoryStore, SecretStore, VpnCredentials};
pub use config::{Config, KillswitchMode, SettingsProvider};
pub use session::{ApiSession, SessionOptions, SessionState};
