//! Control-plane API access.
//!
//! This module provides the pieces the session orchestrator composes:
//! - `Transport`: the secure session handle (with `HttpTransport` as the
//!   reqwest implementation)
//! - `TransportProbe`: endpoint selection and single call attempts
//! - `Strategy`: per-call error handling decisions
//! - `ApiError` / `TransportError`: the error taxonomy

pub mod client;
pub mod error;
pub mod probe;
pub mod retry;
pub mod transport;

pub use client::{HttpTransport, DEFAULT_API_URL};
pub use error::{ApiError, RemoteError, TransportError};
pub use probe::{RouteMemory, SharedRoutes, TransportProbe};
pub use retry::{Decision, Strategy};
pub use transport::{ApiCall, Transport};
