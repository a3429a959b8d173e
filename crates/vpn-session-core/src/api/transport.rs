use std::fmt;
use std::future::Future;

use serde_json::Value;

use super::error::TransportError;

/// The secure transport/session handle the core drives.
///
/// Implementations own the authenticated API session (tokens, cookies,
/// TLS configuration). The core only points them at an endpoint, toggles
/// certificate verification and interprets their results.
pub trait Transport: Send + Sync {
    /// Base URL requests are currently sent to.
    fn api_url(&self) -> &str;

    fn set_api_url(&mut self, url: &str);

    fn verify_certificates(&self) -> bool;

    fn set_verify_certificates(&mut self, verify: bool);

    /// GET `path` relative to the current base URL and return the parsed body.
    fn request(&mut self, path: &str) -> impl Future<Output = Result<Value, TransportError>> + Send;

    fn authenticate(
        &mut self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Exchange the refresh material for new session material.
    fn refresh(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn logout(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Hosts (without scheme) that may front the API when the primary is blocked.
    fn alternate_routes(&mut self) -> impl Future<Output = Result<Vec<String>, TransportError>> + Send;

    /// Opaque serializable session state.
    fn dump(&self) -> Value;

    /// Replace the session state with a previously dumped one.
    fn restore(&mut self, state: &Value) -> Result<(), TransportError>;

    /// Drop all session state and point back at `api_url`.
    fn reset(&mut self, api_url: &str);
}

/// One API operation, replayable on any route.
#[derive(Clone, PartialEq, Eq)]
pub enum ApiCall {
    Request(String),
    Authenticate { username: String, password: String },
    Refresh,
    Logout,
}

impl ApiCall {
    pub fn request(path: impl Into<String>) -> Self {
        ApiCall::Request(path.into())
    }

    /// Short name for logs. Never includes credentials.
    pub fn name(&self) -> &str {
        match self {
            ApiCall::Request(path) => path,
            ApiCall::Authenticate { .. } => "authenticate",
            ApiCall::Refresh => "refresh",
            ApiCall::Logout => "logout",
        }
    }
}

impl fmt::Debug for ApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiCall::Request(path) => f.debug_tuple("Request").field(path).finish(),
            ApiCall::Authenticate { username, .. } => f
                .debug_struct("Authenticate")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            ApiCall::Refresh => f.write_str("Refresh"),
            ApiCall::Logout => f.write_str("Logout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_never_prints_password() {
        let call = ApiCall::Authenticate {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let printed = format!("{call:?}");
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
        assert_eq!(call.name(), "authenticate");
    }
}
