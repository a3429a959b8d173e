use std::collections::HashMap;

use thiserror::Error;

/// Maximum length for remote error messages kept in errors and logs
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// A failure reported by the transport collaborator for a single attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection timed out")]
    Timeout,

    #[error("could not establish a connection: {0}")]
    ConnectionFailed(String),

    #[error("certificate pinning failed")]
    PinningFailed,

    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(RemoteError),

    #[error("unknown transport failure: {0}")]
    Unknown(String),
}

impl TransportError {
    /// Failures that say nothing about the request itself, only about the route.
    pub fn is_route_failure(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout | TransportError::ConnectionFailed(_) | TransportError::PinningFailed
        )
    }
}

/// An application-level error returned by the API.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub code: u32,
    pub message: String,
    /// Response headers, keys lowercased.
    pub headers: HashMap<String, String>,
}

impl RemoteError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: truncate_body(&message.into()),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Domain errors surfaced to callers of the session.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Connection to API timed out")]
    TransportTimeout,

    #[error("TLS pinning failed, connection could be insecure")]
    TransportInsecure,

    #[error("An error occurred while attempting to reach API: {0}")]
    TransportUnreachable(String),

    #[error("API error {code}: {message}")]
    Remote { code: u32, message: String },

    #[error("Access forbidden: {0}")]
    AccessForbidden(String),

    #[error("Invalid app version: {0}")]
    InvalidAppVersion(String),

    #[error("App version is outdated, please upgrade: {0}")]
    AppVersionOutdated(String),

    #[error("Refresh token is invalid, please log in again: {0}")]
    RefreshTokenInvalid(String),

    #[error("Incorrect login credentials: {0}")]
    IncorrectCredentials(String),

    #[error("No valid API session")]
    SessionInvalid,

    #[error("A session is already active, log out first")]
    SessionAlreadyActive,

    #[error("Unable to reach internet connectivity")]
    ConnectivityExhausted,

    #[error("Unknown API error occurred: {0}")]
    UnknownTransportFailure(String),

    #[error("Credential store error: {0}")]
    CredentialStore(#[from] crate::auth::SecretStoreError),

    #[error("Invalid stored data: {0}")]
    InvalidStoredData(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Default OpenVPN ports could not be found")]
    DefaultPortsNotFound,
}

impl ApiError {
    /// Map a transport failure that will not be retried on another route.
    pub fn from_transport(error: TransportError) -> Self {
        match error {
            TransportError::Timeout => ApiError::TransportTimeout,
            TransportError::PinningFailed => ApiError::TransportInsecure,
            TransportError::ConnectionFailed(reason) => ApiError::TransportUnreachable(reason),
            TransportError::Remote(remote) => ApiError::from_remote(&remote),
            TransportError::Unknown(reason) => ApiError::UnknownTransportFailure(reason),
        }
    }

    /// Unclassified remote error, code kept verbatim.
    pub fn from_remote(remote: &RemoteError) -> Self {
        ApiError::Remote {
            code: remote.code,
            message: remote.message.clone(),
        }
    }

    /// The remote code carried by this error, if it came from the API.
    pub fn remote_code(&self) -> Option<u32> {
        match self {
            ApiError::Remote { code, .. } => Some(*code),
            ApiError::AccessForbidden(_) => Some(403),
            ApiError::InvalidAppVersion(_) => Some(5002),
            ApiError::AppVersionOutdated(_) => Some(5003),
            ApiError::RefreshTokenInvalid(_) => Some(10013),
            ApiError::IncorrectCredentials(_) => Some(8002),
            _ => None,
        }
    }
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}
