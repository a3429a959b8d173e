//! HTTP implementation of the [`Transport`] handle.
//!
//! Talks JSON to the VPN control-plane API over reqwest, keeping the
//! session tokens in memory. Certificate verification is switched by
//! picking one of two pre-built clients. Certificate pinning and DNS based
//! route discovery are not implemented here: alternate routes come from
//! configuration.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::error::{RemoteError, TransportError};
use super::transport::Transport;

/// Primary control-plane API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.protonvpn.ch";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// API success codes carried in the `Code` field of response bodies
const SUCCESS_CODES: [u64; 2] = [1000, 1001];

/// Statuses whose HTTP code is the error code, regardless of the body
const STATUS_AS_CODE: [u16; 4] = [401, 403, 429, 503];

const APP_VERSION_HEADER: &str = "x-pm-appversion";
const UID_HEADER: &str = "x-pm-uid";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SessionTokens {
    #[serde(rename = "UID")]
    uid: String,
    #[serde(rename = "AccessToken")]
    access_token: String,
    #[serde(rename = "RefreshToken")]
    refresh_token: String,
}

/// reqwest-backed API session.
pub struct HttpTransport {
    verified: Client,
    unverified: Client,
    api_url: String,
    verify: bool,
    app_version: String,
    tokens: Option<SessionTokens>,
    alternate_routes: Vec<String>,
}

impl HttpTransport {
    pub fn new(
        api_url: &str,
        app_version: &str,
        alternate_routes: Vec<String>,
    ) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(REQUEST_TIMEOUT_SECS);
        let verified = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unknown(format!("failed to build HTTP client: {e}")))?;
        let unverified = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| TransportError::Unknown(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            verified,
            unverified,
            api_url: api_url.to_string(),
            verify: true,
            app_version: app_version.to_string(),
            tokens: None,
            alternate_routes,
        })
    }

    fn client(&self) -> &Client {
        if self.verify {
            &self.verified
        } else {
            &self.unverified
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }

    fn with_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header(header::ACCEPT, "application/vnd.protonmail.v1+json")
            .header(APP_VERSION_HEADER, &self.app_version);
        match self.tokens {
            Some(ref tokens) => builder
                .header(UID_HEADER, &tokens.uid)
                .bearer_auth(&tokens.access_token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, TransportError> {
        let response = self.with_headers(builder).send().await.map_err(classify)?;
        parse_response(response).await
    }

    fn tokens_from(body: Value) -> Result<SessionTokens, TransportError> {
        serde_json::from_value(body)
            .map_err(|e| TransportError::Unknown(format!("invalid session response: {e}")))
    }
}

impl Transport for HttpTransport {
    fn api_url(&self) -> &str {
        &self.api_url
    }

    fn set_api_url(&mut self, url: &str) {
        self.api_url = url.to_string();
    }

    fn verify_certificates(&self) -> bool {
        self.verify
    }

    fn set_verify_certificates(&mut self, verify: bool) {
        self.verify = verify;
    }

    async fn request(&mut self, path: &str) -> Result<Value, TransportError> {
        let builder = self.client().get(self.url(path));
        self.send(builder).await
    }

    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), TransportError> {
        let builder = self
            .client()
            .post(self.url("/auth"))
            .json(&json!({ "Username": username, "Password": password }));
        let body = self.send(builder).await?;
        self.tokens = Some(Self::tokens_from(body)?);
        debug!("Authenticated API session");
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), TransportError> {
        let Some(current) = self.tokens.clone() else {
            return Err(TransportError::Remote(RemoteError::new(401, "No session to refresh")));
        };
        let builder = self.client().post(self.url("/auth/refresh")).json(&json!({
            "UID": current.uid,
            "RefreshToken": current.refresh_token,
            "ResponseType": "token",
            "GrantType": "refresh_token",
            "RedirectURI": "http://protonmail.ch",
        }));
        let body = self.send(builder).await?;
        let mut refreshed = Self::tokens_from(body)?;
        if refreshed.uid.is_empty() {
            refreshed.uid = current.uid;
        }
        self.tokens = Some(refreshed);
        debug!("Refreshed API session");
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), TransportError> {
        let builder = self.client().delete(self.url("/auth"));
        let result = self.send(builder).await;
        self.tokens = None;
        result.map(|_| ())
    }

    async fn alternate_routes(&mut self) -> Result<Vec<String>, TransportError> {
        Ok(self.alternate_routes.clone())
    }

    fn dump(&self) -> Value {
        match self.tokens {
            Some(ref tokens) => serde_json::to_value(tokens).unwrap_or(Value::Null),
            None => Value::Null,
        }
    }

    fn restore(&mut self, state: &Value) -> Result<(), TransportError> {
        self.tokens = if state.is_null() {
            None
        } else {
            Some(Self::tokens_from(state.clone())?)
        };
        Ok(())
    }

    fn reset(&mut self, api_url: &str) {
        self.tokens = None;
        self.api_url = api_url.to_string();
        self.verify = true;
    }
}

/// Map a reqwest failure onto the transport taxonomy.
fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        if mentions_certificate(&error) {
            TransportError::PinningFailed
        } else {
            TransportError::ConnectionFailed(error.to_string())
        }
    } else {
        TransportError::Unknown(error.to_string())
    }
}

fn mentions_certificate(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(error);
    while let Some(err) = source {
        if err.to_string().to_ascii_lowercase().contains("certificate") {
            return true;
        }
        source = err.source();
    }
    false
}

async fn parse_response(response: Response) -> Result<Value, TransportError> {
    let status = response.status().as_u16();
    let headers: HashMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();

    let body = match response.json::<Value>().await {
        Ok(body) => body,
        Err(e) if (200..300).contains(&status) => return Err(classify(e)),
        Err(_) => Value::Null,
    };

    match remote_error(status, &body) {
        None => Ok(body),
        Some(mut error) => {
            error.headers = headers;
            Err(TransportError::Remote(error))
        }
    }
}

/// The application error carried by a response, if any.
fn remote_error(status: u16, body: &Value) -> Option<RemoteError> {
    let body_code = body.get("Code").and_then(Value::as_u64);
    let success = (200..300).contains(&status)
        && body_code.map_or(true, |code| SUCCESS_CODES.contains(&code));
    if success {
        return None;
    }

    let code = if STATUS_AS_CODE.contains(&status) {
        u32::from(status)
    } else {
        body_code
            .and_then(|code| u32::try_from(code).ok())
            .unwrap_or(u32::from(status))
    };
    let message = body
        .get("Error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP status {status}"));
    Some(RemoteError::new(code, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_success_codes() {
        assert!(remote_error(200, &json!({ "Code": 1000 })).is_none());
        assert!(remote_error(200, &json!({ "Code": 1001 })).is_none());
        assert!(remote_error(200, &json!({ "LogicalServers": [] })).is_none());
    }

    #[test]
    fn test_remote_error_prefers_body_code() {
        let err = remote_error(422, &json!({ "Code": 8002, "Error": "Incorrect login credentials" }))
            .expect("422 is an error");
        assert_eq!(err.code, 8002);
        assert_eq!(err.message, "Incorrect login credentials");
    }

    #[test]
    fn test_remote_error_keeps_status_for_retry_codes() {
        let err = remote_error(429, &json!({ "Code": 2028, "Error": "Too many requests" }))
            .expect("429 is an error");
        assert_eq!(err.code, 429);

        let err = remote_error(401, &Value::Null).expect("401 is an error");
        assert_eq!(err.code, 401);
        assert_eq!(err.message, "HTTP status 401");
    }

    #[test]
    fn test_remote_error_on_success_status_with_error_code() {
        let err = remote_error(200, &json!({ "Code": 5003, "Error": "Upgrade required" }))
            .expect("non-success code is an error");
        assert_eq!(err.code, 5003);
    }

    #[test]
    fn test_dump_restore_roundtrip_and_reset() {
        let mut transport =
            HttpTransport::new(DEFAULT_API_URL, "LinuxVPN_0.1.0", Vec::new()).expect("client builds");
        assert_eq!(transport.dump(), Value::Null);

        let state = json!({ "UID": "uid-1", "AccessToken": "access", "RefreshToken": "refresh" });
        transport.restore(&state).expect("valid state");
        assert_eq!(transport.dump(), state);

        transport.set_verify_certificates(false);
        transport.reset("https://other.example");
        assert_eq!(transport.dump(), Value::Null);
        assert_eq!(transport.api_url(), "https://other.example");
        assert!(transport.verify_certificates());
    }

    #[test]
    fn test_restore_rejects_garbage() {
        let mut transport =
            HttpTransport::new(DEFAULT_API_URL, "LinuxVPN_0.1.0", Vec::new()).expect("client builds");
        let err = transport.restore(&json!({ "nope": true })).expect_err("missing fields");
        assert!(matches!(err, TransportError::Unknown(_)));
    }

    #[tokio::test]
    async fn test_alternate_routes_come_from_configuration() {
        let mut transport = HttpTransport::new(
            DEFAULT_API_URL,
            "LinuxVPN_0.1.0",
            vec!["a.example".to_string(), "b.example".to_string()],
        )
        .expect("client builds");
        let routes = transport.alternate_routes().await.expect("static routes");
        assert_eq!(routes, vec!["a.example", "b.example"]);
    }
}
