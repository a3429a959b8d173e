//! Endpoint selection and single-attempt execution on top of a [`Transport`].

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::TransportError;
use super::transport::{ApiCall, Transport};

/// Lightweight liveness endpoint used to tell endpoint-wide outages apart
/// from call-specific failures.
pub const PING_PATH: &str = "/tests/ping";

/// How long a remembered alternate route stays preferred over the primary.
const ALTERNATE_ROUTE_TTL_HOURS: i64 = 24;

/// Process-wide handle to the last reachable alternate route.
pub type SharedRoutes = Arc<Mutex<RouteMemory>>;

static GLOBAL_ROUTES: OnceLock<SharedRoutes> = OnceLock::new();

/// Last alternate route that answered, and when.
#[derive(Debug, Default)]
pub struct RouteMemory {
    alternate: Option<(String, DateTime<Utc>)>,
}

impl RouteMemory {
    /// The memory shared by every session in this process.
    pub fn global() -> SharedRoutes {
        GLOBAL_ROUTES.get_or_init(SharedRoutes::default).clone()
    }

    pub fn remember(&mut self, url: &str, at: DateTime<Utc>) {
        self.alternate = Some((url.to_string(), at));
    }

    pub fn alternate(&self) -> Option<&str> {
        self.alternate.as_ref().map(|(url, _)| url.as_str())
    }

    pub fn clear(&mut self) {
        self.alternate = None;
    }

    /// True once the remembered alternate has aged out. The memory is
    /// cleared so the signal fires once.
    pub fn should_try_original(&mut self, now: DateTime<Utc>) -> bool {
        match self.alternate {
            Some((_, at)) if now - at > Duration::hours(ALTERNATE_ROUTE_TTL_HOURS) => {
                self.alternate = None;
                true
            }
            _ => false,
        }
    }
}

fn lock(routes: &SharedRoutes) -> std::sync::MutexGuard<'_, RouteMemory> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Facade over the transport handle: picks the endpoint, runs one attempt,
/// probes reachability and lists alternate routes.
pub struct TransportProbe<T> {
    transport: T,
    primary_url: String,
    routes: SharedRoutes,
}

impl<T: Transport> TransportProbe<T> {
    pub fn new(mut transport: T, primary_url: &str, routes: SharedRoutes) -> Self {
        transport.set_api_url(primary_url);
        let mut probe = Self {
            transport,
            primary_url: primary_url.to_string(),
            routes,
        };
        probe.enforce_verification();
        probe
    }

    pub fn primary_url(&self) -> &str {
        &self.primary_url
    }

    pub fn current_url(&self) -> &str {
        self.transport.api_url()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The remembered alternate route, if any.
    pub fn known_alternate(&self) -> Option<String> {
        lock(&self.routes).alternate().map(str::to_string)
    }

    /// Choose the endpoint for the next attempt. Only a remembered
    /// alternate can replace the primary URL.
    pub fn select_endpoint(&mut self, alternate_routing: bool) {
        let (try_original, alternate) = {
            let mut routes = lock(&self.routes);
            (
                routes.should_try_original(Utc::now()),
                routes.alternate().map(str::to_string),
            )
        };
        let alternate = alternate.filter(|url| *url != self.primary_url);

        if try_original {
            info!(url = %self.primary_url, "Use original API");
            self.transport.set_api_url(&self.primary_url);
        } else if let Some(alternate) = alternate.filter(|_| alternate_routing) {
            if self.transport.api_url() != alternate {
                info!(url = %alternate, "Use alternative API");
            }
            self.transport.set_api_url(&alternate);
        } else if self.transport.api_url() != self.primary_url {
            debug!(url = %self.primary_url, "No alternative API in use, back to original API");
            self.transport.set_api_url(&self.primary_url);
        }

        self.enforce_verification();
    }

    /// Point the transport at `url` for the next attempt.
    pub fn use_route(&mut self, url: &str) {
        self.transport.set_api_url(url);
        self.enforce_verification();
    }

    /// Record the current endpoint as the default alternate for this process.
    pub fn remember_current_route(&self) {
        let url = self.transport.api_url().to_string();
        info!(url = %url, "Store alternative API and time");
        lock(&self.routes).remember(&url, Utc::now());
    }

    /// Drop the remembered alternate so every session starts from the
    /// primary URL again.
    pub fn forget_alternate(&self) {
        lock(&self.routes).clear();
    }

    /// Verification is on for the primary URL and off for everything else.
    fn enforce_verification(&mut self) {
        let verify = self.transport.api_url() == self.primary_url;
        if self.transport.verify_certificates() != verify {
            self.transport.set_verify_certificates(verify);
        }
    }

    /// Run one attempt of `call` against the current endpoint.
    pub async fn attempt(&mut self, call: &ApiCall) -> Result<Value, TransportError> {
        self.enforce_verification();
        debug!(
            url = %self.transport.api_url(),
            tls_verification = self.transport.verify_certificates(),
            call = call.name(),
            "Attempt to reach API"
        );

        let result = match call {
            ApiCall::Request(path) => self.transport.request(path).await,
            ApiCall::Authenticate { username, password } => self
                .transport
                .authenticate(username, password)
                .await
                .map(|()| Value::Null),
            ApiCall::Refresh => self.transport.refresh().await.map(|()| Value::Null),
            ApiCall::Logout => self.transport.logout().await.map(|()| Value::Null),
        };

        self.enforce_verification();
        result
    }

    /// Whether the current endpoint answers at all.
    pub async fn probe_reachable(&mut self) -> bool {
        match self.transport.request(PING_PATH).await {
            Ok(_) | Err(TransportError::Remote(_)) => true,
            Err(e) if e.is_route_failure() => {
                debug!(url = %self.transport.api_url(), error = %e, "API is not reachable");
                false
            }
            Err(e) => {
                warn!(url = %self.transport.api_url(), error = %e, "Unexpected failure while probing API");
                false
            }
        }
    }

    /// Candidate hosts in the order the transport returned them. A failed
    /// lookup yields no candidates.
    pub async fn list_alternate_routes(&mut self) -> Option<Vec<String>> {
        match self.transport.alternate_routes().await {
            Ok(routes) => Some(routes),
            Err(e) => {
                warn!(error = %e, "Could not fetch alternative routes");
                None
            }
        }
    }

    /// Drop the transport session and return to the primary endpoint.
    pub fn reset(&mut self) {
        self.transport.reset(&self.primary_url);
        self.transport.set_api_url(&self.primary_url);
        self.enforce_verification();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY: &str = "https://api.example";

    /// Records endpoint state; every request answers with its own URL.
    #[derive(Default)]
    struct EchoTransport {
        url: String,
        verify: bool,
        ping: Option<TransportError>,
    }

    impl Transport for EchoTransport {
        fn api_url(&self) -> &str {
            &self.url
        }

        fn set_api_url(&mut self, url: &str) {
            self.url = url.to_string();
        }

        fn verify_certificates(&self) -> bool {
            self.verify
        }

        fn set_verify_certificates(&mut self, verify: bool) {
            self.verify = verify;
        }

        async fn request(&mut self, path: &str) -> Result<Value, TransportError> {
            if path == PING_PATH {
                if let Some(err) = self.ping.clone() {
                    return Err(err);
                }
            }
            Ok(Value::String(format!("{}{}", self.url, path)))
        }

        async fn authenticate(&mut self, _: &str, _: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn refresh(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn logout(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn alternate_routes(&mut self) -> Result<Vec<String>, TransportError> {
            Err(TransportError::Timeout)
        }

        fn dump(&self) -> Value {
            Value::Null
        }

        fn restore(&mut self, _: &Value) -> Result<(), TransportError> {
            Ok(())
        }

        fn reset(&mut self, api_url: &str) {
            self.url = api_url.to_string();
        }
    }

    fn probe_with(routes: SharedRoutes) -> TransportProbe<EchoTransport> {
        TransportProbe::new(EchoTransport::default(), PRIMARY, routes)
    }

    #[test]
    fn test_primary_url_is_verified() {
        let probe = probe_with(SharedRoutes::default());
        assert_eq!(probe.current_url(), PRIMARY);
        assert!(probe.transport().verify_certificates());
    }

    #[test]
    fn test_alternate_is_used_only_when_routing_enabled() {
        let routes = SharedRoutes::default();
        lock(&routes).remember("https://b.example", Utc::now());
        let mut probe = probe_with(routes);

        probe.select_endpoint(false);
        assert_eq!(probe.current_url(), PRIMARY);
        assert!(probe.transport().verify_certificates());

        probe.select_endpoint(true);
        assert_eq!(probe.current_url(), "https://b.example");
        assert!(!probe.transport().verify_certificates());

        probe.select_endpoint(false);
        assert_eq!(probe.current_url(), PRIMARY);
        assert!(probe.transport().verify_certificates());
    }

    #[test]
    fn test_expired_alternate_switches_back_to_original() {
        let routes = SharedRoutes::default();
        lock(&routes).remember("https://b.example", Utc::now() - Duration::hours(25));
        let mut probe = probe_with(routes.clone());
        probe.use_route("https://b.example");
        assert!(!probe.transport().verify_certificates());

        probe.select_endpoint(true);
        assert_eq!(probe.current_url(), PRIMARY);
        assert!(probe.transport().verify_certificates());
        assert!(lock(&routes).alternate().is_none());
    }

    #[test]
    fn test_unremembered_route_is_not_kept() {
        let mut probe = probe_with(SharedRoutes::default());
        probe.use_route("https://a.example");

        probe.select_endpoint(true);
        assert_eq!(probe.current_url(), PRIMARY);
        assert!(probe.transport().verify_certificates());
    }

    #[test]
    fn test_forget_alternate() {
        let routes = SharedRoutes::default();
        lock(&routes).remember("https://b.example", Utc::now());
        let mut probe = probe_with(routes.clone());

        probe.forget_alternate();
        assert!(lock(&routes).alternate().is_none());
        probe.select_endpoint(true);
        assert_eq!(probe.current_url(), PRIMARY);
    }

    #[test]
    fn test_alternate_equal_to_primary_is_ignored() {
        let routes = SharedRoutes::default();
        lock(&routes).remember(PRIMARY, Utc::now());
        let mut probe = probe_with(routes);
        probe.select_endpoint(true);
        assert_eq!(probe.current_url(), PRIMARY);
        assert!(probe.transport().verify_certificates());
    }

    #[tokio::test]
    async fn test_attempt_runs_against_current_route() {
        let mut probe = probe_with(SharedRoutes::default());
        probe.use_route("https://a.example");
        let body = probe
            .attempt(&ApiCall::request("/vpn"))
            .await
            .expect("echo transport never fails requests");
        assert_eq!(body, Value::String("https://a.example/vpn".into()));
        assert!(!probe.transport().verify_certificates());
    }

    #[tokio::test]
    async fn test_probe_reachable() {
        let mut probe = probe_with(SharedRoutes::default());
        assert!(probe.probe_reachable().await);

        probe.transport_mut().ping = Some(TransportError::Timeout);
        assert!(!probe.probe_reachable().await);

        probe.transport_mut().ping = Some(TransportError::Remote(crate::api::RemoteError::new(
            422, "bad request",
        )));
        assert!(probe.probe_reachable().await);

        probe.transport_mut().ping = Some(TransportError::Unknown("weird".into()));
        assert!(!probe.probe_reachable().await);
    }

    #[tokio::test]
    async fn test_failed_route_lookup_yields_none() {
        let mut probe = probe_with(SharedRoutes::default());
        assert!(probe.list_alternate_routes().await.is_none());
    }

    #[test]
    fn test_remember_current_route() {
        let routes = SharedRoutes::default();
        let mut probe = probe_with(routes.clone());
        probe.use_route("https://c.example");
        probe.remember_current_route();
        assert_eq!(lock(&routes).alternate(), Some("https://c.example"));
        assert_eq!(probe.known_alternate().as_deref(), Some("https://c.example"));
    }
}
