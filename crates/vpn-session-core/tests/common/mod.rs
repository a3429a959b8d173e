//! Shared fixtures for the session integration tests.
//!
//! `MockTransport` answers from per-call scripts and records every attempt
//! (endpoint, verification flag, call, paused-clock timestamp) so tests
//! can assert on ordering and timing after the transport has been moved
//! into the session.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::time::Instant;

use vpn_session_core::api::{RemoteError, SharedRoutes, Transport, TransportError};
use vpn_session_core::auth::MemoryStore;
use vpn_session_core::{ApiSession, KillswitchMode, SessionOptions, SettingsProvider};

pub const PRIMARY: &str = "https://api.example";

/// Call keys used in scripts and the attempt log.
pub const AUTH: &str = "authenticate";
pub const REFRESH: &str = "refresh";
pub const LOGOUT: &str = "logout";

#[derive(Debug, Clone)]
pub struct Attempt {
    pub url: String,
    pub verify: bool,
    pub call: String,
    pub at: Instant,
}

#[derive(Default)]
struct Script {
    responses: HashMap<String, VecDeque<Result<Value, TransportError>>>,
    blocked: HashSet<String>,
    routes: Option<Result<Vec<String>, TransportError>>,
    route_lookups: usize,
    attempts: Vec<Attempt>,
}

/// Test-side handle onto the transport script and its log.
#[derive(Clone, Default)]
pub struct MockHandle(Arc<Mutex<Script>>);

impl MockHandle {
    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.0.lock().expect("script lock")
    }

    /// Queue the next result for `call` (a path, or one of the call keys).
    pub fn push(&self, call: &str, result: Result<Value, TransportError>) {
        self.script()
            .responses
            .entry(call.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn push_ok(&self, call: &str, body: Value) {
        self.push(call, Ok(body));
    }

    pub fn push_remote(&self, call: &str, error: RemoteError) {
        self.push(call, Err(TransportError::Remote(error)));
    }

    /// Every call to `url`, pings included, times out.
    pub fn block(&self, url: &str) {
        self.script().blocked.insert(url.to_string());
    }

    pub fn set_routes(&self, routes: Result<Vec<String>, TransportError>) {
        self.script().routes = Some(routes);
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.script().attempts.clone()
    }

    /// Attempts of `call`, in order.
    pub fn attempts_of(&self, call: &str) -> Vec<Attempt> {
        self.attempts().into_iter().filter(|a| a.call == call).collect()
    }

    pub fn route_lookups(&self) -> usize {
        self.script().route_lookups
    }

    pub fn clear_log(&self) {
        self.script().attempts.clear();
    }
}

pub struct MockTransport {
    url: String,
    verify: bool,
    token: Option<String>,
    refreshes: u32,
    handle: MockHandle,
}

impl MockTransport {
    pub fn new(url: &str) -> (Self, MockHandle) {
        let handle = MockHandle::default();
        let transport = Self {
            url: url.to_string(),
            verify: true,
            token: None,
            refreshes: 0,
            handle: handle.clone(),
        };
        (transport, handle)
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn answer(&self, call: &str) -> Result<Value, TransportError> {
        let mut script = self.handle.script();
        script.attempts.push(Attempt {
            url: self.url.clone(),
            verify: self.verify,
            call: call.to_string(),
            at: Instant::now(),
        });
        if script.blocked.contains(&self.url) {
            return Err(TransportError::Timeout);
        }
        match script.responses.get_mut(call).and_then(VecDeque::pop_front) {
            Some(result) => result,
            None => Ok(json!({ "Code": 1000 })),
        }
    }
}

impl Transport for MockTransport {
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
        self.answer(path)
    }

    async fn authenticate(&mut self, username: &str, _password: &str) -> Result<(), TransportError> {
        self.answer(AUTH)?;
        self.token = Some(format!("token-{username}"));
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), TransportError> {
        self.answer(REFRESH)?;
        self.refreshes += 1;
        self.token = Some(format!("refreshed-{}", self.refreshes));
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), TransportError> {
        self.answer(LOGOUT)?;
        self.token = None;
        Ok(())
    }

    async fn alternate_routes(&mut self) -> Result<Vec<String>, TransportError> {
        let mut script = self.handle.script();
        script.route_lookups += 1;
        script.routes.clone().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn dump(&self) -> Value {
        json!({ "token": self.token })
    }

    fn restore(&mut self, state: &Value) -> Result<(), TransportError> {
        match state.get("token").and_then(Value::as_str) {
            Some(token) => {
                self.token = Some(token.to_string());
                Ok(())
            }
            None => Err(TransportError::Unknown("no token in session state".into())),
        }
    }

    fn reset(&mut self, api_url: &str) {
        self.url = api_url.to_string();
        self.token = None;
    }
}

/// Settings the tests can flip after the session has been built.
#[derive(Default)]
pub struct TestSettings {
    routing: AtomicBool,
    killswitch: Mutex<KillswitchMode>,
}

impl TestSettings {
    pub fn set_routing(&self, enabled: bool) {
        self.routing.store(enabled, Ordering::SeqCst);
    }

    pub fn set_killswitch(&self, mode: KillswitchMode) {
        *self.killswitch.lock().expect("settings lock") = mode;
    }
}

impl SettingsProvider for TestSettings {
    fn alternate_routing_enabled(&self) -> bool {
        self.routing.load(Ordering::SeqCst)
    }

    fn killswitch(&self) -> KillswitchMode {
        *self.killswitch.lock().expect("settings lock")
    }
}

pub type TestSession = ApiSession<MockTransport, Arc<MemoryStore>>;

pub struct Harness {
    pub mock: MockHandle,
    pub secrets: Arc<MemoryStore>,
    pub settings: Arc<TestSettings>,
    pub routes: SharedRoutes,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            mock: MockHandle::default(),
            secrets: Arc::new(MemoryStore::new()),
            settings: Arc::new(TestSettings::default()),
            routes: SharedRoutes::default(),
            dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    /// Build a session over a fresh mock transport sharing this harness's
    /// store, settings, route memory and cache directory.
    pub fn session(&mut self) -> TestSession {
        let (transport, mock) = MockTransport::new(PRIMARY);
        self.mock = mock;
        let options = SessionOptions::new(self.dir.path())
            .with_routes(self.routes.clone())
            .with_rng_seed(42);
        ApiSession::new(transport, self.secrets.clone(), self.settings.clone(), options)
    }

    pub fn remembered_alternate(&self) -> Option<String> {
        self.routes
            .lock()
            .expect("routes lock")
            .alternate()
            .map(str::to_string)
    }
}

/// Authenticated session with its cache warm-up already drained from the log.
pub async fn logged_in(harness: &mut Harness) -> TestSession {
    let mut session = harness.session();
    assert!(session.authenticate("alice", "secret").await.expect("login"));
    harness.mock.clear_log();
    session
}

pub fn remote(code: u32) -> RemoteError {
    RemoteError::new(code, format!("error {code}"))
}

pub fn logicals(names: &[&str]) -> Value {
    let servers: Vec<Value> = names
        .iter()
        .enumerate()
        .map(|(i, name)| json!({ "ID": format!("id-{i}"), "Name": name, "Load": 10, "Status": 1 }))
        .collect();
    json!({ "Code": 1000, "LogicalServers": servers })
}
