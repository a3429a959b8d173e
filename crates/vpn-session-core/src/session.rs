//! The API session orchestrator.
//!
//! `ApiSession` owns the transport handle, the persisted credentials and
//! the four cached resources. Every API call goes through
//! [`ApiSession::call_with_recovery`], which picks the endpoint, runs the
//! attempt and then retries, refreshes credentials or falls back to
//! alternate routes depending on how it failed.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{
    ApiCall, ApiError, Decision, RemoteError, RouteMemory, SharedRoutes, Strategy, Transport,
    TransportError, TransportProbe,
};
use crate::auth::{SecretStore, SessionMaterial, SessionStore, StoredSession, VpnCredentials};
use crate::cache::window::{
    CLIENT_CONFIG_TTL_MINUTES, LOADS_TTL_MINUTES, LOGICALS_TTL_MINUTES,
    STREAMING_ICONS_TTL_MINUTES, STREAMING_SERVICES_TTL_MINUTES,
};
use crate::cache::{manager, CachePaths, CacheWindow, RefreshPlan};
use crate::config::SettingsProvider;
use crate::models::{ClientConfig, ServerList, ServerLoads, StreamingIcons, StreamingServices};

// ============================================================================
// Constants
// ============================================================================

const LOGICALS_PATH: &str = "/vpn/logicals";
const LOADS_PATH: &str = "/vpn/loads";
const CLIENT_CONFIG_PATH: &str = "/vpn/clientconfig";
const STREAMING_SERVICES_PATH: &str = "/vpn/streamingservices";
const VPN_INFO_PATH: &str = "/vpn";

// ============================================================================
// Session state
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated { username: String },
}

/// Construction options for [`ApiSession`].
pub struct SessionOptions {
    pub cache_paths: CachePaths,
    pub routes: SharedRoutes,
    /// Fixed seed for backoff and cache jitter. Random when unset.
    pub rng_seed: Option<u64>,
}

impl SessionOptions {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            cache_paths: CachePaths::in_dir(cache_dir),
            routes: RouteMemory::global(),
            rng_seed: None,
        }
    }

    pub fn with_routes(mut self, routes: SharedRoutes) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

pub struct ApiSession<T, S> {
    probe: TransportProbe<T>,
    store: SessionStore<S>,
    settings: Arc<dyn SettingsProvider>,
    state: SessionState,
    rng: StdRng,
    paths: CachePaths,
    vpn_credentials: Option<VpnCredentials>,
    servers: Option<CacheWindow<ServerList>>,
    client_config: Option<CacheWindow<ClientConfig>>,
    streaming: Option<CacheWindow<StreamingServices>>,
    streaming_icons: Option<CacheWindow<StreamingIcons>>,
}

impl<T: Transport, S: SecretStore> ApiSession<T, S> {
    /// Wrap `transport`, whose current URL becomes the primary endpoint,
    /// and restore a stored session if there is one.
    pub fn new(
        transport: T,
        secrets: S,
        settings: Arc<dyn SettingsProvider>,
        options: SessionOptions,
    ) -> Self {
        let primary_url = transport.api_url().to_string();
        let rng = match options.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut session = Self {
            probe: TransportProbe::new(transport, &primary_url, options.routes),
            store: SessionStore::new(secrets),
            settings,
            state: SessionState::Unauthenticated,
            rng,
            paths: options.cache_paths,
            vpn_credentials: None,
            servers: None,
            client_config: None,
            streaming: None,
            streaming_icons: None,
        };
        session.restore_stored_session();
        session
    }

    fn restore_stored_session(&mut self) {
        let alternate = self.probe.known_alternate();
        let stored = match self.store.load(self.probe.primary_url(), alternate.as_deref()) {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("No stored session found");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Couldn't load session, you'll have to login again");
                return;
            }
        };

        match self.probe.transport_mut().restore(&stored.material.state) {
            Ok(()) => {
                debug!(username = %stored.username, "Session restored");
                self.state = SessionState::Authenticated {
                    username: stored.username,
                };
            }
            Err(e) => warn!(error = %e, "Stored session material could not be restored"),
        }
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.state, SessionState::Authenticated { .. })
    }

    pub fn ensure_valid(&self) -> Result<(), ApiError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ApiError::SessionInvalid)
        }
    }

    pub fn username(&self) -> Result<&str, ApiError> {
        match &self.state {
            SessionState::Authenticated { username } => Ok(username.as_str()),
            SessionState::Unauthenticated => Err(ApiError::SessionInvalid),
        }
    }

    /// The endpoint the next call will start from.
    pub fn current_url(&self) -> &str {
        self.probe.current_url()
    }

    pub fn transport(&self) -> &T {
        self.probe.transport()
    }

    /// Log in and persist the new session.
    ///
    /// Returns `Ok(false)` when the API rejected the attempt with 401/403,
    /// in which case nothing is persisted.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<bool, ApiError> {
        if self.is_valid() {
            return Err(ApiError::SessionAlreadyActive);
        }

        let call = ApiCall::Authenticate {
            username: username.to_string(),
            password: password.to_string(),
        };
        if self.call_with_recovery(&call, Strategy::Authenticate).await?.is_none() {
            info!(username, "Authentication was rejected");
            return Ok(false);
        }

        let stored = StoredSession {
            username: username.to_string(),
            material: self.current_material(),
        };
        if let Err(e) = self.store.save(&stored) {
            warn!(error = %e, "Failed to store session, discarding it");
            if let Err(e) = self.store.clear_session() {
                warn!(error = %e, "Failed to clear partially stored session");
            }
            self.probe.reset();
            return Err(e);
        }

        info!(username, "Login successful");
        self.state = SessionState::Authenticated {
            username: username.to_string(),
        };
        self.warm_up().await;
        Ok(true)
    }

    /// Exchange the refresh material for a new session.
    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        self.refresh_boxed().await
    }

    // Boxed so the refresh inside call recovery does not make the future
    // types recursive.
    fn refresh_boxed(&mut self) -> BoxFuture<'_, Result<(), ApiError>> {
        async move {
            self.ensure_valid()?;
            self.call_with_recovery(&ApiCall::Refresh, Strategy::Refresh).await?;
            let material = self.current_material();
            self.store.save_material(&material)?;
            info!("Session refreshed");
            Ok(())
        }
        .boxed()
    }

    /// Tear the session down. Never fails.
    pub async fn logout(&mut self) {
        let had_session = self.is_valid();

        if let Err(e) = self.store.clear_vpn_material() {
            warn!(error = %e, "Failed to clear VPN credentials");
        }
        if let Err(e) = self.store.clear_session() {
            warn!(error = %e, "Failed to clear stored session");
        }
        self.state = SessionState::Unauthenticated;
        self.vpn_credentials = None;

        if had_session {
            if let Err(e) = self.call_with_recovery(&ApiCall::Logout, Strategy::Logout).await {
                info!(error = %e, "Unable to logout via API");
            }
        }

        self.servers = None;
        self.client_config = None;
        self.streaming = None;
        self.streaming_icons = None;
        for path in self.paths.all() {
            if let Err(e) = manager::remove(path) {
                warn!(error = %e, "Failed to remove cache file");
            }
        }

        self.probe.forget_alternate();
        self.probe.reset();
        info!("Logged out");
    }

    /// Session material as it should be persisted. Always recorded against
    /// the primary endpoint.
    fn current_material(&self) -> SessionMaterial {
        SessionMaterial {
            api_url: self.probe.primary_url().to_string(),
            state: self.probe.transport().dump(),
        }
    }

    async fn warm_up(&mut self) {
        let refreshes = [
            ("servers", self.update_servers_if_needed(false).await),
            ("client config", self.update_client_config_if_needed(false).await),
            ("streaming services", self.update_streaming_if_needed(false).await),
        ];
        for (cache, result) in refreshes {
            if let Err(e) = result {
                warn!(cache, error = %e, "Could not warm cache after login");
            }
        }
        self.update_streaming_icons_if_needed(false);

        if let Err(e) = self.vpn_credentials().await {
            warn!(error = %e, "Could not cache VPN credentials after login");
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Authenticated GET of `path`.
    pub async fn call(&mut self, path: &str) -> Result<Value, ApiError> {
        self.fetch(path).await
    }

    /// Run `call` with the recovery rules of `strategy`.
    ///
    /// `Ok(None)` means the strategy chose to ignore the remote error.
    pub async fn call_with_recovery(
        &mut self,
        call: &ApiCall,
        strategy: Strategy,
    ) -> Result<Option<Value>, ApiError> {
        let alternate_routing = self.settings.alternate_routing_enabled();
        self.probe.select_endpoint(alternate_routing);

        match self.probe.attempt(call).await {
            Ok(body) => Ok(Some(body)),
            Err(TransportError::Remote(error)) => self.recover_remote(call, strategy, error).await,
            Err(error) if error.is_route_failure() => {
                warn!(
                    url = %self.probe.current_url(),
                    call = call.name(),
                    error = %error,
                    "API call failed"
                );
                if !alternate_routing {
                    return Err(ApiError::from_transport(error));
                }
                self.fallback(call, strategy).await
            }
            Err(error) => {
                warn!(call = call.name(), error = %error, "Unknown transport failure");
                Err(ApiError::from_transport(error))
            }
        }
    }

    async fn recover_remote(
        &mut self,
        call: &ApiCall,
        strategy: Strategy,
        error: RemoteError,
    ) -> Result<Option<Value>, ApiError> {
        info!(code = error.code, call = call.name(), message = %error.message, "Handle API error");

        match strategy.decide(&error, &mut self.rng) {
            Decision::RetryImmediately => {
                info!(call = call.name(), "Retrying immediately");
                self.retry_once(call, Some(strategy)).await
            }
            Decision::RetryAfter(wait) => {
                info!(call = call.name(), wait_secs = wait.as_secs_f64(), "Retrying after backoff");
                tokio::time::sleep(wait).await;
                self.retry_once(call, Some(strategy)).await
            }
            Decision::RetryAfterCredentialRefresh => {
                info!(call = call.name(), "Session expired, refreshing before retry");
                self.refresh_boxed().await?;
                self.retry_once(call, None).await
            }
            Decision::Ignore => {
                info!(code = error.code, call = call.name(), "Ignored API error");
                Ok(None)
            }
            Decision::Fail(mapped) => Err(mapped),
        }
    }

    /// Repeat `call` on the current route exactly once. A remote failure
    /// keeps its code unless `remap` gives it a fatal mapping.
    async fn retry_once(
        &mut self,
        call: &ApiCall,
        remap: Option<Strategy>,
    ) -> Result<Option<Value>, ApiError> {
        match self.probe.attempt(call).await {
            Ok(body) => Ok(Some(body)),
            Err(TransportError::Remote(error)) => Err(match remap {
                Some(strategy) => strategy.remap(&error),
                None => ApiError::from_remote(&error),
            }),
            Err(error) => Err(ApiError::from_transport(error)),
        }
    }

    /// Try the alternate routes in order after the current endpoint failed.
    async fn fallback(&mut self, call: &ApiCall, strategy: Strategy) -> Result<Option<Value>, ApiError> {
        let routes = self.probe.list_alternate_routes().await;

        if self.probe.probe_reachable().await {
            info!(url = %self.probe.current_url(), "API is reachable, not trying alternative routes");
            return Err(ApiError::ConnectivityExhausted);
        }
        let Some(routes) = routes.filter(|routes| !routes.is_empty()) else {
            info!("No alternative routes available");
            self.back_to_primary();
            return Err(ApiError::ConnectivityExhausted);
        };

        for route in routes {
            let url = route_url(&route);
            info!(url = %url, "Trying alternative route");
            self.probe.use_route(&url);

            match self.probe.attempt(call).await {
                Ok(body) => {
                    self.probe.remember_current_route();
                    return Ok(Some(body));
                }
                Err(TransportError::Remote(error)) => {
                    let result = self.recover_remote(call, strategy, error).await;
                    match &result {
                        Ok(Some(_)) if self.probe.current_url() == url => {
                            self.probe.remember_current_route();
                        }
                        Ok(Some(_)) => {}
                        _ => self.back_to_primary(),
                    }
                    return result;
                }
                Err(error) if error.is_route_failure() => {
                    info!(url = %url, error = %error, "Alternative route failed");
                }
                Err(error) => {
                    warn!(url = %url, error = %error, "Unknown failure on alternative route");
                    self.back_to_primary();
                    return Err(ApiError::from_transport(error));
                }
            }
        }

        info!("All alternative routes failed");
        self.back_to_primary();
        Err(ApiError::ConnectivityExhausted)
    }

    fn back_to_primary(&mut self) {
        let primary = self.probe.primary_url().to_string();
        self.probe.use_route(&primary);
    }

    async fn fetch(&mut self, path: &str) -> Result<Value, ApiError> {
        self.call_with_recovery(&ApiCall::request(path), Strategy::NormalCall)
            .await?
            .ok_or_else(|| ApiError::InvalidResponse(format!("{path}: empty response")))
    }

    // ========================================================================
    // VPN credentials
    // ========================================================================

    /// VPN credentials from memory, the keyring or the API, in that order.
    pub async fn vpn_credentials(&mut self) -> Result<&VpnCredentials, ApiError> {
        let credentials = match self.vpn_credentials.take() {
            Some(credentials) => credentials,
            None => match self.store.load_vpn_material()? {
                Some(credentials) => credentials,
                None => self.fetch_vpn_credentials().await?,
            },
        };
        let credentials: &VpnCredentials = self.vpn_credentials.insert(credentials);
        Ok(credentials)
    }

    async fn fetch_vpn_credentials(&mut self) -> Result<VpnCredentials, ApiError> {
        self.ensure_valid()?;
        let body = self.fetch(VPN_INFO_PATH).await?;
        let credentials = VpnCredentials::from_vpn_response(&body)?;
        if let Err(e) = self.store.save_vpn_material(&credentials) {
            warn!(error = %e, "Failed to store VPN credentials");
        }
        Ok(credentials)
    }

    pub async fn openvpn_udp_ports(&mut self) -> Result<Vec<u16>, ApiError> {
        self.client_config()
            .await
            .openvpn_udp_ports()
            .map(<[u16]>::to_vec)
            .ok_or(ApiError::DefaultPortsNotFound)
    }

    pub async fn openvpn_tcp_ports(&mut self) -> Result<Vec<u16>, ApiError> {
        self.client_config()
            .await
            .openvpn_tcp_ports()
            .map(<[u16]>::to_vec)
            .ok_or(ApiError::DefaultPortsNotFound)
    }

    // ========================================================================
    // Cached resources
    // ========================================================================

    /// Server list, refreshed first if due. Refresh failures leave the
    /// cached copy in place.
    pub async fn servers(&mut self) -> &ServerList {
        if let Err(e) = self.update_servers_if_needed(false).await {
            info!(error = %e, "Could not refresh server list, using cached data");
        }
        let (window, _) = self.servers_window();
        window.body()
    }

    pub async fn client_config(&mut self) -> &ClientConfig {
        if let Err(e) = self.update_client_config_if_needed(false).await {
            info!(error = %e, "Could not refresh client config, using cached data");
        }
        let (window, _) = self.client_config_window();
        window.body()
    }

    /// Streaming services. Also refreshes the icons derived from them.
    pub async fn streaming(&mut self) -> &StreamingServices {
        if let Err(e) = self.update_streaming_if_needed(false).await {
            info!(error = %e, "Could not refresh streaming services, using cached data");
        }
        self.update_streaming_icons_if_needed(false);
        let (window, _) = self.streaming_window();
        window.body()
    }

    pub fn streaming_icons(&mut self) -> &StreamingIcons {
        self.update_streaming_icons_if_needed(false);
        let (window, _) = self.streaming_icons_window();
        window.body()
    }

    /// When the server list was last fetched in full, if ever. Takes
    /// `&mut self` because the cache file is loaded on first access.
    pub fn servers_updated_at(&mut self) -> Option<DateTime<Utc>> {
        let (window, _) = self.servers_window();
        window.last_update()
    }

    pub async fn update_servers_if_needed(&mut self, force: bool) -> Result<RefreshPlan, ApiError> {
        let killswitch = self.settings.killswitch();
        let plan = self.servers_window().0.plan(Utc::now(), killswitch, force);

        match plan {
            RefreshPlan::Skip => return Ok(plan),
            RefreshPlan::Full => {
                let body = self.fetch(LOGICALS_PATH).await?;
                let list = ServerList::from_logicals_response(&body).map_err(invalid(LOGICALS_PATH))?;
                debug!(count = list.len(), "Fetched server list");
                let (window, rng) = self.servers_window();
                window.apply_full(list, Utc::now(), rng);
            }
            RefreshPlan::Partial => {
                let body = self.fetch(LOADS_PATH).await?;
                let loads = ServerLoads::from_response(&body).map_err(invalid(LOADS_PATH))?;
                let (window, rng) = self.servers_window();
                window.apply_partial(
                    |list| {
                        let updated = list.apply_loads(&loads);
                        debug!(updated, "Applied server loads");
                    },
                    Utc::now(),
                    rng,
                );
            }
        }

        persist(self.servers_window().0);
        Ok(plan)
    }

    pub async fn update_client_config_if_needed(&mut self, force: bool) -> Result<RefreshPlan, ApiError> {
        let killswitch = self.settings.killswitch();
        let plan = self.client_config_window().0.plan(Utc::now(), killswitch, force);
        if plan == RefreshPlan::Skip {
            return Ok(plan);
        }

        let body = self.fetch(CLIENT_CONFIG_PATH).await?;
        let config = ClientConfig::from_response(&body).map_err(invalid(CLIENT_CONFIG_PATH))?;
        let (window, rng) = self.client_config_window();
        window.apply_full(config, Utc::now(), rng);
        persist(window);
        Ok(plan)
    }

    pub async fn update_streaming_if_needed(&mut self, force: bool) -> Result<RefreshPlan, ApiError> {
        let killswitch = self.settings.killswitch();
        let plan = self.streaming_window().0.plan(Utc::now(), killswitch, force);
        if plan == RefreshPlan::Skip {
            return Ok(plan);
        }

        let body = self.fetch(STREAMING_SERVICES_PATH).await?;
        let services =
            StreamingServices::from_response(&body).map_err(invalid(STREAMING_SERVICES_PATH))?;
        let (window, rng) = self.streaming_window();
        window.apply_full(services, Utc::now(), rng);
        persist(window);
        Ok(plan)
    }

    /// Rebuild the icon index from the streaming catalog when due. No
    /// network access.
    pub fn update_streaming_icons_if_needed(&mut self, force: bool) -> RefreshPlan {
        let killswitch = self.settings.killswitch();
        let plan = self.streaming_icons_window().0.plan(Utc::now(), killswitch, force);
        if plan == RefreshPlan::Skip {
            return plan;
        }

        let (streaming, _) = self.streaming_window();
        let services = streaming.body();
        if services.is_empty() {
            debug!("No streaming services cached, not building icons");
            return RefreshPlan::Skip;
        }
        let icons = StreamingIcons::from_services(services);

        let (window, rng) = self.streaming_icons_window();
        window.apply_full(icons, Utc::now(), rng);
        persist(window);
        plan
    }

    fn servers_window(&mut self) -> (&mut CacheWindow<ServerList>, &mut StdRng) {
        let path = &self.paths.servers;
        lazy_window(&mut self.servers, &mut self.rng, || {
            CacheWindow::new("servers", path, Duration::minutes(LOGICALS_TTL_MINUTES))
                .with_partial(Duration::minutes(LOADS_TTL_MINUTES))
        })
    }

    fn client_config_window(&mut self) -> (&mut CacheWindow<ClientConfig>, &mut StdRng) {
        let path = &self.paths.client_config;
        lazy_window(&mut self.client_config, &mut self.rng, || {
            CacheWindow::new("client_config", path, Duration::minutes(CLIENT_CONFIG_TTL_MINUTES))
        })
    }

    fn streaming_window(&mut self) -> (&mut CacheWindow<StreamingServices>, &mut StdRng) {
        let path = &self.paths.streaming;
        lazy_window(&mut self.streaming, &mut self.rng, || {
            CacheWindow::new(
                "streaming_services",
                path,
                Duration::minutes(STREAMING_SERVICES_TTL_MINUTES),
            )
        })
    }

    fn streaming_icons_window(&mut self) -> (&mut CacheWindow<StreamingIcons>, &mut StdRng) {
        let path = &self.paths.streaming_icons;
        lazy_window(&mut self.streaming_icons, &mut self.rng, || {
            CacheWindow::new("streaming_icons", path, Duration::minutes(STREAMING_ICONS_TTL_MINUTES))
        })
    }
}

/// Create and load a cache window on first use.
fn lazy_window<'a, B>(
    slot: &'a mut Option<CacheWindow<B>>,
    rng: &'a mut StdRng,
    make: impl FnOnce() -> CacheWindow<B>,
) -> (&'a mut CacheWindow<B>, &'a mut StdRng)
where
    B: Serialize + DeserializeOwned + Default,
{
    let window = slot.get_or_insert_with(|| {
        let mut window = make();
        match window.ensure_loaded(&mut *rng) {
            Ok(state) => debug!(cache = window.name(), ?state, "Cache window opened"),
            Err(e) => warn!(cache = window.name(), error = %e, "Cache file unreadable, will fetch"),
        }
        window
    });
    (window, rng)
}

fn persist<B>(window: &CacheWindow<B>)
where
    B: Serialize + DeserializeOwned + Default,
{
    if let Err(e) = window.persist() {
        warn!(cache = window.name(), error = %e, "Failed to save cache");
    }
}

fn invalid(path: &'static str) -> impl Fn(serde_json::Error) -> ApiError {
    move |e| ApiError::InvalidResponse(format!("{path}: {e}"))
}

/// Alternate routes are bare hosts; full URLs are taken as they are.
fn route_url(route: &str) -> String {
    if route.starts_with("https://") || route.starts_with("http://") {
        route.to_string()
    } else {
        format!("https://{route}")
    }
}
