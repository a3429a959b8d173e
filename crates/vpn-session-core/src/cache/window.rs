//! Jittered refresh windows for cached resources.
//!
//! Every resource is re-fetched once its base TTL has elapsed, scaled by a
//! random factor in `[1 - 0.22, 1 + 0.22)` so that clients started at the
//! same time do not refresh in lockstep.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use super::manager::{self, CacheError, CachedData};
use crate::config::KillswitchMode;

/// Random +/- fraction applied to every TTL
pub const JITTER_FRACTION: f64 = 0.22;

/// Full server list refresh
pub const LOGICALS_TTL_MINUTES: i64 = 180;
/// Server load figures refresh
pub const LOADS_TTL_MINUTES: i64 = 15;
pub const CLIENT_CONFIG_TTL_MINUTES: i64 = 180;
pub const STREAMING_SERVICES_TTL_MINUTES: i64 = 180;
pub const STREAMING_ICONS_TTL_MINUTES: i64 = 480;

/// `last_update + base_ttl * (1 + JITTER_FRACTION * (2u - 1))` for `u` in `[0, 1)`.
pub fn next_due(last_update: DateTime<Utc>, base_ttl: Duration, u: f64) -> DateTime<Utc> {
    let factor = 1.0 + JITTER_FRACTION * (2.0 * u - 1.0);
    let millis = (base_ttl.num_milliseconds() as f64 * factor).round() as i64;
    last_update + Duration::milliseconds(millis)
}

/// What a refresh should fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPlan {
    Skip,
    Full,
    /// Only the cheaper sub-resource (server loads).
    Partial,
}

/// Whether `ensure_loaded` found something on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    FromDisk,
    Empty,
    AlreadyLoaded,
}

#[derive(Debug, Clone)]
struct Schedule {
    ttl: Duration,
    last_update: Option<DateTime<Utc>>,
    next_due: Option<DateTime<Utc>>,
}

impl Schedule {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last_update: None,
            next_due: None,
        }
    }

    fn reschedule<R: Rng>(&mut self, rng: &mut R) {
        self.next_due = self
            .last_update
            .map(|last| next_due(last, self.ttl, rng.gen::<f64>()));
    }

    /// Never-updated resources are always due.
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due.map_or(true, |due| due < now)
    }
}

/// A cached resource body with its refresh schedule and backing file.
#[derive(Debug)]
pub struct CacheWindow<T> {
    name: &'static str,
    path: PathBuf,
    body: T,
    full: Schedule,
    partial: Option<Schedule>,
    loaded: bool,
}

impl<T> CacheWindow<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(name: &'static str, path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            name,
            path: path.into(),
            body: T::default(),
            full: Schedule::new(ttl),
            partial: None,
            loaded: false,
        }
    }

    /// Add a cheaper partial refresh on its own TTL.
    pub fn with_partial(mut self, ttl: Duration) -> Self {
        self.partial = Some(Schedule::new(ttl));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn body(&self) -> &T {
        &self.body
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.full.last_update
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.full.next_due
    }

    pub fn partial_next_due(&self) -> Option<DateTime<Utc>> {
        self.partial.as_ref().and_then(|p| p.next_due)
    }

    /// Load the body from the backing file on first use.
    ///
    /// A corrupt file leaves an empty body that is due for refresh, and is
    /// reported as an error so callers can tell it apart from a missing one.
    pub fn ensure_loaded<R: Rng>(&mut self, rng: &mut R) -> Result<LoadState, CacheError> {
        if self.loaded {
            return Ok(LoadState::AlreadyLoaded);
        }
        self.loaded = true;

        let state = match manager::load::<T>(&self.path)? {
            Some(cached) => {
                self.body = cached.data;
                self.full.last_update = Some(cached.cached_at);
                if let Some(partial) = self.partial.as_mut() {
                    partial.last_update = Some(cached.partial_cached_at.unwrap_or(cached.cached_at));
                }
                LoadState::FromDisk
            }
            None => {
                info!(cache = self.name, "Could not load cache, will fetch");
                LoadState::Empty
            }
        };
        self.reschedule(rng);
        Ok(state)
    }

    /// Decide what a refresh at `now` should do.
    pub fn plan(&self, now: DateTime<Utc>, killswitch: KillswitchMode, force: bool) -> RefreshPlan {
        if killswitch == KillswitchMode::Hard && !force {
            debug!(cache = self.name, "Kill switch blocks API calls, not refreshing");
            return RefreshPlan::Skip;
        }
        if force || self.full.is_due(now) {
            RefreshPlan::Full
        } else if self.partial.as_ref().is_some_and(|p| p.is_due(now)) {
            RefreshPlan::Partial
        } else {
            RefreshPlan::Skip
        }
    }

    /// Replace the body after a full fetch.
    pub fn apply_full<R: Rng>(&mut self, body: T, now: DateTime<Utc>, rng: &mut R) {
        self.body = body;
        self.loaded = true;
        self.full.last_update = Some(now);
        if let Some(partial) = self.partial.as_mut() {
            partial.last_update = Some(now);
        }
        self.reschedule(rng);
    }

    /// Patch the body after a partial fetch.
    pub fn apply_partial<R: Rng>(&mut self, update: impl FnOnce(&mut T), now: DateTime<Utc>, rng: &mut R) {
        update(&mut self.body);
        if let Some(partial) = self.partial.as_mut() {
            partial.last_update = Some(now);
        }
        self.reschedule(rng);
    }

    /// Write the body and timestamps to the backing file.
    pub fn persist(&self) -> Result<(), CacheError> {
        let Some(cached_at) = self.full.last_update else {
            return Ok(());
        };
        let cached = CachedData {
            data: &self.body,
            cached_at,
            partial_cached_at: self.partial.as_ref().and_then(|p| p.last_update),
        };
        manager::save(&self.path, &cached)
    }

    fn reschedule<R: Rng>(&mut self, rng: &mut R) {
        self.full.reschedule(rng);
        if let Some(partial) = self.partial.as_mut() {
            partial.reschedule(rng);
        }
    }
}
