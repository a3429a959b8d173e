//! Per-call error handling strategies.
//!
//! Every API call runs under a [`Strategy`]. When the API answers with an
//! application error, the strategy turns it into a [`Decision`] which the
//! session orchestrator carries out. Decisions are a pure function of the
//! strategy, the error code, the response headers and the supplied random
//! source.

use std::time::Duration;

use rand::Rng;

use super::error::{ApiError, RemoteError};

/// Minimum wait for a 429 without a usable `Retry-After` header, in seconds
const RATE_LIMIT_MIN_WAIT_SECS: f64 = 2.0;

/// Upper bound (exclusive) of the 429 wait without `Retry-After`, in seconds
const RATE_LIMIT_MAX_WAIT_SECS: f64 = 20.0;

/// Minimum wait after a 503, in seconds
const UNAVAILABLE_MIN_WAIT_SECS: f64 = 2.0;

/// Upper bound (exclusive) of the wait after a 503, in seconds
const UNAVAILABLE_MAX_WAIT_SECS: f64 = 10.0;

pub const CODE_UNAUTHORIZED: u32 = 401;
pub const CODE_FORBIDDEN: u32 = 403;
pub const CODE_TOO_MANY_REQUESTS: u32 = 429;
pub const CODE_SERVICE_UNAVAILABLE: u32 = 503;
pub const CODE_INVALID_APP_VERSION: u32 = 5002;
pub const CODE_APP_VERSION_OUTDATED: u32 = 5003;
pub const CODE_INCORRECT_CREDENTIALS: u32 = 8002;
pub const CODE_REFRESH_TOKEN_INVALID: u32 = 10013;

/// The error handling variant a call site runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    NormalCall,
    Authenticate,
    Logout,
    Refresh,
}

/// What to do after a remote error.
#[derive(Debug)]
pub enum Decision {
    RetryImmediately,
    RetryAfter(Duration),
    RetryAfterCredentialRefresh,
    /// Soft success without a payload.
    Ignore,
    Fail(ApiError),
}

impl Strategy {
    /// Classify a remote application error.
    pub fn decide<R: Rng>(self, error: &RemoteError, rng: &mut R) -> Decision {
        if let Some(decision) = self.override_for(error) {
            return decision;
        }

        match error.code {
            CODE_TOO_MANY_REQUESTS => match retry_after_header(error) {
                Some(0) => Decision::RetryImmediately,
                Some(secs) => Decision::RetryAfter(Duration::from_secs(secs)),
                None => Decision::RetryAfter(random_wait(
                    rng,
                    RATE_LIMIT_MIN_WAIT_SECS,
                    RATE_LIMIT_MAX_WAIT_SECS,
                )),
            },
            CODE_SERVICE_UNAVAILABLE => Decision::RetryAfter(random_wait(
                rng,
                UNAVAILABLE_MIN_WAIT_SECS,
                UNAVAILABLE_MAX_WAIT_SECS,
            )),
            _ => Decision::Fail(ApiError::from_remote(error)),
        }
    }

    /// The domain error for a remote error that is not going to be retried.
    ///
    /// Used after the single permitted retry: only the strategy's fatal
    /// mappings apply, everything else keeps its code.
    pub fn remap(self, error: &RemoteError) -> ApiError {
        match self.override_for(error) {
            Some(Decision::Fail(mapped)) => mapped,
            _ => ApiError::from_remote(error),
        }
    }

    fn override_for(self, error: &RemoteError) -> Option<Decision> {
        let message = || error.message.clone();
        let decision = match (self, error.code) {
            (Strategy::NormalCall, CODE_UNAUTHORIZED) => Decision::RetryAfterCredentialRefresh,
            (Strategy::NormalCall, CODE_FORBIDDEN) => Decision::Fail(ApiError::AccessForbidden(message())),
            (Strategy::NormalCall, CODE_INVALID_APP_VERSION) => {
                Decision::Fail(ApiError::InvalidAppVersion(message()))
            }
            (Strategy::NormalCall, CODE_APP_VERSION_OUTDATED) => {
                Decision::Fail(ApiError::AppVersionOutdated(message()))
            }
            (Strategy::NormalCall, CODE_REFRESH_TOKEN_INVALID) => {
                Decision::Fail(ApiError::RefreshTokenInvalid(message()))
            }
            (Strategy::Authenticate, CODE_UNAUTHORIZED | CODE_FORBIDDEN) => Decision::Ignore,
            (Strategy::Authenticate, CODE_INCORRECT_CREDENTIALS) => {
                Decision::Fail(ApiError::IncorrectCredentials(message()))
            }
            (Strategy::Logout, CODE_UNAUTHORIZED) => Decision::Ignore,
            _ => return None,
        };
        Some(decision)
    }
}

fn retry_after_header(error: &RemoteError) -> Option<u64> {
    error.header("retry-after")?.trim().parse().ok()
}

fn random_wait<R: Rng>(rng: &mut R, min_secs: f64, max_secs: f64) -> Duration {
    Duration::from_secs_f64(rng.gen_range(min_secs..max_secs))
}
