//! Local caching of API resources for offline and degraded operation.
//!
//! Four resources are cached: the server list (with a faster load-only
//! refresh), the client configuration, the streaming-service catalog and
//! the streaming-service icons. Each one lives in a `CacheWindow` that
//! knows when it is due and how to persist itself as a whole JSON file.

pub mod manager;
pub mod window;

pub use manager::{age_display, CacheError, CachePaths, CachedData};
pub use window::{next_due, CacheWindow, LoadState, RefreshPlan, JITTER_FRACTION};
