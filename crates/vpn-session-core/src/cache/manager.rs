use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Cache file names inside the cache directory
const SERVERS_FILE: &str = "cached_serverlist.json";
const CLIENT_CONFIG_FILE: &str = "clientconfig.json";
const STREAMING_FILE: &str = "streaming_services.json";
const STREAMING_ICONS_FILE: &str = "streaming_icons.json";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache file {path} could not be accessed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache data could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A resource body as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
    /// Last partial update (server loads), if the resource has one.
    #[serde(default)]
    pub partial_cached_at: Option<DateTime<Utc>>,
}

/// Human readable age of a cache entry: "just now", "5m ago", "2h ago", "3d ago".
pub fn age_display(cached_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - cached_at).num_minutes();
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = (minutes + 30) / 60;
        format!("{}h ago", hours)
    } else {
        let days = (minutes + 720) / 1440;
        format!("{}d ago", days)
    }
}

/// Read a cache file. A missing file is `Ok(None)`.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<CachedData<T>>, CacheError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| CacheError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Replace a cache file as a whole: write a sibling temp file, then rename.
pub fn save<T: Serialize>(path: &Path, cached: &CachedData<T>) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let contents = serde_json::to_string(cached)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    debug!(path = %path.display(), "Cache file written");
    Ok(())
}

/// Delete a cache file. A missing file is fine.
pub fn remove(path: &Path) -> Result<(), CacheError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CacheError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Backing files of the four cached resources.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePaths {
    pub servers: PathBuf,
    pub client_config: PathBuf,
    pub streaming: PathBuf,
    pub streaming_icons: PathBuf,
}

impl CachePaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            servers: dir.join(SERVERS_FILE),
            client_config: dir.join(CLIENT_CONFIG_FILE),
            streaming: dir.join(STREAMING_FILE),
            streaming_icons: dir.join(STREAMING_ICONS_FILE),
        }
    }

    pub fn all(&self) -> [&Path; 4] {
        [
            &self.servers,
            &self.client_config,
            &self.streaming,
            &self.streaming_icons,
        ]
    }
}
