//! Persistent session credentials.
//!
//! Three keyring entries are used:
//! 1. `identity` (username)
//! 2. `session-material` (transport session state and the API URL it belongs to)
//! 3. `vpn-material` (VPN username, password and tier)
//!
//! Entries 1 and 2 live and die together: if either is missing on load,
//! both are deleted. Entry 3 may exist on its own, in which case it can
//! still be used to connect but not to call the API.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::credentials::{SecretStore, SecretStoreError};
use crate::api::ApiError;

pub const KEY_IDENTITY: &str = "identity";
pub const KEY_SESSION_MATERIAL: &str = "session-material";
pub const KEY_VPN_MATERIAL: &str = "vpn-material";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMaterial {
    pub api_url: String,
    pub state: Value,
}

/// VPN account credentials, usable offline to bring up a connection.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct VpnCredentials {
    pub username: String,
    pub password: String,
    pub tier: u8,
}

impl std::fmt::Debug for VpnCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VpnCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tier", &self.tier)
            .finish()
    }
}

#[derive(Deserialize)]
struct VpnInfoResponse {
    #[serde(rename = "VPN")]
    vpn: VpnInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VpnInfo {
    name: String,
    password: String,
    max_tier: u8,
}

impl VpnCredentials {
    /// Extract the credentials from a `/vpn` response.
    pub fn from_vpn_response(body: &Value) -> Result<Self, ApiError> {
        let info = VpnInfoResponse::deserialize(body)
            .map_err(|e| ApiError::InvalidResponse(format!("/vpn: {e}")))?;
        Ok(Self {
            username: info.vpn.name,
            password: info.vpn.password,
            tier: info.vpn.max_tier,
        })
    }
}

/// An identity together with its session material.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub username: String,
    pub material: SessionMaterial,
}

pub struct SessionStore<S> {
    store: S,
}

impl<S: SecretStore> SessionStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Load the stored session.
    ///
    /// A half-present pair is deleted. A session issued for an endpoint
    /// that is neither `primary_url` nor `alternate_url` is not reused but
    /// stays in the store.
    pub fn load(
        &self,
        primary_url: &str,
        alternate_url: Option<&str>,
    ) -> Result<Option<StoredSession>, ApiError> {
        let Some(identity_raw) = self.get_raw(KEY_IDENTITY)? else {
            debug!("No stored identity");
            self.clear_session()?;
            return Ok(None);
        };
        let Some(material_raw) = self.get_raw(KEY_SESSION_MATERIAL)? else {
            info!("Stored identity has no session material, clearing both");
            self.clear_session()?;
            return Ok(None);
        };

        let material: SessionMaterial = parse(KEY_SESSION_MATERIAL, &material_raw)?;
        let known_endpoint = material.api_url == primary_url
            || alternate_url.is_some_and(|alternate| alternate == material.api_url);
        if !known_endpoint {
            info!(api_url = %material.api_url, "Stored session belongs to a different API, not reusing it");
            return Ok(None);
        }

        let identity: Identity = parse(KEY_IDENTITY, &identity_raw)?;
        Ok(Some(StoredSession {
            username: identity.username,
            material,
        }))
    }

    /// Persist a new session. Session material is written before the
    /// identity so that an identity never exists without its material.
    pub fn save(&self, session: &StoredSession) -> Result<(), ApiError> {
        self.save_material(&session.material)?;
        let identity = Identity {
            username: session.username.clone(),
        };
        self.set_json(KEY_IDENTITY, &identity)
    }

    pub fn save_material(&self, material: &SessionMaterial) -> Result<(), ApiError> {
        self.set_json(KEY_SESSION_MATERIAL, material)
    }

    /// Delete session material and identity. Missing entries are fine.
    pub fn clear_session(&self) -> Result<(), ApiError> {
        self.delete(KEY_SESSION_MATERIAL)?;
        self.delete(KEY_IDENTITY)
    }

    pub fn clear_vpn_material(&self) -> Result<(), ApiError> {
        self.delete(KEY_VPN_MATERIAL)
    }

    pub fn load_vpn_material(&self) -> Result<Option<VpnCredentials>, ApiError> {
        match self.get_raw(KEY_VPN_MATERIAL)? {
            Some(raw) => parse(KEY_VPN_MATERIAL, &raw).map(Some),
            None => Ok(None),
        }
    }

    pub fn save_vpn_material(&self, credentials: &VpnCredentials) -> Result<(), ApiError> {
        self.set_json(KEY_VPN_MATERIAL, credentials)
    }

    fn get_raw(&self, key: &str) -> Result<Option<String>, ApiError> {
        match self.store.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(SecretStoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ApiError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| ApiError::InvalidStoredData(format!("{key}: {e}")))?;
        self.store.set(key, &raw)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), ApiError> {
        match self.store.delete(key) {
            Ok(()) | Err(SecretStoreError::NotFound(_)) => Ok(()),
            Err(e) => {
                warn!(key, error = %e, "Failed to delete keyring entry");
                Err(e.into())
            }
        }
    }
}

fn parse<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, ApiError> {
    serde_json::from_str(raw).map_err(|e| ApiError::InvalidStoredData(format!("{key}: {e}")))
}
