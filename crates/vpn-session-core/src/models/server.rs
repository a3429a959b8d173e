//! VPN server list ("logicals") and their load figures.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A logical VPN server as listed by `/vpn/logicals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogicalServer {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub entry_country: String,
    #[serde(default)]
    pub exit_country: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub tier: u8,
    #[serde(default)]
    pub features: u32,
    #[serde(default)]
    pub load: u8,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub status: u8,
    #[serde(default)]
    pub servers: Vec<PhysicalServer>,
}

impl LogicalServer {
    pub fn is_online(&self) -> bool {
        self.status == 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PhysicalServer {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "EntryIP")]
    pub entry_ip: String,
    #[serde(rename = "ExitIP")]
    pub exit_ip: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub status: u8,
}

#[derive(Debug, Deserialize)]
struct LogicalsResponse {
    #[serde(rename = "LogicalServers")]
    logical_servers: Vec<LogicalServer>,
}

/// Load figures from `/vpn/loads`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServerLoad {
    #[serde(rename = "ID")]
    id: String,
    load: u8,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    status: Option<u8>,
}

/// Parsed `/vpn/loads` response.
#[derive(Debug, Deserialize)]
pub struct ServerLoads {
    #[serde(rename = "LogicalServers")]
    logical_servers: Vec<ServerLoad>,
}

impl ServerLoads {
    pub fn from_response(body: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(body)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerList {
    pub logicals: Vec<LogicalServer>,
}

impl ServerList {
    pub fn from_logicals_response(body: &Value) -> Result<Self, serde_json::Error> {
        let parsed = LogicalsResponse::deserialize(body)?;
        Ok(Self {
            logicals: parsed.logical_servers,
        })
    }

    /// Apply load figures in place. Returns how many servers changed.
    pub fn apply_loads(&mut self, loads: &ServerLoads) -> usize {
        let mut updated = 0;
        for load in &loads.logical_servers {
            if let Some(server) = self.logicals.iter_mut().find(|s| s.id == load.id) {
                server.load = load.load;
                if let Some(score) = load.score {
                    server.score = score;
                }
                if let Some(status) = load.status {
                    server.status = status;
                }
                updated += 1;
            }
        }
        updated
    }

    pub fn get(&self, name: &str) -> Option<&LogicalServer> {
        self.logicals.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.logicals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logicals.is_empty()
    }
}
