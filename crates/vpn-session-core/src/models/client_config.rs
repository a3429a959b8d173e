use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client configuration from `/vpn/clientconfig`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientConfig {
    #[serde(default)]
    pub default_ports: Option<DefaultPorts>,
    #[serde(default, rename = "HolesIPs")]
    pub holes_ips: Vec<String>,
    #[serde(default)]
    pub server_refresh_interval: Option<u32>,
    #[serde(default)]
    pub feature_flags: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultPorts {
    #[serde(default, rename = "OpenVPN")]
    pub openvpn: Option<OpenVpnPorts>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenVpnPorts {
    #[serde(default, rename = "UDP")]
    pub udp: Vec<u16>,
    #[serde(default, rename = "TCP")]
    pub tcp: Vec<u16>,
}

impl ClientConfig {
    pub fn from_response(body: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(body)
    }

    fn openvpn(&self) -> Option<&OpenVpnPorts> {
        self.default_ports.as_ref()?.openvpn.as_ref()
    }

    pub fn openvpn_udp_ports(&self) -> Option<&[u16]> {
        self.openvpn()
            .map(|ports| ports.udp.as_slice())
            .filter(|ports| !ports.is_empty())
    }

    pub fn openvpn_tcp_ports(&self) -> Option<&[u16]> {
        self.openvpn()
            .map(|ports| ports.tcp.as_slice())
            .filter(|ports| !ports.is_empty())
    }

    pub fn feature_enabled(&self, flag: &str) -> bool {
        match self.feature_flags.get(flag) {
            Some(Value::Bool(enabled)) => *enabled,
            Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            _ => false,
        }
    }
}
