use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamingService {
    pub name: String,
    #[serde(default)]
    pub icon: String,
}

/// Streaming services available per exit country and server tier,
/// from `/vpn/streamingservices`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingServices {
    #[serde(default, rename = "ResourceBaseURL")]
    pub resource_base_url: String,
    /// country code → tier → services
    #[serde(default, rename = "StreamingServices")]
    pub services: BTreeMap<String, BTreeMap<String, Vec<StreamingService>>>,
}

impl StreamingServices {
    pub fn from_response(body: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(body)
    }

    /// Services reachable from `country` on servers of at most `tier`.
    pub fn for_country(&self, country: &str, tier: u8) -> Vec<&StreamingService> {
        let Some(tiers) = self.services.get(&country.to_ascii_uppercase()) else {
            return Vec::new();
        };
        let mut found: Vec<&StreamingService> = Vec::new();
        for (service_tier, services) in tiers {
            let allowed = service_tier.parse::<u8>().map_or(false, |t| t <= tier);
            if !allowed {
                continue;
            }
            for service in services {
                if !found.iter().any(|s| s.name == service.name) {
                    found.push(service);
                }
            }
        }
        found
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Where every streaming service icon can be fetched from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingIcons {
    /// icon file name → absolute URL
    pub icons: BTreeMap<String, String>,
}

impl StreamingIcons {
    pub fn from_services(services: &StreamingServices) -> Self {
        let base = services.resource_base_url.trim_end_matches('/');
        let icons = services
            .services
            .values()
            .flat_map(|tiers| tiers.values())
            .flatten()
            .filter(|service| !service.icon.is_empty())
            .map(|service| {
                let url = format!("{}/{}", base, service.icon.trim_start_matches('/'));
                (service.icon.clone(), url)
            })
            .collect();
        Self { icons }
    }

    pub fn url_for(&self, icon: &str) -> Option<&str> {
        self.icons.get(icon).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.icons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }
}
