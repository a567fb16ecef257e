//! Server Roster
//!
//! Raw roster entries as written in the zone document, and their
//! normalization into [`Server`] values ready for synthesis.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::debug;

use super::types::{GeoScope, GeoSelector, IpFamily, Server, SynthesisError};

/// A group of geolocation values sharing one scope,
/// e.g. `continent: [EU, AF]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationGroup {
    pub scope: String,
    pub values: Vec<String>,
}

/// A server as declared in the roster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    #[serde(default)]
    pub ipv4: Option<String>,
    #[serde(default)]
    pub ipv6: Option<String>,
    #[serde(default)]
    pub geolocations: Vec<GeolocationGroup>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Role tags (e.g. "web", "isso")
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl RosterEntry {
    /// Validate this entry and turn it into a [`Server`]
    pub fn to_server(&self) -> Result<Server, SynthesisError> {
        let ipv4 = self
            .ipv4
            .as_deref()
            .map(|raw| {
                raw.trim()
                    .parse::<Ipv4Addr>()
                    .map_err(|_| self.invalid_address(IpFamily::Ipv4, raw))
            })
            .transpose()?;

        let ipv6 = self
            .ipv6
            .as_deref()
            .map(|raw| {
                raw.trim()
                    .parse::<Ipv6Addr>()
                    .map_err(|_| self.invalid_address(IpFamily::Ipv6, raw))
            })
            .transpose()?;

        let mut server = Server::new(&self.name, ipv4, ipv6);

        for group in &self.geolocations {
            let scope = group.scope.parse::<GeoScope>().map_err(|scope| {
                SynthesisError::MalformedTag {
                    server: self.name.clone(),
                    tag: format!("{}={}", scope, group.values.join(",")),
                }
            })?;

            for value in &group.values {
                let selector = GeoSelector::new(scope, value);
                if selector.value.is_empty() || selector.is_wildcard() {
                    return Err(SynthesisError::MalformedTag {
                        server: self.name.clone(),
                        tag: format!("{}={}", scope, value),
                    });
                }
                server = server.geolocation(selector);
            }
        }

        for tag in &self.tags {
            server = server.role(tag.as_str());
        }

        Ok(server)
    }

    fn invalid_address(&self, family: IpFamily, raw: &str) -> SynthesisError {
        SynthesisError::InvalidAddress {
            server: self.name.clone(),
            family,
            address: raw.to_string(),
        }
    }
}

/// Drop disabled entries and validate the rest, keeping roster order.
///
/// Validation covers every entry before synthesis starts, so a malformed
/// tag on any enabled server fails the whole roster.
pub fn normalize(entries: &[RosterEntry]) -> Result<Vec<Server>, SynthesisError> {
    let mut seen = HashSet::new();
    let mut servers = Vec::with_capacity(entries.len());

    for entry in entries {
        if !seen.insert(entry.name.as_str()) {
            return Err(SynthesisError::DuplicateServer(entry.name.clone()));
        }

        if !entry.enabled {
            debug!(server = %entry.name, "Skipping disabled server");
            continue;
        }

        servers.push(entry.to_server()?);
    }

    Ok(servers)
}
