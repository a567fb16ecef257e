//! Geo DNS Types
//!
//! Core types for servers, geolocation selectors and the record sets
//! produced by the synthesizer.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use thiserror::Error;

/// Country code used by the default (no match) selector
pub const WILDCARD_VALUE: &str = "*";

/// Scope of a geolocation tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoScope {
    Continent,
    Country,
}

impl std::fmt::Display for GeoScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoScope::Continent => write!(f, "continent"),
            GeoScope::Country => write!(f, "country"),
        }
    }
}

impl FromStr for GeoScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continent" => Ok(GeoScope::Continent),
            "country" => Ok(GeoScope::Country),
            other => Err(other.to_string()),
        }
    }
}

/// A (scope, value) pair used by geolocation routing.
///
/// The wildcard selector is `country=*` and matches any resolver location
/// not covered by a more specific selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeoSelector {
    pub scope: GeoScope,
    pub value: String,
}

impl GeoSelector {
    /// Create a selector, normalizing the value to upper case
    pub fn new(scope: GeoScope, value: &str) -> Self {
        Self {
            scope,
            value: value.trim().to_ascii_uppercase(),
        }
    }

    pub fn continent(value: &str) -> Self {
        Self::new(GeoScope::Continent, value)
    }

    pub fn country(value: &str) -> Self {
        Self::new(GeoScope::Country, value)
    }

    /// The default selector, matching every location
    pub fn wildcard() -> Self {
        Self {
            scope: GeoScope::Country,
            value: WILDCARD_VALUE.to_string(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.scope == GeoScope::Country && self.value == WILDCARD_VALUE
    }
}

impl std::fmt::Display for GeoSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.scope, self.value)
    }
}

/// IP address family of an emitted record set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    Ipv4,
    Ipv6,
}

impl IpFamily {
    pub const ALL: [IpFamily; 2] = [IpFamily::Ipv4, IpFamily::Ipv6];

    /// Record type carrying addresses of this family
    pub fn record_type(self) -> RecordType {
        match self {
            IpFamily::Ipv4 => RecordType::A,
            IpFamily::Ipv6 => RecordType::AAAA,
        }
    }
}

impl std::fmt::Display for IpFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpFamily::Ipv4 => write!(f, "ipv4"),
            IpFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// DNS record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    #[allow(clippy::upper_case_acronyms)]
    AAAA,
    #[allow(clippy::upper_case_acronyms)]
    CAA,
    #[allow(clippy::upper_case_acronyms)]
    CNAME,
    MX,
    NS,
    #[allow(clippy::upper_case_acronyms)]
    SRV,
    #[allow(clippy::upper_case_acronyms)]
    TXT,
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::CAA => write!(f, "CAA"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::MX => write!(f, "MX"),
            RecordType::NS => write!(f, "NS"),
            RecordType::SRV => write!(f, "SRV"),
            RecordType::TXT => write!(f, "TXT"),
        }
    }
}

/// An enabled server taking part in synthesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    /// Geolocation tags, deduplicated, in declaration order
    pub geolocations: Vec<GeoSelector>,
    /// Role tags (e.g. "web", "isso")
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Server {
    pub fn new(name: &str, ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) -> Self {
        Self {
            name: name.to_string(),
            ipv4,
            ipv6,
            geolocations: Vec::new(),
            roles: Vec::new(),
        }
    }

    /// Add a geolocation tag, ignoring duplicates
    pub fn geolocation(mut self, selector: GeoSelector) -> Self {
        if !self.geolocations.contains(&selector) {
            self.geolocations.push(selector);
        }
        self
    }

    /// Add a role tag
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn serves(&self, selector: &GeoSelector) -> bool {
        self.geolocations.contains(selector)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Textual address for the given family, if the server has one
    pub fn address(&self, family: IpFamily) -> Option<String> {
        match family {
            IpFamily::Ipv4 => self.ipv4.map(|ip| ip.to_string()),
            IpFamily::Ipv6 => self.ipv6.map(|ip| ip.to_string()),
        }
    }
}

/// A named, typed collection of values for one selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<GeoSelector>,
    pub values: Vec<String>,
    pub ttl: u32,
}

/// Errors raised while validating a roster or synthesizing records.
///
/// None of these are retried: synthesis is all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    /// A server lacks the address needed for the family being emitted
    #[error("Server {server} has no {family} address")]
    MissingAddress { server: String, family: IpFamily },

    /// A selector ended up with no eligible servers
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A geolocation tag with an unsupported scope
    #[error("Server {server} has malformed geolocation tag: {tag}")]
    MalformedTag { server: String, tag: String },

    /// An address that does not parse for its family
    #[error("Server {server} has invalid {family} address: {address}")]
    InvalidAddress {
        server: String,
        family: IpFamily,
        address: String,
    },

    /// Two roster entries share a name
    #[error("Duplicate server in roster: {0}")]
    DuplicateServer(String),

    /// No enabled server left to synthesize from
    #[error("No enabled servers for {0}")]
    EmptyRoster(String),
}
