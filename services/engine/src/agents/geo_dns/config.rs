//! Zone Document
//!
//! The JSON document describing a zone: which names get geolocation
//! records, the server roster, static records and record policies.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::roster::RosterEntry;
use super::synthesizer::{CaaPolicy, FallbackPolicy, GeoRecordSynthesizer, DEFAULT_TTL, GEO_TTL};
use super::types::{RecordSet, RecordType};

/// A name served by geolocation-routed A/AAAA records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoRecordConfig {
    /// Name relative to the zone, `@` for the apex
    pub name: String,
    /// Only servers carrying this role tag answer for the name
    #[serde(default)]
    pub role: Option<String>,
    /// Overrides the zone-wide geo TTL
    #[serde(default)]
    pub ttl: Option<u32>,
}

/// A record not driven by geolocation (MX, TXT, CNAME, SRV, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    #[serde(default)]
    pub ttl: Option<u32>,
    pub values: Vec<String>,
}

impl StaticRecord {
    pub fn to_record_set(&self, default_ttl: u32) -> RecordSet {
        RecordSet {
            name: self.name.clone(),
            record_type: self.record_type,
            selector: None,
            values: self.values.clone(),
            ttl: self.ttl.unwrap_or(default_ttl),
        }
    }
}

/// Zone-wide TTL defaults
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TtlConfig {
    #[serde(default = "default_ttl")]
    pub default: u32,
    #[serde(default = "default_geo_ttl")]
    pub geo: u32,
}

fn default_ttl() -> u32 {
    DEFAULT_TTL
}

fn default_geo_ttl() -> u32 {
    GEO_TTL
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            default: DEFAULT_TTL,
            geo: GEO_TTL,
        }
    }
}

/// Configuration for one zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Zone name (e.g., "luffy.cx")
    pub zone: String,
    #[serde(default)]
    pub geo_records: Vec<GeoRecordConfig>,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub caa: CaaPolicy,
    #[serde(default)]
    pub fallback: FallbackPolicy,
    #[serde(default)]
    pub servers: Vec<RosterEntry>,
    #[serde(default)]
    pub static_records: Vec<StaticRecord>,
}

impl ZoneConfig {
    /// Load a zone document from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read zone config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid zone config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: ZoneConfig = serde_json::from_str(raw).context("Failed to parse zone config")?;

        if config.zone.trim().is_empty() {
            anyhow::bail!("Zone name must not be empty");
        }
        config.validate()?;

        Ok(config)
    }

    /// Reject documents whose record sets would overwrite each other
    fn validate(&self) -> Result<()> {
        self.fallback.validate().context("Invalid fallback policy")?;

        let mut geo_names = HashSet::new();
        for geo in &self.geo_records {
            if !geo_names.insert(record_key(&geo.name)) {
                anyhow::bail!("Geo record {} is declared more than once", geo.name);
            }
        }

        let mut static_sets = HashSet::new();
        for record in &self.static_records {
            let key = record_key(&record.name);

            // Synthesized names own their A, AAAA and CAA sets; CNAME cannot
            // share a name with them
            let owned = matches!(
                record.record_type,
                RecordType::A | RecordType::AAAA | RecordType::CAA | RecordType::CNAME
            );
            if owned && geo_names.contains(&key) {
                anyhow::bail!(
                    "Static {} record for {} collides with its geo records",
                    record.record_type,
                    record.name
                );
            }

            if !static_sets.insert((key, record.record_type)) {
                anyhow::bail!(
                    "Static {} record for {} is declared more than once",
                    record.record_type,
                    record.name
                );
            }
        }

        Ok(())
    }

    /// Synthesizer configured with this zone's policies
    pub fn synthesizer(&self) -> GeoRecordSynthesizer {
        GeoRecordSynthesizer::new()
            .fallback(self.fallback)
            .geo_ttl(self.ttl.geo)
            .default_ttl(self.ttl.default)
            .caa(self.caa.clone())
    }
}

/// Names compare case-insensitively, with `@` and the empty name as the apex
fn record_key(name: &str) -> String {
    match name.trim_end_matches('.') {
        "" | "@" => "@".to_string(),
        other => other.to_ascii_lowercase(),
    }
}
