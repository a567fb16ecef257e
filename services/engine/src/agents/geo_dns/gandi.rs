//! Gandi LiveDNS Zone Backend
//!
//! LiveDNS replaces a whole rrset per (name, type) with a single PUT, which
//! makes upserts naturally idempotent. It has no geolocation routing: only
//! selector-less record sets and the wildcard fallback are written.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{RecordAction, RecordChange, ZoneBackend};

const GANDI_LIVEDNS_API: &str = "https://api.gandi.net/v5/livedns";

/// LiveDNS refuses anything shorter
const GANDI_MIN_TTL: u32 = 300;

/// Configuration for the Gandi LiveDNS API
#[derive(Clone)]
pub struct GandiConfig {
    /// Personal access token
    pub api_token: String,
    pub endpoint: String,
}

impl GandiConfig {
    pub fn new(api_token: &str) -> Self {
        Self {
            api_token: api_token.to_string(),
            endpoint: GANDI_LIVEDNS_API.to_string(),
        }
    }
}

impl std::fmt::Debug for GandiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GandiConfig")
            .field("api_token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct RrsetRequest {
    rrset_ttl: u32,
    rrset_values: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GandiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<GandiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GandiErrorDetail {
    description: String,
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<GandiError>(body) {
        Ok(error) if !error.errors.is_empty() => error
            .errors
            .iter()
            .map(|e| e.description.clone())
            .collect::<Vec<_>>()
            .join(", "),
        Ok(error) if !error.message.is_empty() => error.message,
        _ => body.to_string(),
    }
}

/// Gandi LiveDNS backend
pub struct GandiBackend {
    http_client: Client,
    api_token: String,
    endpoint: String,
}

impl GandiBackend {
    pub fn new(config: GandiConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            api_token: config.api_token,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn rrset_url(&self, change: &RecordChange) -> String {
        let name = if change.name.is_empty() { "@" } else { change.name.as_str() };
        format!(
            "{}/domains/{}/records/{}/{}",
            self.endpoint,
            urlencoding::encode(change.zone.trim_end_matches('.')),
            urlencoding::encode(name),
            change.record_type
        )
    }

    /// Whether LiveDNS can express this record set
    fn supports(change: &RecordChange) -> bool {
        change.selector.as_ref().map(|s| s.is_wildcard()).unwrap_or(true)
    }
}

#[async_trait]
impl ZoneBackend for GandiBackend {
    fn name(&self) -> &str {
        "gandi"
    }

    async fn upsert_record(&self, change: &RecordChange) -> Result<RecordAction> {
        if !Self::supports(change) {
            debug!(identifier = %change.identifier, "Gandi has no geolocation routing, skipping");
            return Ok(RecordAction::Skipped);
        }

        info!(
            identifier = %change.identifier,
            name = %change.name,
            record_type = %change.record_type,
            "Upserting Gandi rrset"
        );

        let request = RrsetRequest {
            rrset_ttl: change.ttl.max(GANDI_MIN_TTL),
            rrset_values: change.values.clone(),
        };

        let response = self
            .http_client
            .put(self.rrset_url(change))
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await
            .context("Failed to call Gandi LiveDNS API")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gandi API error {}: {}", status, error_message(&text));
        }

        Ok(RecordAction::Upserted)
    }

    async fn delete_record(&self, change: &RecordChange) -> Result<RecordAction> {
        if !Self::supports(change) {
            return Ok(RecordAction::Skipped);
        }

        info!(identifier = %change.identifier, name = %change.name, "Deleting Gandi rrset");

        let response = self
            .http_client
            .delete(self.rrset_url(change))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .context("Failed to call Gandi LiveDNS API")?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(identifier = %change.identifier, "Gandi rrset already absent");
            return Ok(RecordAction::Skipped);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gandi API error {}: {}", status, error_message(&text));
        }

        Ok(RecordAction::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::geo_dns::types::{GeoSelector, RecordSet, RecordType};

    fn backend() -> GandiBackend {
        let mut config = GandiConfig::new("token");
        // Nothing listens here; tests must not reach the network
        config.endpoint = "http://127.0.0.1:9/v5/livedns/".to_string();
        GandiBackend::new(config).unwrap()
    }

    fn change(name: &str, record_type: RecordType, selector: Option<GeoSelector>) -> RecordChange {
        RecordChange::from_record(
            "luffy.cx",
            &RecordSet {
                name: name.to_string(),
                record_type,
                selector,
                values: vec!["192.0.2.3".to_string()],
                ttl: 60,
            },
        )
    }

    #[test]
    fn test_rrset_url() {
        let backend = backend();
        assert_eq!(
            backend.rrset_url(&change("@", RecordType::A, None)),
            "http://127.0.0.1:9/v5/livedns/domains/luffy.cx/records/%40/A"
        );
        assert_eq!(
            backend.rrset_url(&change("www", RecordType::CAA, None)),
            "http://127.0.0.1:9/v5/livedns/domains/luffy.cx/records/www/CAA"
        );
    }

    #[test]
    fn test_supported_selectors() {
        assert!(GandiBackend::supports(&change("www", RecordType::A, None)));
        assert!(GandiBackend::supports(&change("www", RecordType::A, Some(GeoSelector::wildcard()))));
        assert!(!GandiBackend::supports(&change("www", RecordType::A, Some(GeoSelector::continent("EU")))));
    }

    #[tokio::test]
    async fn test_geo_selectors_are_skipped_without_network() {
        let backend = backend();
        let geo = change("www", RecordType::A, Some(GeoSelector::country("FR")));

        assert_eq!(backend.upsert_record(&geo).await.unwrap(), RecordAction::Skipped);
        assert_eq!(backend.delete_record(&geo).await.unwrap(), RecordAction::Skipped);
    }

    #[test]
    fn test_request_serialization() {
        let request = RrsetRequest {
            rrset_ttl: 300,
            rrset_values: vec!["0 issue \"letsencrypt.org\"".to_string()],
        };

        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"rrset_ttl":300,"rrset_values":["0 issue \"letsencrypt.org\""]}"#
        );
    }

    #[test]
    fn test_error_message_parsing() {
        let body = r#"{"code": 400, "message": "Bad Request", "object": "HTTPBadRequest",
            "cause": "Bad Request", "errors": [{"location": "body", "name": "rrset_values",
            "description": "invalid IPv4 address"}]}"#;
        assert_eq!(error_message(body), "invalid IPv4 address");
        assert_eq!(error_message(r#"{"message": "Unauthorized"}"#), "Unauthorized");
        assert_eq!(error_message("oops"), "oops");
    }
}
