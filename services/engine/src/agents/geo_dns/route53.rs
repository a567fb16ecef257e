//! Route53 Zone Backend
//!
//! Applies record sets through `ChangeResourceRecordSets`. Geolocation
//! record sets carry a `SetIdentifier` (the record identifier) and a
//! `GeoLocation` element; the wildcard selector maps to `CountryCode=*`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{RecordAction, RecordChange, ZoneBackend};
use super::sigv4::{AwsCredentials, SigV4Signer};
use super::types::{GeoScope, GeoSelector};

const ROUTE53_ENDPOINT: &str = "https://route53.amazonaws.com";
const ROUTE53_XMLNS: &str = "https://route53.amazonaws.com/doc/2013-04-01/";
// Route53 is a global service signed in us-east-1
const ROUTE53_REGION: &str = "us-east-1";
const MAX_SET_IDENTIFIER_LEN: usize = 128;

/// Configuration for one Route53 hosted zone
#[derive(Debug, Clone)]
pub struct Route53Config {
    pub hosted_zone_id: String,
    pub credentials: AwsCredentials,
    pub endpoint: String,
}

impl Route53Config {
    pub fn new(hosted_zone_id: &str, credentials: AwsCredentials) -> Self {
        Self {
            hosted_zone_id: hosted_zone_id.trim_start_matches("/hostedzone/").to_string(),
            credentials,
            endpoint: ROUTE53_ENDPOINT.to_string(),
        }
    }
}

// ============================================================
// XML Bodies
// ============================================================

#[derive(Debug, Serialize)]
#[serde(rename = "ChangeResourceRecordSetsRequest")]
struct ChangeResourceRecordSetsRequest {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "ChangeBatch")]
    change_batch: ChangeBatch,
}

#[derive(Debug, Serialize)]
struct ChangeBatch {
    #[serde(rename = "Comment")]
    comment: String,
    #[serde(rename = "Changes")]
    changes: Changes,
}

#[derive(Debug, Serialize)]
struct Changes {
    #[serde(rename = "Change")]
    change: Vec<Change>,
}

#[derive(Debug, Serialize)]
struct Change {
    #[serde(rename = "Action")]
    action: &'static str,
    #[serde(rename = "ResourceRecordSet")]
    record_set: ResourceRecordSet,
}

#[derive(Debug, Serialize)]
struct ResourceRecordSet {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Type")]
    record_type: String,
    #[serde(rename = "SetIdentifier", skip_serializing_if = "Option::is_none")]
    set_identifier: Option<String>,
    #[serde(rename = "GeoLocation", skip_serializing_if = "Option::is_none")]
    geo_location: Option<GeoLocation>,
    #[serde(rename = "TTL")]
    ttl: u32,
    #[serde(rename = "ResourceRecords")]
    records: ResourceRecords,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct GeoLocation {
    #[serde(rename = "ContinentCode", skip_serializing_if = "Option::is_none")]
    continent_code: Option<String>,
    #[serde(rename = "CountryCode", skip_serializing_if = "Option::is_none")]
    country_code: Option<String>,
}

impl From<&GeoSelector> for GeoLocation {
    fn from(selector: &GeoSelector) -> Self {
        match selector.scope {
            GeoScope::Continent => Self {
                continent_code: Some(selector.value.clone()),
                country_code: None,
            },
            GeoScope::Country => Self {
                continent_code: None,
                country_code: Some(selector.value.clone()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ResourceRecords {
    #[serde(rename = "ResourceRecord")]
    record: Vec<ResourceRecord>,
}

#[derive(Debug, Serialize)]
struct ResourceRecord {
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ChangeResourceRecordSetsResponse {
    #[serde(rename = "ChangeInfo")]
    change_info: ChangeInfo,
}

#[derive(Debug, Deserialize)]
struct ChangeInfo {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Status")]
    status: String,
}

/// Either `ErrorResponse` or `InvalidChangeBatch`
#[derive(Debug, Deserialize)]
struct Route53ErrorBody {
    #[serde(rename = "Error")]
    error: Option<Route53ErrorDetail>,
    #[serde(rename = "Messages")]
    messages: Option<Route53Messages>,
}

#[derive(Debug, Deserialize)]
struct Route53ErrorDetail {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Route53Messages {
    #[serde(rename = "Message", default)]
    message: Vec<String>,
}

fn change_body(action: &'static str, change: &RecordChange) -> Result<String> {
    if change.selector.is_some() && change.identifier.len() > MAX_SET_IDENTIFIER_LEN {
        anyhow::bail!(
            "Record identifier {} exceeds the Route53 SetIdentifier limit of {} characters",
            change.identifier,
            MAX_SET_IDENTIFIER_LEN
        );
    }

    let request = ChangeResourceRecordSetsRequest {
        xmlns: ROUTE53_XMLNS,
        change_batch: ChangeBatch {
            comment: format!("Managed by geo-dns-agent ({})", change.identifier),
            changes: Changes {
                change: vec![Change {
                    action,
                    record_set: ResourceRecordSet {
                        name: change.fqdn(),
                        record_type: change.record_type.to_string(),
                        set_identifier: change.selector.as_ref().map(|_| change.identifier.clone()),
                        geo_location: change.selector.as_ref().map(GeoLocation::from),
                        ttl: change.ttl,
                        records: ResourceRecords {
                            record: change
                                .values
                                .iter()
                                .map(|value| ResourceRecord { value: value.clone() })
                                .collect(),
                        },
                    },
                }],
            },
        },
    };

    let xml = quick_xml::se::to_string(&request).context("Failed to serialize Route53 change batch")?;
    Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{}", xml))
}

/// Host header value as sent on the wire, with the port when it is not the
/// scheme default
fn signing_host(url: &str) -> Result<String> {
    let url = reqwest::Url::parse(url).context("Invalid Route53 endpoint")?;
    let host = url.host_str().context("Route53 endpoint has no host")?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn error_message(body: &str) -> String {
    match quick_xml::de::from_str::<Route53ErrorBody>(body) {
        Ok(Route53ErrorBody { error: Some(detail), .. }) => format!("{}: {}", detail.code, detail.message),
        Ok(Route53ErrorBody { messages: Some(messages), .. }) if !messages.message.is_empty() => {
            messages.message.join(", ")
        }
        _ => body.to_string(),
    }
}

// ============================================================
// Backend Implementation
// ============================================================

/// Route53 hosted zone backend
pub struct Route53Backend {
    http_client: Client,
    signer: SigV4Signer,
    hosted_zone_id: String,
    endpoint: String,
}

impl Route53Backend {
    pub fn new(config: Route53Config) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            signer: SigV4Signer::new(config.credentials, ROUTE53_REGION, "route53"),
            hosted_zone_id: config.hosted_zone_id,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn change(&self, action: &'static str, change: &RecordChange) -> Result<()> {
        let path = format!("/2013-04-01/hostedzone/{}/rrset/", self.hosted_zone_id);
        let url = format!("{}{}", self.endpoint, path);
        let host = signing_host(&url)?;

        let body = change_body(action, change)?;
        let headers = self.signer.sign(
            "POST",
            &host,
            &path,
            "text/xml",
            body.as_bytes(),
            chrono::Utc::now(),
        );

        let mut request = self
            .http_client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml");
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .body(body)
            .send()
            .await
            .context("Failed to call Route53 API")?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            anyhow::bail!("Route53 API error {}: {}", status, error_message(&text));
        }

        if let Ok(result) = quick_xml::de::from_str::<ChangeResourceRecordSetsResponse>(&text) {
            debug!(
                change_id = %result.change_info.id,
                status = %result.change_info.status,
                "Route53 change submitted"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl ZoneBackend for Route53Backend {
    fn name(&self) -> &str {
        "route53"
    }

    async fn upsert_record(&self, change: &RecordChange) -> Result<RecordAction> {
        info!(
            identifier = %change.identifier,
            name = %change.fqdn(),
            record_type = %change.record_type,
            "Upserting Route53 record set"
        );
        self.change("UPSERT", change).await?;
        Ok(RecordAction::Upserted)
    }

    async fn delete_record(&self, change: &RecordChange) -> Result<RecordAction> {
        info!(identifier = %change.identifier, name = %change.fqdn(), "Deleting Route53 record set");
        self.change("DELETE", change).await?;
        Ok(RecordAction::Deleted)
    }
}
