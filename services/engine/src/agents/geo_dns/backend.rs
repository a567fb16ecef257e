//! Zone Backends
//!
//! Trait-based abstraction over DNS providers, the fan-out composite and the
//! emission adapter turning record sets into idempotent upserts.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::types::{GeoSelector, RecordSet, RecordType};

/// A record set bound to a zone and a stable identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordChange {
    /// Stable identifier derived from type, selector and name
    pub identifier: String,
    pub zone: String,
    /// Name relative to the zone, `@` for the apex
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub ttl: u32,
    pub values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<GeoSelector>,
}

impl RecordChange {
    pub fn from_record(zone: &str, record: &RecordSet) -> Self {
        Self {
            identifier: record_identifier(record.record_type, record.selector.as_ref(), &record.name),
            zone: zone.to_string(),
            name: record.name.clone(),
            record_type: record.record_type,
            ttl: record.ttl,
            values: record.values.clone(),
            selector: record.selector.clone(),
        }
    }

    /// Absolute name with the trailing dot
    pub fn fqdn(&self) -> String {
        let zone = self.zone.trim_end_matches('.');
        if self.name == "@" || self.name.is_empty() {
            format!("{}.", zone)
        } else {
            format!("{}.{}.", self.name.trim_end_matches('.'), zone)
        }
    }
}

/// Derive the identifier of a record set, e.g. `www:a:continent:eu`.
///
/// Only type, selector and name take part, so synthesizing the same zone
/// twice converges on the same identifiers whatever the targets are.
/// Name and value are percent-encoded: `:` never appears inside a part and
/// two distinct names never share an identifier.
pub fn record_identifier(record_type: RecordType, selector: Option<&GeoSelector>, name: &str) -> String {
    let name = match name.trim_end_matches('.') {
        "@" | "" => "@".to_string(),
        other => encode_part(other),
    };

    let mut identifier = format!("{}:{}", name, record_type.to_string().to_ascii_lowercase());

    if let Some(selector) = selector {
        let value = if selector.is_wildcard() {
            "*".to_string()
        } else {
            encode_part(&selector.value)
        };
        identifier.push_str(&format!(":{}:{}", selector.scope, value));
    }

    identifier
}

fn encode_part(raw: &str) -> String {
    urlencoding::encode(&raw.to_ascii_lowercase()).into_owned()
}

/// Outcome of applying one change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Upserted,
    Deleted,
    /// The backend cannot express this record set
    Skipped,
    /// Dry run, nothing was sent
    Planned,
    Error,
}

/// Result of emitting one record set
#[derive(Debug, Clone, Serialize)]
pub struct RecordSyncResult {
    pub identifier: String,
    pub action: RecordAction,
    pub success: bool,
    pub error: Option<String>,
}

/// A DNS provider able to converge record sets
#[async_trait]
pub trait ZoneBackend: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Create or replace the record set keyed by `change.identifier`
    async fn upsert_record(&self, change: &RecordChange) -> Result<RecordAction>;

    /// Remove the record set keyed by `change.identifier`
    async fn delete_record(&self, change: &RecordChange) -> Result<RecordAction>;
}

/// Forwards every call to each of its backends
pub struct FanOutBackend {
    backends: Vec<Box<dyn ZoneBackend>>,
}

impl FanOutBackend {
    pub fn new(backends: Vec<Box<dyn ZoneBackend>>) -> Self {
        Self { backends }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    async fn forward(&self, change: &RecordChange, delete: bool) -> Result<RecordAction> {
        let mut actions = Vec::with_capacity(self.backends.len());
        let mut errors = Vec::new();

        for backend in &self.backends {
            let outcome = if delete {
                backend.delete_record(change).await
            } else {
                backend.upsert_record(change).await
            };

            match outcome {
                Ok(action) => actions.push(action),
                Err(e) => errors.push(format!("{}: {:#}", backend.name(), e)),
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("{}", errors.join("; "));
        }

        Ok(merge_actions(&actions))
    }
}

/// The most significant action wins: a write on any backend counts
fn merge_actions(actions: &[RecordAction]) -> RecordAction {
    [
        RecordAction::Upserted,
        RecordAction::Deleted,
        RecordAction::Planned,
    ]
    .into_iter()
    .find(|wanted| actions.contains(wanted))
    .unwrap_or(RecordAction::Skipped)
}

#[async_trait]
impl ZoneBackend for FanOutBackend {
    fn name(&self) -> &str {
        "fan-out"
    }

    async fn upsert_record(&self, change: &RecordChange) -> Result<RecordAction> {
        self.forward(change, false).await
    }

    async fn delete_record(&self, change: &RecordChange) -> Result<RecordAction> {
        self.forward(change, true).await
    }
}

/// Logs changes instead of applying them
#[derive(Debug, Default)]
pub struct DryRunBackend;

#[async_trait]
impl ZoneBackend for DryRunBackend {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn upsert_record(&self, change: &RecordChange) -> Result<RecordAction> {
        info!(
            identifier = %change.identifier,
            name = %change.fqdn(),
            record_type = %change.record_type,
            ttl = change.ttl,
            values = ?change.values,
            "Would upsert record set"
        );
        Ok(RecordAction::Planned)
    }

    async fn delete_record(&self, change: &RecordChange) -> Result<RecordAction> {
        info!(identifier = %change.identifier, name = %change.fqdn(), "Would delete record set");
        Ok(RecordAction::Planned)
    }
}

/// Upsert every record set, at most `concurrency` at a time.
///
/// Results come back in record order; a failing upsert becomes an
/// [`RecordAction::Error`] result instead of aborting the others.
pub async fn emit_records(
    backend: &dyn ZoneBackend,
    zone: &str,
    records: &[RecordSet],
    concurrency: usize,
) -> Vec<RecordSyncResult> {
    let changes: Vec<RecordChange> = records
        .iter()
        .map(|record| RecordChange::from_record(zone, record))
        .collect();

    stream::iter(changes.iter())
        .map(|change| async move {
            match backend.upsert_record(change).await {
                Ok(action) => RecordSyncResult {
                    identifier: change.identifier.clone(),
                    action,
                    success: true,
                    error: None,
                },
                Err(e) => {
                    error!(identifier = %change.identifier, error = %e, "Failed to upsert record set");
                    RecordSyncResult {
                        identifier: change.identifier.clone(),
                        action: RecordAction::Error,
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// In-memory backend recording what it was asked to do
    #[derive(Clone, Default)]
    pub(crate) struct RecordingBackend {
        pub(crate) upserts: Arc<Mutex<Vec<RecordChange>>>,
        pub(crate) deletes: Arc<Mutex<Vec<RecordChange>>>,
    }

    #[async_trait]
    impl ZoneBackend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }

        async fn upsert_record(&self, change: &RecordChange) -> Result<RecordAction> {
            self.upserts.lock().await.push(change.clone());
            Ok(RecordAction::Upserted)
        }

        async fn delete_record(&self, change: &RecordChange) -> Result<RecordAction> {
            self.deletes.lock().await.push(change.clone());
            Ok(RecordAction::Deleted)
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl ZoneBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        async fn upsert_record(&self, _change: &RecordChange) -> Result<RecordAction> {
            anyhow::bail!("provider unavailable")
        }

        async fn delete_record(&self, _change: &RecordChange) -> Result<RecordAction> {
            anyhow::bail!("provider unavailable")
        }
    }

    fn record(name: &str, record_type: RecordType, selector: Option<GeoSelector>) -> RecordSet {
        RecordSet {
            name: name.to_string(),
            record_type,
            selector,
            values: vec!["192.0.2.1".to_string()],
            ttl: 7200,
        }
    }

    #[test]
    fn test_record_identifiers() {
        assert_eq!(
            record_identifier(RecordType::A, Some(&GeoSelector::continent("EU")), "www"),
            "www:a:continent:eu"
        );
        assert_eq!(
            record_identifier(RecordType::AAAA, Some(&GeoSelector::wildcard()), "@"),
            "@:aaaa:country:*"
        );
        assert_eq!(record_identifier(RecordType::CAA, None, "media.www"), "media.www:caa");
        assert_eq!(record_identifier(RecordType::TXT, None, "*"), "%2A:txt");
        assert_eq!(record_identifier(RecordType::A, None, ""), record_identifier(RecordType::A, None, "@"));
    }

    #[test]
    fn test_distinct_names_get_distinct_identifiers() {
        let names = ["media.www", "media-www", "*", "star", "%2A", "@", "apex", "%40", "a:b", "a", "a.b"];
        let mut identifiers: Vec<String> = names
            .iter()
            .map(|name| record_identifier(RecordType::A, None, name))
            .collect();
        identifiers.sort();
        identifiers.dedup();
        assert_eq!(identifiers.len(), names.len());

        // A name cannot masquerade as a selector suffix either
        assert_ne!(
            record_identifier(RecordType::A, Some(&GeoSelector::continent("EU")), "www"),
            record_identifier(RecordType::A, None, "www:a:continent:eu")
        );
    }

    #[test]
    fn test_identifier_ignores_targets() {
        let mut a = record("www", RecordType::A, Some(GeoSelector::continent("NA")));
        let first = RecordChange::from_record("luffy.cx", &a);
        a.values = vec!["198.51.100.7".to_string()];
        a.ttl = 60;
        let second = RecordChange::from_record("luffy.cx", &a);

        assert_eq!(first.identifier, second.identifier);
    }

    #[test]
    fn test_fqdn() {
        let apex = RecordChange::from_record("luffy.cx", &record("@", RecordType::A, None));
        let www = RecordChange::from_record("luffy.cx.", &record("www", RecordType::A, None));

        assert_eq!(apex.fqdn(), "luffy.cx.");
        assert_eq!(www.fqdn(), "www.luffy.cx.");
    }

    #[tokio::test]
    async fn test_emit_records_keeps_order() {
        let backend = RecordingBackend::default();
        let records = vec![
            record("www", RecordType::A, Some(GeoSelector::continent("EU"))),
            record("www", RecordType::A, Some(GeoSelector::wildcard())),
            record("www", RecordType::CAA, None),
        ];

        let results = emit_records(&backend, "luffy.cx", &records, 2).await;

        let identifiers: Vec<&str> = results.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(
            identifiers,
            vec!["www:a:continent:eu", "www:a:country:*", "www:caa"]
        );
        assert!(results.iter().all(|r| r.success && r.action == RecordAction::Upserted));
        assert_eq!(backend.upserts.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn test_emit_records_reports_failures() {
        let records = vec![record("www", RecordType::A, None)];
        let results = emit_records(&FailingBackend, "luffy.cx", &records, 4).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].action, RecordAction::Error);
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("provider unavailable"));
    }

    #[tokio::test]
    async fn test_fan_out_forwards_to_every_backend() {
        let first = RecordingBackend::default();
        let second = RecordingBackend::default();
        let fan_out = FanOutBackend::new(vec![Box::new(first.clone()), Box::new(second.clone())]);

        let change = RecordChange::from_record("luffy.cx", &record("www", RecordType::A, None));
        assert_eq!(fan_out.upsert_record(&change).await.unwrap(), RecordAction::Upserted);
        assert_eq!(fan_out.delete_record(&change).await.unwrap(), RecordAction::Deleted);

        for backend in [&first, &second] {
            assert_eq!(backend.upserts.lock().await.as_slice(), &[change.clone()]);
            assert_eq!(backend.deletes.lock().await.as_slice(), &[change.clone()]);
        }
    }

    #[tokio::test]
    async fn test_fan_out_surfaces_partial_failure() {
        let recording = RecordingBackend::default();
        let fan_out = FanOutBackend::new(vec![Box::new(FailingBackend), Box::new(recording.clone())]);

        let change = RecordChange::from_record("luffy.cx", &record("www", RecordType::A, None));
        let err = fan_out.upsert_record(&change).await.unwrap_err();

        assert!(err.to_string().contains("failing: provider unavailable"));
        // The healthy backend was still updated
        assert_eq!(recording.upserts.lock().await.len(), 1);
    }

    #[test]
    fn test_merge_actions() {
        assert_eq!(
            merge_actions(&[RecordAction::Skipped, RecordAction::Upserted]),
            RecordAction::Upserted
        );
        assert_eq!(
            merge_actions(&[RecordAction::Skipped, RecordAction::Planned]),
            RecordAction::Planned
        );
        assert_eq!(merge_actions(&[]), RecordAction::Skipped);
    }

    #[tokio::test]
    async fn test_dry_run_plans() {
        let change = RecordChange::from_record("luffy.cx", &record("www", RecordType::A, None));
        assert_eq!(DryRunBackend.upsert_record(&change).await.unwrap(), RecordAction::Planned);
    }
}
