//! Geo DNS Orchestrator
//!
//! The agent that turns a zone document into record sets and pushes them to
//! the configured zone backend.

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, warn};

use super::backend::{emit_records, RecordAction, RecordSyncResult, ZoneBackend};
use super::config::ZoneConfig;
use super::roster;
use super::types::{RecordSet, SynthesisError};

/// Upserts in flight at once
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Result of a zone sync
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub zone: String,
    /// Whether every record set was applied
    pub success: bool,
    pub records_synced: usize,
    pub upserted: usize,
    pub skipped: usize,
    pub planned: usize,
    pub errors: Vec<String>,
    pub results: Vec<RecordSyncResult>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl SyncReport {
    fn from_results(zone: &str, results: Vec<RecordSyncResult>) -> Self {
        let count = |action: RecordAction| results.iter().filter(|r| r.action == action).count();

        let errors: Vec<String> = results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {}", r.identifier, e)))
            .collect();

        Self {
            zone: zone.to_string(),
            success: errors.is_empty(),
            records_synced: results.len(),
            upserted: count(RecordAction::Upserted),
            skipped: count(RecordAction::Skipped),
            planned: count(RecordAction::Planned),
            errors,
            results,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Geo DNS Agent
///
/// Synthesis is all-or-nothing: a roster problem aborts before any
/// backend call is made.
pub struct GeoDnsAgent {
    config: ZoneConfig,
    backend: Box<dyn ZoneBackend>,
    concurrency: usize,
}

impl GeoDnsAgent {
    pub fn new(config: ZoneConfig, backend: Box<dyn ZoneBackend>) -> Self {
        Self {
            config,
            backend,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Every record set the zone should contain
    pub fn plan(&self) -> Result<Vec<RecordSet>, SynthesisError> {
        let servers = roster::normalize(&self.config.servers)?;
        let synthesizer = self.config.synthesizer();
        let mut records = Vec::new();

        info!(
            zone = %self.config.zone,
            servers = servers.len(),
            policy = %synthesizer.fallback_policy(),
            "Planning geo records"
        );

        for geo in &self.config.geo_records {
            let eligible: Vec<_> = match &geo.role {
                Some(role) => servers.iter().filter(|s| s.has_role(role)).cloned().collect(),
                None => servers.clone(),
            };

            let synthesizer = match geo.ttl {
                Some(ttl) => synthesizer.clone().geo_ttl(ttl),
                None => synthesizer.clone(),
            };

            records.extend(synthesizer.synthesize(&eligible, &geo.name)?);
        }

        records.extend(
            self.config
                .static_records
                .iter()
                .map(|r| r.to_record_set(self.config.ttl.default)),
        );

        Ok(records)
    }

    /// Plan then apply every record set
    pub async fn sync(&self) -> Result<SyncReport> {
        let records = self.plan()?;

        info!(
            zone = %self.config.zone,
            backend = self.backend.name(),
            records = records.len(),
            "Starting zone sync"
        );

        let results = emit_records(self.backend.as_ref(), &self.config.zone, &records, self.concurrency).await;
        let report = SyncReport::from_results(&self.config.zone, results);

        if report.success {
            info!(
                zone = %report.zone,
                upserted = report.upserted,
                skipped = report.skipped,
                planned = report.planned,
                "Zone sync complete"
            );
        } else {
            error!(zone = %report.zone, errors = report.errors.len(), "Zone sync finished with errors");
        }

        if report.skipped > 0 {
            warn!(skipped = report.skipped, "Some record sets are not supported by the backend");
        }

        Ok(report)
    }
}
