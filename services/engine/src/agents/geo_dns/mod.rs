//! Geo DNS Agent
//!
//! Synthesizes geolocation-routed DNS records for a fleet of web servers and
//! converges them on one or more DNS providers.
//!
//! ## Architecture
//!
//! - **Roster**: servers with addresses, geolocation tags and roles, read
//!   from the zone document; disabled servers are dropped up front
//! - **Synthesizer**: pure computation of A/AAAA record sets per selector,
//!   with a wildcard fallback listing every server, plus a CAA record set
//! - **Backends**: Route53 (geolocation routing) and Gandi LiveDNS behind
//!   the `ZoneBackend` trait, optionally fanned out to several zones
//!
//! ## Idempotence
//!
//! Each record set is upserted under an identifier derived from its type,
//! selector and name only, so repeated runs converge on the same provider
//! resources.

mod types;
mod roster;
mod synthesizer;
mod sigv4;
pub mod backend;
pub mod config;
pub mod gandi;
pub mod orchestrator;
pub mod route53;

pub use backend::{
    emit_records, record_identifier, DryRunBackend, FanOutBackend, RecordAction, RecordChange,
    RecordSyncResult, ZoneBackend,
};
pub use config::{GeoRecordConfig, StaticRecord, TtlConfig, ZoneConfig};
pub use gandi::{GandiBackend, GandiConfig};
pub use orchestrator::{GeoDnsAgent, SyncReport, DEFAULT_CONCURRENCY};
pub use roster::{normalize, GeolocationGroup, RosterEntry};
pub use route53::{Route53Backend, Route53Config};
pub use sigv4::AwsCredentials;
pub use synthesizer::{synthesize, CaaPolicy, FallbackPolicy, GeoRecordSynthesizer, DEFAULT_TTL, GEO_TTL};
pub use types::{
    GeoScope, GeoSelector, IpFamily, RecordSet, RecordType, Server, SynthesisError, WILDCARD_VALUE,
};
