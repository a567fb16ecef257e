//! Geo-Record Synthesizer
//!
//! Computes the geolocation-routed record sets for a name from a roster of
//! enabled servers. Every geolocation tag found on a server becomes one
//! selector; the wildcard selector always lists every server so resolvers
//! without a geolocation match still get an answer.

use serde::{Deserialize, Serialize};
use std::iter;
use tracing::debug;

use super::types::{GeoSelector, IpFamily, RecordSet, RecordType, Server, SynthesisError};

/// TTL for records not driven by geolocation
pub const DEFAULT_TTL: u32 = 86400;

/// TTL for geolocation web records
pub const GEO_TTL: u32 = 7200;

/// Largest repetition a weighted policy may ask for
pub const MAX_WEIGHT: u32 = 16;

/// How servers outside a selector are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// A selector lists exactly the servers tagged with it
    #[default]
    Strict,
    /// A selector lists tagged servers `local` times and every other
    /// server `remote` times
    Weighted { local: u32, remote: u32 },
}

impl FallbackPolicy {
    /// Tagged servers must stay listed and answers must stay small
    pub fn validate(&self) -> Result<(), SynthesisError> {
        match *self {
            FallbackPolicy::Strict => Ok(()),
            FallbackPolicy::Weighted { local: 0, .. } => Err(SynthesisError::InvariantViolation(format!(
                "{}: local weight must be at least 1",
                self
            ))),
            FallbackPolicy::Weighted { local, remote } if local > MAX_WEIGHT || remote > MAX_WEIGHT => {
                Err(SynthesisError::InvariantViolation(format!(
                    "{}: weights are capped at {}",
                    self, MAX_WEIGHT
                )))
            }
            FallbackPolicy::Weighted { .. } => Ok(()),
        }
    }
}

impl std::fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackPolicy::Strict => write!(f, "strict"),
            FallbackPolicy::Weighted { local, remote } => {
                write!(f, "weighted(local={}, remote={})", local, remote)
            }
        }
    }
}

/// Certificate authorities allowed to issue for the zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaaPolicy {
    #[serde(default)]
    pub issuers: Vec<String>,
    #[serde(default)]
    pub issuewild: Vec<String>,
    #[serde(default)]
    pub iodef: Option<String>,
}

impl Default for CaaPolicy {
    fn default() -> Self {
        Self {
            issuers: vec!["letsencrypt.org".to_string()],
            issuewild: Vec::new(),
            iodef: None,
        }
    }
}

impl CaaPolicy {
    /// CAA record values, in presentation format
    pub fn values(&self) -> Vec<String> {
        let mut values: Vec<String> = self
            .issuers
            .iter()
            .map(|ca| format!("0 issue \"{}\"", ca))
            .chain(self.issuewild.iter().map(|ca| format!("0 issuewild \"{}\"", ca)))
            .chain(self.iodef.iter().map(|url| format!("0 iodef \"{}\"", url)))
            .collect();

        if self.issuers.is_empty() {
            // Nobody may issue
            values.insert(0, "0 issue \";\"".to_string());
        }

        values
    }
}

/// Geo-Record Synthesizer
///
/// Pure and deterministic: the same roster in the same order always
/// yields the same record sets in the same order.
#[derive(Debug, Clone)]
pub struct GeoRecordSynthesizer {
    fallback: FallbackPolicy,
    geo_ttl: u32,
    default_ttl: u32,
    caa: CaaPolicy,
}

impl Default for GeoRecordSynthesizer {
    fn default() -> Self {
        Self {
            fallback: FallbackPolicy::Strict,
            geo_ttl: GEO_TTL,
            default_ttl: DEFAULT_TTL,
            caa: CaaPolicy::default(),
        }
    }
}

impl GeoRecordSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn geo_ttl(mut self, ttl: u32) -> Self {
        self.geo_ttl = ttl;
        self
    }

    pub fn default_ttl(mut self, ttl: u32) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn caa(mut self, caa: CaaPolicy) -> Self {
        self.caa = caa;
        self
    }

    pub fn fallback_policy(&self) -> FallbackPolicy {
        self.fallback
    }

    /// Compute all record sets for `name`.
    ///
    /// Concrete selectors come first in order of first appearance in the
    /// roster, then the wildcard; each selector yields an A then an AAAA
    /// record set. The CAA record set comes last.
    pub fn synthesize(&self, servers: &[Server], name: &str) -> Result<Vec<RecordSet>, SynthesisError> {
        if servers.is_empty() {
            return Err(SynthesisError::EmptyRoster(name.to_string()));
        }
        self.fallback.validate()?;

        // With a single server every selector would repeat the wildcard.
        let selectors = if servers.len() == 1 {
            Vec::new()
        } else {
            collect_selectors(servers)
        };

        let wildcard = GeoSelector::wildcard();
        let mut records = Vec::with_capacity((selectors.len() + 1) * 2 + 1);

        for selector in selectors.iter().chain(iter::once(&wildcard)) {
            let eligible = self.eligible(servers, selector)?;

            for family in IpFamily::ALL {
                records.push(RecordSet {
                    name: name.to_string(),
                    record_type: family.record_type(),
                    selector: Some(selector.clone()),
                    values: targets(&eligible, family)?,
                    ttl: self.geo_ttl,
                });
            }
        }

        records.push(self.caa_record(name));

        debug!(
            name = %name,
            policy = %self.fallback,
            servers = servers.len(),
            selectors = selectors.len() + 1,
            records = records.len(),
            "Synthesized geo records"
        );

        Ok(records)
    }

    /// The static CAA record set for `name`
    pub fn caa_record(&self, name: &str) -> RecordSet {
        RecordSet {
            name: name.to_string(),
            record_type: RecordType::CAA,
            selector: None,
            values: self.caa.values(),
            ttl: self.default_ttl,
        }
    }

    /// Servers answering for `selector`, each with its repetition weight
    fn eligible<'a>(
        &self,
        servers: &'a [Server],
        selector: &GeoSelector,
    ) -> Result<Vec<(&'a Server, u32)>, SynthesisError> {
        if selector.is_wildcard() {
            return Ok(servers.iter().map(|s| (s, 1)).collect());
        }

        if !servers.iter().any(|s| s.serves(selector)) {
            return Err(SynthesisError::InvariantViolation(format!(
                "selector {} has no eligible servers",
                selector
            )));
        }

        let eligible: Vec<(&Server, u32)> = match self.fallback {
            FallbackPolicy::Strict => servers
                .iter()
                .filter(|s| s.serves(selector))
                .map(|s| (s, 1))
                .collect(),
            FallbackPolicy::Weighted { local, remote } => servers
                .iter()
                .map(|s| (s, if s.serves(selector) { local } else { remote }))
                .filter(|(_, weight)| *weight > 0)
                .collect(),
        };

        if eligible.is_empty() {
            return Err(SynthesisError::InvariantViolation(format!(
                "selector {} lists no targets under {}",
                selector, self.fallback
            )));
        }

        Ok(eligible)
    }
}

/// Synthesize with the default strict policy and TTLs
pub fn synthesize(servers: &[Server], name: &str) -> Result<Vec<RecordSet>, SynthesisError> {
    GeoRecordSynthesizer::default().synthesize(servers, name)
}

/// Distinct geolocation tags across the roster, in first-appearance order.
/// The wildcard is always emitted last, so a server tagged with it adds nothing.
fn collect_selectors(servers: &[Server]) -> Vec<GeoSelector> {
    let mut selectors: Vec<GeoSelector> = Vec::new();
    for selector in servers
        .iter()
        .flat_map(|s| s.geolocations.iter())
        .filter(|s| !s.is_wildcard())
    {
        if !selectors.contains(selector) {
            selectors.push(selector.clone());
        }
    }
    selectors
}

fn targets(eligible: &[(&Server, u32)], family: IpFamily) -> Result<Vec<String>, SynthesisError> {
    let mut values = Vec::new();
    for (server, weight) in eligible {
        let address = server
            .address(family)
            .ok_or_else(|| SynthesisError::MissingAddress {
                server: server.name.clone(),
                family,
            })?;
        values.extend(iter::repeat(address).take(*weight as usize));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(name: &str, octet: u8, continents: &[&str]) -> Server {
        let mut server = Server::new(
            name,
            Some(format!("192.0.2.{}", octet).parse().unwrap()),
            Some(format!("2001:db8::{}", octet).parse().unwrap()),
        );
        for continent in continents {
            server = server.geolocation(GeoSelector::continent(continent));
        }
        server
    }

    fn fleet() -> Vec<Server> {
        vec![
            server("web03", 3, &["EU"]),
            server("web04", 4, &["EU"]),
            server("web05", 5, &["NA"]),
        ]
    }

    fn find<'a>(
        records: &'a [RecordSet],
        record_type: RecordType,
        selector: &GeoSelector,
    ) -> &'a RecordSet {
        records
            .iter()
            .find(|r| r.record_type == record_type && r.selector.as_ref() == Some(selector))
            .unwrap()
    }

    #[test]
    fn test_two_continent_fleet() {
        let records = synthesize(&fleet(), "www").unwrap();

        assert_eq!(records.len(), 7);
        assert_eq!(records.iter().filter(|r| r.record_type == RecordType::CAA).count(), 1);

        let eu = GeoSelector::continent("EU");
        let na = GeoSelector::continent("NA");
        let any = GeoSelector::wildcard();

        assert_eq!(find(&records, RecordType::A, &eu).values, vec!["192.0.2.3", "192.0.2.4"]);
        assert_eq!(find(&records, RecordType::AAAA, &eu).values, vec!["2001:db8::3", "2001:db8::4"]);
        assert_eq!(find(&records, RecordType::A, &na).values, vec!["192.0.2.5"]);
        assert_eq!(find(&records, RecordType::AAAA, &na).values, vec!["2001:db8::5"]);
        assert_eq!(
            find(&records, RecordType::A, &any).values,
            vec!["192.0.2.3", "192.0.2.4", "192.0.2.5"]
        );
        assert_eq!(
            find(&records, RecordType::AAAA, &any).values,
            vec!["2001:db8::3", "2001:db8::4", "2001:db8::5"]
        );
    }

    #[test]
    fn test_output_order() {
        let records = synthesize(&fleet(), "www").unwrap();
        let layout: Vec<(RecordType, Option<String>)> = records
            .iter()
            .map(|r| (r.record_type, r.selector.as_ref().map(|s| s.to_string())))
            .collect();

        assert_eq!(
            layout,
            vec![
                (RecordType::A, Some("continent=EU".to_string())),
                (RecordType::AAAA, Some("continent=EU".to_string())),
                (RecordType::A, Some("continent=NA".to_string())),
                (RecordType::AAAA, Some("continent=NA".to_string())),
                (RecordType::A, Some("country=*".to_string())),
                (RecordType::AAAA, Some("country=*".to_string())),
                (RecordType::CAA, None),
            ]
        );
    }

    #[test]
    fn test_concrete_selector_lists_exactly_tagged_servers() {
        let servers = vec![
            server("web03", 3, &["EU", "AF"]),
            server("web04", 4, &["EU"]),
            server("web05", 5, &["NA", "SA"]),
            server("web06", 6, &["NA", "SA", "AF"]),
        ];
        let records = synthesize(&servers, "@").unwrap();

        for record in records.iter().filter(|r| r.record_type == RecordType::A) {
            let selector = record.selector.as_ref().unwrap();
            let expected: Vec<String> = servers
                .iter()
                .filter(|s| selector.is_wildcard() || s.serves(selector))
                .filter_map(|s| s.address(IpFamily::Ipv4))
                .collect();
            assert_eq!(record.values, expected, "selector {}", selector);
        }

        // EU, AF, NA, SA and the wildcard, for two families
        assert_eq!(records.iter().filter(|r| r.selector.is_some()).count(), 10);
    }

    #[test]
    fn test_untagged_server_only_in_wildcard() {
        let mut servers = fleet();
        servers.push(server("web07", 7, &[]));
        let records = synthesize(&servers, "www").unwrap();

        for record in &records {
            let listed = record.values.iter().any(|v| v == "192.0.2.7" || v == "2001:db8::7");
            let wildcard = record.selector.as_ref().map(|s| s.is_wildcard()).unwrap_or(false);
            assert_eq!(listed, wildcard);
        }
    }

    #[test]
    fn test_single_server_yields_wildcard_only() {
        let records = synthesize(&[server("web03", 3, &["EU", "AF"])], "www").unwrap();

        let selectors: Vec<&GeoSelector> = records.iter().filter_map(|r| r.selector.as_ref()).collect();
        assert_eq!(selectors.len(), 2);
        assert!(selectors.iter().all(|s| s.is_wildcard()));
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let first = synthesize(&fleet(), "www").unwrap();
        let second = synthesize(&fleet(), "www").unwrap();

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_missing_address_fails_everything() {
        let mut servers = fleet();
        servers[1].ipv6 = None;

        let err = synthesize(&servers, "www").unwrap_err();
        assert_eq!(
            err,
            SynthesisError::MissingAddress {
                server: "web04".to_string(),
                family: IpFamily::Ipv6,
            }
        );
    }

    #[test]
    fn test_empty_roster_is_rejected() {
        assert_eq!(
            synthesize(&[], "www").unwrap_err(),
            SynthesisError::EmptyRoster("www".to_string())
        );
    }

    #[test]
    fn test_unserved_selector_is_invariant_violation() {
        let synthesizer = GeoRecordSynthesizer::new();
        let err = synthesizer
            .eligible(&fleet(), &GeoSelector::continent("OC"))
            .unwrap_err();

        assert!(matches!(err, SynthesisError::InvariantViolation(_)));
    }

    #[test]
    fn test_weighted_fallback_repeats_targets() {
        let synthesizer = GeoRecordSynthesizer::new()
            .fallback(FallbackPolicy::Weighted { local: 2, remote: 1 });
        let records = synthesizer.synthesize(&fleet(), "www").unwrap();

        assert_eq!(
            find(&records, RecordType::A, &GeoSelector::continent("NA")).values,
            vec!["192.0.2.3", "192.0.2.4", "192.0.2.5", "192.0.2.5"]
        );
        // The wildcard is never weighted
        assert_eq!(
            find(&records, RecordType::A, &GeoSelector::wildcard()).values,
            vec!["192.0.2.3", "192.0.2.4", "192.0.2.5"]
        );
    }

    #[test]
    fn test_weighted_with_zero_remote_is_strict() {
        let weighted = GeoRecordSynthesizer::new()
            .fallback(FallbackPolicy::Weighted { local: 1, remote: 0 })
            .synthesize(&fleet(), "www")
            .unwrap();

        assert_eq!(weighted, synthesize(&fleet(), "www").unwrap());
    }

    #[test]
    fn test_weighted_policy_must_keep_tagged_servers() {
        for fallback in [
            FallbackPolicy::Weighted { local: 0, remote: 0 },
            FallbackPolicy::Weighted { local: 0, remote: 1 },
        ] {
            let err = GeoRecordSynthesizer::new()
                .fallback(fallback)
                .synthesize(&fleet(), "www")
                .unwrap_err();
            assert!(matches!(err, SynthesisError::InvariantViolation(_)), "{}", fallback);
        }
    }

    #[test]
    fn test_weighted_policy_is_capped() {
        let err = GeoRecordSynthesizer::new()
            .fallback(FallbackPolicy::Weighted { local: 1, remote: u32::MAX })
            .synthesize(&fleet(), "www")
            .unwrap_err();
        assert!(matches!(err, SynthesisError::InvariantViolation(_)));

        assert!(FallbackPolicy::Weighted { local: MAX_WEIGHT, remote: MAX_WEIGHT }
            .validate()
            .is_ok());
    }

    #[test]
    fn test_every_selector_lists_targets() {
        let records = GeoRecordSynthesizer::new()
            .fallback(FallbackPolicy::Weighted { local: 1, remote: 0 })
            .synthesize(&fleet(), "www")
            .unwrap();

        assert!(records.iter().all(|r| !r.values.is_empty()));
    }

    #[test]
    fn test_wildcard_tag_on_server_is_not_repeated() {
        let mut servers = fleet();
        servers[0] = servers[0].clone().geolocation(GeoSelector::wildcard());
        let records = synthesize(&servers, "www").unwrap();

        let wildcard = records
            .iter()
            .filter(|r| r.selector.as_ref().map(|s| s.is_wildcard()).unwrap_or(false))
            .count();
        assert_eq!(wildcard, 2);
        assert_eq!(records.len(), 7);
    }

    #[test]
    fn test_ttls_and_caa() {
        let synthesizer = GeoRecordSynthesizer::new()
            .geo_ttl(300)
            .default_ttl(3600)
            .caa(CaaPolicy {
                issuers: vec!["letsencrypt.org".to_string()],
                issuewild: vec![],
                iodef: Some("mailto:hostmaster@luffy.cx".to_string()),
            });
        let records = synthesizer.synthesize(&fleet(), "www").unwrap();

        let caa = records.last().unwrap();
        assert_eq!(caa.record_type, RecordType::CAA);
        assert_eq!(caa.ttl, 3600);
        assert!(caa.selector.is_none());
        assert_eq!(
            caa.values,
            vec![
                "0 issue \"letsencrypt.org\"".to_string(),
                "0 iodef \"mailto:hostmaster@luffy.cx\"".to_string(),
            ]
        );
        assert!(records[..records.len() - 1].iter().all(|r| r.ttl == 300));
    }

    #[test]
    fn test_caa_without_issuers_forbids_issuance() {
        let policy = CaaPolicy {
            issuers: vec![],
            issuewild: vec![],
            iodef: None,
        };
        assert_eq!(policy.values(), vec!["0 issue \";\"".to_string()]);
    }
}
