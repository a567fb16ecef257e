//! Agent modules for the Luffy Engine
//!
//! - `geo_dns`: geolocation DNS record synthesis and zone sync

pub mod geo_dns;

pub use geo_dns::GeoDnsAgent;
