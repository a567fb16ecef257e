//! Luffy Engine Library
//!
//! Declarative DNS for the luffy.cx web fleet.

pub mod agents;

pub use agents::geo_dns;
pub use agents::GeoDnsAgent;
