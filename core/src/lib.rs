//! Core types shared by the zonetrail store, engines and CLI.

pub mod ctx;
pub mod date;
pub mod error;
pub mod names;
pub mod window;

pub use ctx::QueryCtx;
pub use error::{HistoryError, Result, TransientKind};
pub use window::{Validity, Window};

use serde::Serialize;
use std::fmt;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub type ZoneId = i64;
pub type DomainId = i64;
pub type NameServerId = i64;
pub type AddressId = i64;
pub type ImportId = i64;

/// The classes of entity the registry knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Zone,
    Domain,
    NameServer,
    Address,
}

impl EntityClass {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityClass::Zone => "zone",
            EntityClass::Domain => "domain",
            EntityClass::NameServer => "nameserver",
            EntityClass::Address => "ip",
        }
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP family of an address or of a glue association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "u8")]
pub enum IpVersion {
    V4,
    V6,
}

impl From<IpVersion> for u8 {
    fn from(v: IpVersion) -> u8 {
        v.number()
    }
}

impl IpVersion {
    pub const ALL: [IpVersion; 2] = [IpVersion::V4, IpVersion::V6];

    pub fn number(self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IPv{}", self.number())
    }
}

/// A resolved entity: its identifier plus its canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntityRef {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
}

impl EntityRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        EntityRef { id, name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }

    #[test]
    fn ip_version_serializes_as_number() {
        assert_eq!(serde_json::to_string(&IpVersion::V6).unwrap(), "6");
        assert_eq!(IpVersion::V4.to_string(), "IPv4");
    }
}
