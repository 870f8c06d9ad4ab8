//! Normalization of human-supplied names and addresses before lookup.
//!
//! Stored names are upper-case ASCII. Unicode labels are converted to
//! punycode with the UTS-46 processing the `url` host parser applies, and
//! only then case-folded.

use crate::{HistoryError, IpVersion, Result};
use std::net::IpAddr;
use url::Host;

/// Canonical form of a zone, domain or nameserver name. The root zone is `""`.
pub fn normalize_name(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if trimmed.chars().any(|c| c.is_whitespace() || c.is_control() || c == '/') {
        return Err(HistoryError::validation(format!("invalid name {input:?}")));
    }
    if trimmed.is_ascii() {
        return Ok(trimmed.to_ascii_uppercase());
    }
    match Host::parse(trimmed) {
        Ok(Host::Domain(ascii)) => Ok(ascii.to_ascii_uppercase()),
        Ok(_) => Err(HistoryError::validation(format!("{input:?} is an address, not a name"))),
        Err(e) => Err(HistoryError::validation(format!("idna conversion failed for {input:?}: {e}"))),
    }
}

/// A single label to be combined with zone names (`<label>.<zone>`).
pub fn normalize_label(input: &str) -> Result<String> {
    let label = normalize_name(input)?;
    if label.is_empty() {
        return Err(HistoryError::validation("prefix must not be empty"));
    }
    if label.contains('.') {
        return Err(HistoryError::validation(format!("prefix {input:?} must be a single label")));
    }
    Ok(label)
}

/// Substring for feed searches; shorter than `min_len` is rejected outright.
pub fn search_term(input: &str, min_len: usize) -> Result<String> {
    let term = input.trim().to_ascii_uppercase();
    if term.chars().count() < min_len {
        return Err(HistoryError::validation(format!(
            "search term must be at least {min_len} characters long"
        )));
    }
    Ok(term)
}

/// An address in its version-tagged canonical text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalIp {
    pub addr: IpAddr,
    pub version: IpVersion,
}

impl CanonicalIp {
    pub fn text(&self) -> String {
        self.addr.to_string()
    }

    /// Raw network-order octets; ordered the same way as the addresses.
    pub fn key(&self) -> Vec<u8> {
        match self.addr {
            IpAddr::V4(a) => a.octets().to_vec(),
            IpAddr::V6(a) => a.octets().to_vec(),
        }
    }
}

pub fn parse_ip(input: &str) -> Result<CanonicalIp> {
    let s = input.trim();
    let s = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')).unwrap_or(s);
    let addr: IpAddr = s
        .parse()
        .map_err(|_| HistoryError::validation(format!("unparseable IP address {input:?}")))?;
    let version = match addr {
        IpAddr::V4(_) => IpVersion::V4,
        IpAddr::V6(_) => IpVersion::V6,
    };
    Ok(CanonicalIp { addr, version })
}
