//! CIDR range enumeration for full scans

use std::net::Ipv4Addr;

use super::ScanError;

/// Largest number of hosts a single range may expand to (a /22)
pub const MAX_RANGE_HOSTS: u64 = 1022;

/// Host addresses of a private IPv4 range such as `192.168.1.0/24`
///
/// Network and broadcast addresses are excluded except for /31 and /32.
pub fn expand(range: &str) -> Result<Vec<Ipv4Addr>, ScanError> {
    let invalid = |reason: &str| ScanError::InvalidRange {
        range: range.to_string(),
        reason: reason.to_string(),
    };

    let (addr, prefix) = range
        .trim()
        .split_once('/')
        .ok_or_else(|| invalid("expected <address>/<prefix>"))?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("not an IPv4 address"))?;
    let prefix: u32 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;

    if prefix > 32 {
        return Err(invalid("prefix length must be at most 32"));
    }
    if !addr.is_private() {
        return Err(invalid("only private ranges are scanned"));
    }

    let size = 1u64 << (32 - prefix);
    let hosts = if prefix >= 31 { size } else { size - 2 };
    if hosts > MAX_RANGE_HOSTS {
        return Err(invalid("range is larger than a /22"));
    }

    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    let network = u32::from(addr) & mask;
    let first = if prefix >= 31 { 0 } else { 1 };

    Ok((first..first + hosts)
        .map(|offset| Ipv4Addr::from(network + offset as u32))
        .collect())
}
