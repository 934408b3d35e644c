//! Pool range definitions.
//!
//! A [`Range`] is the ordered, immutable set of pool members replicas race
//! for: decimal identifiers or IPv4 addresses. Specs come in two forms,
//! hyphen (`"1-5"`, `"10.0.0.1-10.0.0.9"`, inclusive) and comma
//! (`"1,3,5"`, `"10.0.0.1, 10.0.0.2"`). IPv6 addresses are accepted in
//! comma form only; a hyphenated IPv6 span cannot be enumerated.

use crate::core::error::{Error, Result};

/// What kind of members a range holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// Decimal identifiers.
    Id,
    /// IPv4 addresses (IPv6 allowed in comma specs).
    Ipv4,
}

/// An ordered set of pool member strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    kind: RangeKind,
    members: Vec<String>,
}

impl Range {
    /// Parse an ID range spec.
    pub fn ids(spec: &str) -> Result<Self> {
        let ids = parse_id_range(spec)?;
        Ok(Self {
            kind: RangeKind::Id,
            members: ids.iter().map(i64::to_string).collect(),
        })
    }

    /// Parse an IPv4 range spec.
    pub fn ipv4(spec: &str) -> Result<Self> {
        Ok(Self {
            kind: RangeKind::Ipv4,
            members: parse_ipv4_range(spec)?,
        })
    }

    /// The pool kind.
    pub fn kind(&self) -> RangeKind {
        self.kind
    }

    /// Members in declaration order.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// A parsed range is never empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Parse an ID spec into the numeric members.
pub fn parse_id_range(input: &str) -> Result<Vec<i64>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidRange);
    }

    let mut result = Vec::new();

    if input.contains('-') {
        let parts: Vec<&str> = input.split('-').collect();
        if parts.len() != 2 {
            return Err(Error::InvalidRange);
        }
        let start: i64 = parts[0]
            .trim()
            .parse()
            .map_err(|_| Error::InvalidRange)?;
        let end: i64 = parts[1]
            .trim()
            .parse()
            .map_err(|_| Error::InvalidRange)?;
        if start > end {
            return Err(Error::InvalidRange);
        }
        result.extend(start..=end);
    } else {
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let id: i64 = part.parse().map_err(|_| Error::InvalidRange)?;
            result.push(id);
        }
    }

    if result.is_empty() {
        return Err(Error::EmptyRange);
    }
    Ok(result)
}

/// Parse an IPv4 spec into the address members.
pub fn parse_ipv4_range(input: &str) -> Result<Vec<String>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidRange);
    }

    let mut result = Vec::new();

    if input.contains('-') {
        let parts: Vec<&str> = input.split('-').collect();
        if parts.len() != 2 {
            return Err(Error::InvalidRange);
        }
        let start = parts[0].trim();
        let end = parts[1].trim();

        if !is_valid_ip(start) || !is_valid_ip(end) {
            return Err(Error::InvalidRange);
        }
        if is_ipv6(start) || is_ipv6(end) {
            return Err(Error::Ipv6RangeUnsupported);
        }

        result = enumerate_ipv4(start, end)?;
    } else {
        for part in input.split(',') {
            let ip = part.trim();
            if ip.is_empty() {
                continue;
            }
            if !is_valid_ip(ip) {
                return Err(Error::InvalidRange);
            }
            result.push(ip.to_string());
        }
    }

    if result.is_empty() {
        return Err(Error::EmptyRange);
    }
    Ok(result)
}

fn is_valid_ip(ip: &str) -> bool {
    is_ipv4(ip) || is_ipv6(ip)
}

fn is_ipv4(ip: &str) -> bool {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|part| {
        // Multi-digit octets must not start with zero.
        if part.len() > 1 && part.starts_with('0') {
            return false;
        }
        part.parse::<u8>().is_ok()
    })
}

fn is_ipv6(ip: &str) -> bool {
    if !ip.contains(':') || ip.contains(":::") {
        return false;
    }

    let parts: Vec<&str> = ip.split(':').collect();
    if parts.len() > 8 {
        return false;
    }

    let double_colons = ip.matches("::").count();
    if double_colons > 1 {
        return false;
    }
    if double_colons == 1 {
        if parts.len() > 7 {
            return false;
        }
    } else if parts.len() != 8 {
        return false;
    }

    parts.iter().all(|part| {
        part.is_empty() || (part.len() <= 4 && u16::from_str_radix(part, 16).is_ok())
    })
}

fn enumerate_ipv4(start: &str, end: &str) -> Result<Vec<String>> {
    let start = ipv4_to_u32(start);
    let end = ipv4_to_u32(end);
    if start > end {
        return Err(Error::InvalidRange);
    }
    Ok((start..=end).map(u32_to_ipv4).collect())
}

fn ipv4_to_u32(ip: &str) -> u32 {
    ip.split('.')
        .map(|octet| octet.parse::<u32>().unwrap_or(0))
        .fold(0, |acc, octet| (acc << 8) | octet)
}

fn u32_to_ipv4(ip: u32) -> String {
    format!(
        "{}.{}.{}.{}",
        (ip >> 24) & 0xFF,
        (ip >> 16) & 0xFF,
        (ip >> 8) & 0xFF,
        ip & 0xFF
    )
}
