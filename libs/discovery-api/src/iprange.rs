//! Parsing and iteration over the `iprange`/`ports` union-of-intervals
//! syntax a discovery rule is declared with: comma-separated entries, each a
//! single address, a CIDR block, or an inclusive `a-b` range (either full
//! addresses on both sides, or a short form replacing only the trailing
//! octet: `10.0.0.1-54`).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RangeParseError {
    #[error("empty range entry")]
    Empty,
    #[error("invalid address or range: {0:?}")]
    InvalidEntry(String),
    #[error("range start {0} is greater than range end {1}")]
    StartAfterEnd(IpAddr, IpAddr),
    #[error("cannot mix IPv4 and IPv6 endpoints in one range entry: {0:?}")]
    MixedFamily(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    start: IpAddr,
    end: IpAddr,
}

impl Interval {
    fn single(addr: IpAddr) -> Self {
        Self {
            start: addr,
            end: addr,
        }
    }

    /// Number of addresses covered, saturating so a `/0` IPv6 block doesn't
    /// overflow `u128` math downstream; callers treat this as "effectively
    /// unbounded" and rely on their own cap rather than this count.
    fn len(&self) -> u128 {
        to_u128(self.end).saturating_sub(to_u128(self.start)).saturating_add(1)
    }
}

fn to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn from_u128(family: IpAddr, value: u128) -> IpAddr {
    match family {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::from(value as u32)),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

/// A union of inclusive IP intervals, as declared by a discovery rule's
/// `iprange` field.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct IpRange {
    #[serde(skip)]
    intervals: Vec<(IpAddr, IpAddr)>,
    /// Retained verbatim for display/persistence round-tripping.
    raw: String,
}

impl IpRange {
    pub fn parse(raw: &str) -> Result<Self, RangeParseError> {
        let mut intervals = Vec::new();
        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err(RangeParseError::Empty);
            }
            intervals.push(parse_entry(entry)?);
        }
        Ok(Self {
            intervals,
            raw: raw.to_owned(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Total addresses covered by this range, saturating at `u128::MAX`.
    pub fn address_count(&self) -> u128 {
        self.intervals
            .iter()
            .map(|(s, e)| Interval { start: *s, end: *e }.len())
            .fold(0u128, |acc, n| acc.saturating_add(n))
    }

    /// Iterates every address in the union, in declaration order, each
    /// interval in ascending order. Lazy: a rule covering a /8 does not
    /// allocate anything up front, so a caller enumerating under a capacity
    /// cap only ever does as much work as the cap allows.
    pub fn iter_addrs(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.intervals.iter().flat_map(|&(start, end)| {
            let s = to_u128(start);
            let e = to_u128(end);
            (s..=e).map(move |v| from_u128(start, v))
        })
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for IpRange {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_entry(entry: &str) -> Result<(IpAddr, IpAddr), RangeParseError> {
    if let Some((network, prefix)) = entry.split_once('/') {
        return parse_cidr(network, prefix, entry);
    }
    if let Some((lo, hi)) = entry.split_once('-') {
        return parse_dash_range(lo, hi, entry);
    }
    let addr: IpAddr = entry
        .parse()
        .map_err(|_| RangeParseError::InvalidEntry(entry.to_owned()))?;
    Ok((addr, addr))
}

fn parse_cidr(network: &str, prefix: &str, original: &str) -> Result<(IpAddr, IpAddr), RangeParseError> {
    let addr: IpAddr = network
        .parse()
        .map_err(|_| RangeParseError::InvalidEntry(original.to_owned()))?;
    let prefix_len: u32 = prefix
        .parse()
        .map_err(|_| RangeParseError::InvalidEntry(original.to_owned()))?;

    let bits = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if prefix_len > bits {
        return Err(RangeParseError::InvalidEntry(original.to_owned()));
    }

    let base = to_u128(addr);
    let host_bits = bits - prefix_len;
    let mask = if host_bits == 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    };
    let network_addr = base & !mask;
    let broadcast_addr = network_addr | mask;
    Ok((from_u128(addr, network_addr), from_u128(addr, broadcast_addr)))
}

fn parse_dash_range(lo: &str, hi: &str, original: &str) -> Result<(IpAddr, IpAddr), RangeParseError> {
    let start: IpAddr = lo
        .parse()
        .map_err(|_| RangeParseError::InvalidEntry(original.to_owned()))?;

    // Short form: "10.0.0.1-54" means the end address shares every octet
    // with `start` except the last, which is replaced by `hi`.
    let end: IpAddr = if let Ok(full) = hi.parse::<IpAddr>() {
        match (start, full) {
            (IpAddr::V4(_), IpAddr::V6(_)) | (IpAddr::V6(_), IpAddr::V4(_)) => {
                return Err(RangeParseError::MixedFamily(original.to_owned()));
            }
            _ => full,
        }
    } else {
        match start {
            IpAddr::V4(v4) => {
                let last: u8 = hi
                    .parse()
                    .map_err(|_| RangeParseError::InvalidEntry(original.to_owned()))?;
                let [a, b, c, _] = v4.octets();
                IpAddr::V4(Ipv4Addr::new(a, b, c, last))
            }
            IpAddr::V6(_) => return Err(RangeParseError::InvalidEntry(original.to_owned())),
        }
    };

    if to_u128(start) > to_u128(end) {
        return Err(RangeParseError::StartAfterEnd(start, end));
    }
    Ok((start, end))
}

/// A union of inclusive `u16` port intervals, using the same `a,b-c` syntax
/// as [`IpRange`] but over a flat numeric space.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct PortRange {
    intervals: Vec<(u16, u16)>,
    raw: String,
}

impl PortRange {
    pub fn parse(raw: &str) -> Result<Self, RangeParseError> {
        let mut intervals = Vec::new();
        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err(RangeParseError::Empty);
            }
            if let Some((lo, hi)) = entry.split_once('-') {
                let lo: u16 = lo
                    .parse()
                    .map_err(|_| RangeParseError::InvalidEntry(entry.to_owned()))?;
                let hi: u16 = hi
                    .parse()
                    .map_err(|_| RangeParseError::InvalidEntry(entry.to_owned()))?;
                if lo > hi {
                    return Err(RangeParseError::StartAfterEnd(
                        IpAddr::V4(Ipv4Addr::from(lo as u32)),
                        IpAddr::V4(Ipv4Addr::from(hi as u32)),
                    ));
                }
                intervals.push((lo, hi));
            } else {
                let p: u16 = entry
                    .parse()
                    .map_err(|_| RangeParseError::InvalidEntry(entry.to_owned()))?;
                intervals.push((p, p));
            }
        }
        Ok(Self {
            intervals,
            raw: raw.to_owned(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn iter_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.intervals.iter().flat_map(|&(lo, hi)| lo..=hi)
    }

    pub fn count(&self) -> u64 {
        self.intervals
            .iter()
            .map(|&(lo, hi)| (hi - lo) as u64 + 1)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_address() {
        let r = IpRange::parse("10.0.0.1").unwrap();
        let addrs: Vec<_> = r.iter_addrs().collect();
        assert_eq!(addrs, vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn parses_full_dash_range() {
        let r = IpRange::parse("10.0.0.1-10.0.0.4").unwrap();
        assert_eq!(r.address_count(), 4);
        let addrs: Vec<_> = r.iter_addrs().collect();
        assert_eq!(addrs.len(), 4);
        assert_eq!(addrs[0], "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(addrs[3], "10.0.0.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn parses_short_form_last_octet_range() {
        let r = IpRange::parse("192.168.1.1-10").unwrap();
        assert_eq!(r.address_count(), 10);
    }

    #[test]
    fn parses_cidr() {
        let r = IpRange::parse("10.0.0.0/30").unwrap();
        assert_eq!(r.address_count(), 4);
        let addrs: Vec<_> = r.iter_addrs().collect();
        assert_eq!(addrs[0], "10.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(addrs[3], "10.0.0.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn parses_comma_separated_union() {
        let r = IpRange::parse("10.0.0.1,10.0.0.5-10.0.0.6").unwrap();
        assert_eq!(r.address_count(), 3);
    }

    #[test]
    fn rejects_start_after_end() {
        let err = IpRange::parse("10.0.0.5-10.0.0.1").unwrap_err();
        assert!(matches!(err, RangeParseError::StartAfterEnd(_, _)));
    }

    #[test]
    fn rejects_mixed_family_dash_range() {
        let err = IpRange::parse("10.0.0.1-::1").unwrap_err();
        assert!(matches!(err, RangeParseError::MixedFamily(_)));
    }

    #[test]
    fn port_range_parses_and_iterates() {
        let p = PortRange::parse("22,80,8000-8002").unwrap();
        assert_eq!(p.count(), 5);
        let ports: Vec<_> = p.iter_ports().collect();
        assert_eq!(ports, vec![22, 80, 8000, 8001, 8002]);
    }
}
