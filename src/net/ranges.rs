/**
 * IP range handling for the scanners and the SOCKS drop-public policy.
 */
use std::net::{IpAddr, Ipv4Addr};

use crate::errors::{Error, Result};

/// The ranges scanned when no explicit IPs are given.
pub const PRIVATE_RANGES: &[&str] = &[
    "127.0.0.1/32",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
];

/**
 * Expands a list of single IPs and v4 CIDR ranges into individual
 * addresses. Invalid entries are yielded as errors so scanners can log and
 * continue.
 *
 * @param ranges Entries in either "a.b.c.d" or "a.b.c.d/nn" form.
 * @return An iterator over addresses and per-entry parse errors.
 */
pub fn ip_iterator(ranges: &[String]) -> impl Iterator<Item = Result<IpAddr>> + '_ {
    ranges.iter().flat_map(|entry| expand(entry))
}

fn expand(entry: &str) -> Box<dyn Iterator<Item = Result<IpAddr>> + '_> {
    match entry.split_once('/') {
        Some((base, prefix)) => {
            let base: Ipv4Addr = match base.parse() {
                Ok(ip) => ip,
                Err(e) => {
                    return Box::new(std::iter::once(Err(Error::Config(format!(
                        "invalid CIDR {}: {}",
                        entry, e
                    )))))
                }
            };
            let bits: u32 = match prefix.parse::<u32>() {
                Ok(bits) if bits <= 32 => bits,
                _ => {
                    return Box::new(std::iter::once(Err(Error::Config(format!(
                        "invalid CIDR prefix {}",
                        entry
                    )))))
                }
            };
            let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            let start = u32::from(base) & mask;
            let end = start | !mask;
            Box::new((start..=end).map(|raw| Ok(IpAddr::V4(Ipv4Addr::from(raw)))))
        }
        None => match entry.parse::<IpAddr>() {
            Ok(ip) => Box::new(std::iter::once(Ok(ip))),
            Err(e) => Box::new(std::iter::once(Err(Error::Config(format!(
                "invalid IP {}: {}",
                entry, e
            ))))),
        },
    }
}

/**
 * Returns whether an address belongs to a private, loopback, link-local or
 * otherwise non-public range. The SOCKS drop-public policy refuses
 * everything this function rejects.
 */
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_multicast()
                || v4.is_broadcast()
                // Shared Address Space, RFC 6598
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                // unique local fc00::/7
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // link local fe80::/10
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterator_single_ip() {
        let input = vec!["192.168.1.1".to_string()];
        let ips: Vec<_> = ip_iterator(&input).collect();
        assert_eq!(ips.len(), 1);
        assert_eq!(
            ips[0].as_ref().expect("parse failed"),
            &"192.168.1.1".parse::<IpAddr>().expect("invalid ip")
        );
    }

    #[test]
    fn test_iterator_cidr() {
        let input = vec!["10.1.2.0/30".to_string()];
        let ips: Vec<IpAddr> = ip_iterator(&input)
            .map(|r| r.expect("parse failed"))
            .collect();
        assert_eq!(
            ips,
            vec![
                "10.1.2.0".parse::<IpAddr>().expect("invalid ip"),
                "10.1.2.1".parse::<IpAddr>().expect("invalid ip"),
                "10.1.2.2".parse::<IpAddr>().expect("invalid ip"),
                "10.1.2.3".parse::<IpAddr>().expect("invalid ip"),
            ]
        );
    }

    #[test]
    fn test_iterator_host_route() {
        let input = vec!["127.0.0.1/32".to_string()];
        let ips: Vec<_> = ip_iterator(&input).collect();
        assert_eq!(ips.len(), 1);
    }

    #[test]
    fn test_iterator_invalid_entries_are_errors() {
        let input = vec!["garbage".to_string(), "10.0.0.1".to_string()];
        let results: Vec<_> = ip_iterator(&input).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }

    #[test]
    fn test_private_classification() {
        for ip in [
            "127.0.0.1",
            "10.255.0.1",
            "172.16.0.1",
            "192.168.0.1",
            "169.254.169.254",
            "100.64.0.1",
            "0.0.0.0",
            "::1",
            "fe80::1",
            "fd00::1",
        ] {
            assert!(
                is_private_ip(ip.parse().expect("invalid ip")),
                "{} should be private",
                ip
            );
        }
        for ip in ["8.8.8.8", "1.1.1.1", "2001:4860:4860::8888"] {
            assert!(
                !is_private_ip(ip.parse().expect("invalid ip")),
                "{} should be public",
                ip
            );
        }
    }
}
