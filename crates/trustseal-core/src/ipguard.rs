//! IP range classification for the SSRF guard.
//!
//! Monitors fetch caller-supplied URLs on a schedule, so every address a
//! fetch could reach is classified here first. The rule is allowlist-by-
//! exclusion: anything private, loopback, link-local, carrier-grade NAT,
//! multicast, or otherwise non-public is blocked, and unparseable input is
//! treated as blocked rather than given the benefit of the doubt.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Parse an IP literal, tolerating a trailing zone suffix (`fe80::1%eth0`).
pub fn parse_ip_literal(raw: &str) -> Option<IpAddr> {
    let trimmed = raw.trim();
    let without_zone = match trimmed.find('%') {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    };
    without_zone.parse().ok()
}

/// Whether an address must never be fetched.
pub fn is_blocked_ip(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

/// Classify a textual address; anything unparseable is blocked.
pub fn is_blocked_ip_str(raw: &str) -> bool {
    parse_ip_literal(raw).map_or(true, is_blocked_ip)
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();

    a == 0 // "this network" / unspecified
        || a == 10 // private
        || a == 127 // loopback
        || (a == 169 && b == 254) // link-local
        || (a == 172 && (16..=31).contains(&b)) // private
        || (a == 192 && b == 168) // private
        || (a == 100 && (64..=127).contains(&b)) // CGNAT
        || a >= 224 // multicast and above
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    let o = ip.octets();

    if o == [0u8; 16] {
        return true; // ::
    }
    if o[..15] == [0u8; 15] && o[15] == 1 {
        return true; // ::1
    }
    if o[0] == 0xff {
        return true; // multicast ff00::/8
    }
    if o[0] & 0xfe == 0xfc {
        return true; // unique-local fc00::/7
    }
    if o[0] == 0xfe && o[1] & 0xc0 == 0x80 {
        return true; // link-local fe80::/10
    }

    // IPv4-compatible (::a.b.c.d): defer to the IPv4 rules
    if o[..12] == [0u8; 12] {
        return is_blocked_v4(Ipv4Addr::new(o[12], o[13], o[14], o[15]));
    }

    // IPv4-mapped (::ffff:a.b.c.d): same
    if o[..10] == [0u8; 10] && o[10] == 0xff && o[11] == 0xff {
        return is_blocked_v4(Ipv4Addr::new(o[12], o[13], o[14], o[15]));
    }

    false
}
