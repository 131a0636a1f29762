//! SSRF-safe URL validation.
//!
//! Monitors and direct validations fetch caller-supplied URLs, so every URL
//! is vetted before any socket is opened: scheme and hostname checks happen
//! synchronously, then the hostname is resolved and *every* answer is
//! classified — a name that resolves to a mix of public and private
//! addresses is rejected outright, which is the cheap defence against DNS
//! rebinding. Redirect targets go through the same gate hop by hop.

use std::net::IpAddr;

use thiserror::Error;
use url::{Host, Url};

use trustseal_core::ipguard::is_blocked_ip;

/// Upper bound on resolved addresses considered; more than this is treated
/// as hostile input.
pub const MAX_DNS_ADDRESSES: usize = 25;

const BLOCKED_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Why a URL was refused.
#[derive(Error, Debug)]
pub enum UrlGuardError {
    #[error("invalid URL")]
    InvalidUrl(#[from] url::ParseError),

    #[error("only http(s) URLs are allowed, got {0}")]
    UnsupportedScheme(String),

    #[error("URL must include a hostname")]
    MissingHost,

    #[error("blocked hostname: {0}")]
    BlockedHost(String),

    #[error("blocked IP address: {0}")]
    BlockedIp(IpAddr),

    #[error("hostname {host} resolved to too many addresses ({count})")]
    TooManyAddresses { host: String, count: usize },

    #[error("failed to resolve {host}: {detail}")]
    Resolution { host: String, detail: String },
}

/// Synchronous checks: parse, scheme, hostname blocklist, literal IPs.
///
/// A URL passing this is not yet safe to fetch unless its host is a literal
/// IP; hostname resolution happens in [`assert_safe_remote_url`].
pub fn validate_remote_url(raw: &str) -> Result<Url, UrlGuardError> {
    let url = Url::parse(raw.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlGuardError::UnsupportedScheme(other.to_string())),
    }

    let host = url.host().ok_or(UrlGuardError::MissingHost)?;

    match host {
        Host::Domain(domain) => {
            let lower = domain.to_ascii_lowercase();
            if BLOCKED_HOSTS.contains(&lower.as_str()) || lower.ends_with(".local") {
                return Err(UrlGuardError::BlockedHost(lower));
            }
        }
        Host::Ipv4(ip) => {
            if is_blocked_ip(IpAddr::V4(ip)) {
                return Err(UrlGuardError::BlockedIp(IpAddr::V4(ip)));
            }
        }
        Host::Ipv6(ip) => {
            if is_blocked_ip(IpAddr::V6(ip)) {
                return Err(UrlGuardError::BlockedIp(IpAddr::V6(ip)));
            }
        }
    }

    Ok(url)
}

/// Full validation including DNS resolution of domain hosts.
pub async fn assert_safe_remote_url(raw: &str) -> Result<Url, UrlGuardError> {
    let url = validate_remote_url(raw)?;

    if let Some(Host::Domain(domain)) = url.host() {
        let domain = domain.to_ascii_lowercase();
        ensure_public_hostname(&domain).await?;
    }

    Ok(url)
}

async fn ensure_public_hostname(host: &str) -> Result<(), UrlGuardError> {
    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0u16))
        .await
        .map_err(|err| UrlGuardError::Resolution {
            host: host.to_string(),
            detail: err.to_string(),
        })?
        .map(|addr| addr.ip())
        .collect();

    check_resolved(host, &addrs)
}

fn check_resolved(host: &str, addrs: &[IpAddr]) -> Result<(), UrlGuardError> {
    if addrs.is_empty() {
        return Err(UrlGuardError::Resolution {
            host: host.to_string(),
            detail: "no addresses returned".to_string(),
        });
    }

    if addrs.len() > MAX_DNS_ADDRESSES {
        return Err(UrlGuardError::TooManyAddresses {
            host: host.to_string(),
            count: addrs.len(),
        });
    }

    for addr in addrs {
        if is_blocked_ip(*addr) {
            return Err(UrlGuardError::BlockedIp(*addr));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            validate_remote_url("ftp://example.com/file"),
            Err(UrlGuardError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            validate_remote_url("file:///etc/passwd"),
            Err(UrlGuardError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn rejects_unparseable_urls() {
        assert!(matches!(
            validate_remote_url("not a url"),
            Err(UrlGuardError::InvalidUrl(_))
        ));
    }

    #[test]
    fn rejects_blocked_hostnames() {
        for raw in [
            "http://localhost/feed",
            "http://LOCALHOST:8080/",
            "https://printer.local/status",
        ] {
            assert!(
                matches!(validate_remote_url(raw), Err(UrlGuardError::BlockedHost(_))),
                "{raw} should be refused"
            );
        }
    }

    #[test]
    fn rejects_blocked_ip_literals() {
        for raw in [
            "http://127.0.0.1/",
            "http://10.1.2.3/internal",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/",
            "http://[fc00::1]/",
            "http://[::ffff:10.1.1.1]/",
        ] {
            assert!(
                matches!(validate_remote_url(raw), Err(UrlGuardError::BlockedIp(_))),
                "{raw} should be refused"
            );
        }
    }

    #[test]
    fn accepts_public_ip_literals() {
        assert!(validate_remote_url("http://8.8.8.8/").is_ok());
        assert!(validate_remote_url("https://[2001:4860:4860::8888]/").is_ok());
    }

    #[test]
    fn accepts_public_hostnames_syntactically() {
        let url = validate_remote_url("https://example.com/feed.xml").unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
    }

    #[test]
    fn mixed_resolution_is_rejected() {
        let addrs = vec![
            "93.184.216.34".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
        ];
        assert!(matches!(
            check_resolved("evil.example.com", &addrs),
            Err(UrlGuardError::BlockedIp(_))
        ));
    }

    #[test]
    fn public_only_resolution_is_accepted() {
        let addrs = vec![
            "93.184.216.34".parse().unwrap(),
            "2606:4700:4700::1111".parse().unwrap(),
        ];
        assert!(check_resolved("ok.example.com", &addrs).is_ok());
    }

    #[test]
    fn oversized_answer_sets_are_rejected() {
        let addrs: Vec<IpAddr> = (0..=MAX_DNS_ADDRESSES as u8)
            .map(|i| IpAddr::from([93, 184, 216, i]))
            .collect();
        assert!(matches!(
            check_resolved("wild.example.com", &addrs),
            Err(UrlGuardError::TooManyAddresses { .. })
        ));
    }

    #[test]
    fn empty_resolution_is_rejected() {
        assert!(matches!(
            check_resolved("ghost.example.com", &[]),
            Err(UrlGuardError::Resolution { .. })
        ));
    }

    #[tokio::test]
    async fn literal_ip_urls_skip_resolution() {
        assert!(assert_safe_remote_url("http://8.8.8.8/status").await.is_ok());
        assert!(assert_safe_remote_url("http://127.0.0.1/status").await.is_err());
    }
}
