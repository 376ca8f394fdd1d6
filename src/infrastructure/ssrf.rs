//! SSRF Guard.
//!
//! Two operations: `validate_url` is a static, no-DNS check used at feed
//! registration time; `new_safe_client` builds an HTTP client whose DNS
//! resolver rejects private/loopback/link-local/metadata IPs *after*
//! resolution, which is what closes the DNS-rebinding hole a static check
//! alone cannot (a hostname can resolve to a public IP at validation time
//! and a private one at fetch time).

use futures::StreamExt;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum SsrfError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL scheme not allowed: {0}")]
    InvalidScheme(String),

    #[error("host is empty")]
    EmptyHost,

    #[error("host resolves to a blocked IP address")]
    BlockedIp,

    #[error("host is a blocked hostname: {0}")]
    BlockedHostname(String),

    #[error("destination port {0} is not in the allowed set {{80, 443}}")]
    BlockedPort(u16),

    #[error("response exceeded the {0}-byte size cap")]
    TooLarge(usize),

    #[error("DNS resolution failed: {0}")]
    DnsFailed(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

const BLOCKED_HOSTNAMES: &[&str] = &["localhost"];

/// Is this IPv4 address inside one of the closed blocked CIDRs: 10/8,
/// 172.16/12, 192.168/16, 127/8, 169.254/16 (covers the cloud metadata
/// address 169.254.169.254), 0/8.
pub fn is_blocked_ipv4(ip: &Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 10
        || (o[0] == 172 && (16..=31).contains(&o[1]))
        || (o[0] == 192 && o[1] == 168)
        || o[0] == 127
        || (o[0] == 169 && o[1] == 254)
        || o[0] == 0
}

/// IPv6 blocked CIDRs: ::1/128, fe80::/10, fc00::/7.
pub fn is_blocked_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() {
        return true;
    }
    let seg0 = ip.segments()[0];
    if seg0 & 0xffc0 == 0xfe80 {
        return true;
    }
    if seg0 & 0xfe00 == 0xfc00 {
        return true;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(&v4);
    }
    false
}

pub fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

/// Static, no-DNS validation. Run at feed-registration time; `new_safe_client`
/// must still be used for the actual fetch since this alone cannot see
/// through DNS rebinding.
pub fn validate_url(raw: &str) -> Result<(), SsrfError> {
    if raw.trim().is_empty() {
        return Err(SsrfError::InvalidUrl("empty URL".to_string()));
    }

    let url = Url::parse(raw).map_err(|e| SsrfError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(SsrfError::InvalidScheme(other.to_string())),
    }

    let host = url.host_str().ok_or(SsrfError::EmptyHost)?;
    if host.is_empty() {
        return Err(SsrfError::EmptyHost);
    }

    if BLOCKED_HOSTNAMES
        .iter()
        .any(|h| h.eq_ignore_ascii_case(host))
    {
        return Err(SsrfError::BlockedHostname(host.to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_blocked_ip(&ip) {
            return Err(SsrfError::BlockedIp);
        }
    }

    let port = url.port_or_known_default().unwrap_or(80);
    if port != 80 && port != 443 {
        return Err(SsrfError::BlockedPort(port));
    }

    Ok(())
}

/// A `reqwest::dns::Resolve` that performs the real lookup and then filters
/// out any address in a blocked CIDR. If every resolved address is blocked,
/// the filtered iterator is empty and the connection attempt fails — this
/// is what catches DNS rebinding, since the filtering happens after the
/// resolver has actually talked to DNS for *this* request.
#[derive(Clone, Default)]
struct SafeResolver;

impl Resolve for SafeResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            let lookup = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                    Box::new(SsrfError::DnsFailed(e.to_string()))
                })?;

            let addrs: Vec<SocketAddr> = lookup.filter(|a| !is_blocked_ip(&a.ip())).collect();

            if addrs.is_empty() {
                return Err(Box::new(SsrfError::BlockedIp)
                    as Box<dyn std::error::Error + Send + Sync>);
            }

            let iter: Addrs = Box::new(addrs.into_iter());
            Ok(iter)
        })
    }
}

/// Build an HTTP client whose dialer rejects private/loopback/link-local/
/// metadata IPs after DNS resolution, and whose redirects are revalidated
/// (scheme + port) before being followed.
pub fn new_safe_client(timeout: Duration, user_agent: &str) -> Result<reqwest::Client, SsrfError> {
    let policy = reqwest::redirect::Policy::custom(|attempt| {
        match validate_url(attempt.url().as_str()) {
            Ok(()) => attempt.follow(),
            Err(_) => attempt.stop(),
        }
    });

    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .redirect(policy)
        .dns_resolver(Arc::new(SafeResolver))
        .build()
        .map_err(SsrfError::Request)
}

/// Drain a response body through a length-limited reader; the SSRF guard's
/// other job (besides IP/host checks) is bounding memory use from hostile or
/// misbehaving servers.
pub async fn read_limited_body(
    response: reqwest::Response,
    max_size: usize,
) -> Result<Vec<u8>, SsrfError> {
    let mut buf = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > max_size {
            return Err(SsrfError::TooLarge(max_size));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_rfc1918_ipv4() {
        assert!(is_blocked_ipv4(&Ipv4Addr::new(10, 0, 0, 1)));
        assert!(is_blocked_ipv4(&Ipv4Addr::new(172, 16, 0, 1)));
        assert!(is_blocked_ipv4(&Ipv4Addr::new(172, 31, 255, 255)));
        assert!(!is_blocked_ipv4(&Ipv4Addr::new(172, 32, 0, 1)));
        assert!(is_blocked_ipv4(&Ipv4Addr::new(192, 168, 1, 1)));
    }

    #[test]
    fn blocks_loopback_and_metadata() {
        assert!(is_blocked_ipv4(&Ipv4Addr::new(127, 0, 0, 1)));
        assert!(is_blocked_ipv4(&Ipv4Addr::new(169, 254, 169, 254)));
        assert!(is_blocked_ipv4(&Ipv4Addr::new(0, 0, 0, 0)));
    }

    #[test]
    fn allows_public_ipv4() {
        assert!(!is_blocked_ipv4(&Ipv4Addr::new(8, 8, 8, 8)));
        assert!(!is_blocked_ipv4(&Ipv4Addr::new(93, 184, 216, 34)));
    }

    #[test]
    fn blocks_ipv6_loopback_link_local_unique_local() {
        assert!(is_blocked_ipv6(&Ipv6Addr::LOCALHOST));
        assert!(is_blocked_ipv6(&Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)));
        assert!(is_blocked_ipv6(&Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 1)));
        assert!(!is_blocked_ipv6(&Ipv6Addr::new(
            0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888
        )));
    }

    // P1: for all URLs in any blocked CIDR or with scheme not in {http,
    // https}, validate_url fails.
    #[test]
    fn p1_rejects_blocked_schemes() {
        assert!(validate_url("ftp://example.com/feed").is_err());
        assert!(validate_url("javascript:alert(1)").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn p1_rejects_literal_blocked_ips() {
        assert!(validate_url("http://127.0.0.1/feed").is_err());
        assert!(validate_url("http://169.254.169.254/latest/meta-data").is_err());
        assert!(validate_url("http://10.0.0.5/feed").is_err());
        assert!(validate_url("http://[::1]/feed").is_err());
    }

    #[test]
    fn rejects_empty_and_localhost() {
        assert!(validate_url("").is_err());
        assert!(validate_url("http://localhost/feed").is_err());
        assert!(validate_url("http://LOCALHOST/feed").is_err());
    }

    #[test]
    fn rejects_unusual_ports() {
        assert!(validate_url("http://example.com:8080/feed").is_err());
        assert!(validate_url("https://example.com:8443/feed").is_err());
        assert!(validate_url("https://example.com:443/feed").is_ok());
    }

    #[test]
    fn allows_plain_public_urls() {
        assert!(validate_url("https://example.com/feed.xml").is_ok());
        assert!(validate_url("http://example.com/feed.xml").is_ok());
    }
}
