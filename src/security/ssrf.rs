//! SSRF guard applied to every outbound fetch.
//!
//! Fails closed: a URL is rejected unless it is http(s), has a host, and every
//! address the host resolves to lies outside the private/loopback/link-local ranges.

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use once_cell::sync::Lazy;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnsafeTarget {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("scheme not allowed: {0}")]
    DisallowedScheme(String),
    #[error("url has no host")]
    NoHost,
    #[error("host is blocked: {0}")]
    BlockedHost(String),
    #[error("address {0} is in a private range")]
    BlockedAddress(IpAddr),
    #[error("could not resolve {host}: {reason}")]
    DnsResolution { host: String, reason: String },
}

static BLOCKED_NETS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "::/128",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .filter_map(|c| c.parse().ok())
    .collect()
});

const BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "metadata.google.internal",
    "metadata.gke.internal",
    "instance-data",
];

#[derive(Debug, Clone, Default)]
pub struct UrlGuard {
    allowed_hosts: HashSet<String>,
}

impl UrlGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exempt a host from the address checks (tests, internal mirrors).
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.insert(host.into().to_ascii_lowercase());
        self
    }

    /// Scheme/host/literal-address checks, no DNS.
    pub fn check_static(&self, raw: &str) -> Result<url::Url, UnsafeTarget> {
        let parsed = url::Url::parse(raw).map_err(|e| UnsafeTarget::InvalidUrl(e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(UnsafeTarget::DisallowedScheme(other.to_string())),
        }
        let host = normalized_host(&parsed)?;
        if self.allowed_hosts.contains(&host) {
            return Ok(parsed);
        }
        if BLOCKED_HOSTS.contains(&host.as_str()) || host.ends_with(".localhost") {
            return Err(UnsafeTarget::BlockedHost(host));
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            check_ip(ip)?;
        }
        Ok(parsed)
    }

    /// Full check including DNS resolution of the host.
    pub async fn validate(&self, raw: &str) -> Result<url::Url, UnsafeTarget> {
        let parsed = self.check_static(raw)?;
        let host = normalized_host(&parsed)?;
        if self.allowed_hosts.contains(&host) || host.parse::<IpAddr>().is_ok() {
            return Ok(parsed);
        }

        let port = parsed.port_or_known_default().unwrap_or(80);
        let addrs = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| UnsafeTarget::DnsResolution {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        let mut any = false;
        for addr in addrs {
            any = true;
            check_ip(addr.ip())?;
        }
        if !any {
            return Err(UnsafeTarget::DnsResolution {
                host,
                reason: "no addresses".into(),
            });
        }
        Ok(parsed)
    }
}

/// Lower-cased host without IPv6 brackets or the trailing root dot.
fn normalized_host(parsed: &url::Url) -> Result<String, UnsafeTarget> {
    let host = parsed
        .host_str()
        .ok_or(UnsafeTarget::NoHost)?
        .trim_matches(|c| c == '[' || c == ']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if host.is_empty() {
        return Err(UnsafeTarget::NoHost);
    }
    Ok(host)
}

fn check_ip(ip: IpAddr) -> Result<(), UnsafeTarget> {
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    };
    if BLOCKED_NETS.iter().any(|net| net.contains(&ip)) {
        return Err(UnsafeTarget::BlockedAddress(ip));
    }
    Ok(())
}
