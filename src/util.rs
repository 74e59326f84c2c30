use anyhow::Result;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};

/// Accepts an IP literal or a syntactically valid DNS name.
pub fn validate_target(target: &str) -> Result<()> {
    if target.parse::<IpAddr>().is_ok() || is_valid_hostname(target) {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Invalid IP address or domain: \"{}\"", target))
    }
}

fn is_valid_hostname(host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

pub async fn resolve_host_to_ip(host: &str) -> Result<IpAddr> {
    // First try to parse as IP address
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
    let lookup = resolver
        .lookup_ip(host)
        .await
        .map_err(|e| anyhow::anyhow!("Could not resolve hostname {}: {}", host, e))?;
    lookup
        .iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Could not resolve hostname: {}", host))
}

/// Drops the connection with an RST instead of a graceful FIN.
pub fn abort_connection(stream: TcpStream) {
    if let Err(e) = socket2::SockRef::from(&stream).set_linger(Some(Duration::ZERO)) {
        tracing::debug!("failed to set SO_LINGER before abort: {}", e);
    }
    drop(stream);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ips_and_hostnames() {
        for target in ["127.0.0.1", "::1", "fe80::1", "example.com", "mc.example-server.net.", "localhost"] {
            assert!(validate_target(target).is_ok(), "{target}");
        }
    }

    #[test]
    fn rejects_malformed_targets() {
        for target in ["", "exa mple.com", "-bad.com", "bad-.com", "a..b", "http://example.com", "1.2.3.4:80"] {
            assert!(validate_target(target).is_err(), "{target}");
        }
        assert!(validate_target(&"a".repeat(64)).is_err());
    }

    #[tokio::test]
    async fn ip_literals_resolve_to_themselves() {
        let ip = resolve_host_to_ip("192.0.2.7").await.unwrap();
        assert_eq!(ip, "192.0.2.7".parse::<IpAddr>().unwrap());
    }
}
