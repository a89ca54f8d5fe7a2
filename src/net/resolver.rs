/**
 * Hostname resolution helpers.
 */
use std::net::{IpAddr, SocketAddr};

use tokio::net::lookup_host;

use crate::errors::{Error, Result};

/**
 * Resolves a domain name to its IP addresses.
 *
 * @param name The hostname (or IP literal) to resolve.
 * @return All resolved addresses; callers pick the first one.
 */
pub async fn resolve_name(name: &str) -> Result<Vec<IpAddr>> {
    let addrs = lookup_host((name, 0u16))
        .await
        .map_err(|e| Error::Resolve(format!("{}: {}", name, e)))?;
    Ok(addrs.map(|a| a.ip()).collect())
}

/**
 * Resolves a "host:port" endpoint to its first socket address.
 */
pub async fn resolve_endpoint(endpoint: &str) -> Result<SocketAddr> {
    lookup_host(endpoint)
        .await
        .map_err(|e| Error::Resolve(format!("{}: {}", endpoint, e)))?
        .next()
        .ok_or_else(|| Error::Resolve(endpoint.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let addrs = resolve_name("127.0.0.1").await.expect("resolve failed");
        assert_eq!(addrs, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    }

    #[tokio::test]
    async fn test_resolve_endpoint() {
        let addr = resolve_endpoint("127.0.0.1:3478").await.expect("resolve failed");
        assert_eq!(addr.port(), 3478);
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_resolve_garbage_fails() {
        assert!(resolve_endpoint("not a host").await.is_err());
    }
}
