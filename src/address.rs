//! Validates target addresses and looks up their reverse DNS names.
//!
//! Targets must be IP literals: hostnames are rejected rather than resolved,
//! and reverse lookups are best-effort metadata only.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use log::debug;
use tokio::{fs, io};

/// Whether `address` is an IPv4 or IPv6 literal.
///
/// ```rust
/// # use reconscan::address::validate_ip;
/// assert!(validate_ip("192.168.0.1"));
/// assert!(validate_ip("::1"));
/// assert!(!validate_ip("999.999.999.999"));
/// assert!(!validate_ip("localhost"));
/// ```
pub fn validate_ip(address: &str) -> bool {
    parse_target(address).is_some()
}

/// Parses an IP literal. No DNS resolution is attempted.
pub fn parse_target(address: &str) -> Option<IpAddr> {
    IpAddr::from_str(address).ok()
}

/// Reverse DNS name of `ip`, without the trailing root dot.
///
/// Lookup failures, including a missing PTR record, yield `None`.
pub async fn resolve_hostname(ip: IpAddr, resolver: &TokioAsyncResolver) -> Option<String> {
    match resolver.reverse_lookup(ip).await {
        Ok(lookup) => lookup
            .iter()
            .map(|name| name.to_string().trim_end_matches('.').to_owned())
            .find(|name| !name.is_empty()),
        Err(e) => {
            debug!("Reverse lookup of {ip} failed: {e}");
            None
        }
    }
}

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver.
pub async fn get_resolver(resolver: &Option<String>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => r
                    .split(',')
                    .filter_map(|r| IpAddr::from_str(r.trim()).ok())
                    .collect::<Vec<_>>(),
            };
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

/// Parses an input file of resolver IPs, one per line.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::{get_resolver, parse_target, resolve_hostname, validate_ip};
    use parameterized::parameterized;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[parameterized(address = {
        "127.0.0.1", "10.0.0.255", "::1", "fe80::1", "2001:db8::8a2e:370:7334",
    })]
    fn accepts_ip_literals(address: &str) {
        assert!(validate_ip(address));
    }

    #[parameterized(address = {
        "999.999.999.999", "localhost", "example.com", "", "192.168.0.0/30", "1.2.3",
        " 127.0.0.1",
    })]
    fn rejects_everything_else(address: &str) {
        assert!(!validate_ip(address));
    }

    #[test]
    fn parse_target_keeps_family() {
        assert_eq!(
            parse_target("127.0.0.1"),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(parse_target("::1"), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[tokio::test]
    async fn unreachable_resolver_yields_no_hostname() {
        // Nothing answers DNS on this address, so the lookup must fail quietly.
        let resolver = get_resolver(&Some("127.0.0.1".to_owned())).await;
        let name = resolve_hostname("192.0.2.1".parse().unwrap(), &resolver).await;
        assert_eq!(name, None);
    }
}
