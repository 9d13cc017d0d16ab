//! Static knowledge about well-known services.
//!
//! Two read-only tables live here:
//!
//! - the fingerprint table, mapping a port number to the transport the
//!   service normally speaks and the [`Service`] expected behind it;
//! - the probe table, expressed as [`Service::probe`], giving the bytes to
//!   send right after a TCP connection succeeds.
//!
//! Both are compiled into the binary and never mutated.
use std::fmt;
use std::str::FromStr;

use crate::scanner::Protocol;
use crate::version;

/// Transport a service is normally reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Both,
}

impl Transport {
    /// Whether a service with this affinity is expected on `protocol`.
    pub fn carries(self, protocol: Protocol) -> bool {
        matches!(
            (self, protocol),
            (Self::Both, _) | (Self::Tcp, Protocol::Tcp) | (Self::Udp, Protocol::Udp)
        )
    }
}

/// Services known to the fingerprint table.
///
/// [`Service::Unknown`] is used when a port has no table entry; it carries
/// no probe and its banners are reported verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    FtpData,
    Ftp,
    Ssh,
    Telnet,
    Smtp,
    Http,
    Pop3,
    Imap,
    Https,
    Mysql,
    Dns,
    DhcpServer,
    DhcpClient,
    Tftp,
    Ntp,
    NetbiosNs,
    NetbiosDgm,
    Snmp,
    SnmpTrap,
    Ike,
    Syslog,
    Rip,
    Ssdp,
    IpsecNatt,
    Mdns,
    Memcached,
    Unknown,
}

impl Service {
    /// Every variant except [`Service::Unknown`].
    pub const KNOWN: [Self; 26] = [
        Self::FtpData,
        Self::Ftp,
        Self::Ssh,
        Self::Telnet,
        Self::Smtp,
        Self::Http,
        Self::Pop3,
        Self::Imap,
        Self::Https,
        Self::Mysql,
        Self::Dns,
        Self::DhcpServer,
        Self::DhcpClient,
        Self::Tftp,
        Self::Ntp,
        Self::NetbiosNs,
        Self::NetbiosDgm,
        Self::Snmp,
        Self::SnmpTrap,
        Self::Ike,
        Self::Syslog,
        Self::Rip,
        Self::Ssdp,
        Self::IpsecNatt,
        Self::Mdns,
        Self::Memcached,
    ];

    /// Label used in scan results.
    pub fn name(self) -> &'static str {
        match self {
            Self::FtpData => "ftp-data",
            Self::Ftp => "ftp",
            Self::Ssh => "ssh",
            Self::Telnet => "telnet",
            Self::Smtp => "smtp",
            Self::Http => "http",
            Self::Pop3 => "pop3",
            Self::Imap => "imap",
            Self::Https => "https",
            Self::Mysql => "mysql",
            Self::Dns => "dns",
            Self::DhcpServer => "dhcp-server",
            Self::DhcpClient => "dhcp-client",
            Self::Tftp => "tftp",
            Self::Ntp => "ntp",
            Self::NetbiosNs => "netbios-ns",
            Self::NetbiosDgm => "netbios-dgm",
            Self::Snmp => "snmp",
            Self::SnmpTrap => "snmp-trap",
            Self::Ike => "ike",
            Self::Syslog => "syslog",
            Self::Rip => "rip",
            Self::Ssdp => "ssdp",
            Self::IpsecNatt => "ipsec-natt",
            Self::Mdns => "mdns",
            Self::Memcached => "memcached",
            Self::Unknown => "unknown",
        }
    }

    /// Bytes written right after connecting, to make the peer talk.
    ///
    /// Empty for services that speak first (SSH) and for everything we have
    /// no probe for.
    pub fn probe(self) -> &'static [u8] {
        match self {
            Self::Ftp | Self::Telnet => b"\r\n",
            Self::Http => b"GET / HTTP/1.0\r\n\r\n",
            _ => b"",
        }
    }

    /// Extracts a version string from a banner this service produced.
    ///
    /// See [`crate::version::parse_version`] for the per-service rules.
    pub fn parse_version(self, banner: Option<&str>) -> Option<String> {
        version::parse_version(self, banner)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Service {
    type Err = std::convert::Infallible;

    /// Never fails: names outside the table map to [`Service::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(Self::KNOWN
            .into_iter()
            .find(|service| service.name().eq_ignore_ascii_case(s))
            .unwrap_or(Self::Unknown))
    }
}

/// One row of the fingerprint table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub port: u16,
    pub transport: Transport,
    pub service: Service,
}

const fn entry(port: u16, transport: Transport, service: Service) -> Fingerprint {
    Fingerprint {
        port,
        transport,
        service,
    }
}

// Sorted by port; `lookup` relies on it.
const FINGERPRINTS: [Fingerprint; 26] = [
    entry(20, Transport::Tcp, Service::FtpData),
    entry(21, Transport::Tcp, Service::Ftp),
    entry(22, Transport::Tcp, Service::Ssh),
    entry(23, Transport::Tcp, Service::Telnet),
    entry(25, Transport::Tcp, Service::Smtp),
    entry(53, Transport::Both, Service::Dns),
    entry(67, Transport::Udp, Service::DhcpServer),
    entry(68, Transport::Udp, Service::DhcpClient),
    entry(69, Transport::Udp, Service::Tftp),
    entry(80, Transport::Tcp, Service::Http),
    entry(110, Transport::Tcp, Service::Pop3),
    entry(123, Transport::Udp, Service::Ntp),
    entry(137, Transport::Udp, Service::NetbiosNs),
    entry(138, Transport::Udp, Service::NetbiosDgm),
    entry(143, Transport::Tcp, Service::Imap),
    entry(161, Transport::Udp, Service::Snmp),
    entry(162, Transport::Udp, Service::SnmpTrap),
    entry(443, Transport::Tcp, Service::Https),
    entry(500, Transport::Udp, Service::Ike),
    entry(514, Transport::Udp, Service::Syslog),
    entry(520, Transport::Udp, Service::Rip),
    entry(1900, Transport::Udp, Service::Ssdp),
    entry(3306, Transport::Tcp, Service::Mysql),
    entry(4500, Transport::Udp, Service::IpsecNatt),
    entry(5353, Transport::Udp, Service::Mdns),
    entry(11211, Transport::Udp, Service::Memcached),
];

/// Table entry for `port`, whatever its transport affinity.
pub fn fingerprint(port: u16) -> Option<&'static Fingerprint> {
    FINGERPRINTS
        .binary_search_by_key(&port, |fp| fp.port)
        .ok()
        .map(|idx| &FINGERPRINTS[idx])
}

/// Service expected on `port` when probed over `protocol`.
///
/// An entry whose affinity excludes `protocol` does not match: a TCP scan of
/// port 161 is not labelled `snmp`.
pub fn lookup(port: u16, protocol: Protocol) -> Option<Service> {
    fingerprint(port)
        .filter(|fp| fp.transport.carries(protocol))
        .map(|fp| fp.service)
}

/// Ports whose services are reachable over TCP, ascending.
pub fn tcp_ports() -> Vec<u16> {
    ports_for(Protocol::Tcp)
}

/// Ports whose services are reachable over UDP, ascending.
pub fn udp_ports() -> Vec<u16> {
    ports_for(Protocol::Udp)
}

fn ports_for(protocol: Protocol) -> Vec<u16> {
    FINGERPRINTS
        .iter()
        .filter(|fp| fp.transport.carries(protocol))
        .map(|fp| fp.port)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parameterized::parameterized;

    #[test]
    fn table_is_sorted_and_unique() {
        assert!(FINGERPRINTS.windows(2).all(|w| w[0].port < w[1].port));
    }

    #[test]
    fn every_known_service_is_in_the_table() {
        for service in Service::KNOWN {
            assert!(
                FINGERPRINTS.iter().any(|fp| fp.service == service),
                "{service} has no port"
            );
        }
    }

    #[parameterized(port = {22, 80, 53, 3306}, expected = {
        Some(Service::Ssh), Some(Service::Http), Some(Service::Dns), Some(Service::Mysql)
    })]
    fn tcp_lookup(port: u16, expected: Option<Service>) {
        assert_eq!(lookup(port, Protocol::Tcp), expected);
    }

    #[test]
    fn lookup_respects_affinity() {
        assert_eq!(lookup(161, Protocol::Udp), Some(Service::Snmp));
        assert_eq!(lookup(161, Protocol::Tcp), None);
        assert_eq!(lookup(22, Protocol::Udp), None);
        assert_eq!(lookup(53, Protocol::Udp), Some(Service::Dns));
        assert_eq!(lookup(8080, Protocol::Tcp), None);
    }

    #[test]
    fn derived_port_lists() {
        assert_eq!(
            tcp_ports(),
            vec![20, 21, 22, 23, 25, 53, 80, 110, 143, 443, 3306]
        );
        let udp = udp_ports();
        assert!(udp.contains(&53));
        assert!(udp.contains(&11211));
        assert!(!udp.contains(&22));
        assert!(udp.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn probes() {
        assert_eq!(Service::Http.probe(), b"GET / HTTP/1.0\r\n\r\n");
        assert_eq!(Service::Ftp.probe(), b"\r\n");
        assert_eq!(Service::Telnet.probe(), b"\r\n");
        assert!(Service::Ssh.probe().is_empty());
        assert!(Service::Unknown.probe().is_empty());
    }

    #[test]
    fn names_round_trip() {
        for service in Service::KNOWN {
            assert_eq!(service.name().parse::<Service>(), Ok(service));
        }
        assert_eq!("HTTP".parse::<Service>(), Ok(Service::Http));
        assert_eq!("gopher".parse::<Service>(), Ok(Service::Unknown));
    }
}
