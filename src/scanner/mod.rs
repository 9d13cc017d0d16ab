//! Core functionality for actual scanning behaviour.
//!
//! [`Scanner`] drives the per-port checks for one host. Each port is probed
//! by an independent task that owns its sockets and returns an immutable
//! [`PortScanResult`]; results are sorted by port before they are handed
//! back, so the output never depends on completion order or pool size.
use crate::input::{Execution, ProtocolMode, ScanOptions, LOWEST_PORT_NUMBER};
use crate::service::{self, Service};
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use serde_derive::Serialize;

mod banner;
mod connector;
pub use banner::{decode_banner, grab_banner};
use connector::ScannerConnector;

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

/// Descriptors kept free for everything that is not a probe socket.
#[cfg(unix)]
const FD_HEADROOM: u64 = 100;

/// Transport a single result was obtained over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        })
    }
}

/// Classification of one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PortState {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "closed")]
    Closed,
    /// UDP only: no answer and no rejection either. The datagram may have
    /// been dropped by a firewall, or the service ignores empty probes.
    #[serde(rename = "open|filtered")]
    OpenFiltered,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::OpenFiltered => "open|filtered",
        })
    }
}

/// Outcome of probing one (host, port, protocol).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortScanResult {
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub banner: Option<String>,
    pub service: Option<String>,
    pub version: Option<String>,
}

impl PortScanResult {
    fn new(port: u16, protocol: Protocol, state: PortState) -> Self {
        Self {
            port,
            protocol,
            state,
            banner: None,
            service: service::lookup(port, protocol).map(|s| s.name().to_owned()),
            version: None,
        }
    }
}

impl ScannerConnector {
    async fn scan_port(&self, socket: SocketAddr, protocol: Protocol) -> PortScanResult {
        match protocol {
            Protocol::Tcp => self.scan_tcp(socket).await,
            Protocol::Udp => self.scan_udp(socket).await,
        }
    }

    /// State check first, then, only for open ports, a banner grab on a
    /// second connection and version extraction.
    async fn scan_tcp(&self, socket: SocketAddr) -> PortScanResult {
        let port = socket.port();
        let state = self.tcp_state(socket).await;
        let mut result = PortScanResult::new(port, Protocol::Tcp, state);

        if state == PortState::Open {
            let service = service::lookup(port, Protocol::Tcp).unwrap_or(Service::Unknown);
            let banner = self.grab_banner(socket, service).await;
            result.version = service.parse_version(banner.as_deref());
            result.banner = banner;
        }

        result
    }

    /// No banner grab over UDP; the label comes from the fingerprint table.
    async fn scan_udp(&self, socket: SocketAddr) -> PortScanResult {
        let state = self.udp_state(socket, &[]).await;
        PortScanResult::new(socket.port(), Protocol::Udp, state)
    }
}

/// Probes a single TCP port of `host`.
///
/// ```rust,no_run
/// # use reconscan::scanner::{scan_single_port, PortState};
/// # use std::time::Duration;
/// # async fn demo() {
/// let result = scan_single_port("127.0.0.1".parse().unwrap(), 22, Duration::from_secs(1)).await;
/// if result.state == PortState::Open {
///     println!("{:?} {:?}", result.service, result.version);
/// }
/// # }
/// ```
pub async fn scan_single_port(host: IpAddr, port: u16, timeout: Duration) -> PortScanResult {
    ScannerConnector::new(timeout)
        .scan_tcp(SocketAddr::new(host, port))
        .await
}

/// Probes a single UDP port of `host` with an empty datagram.
pub async fn scan_single_udp_port(host: IpAddr, port: u16, timeout: Duration) -> PortScanResult {
    ScannerConnector::new(timeout)
        .scan_udp(SocketAddr::new(host, port))
        .await
}

/// The scanner for one host at a time.
///
/// Ports are scanned over every protocol `protocols` enables; TCP results
/// come first, then UDP results, each list ascending by port.
#[derive(Debug)]
pub struct Scanner {
    ports: Box<[u16]>,
    protocols: ProtocolMode,
    execution: Execution,
    connector: Arc<ScannerConnector>,
}

impl Scanner {
    pub fn new(
        ports: &[u16],
        timeout: Duration,
        execution: Execution,
        protocols: ProtocolMode,
    ) -> Self {
        let mut ports: Vec<u16> = ports
            .iter()
            .copied()
            .filter(|&port| port >= LOWEST_PORT_NUMBER)
            .collect();
        ports.sort_unstable();
        ports.dedup();

        Self {
            ports: ports.into_boxed_slice(),
            protocols,
            execution,
            connector: Arc::new(ScannerConnector::new(timeout)),
        }
    }

    /// Builds a scanner from options, shrinking the worker pool to what the
    /// open file limit allows.
    pub fn from_options(opts: &ScanOptions) -> Self {
        let execution = match opts.execution() {
            Execution::Concurrent { max_workers } => Execution::Concurrent {
                max_workers: infer_max_workers(max_workers),
            },
            Execution::Sequential => Execution::Sequential,
        };

        Self::new(&opts.ports, opts.timeout, execution, opts.protocols)
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Scans every port of `host` over every enabled protocol.
    pub async fn scan(&self, host: IpAddr) -> Vec<PortScanResult> {
        debug!(
            "Start scanning {host}. \nExecution {:?}\nProtocols {}\nNumber of ports {}",
            self.execution,
            self.protocols,
            self.ports.len()
        );

        let mut results = Vec::new();
        if self.protocols.tcp() {
            results.extend(self.scan_protocol(host, Protocol::Tcp).await);
        }
        if self.protocols.udp() {
            results.extend(self.scan_protocol(host, Protocol::Udp).await);
        }

        debug!(
            "Finished {host}: {} open",
            results
                .iter()
                .filter(|r| r.state == PortState::Open)
                .count()
        );
        results
    }

    /// Every port over one protocol, sorted by port.
    pub async fn scan_protocol(&self, host: IpAddr, protocol: Protocol) -> Vec<PortScanResult> {
        let mut results = match self.execution {
            Execution::Sequential => {
                let mut results = Vec::with_capacity(self.ports.len());
                for &port in self.ports.iter() {
                    results.push(
                        self.connector
                            .scan_port(SocketAddr::new(host, port), protocol)
                            .await,
                    );
                }
                results
            }
            Execution::Concurrent { max_workers } => {
                // Tasks are spawned lazily as the buffer drains, so at most
                // `max_workers` of them exist at any time.
                stream::iter(self.ports.iter().copied())
                    .map(|port| {
                        let connector = Arc::clone(&self.connector);
                        let task = tokio::spawn(async move {
                            connector
                                .scan_port(SocketAddr::new(host, port), protocol)
                                .await
                        });
                        async move {
                            task.await.unwrap_or_else(|e| {
                                warn!("Probe of {host}:{port}/{protocol} failed: {e}");
                                PortScanResult::new(port, protocol, PortState::Closed)
                            })
                        }
                    })
                    .buffer_unordered(max_workers.max(1))
                    .collect::<Vec<_>>()
                    .await
            }
        };

        results.sort_by_key(|result| result.port);
        results
    }
}

/// Caps the worker pool below the soft limit on open files, since every
/// worker holds one socket at a time.
#[cfg(unix)]
pub fn infer_max_workers(requested: usize) -> usize {
    use rlimit::{getrlimit, Resource};

    match getrlimit(Resource::NOFILE) {
        Ok((soft, _)) => workers_for_limit(requested, soft),
        Err(_) => requested.max(1),
    }
}

#[cfg(unix)]
fn workers_for_limit(requested: usize, soft: u64) -> usize {
    let requested = requested.max(1);
    let fits = usize::try_from(soft.saturating_sub(FD_HEADROOM))
        .map_or(true, |usable| requested <= usable);
    if fits {
        return requested;
    }

    let inferred = if soft < 2 * FD_HEADROOM {
        soft / 2
    } else {
        soft - FD_HEADROOM
    };
    let inferred = usize::try_from(inferred)
        .unwrap_or(requested)
        .clamp(1, requested);
    warn!("File limit {soft} is lower than {requested} workers, using {inferred} workers instead.");
    inferred
}

#[cfg(not(unix))]
pub fn infer_max_workers(requested: usize) -> usize {
    requested.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use parameterized::parameterized;
    use tokio::{
        io::AsyncWriteExt,
        net::{TcpListener, UdpSocket},
    };

    const TIMEOUT: Duration = Duration::from_millis(300);

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    async fn closed_tcp_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn banner_server(banner: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // The state check and the banner grab each open a connection.
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(banner).await;
            }
        });
        port
    }

    #[tokio::test]
    async fn closed_tcp_port_has_no_banner() {
        let port = closed_tcp_port().await;
        let result = scan_single_port(localhost(), port, TIMEOUT).await;

        assert_eq!(result.state, PortState::Closed);
        assert_eq!(result.protocol, Protocol::Tcp);
        assert_eq!(result.banner, None);
        assert_eq!(result.version, None);
    }

    #[tokio::test]
    async fn open_tcp_port_reports_banner() {
        let port = banner_server(b"SSH-2.0-OpenSSH_8.9p1\r\n").await;
        let result = scan_single_port(localhost(), port, TIMEOUT).await;

        assert_eq!(result.state, PortState::Open);
        assert_eq!(result.banner.as_deref(), Some("SSH-2.0-OpenSSH_8.9p1"));
        // Ephemeral ports are not in the fingerprint table.
        assert_eq!(result.service, None);
        assert_eq!(result.version.as_deref(), Some("SSH-2.0-OpenSSH_8.9p1"));
    }

    #[tokio::test]
    async fn udp_states_are_distinct() {
        let closed = {
            let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            udp.local_addr().unwrap().port()
        };
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let closed = scan_single_udp_port(localhost(), closed, TIMEOUT).await;
        let filtered =
            scan_single_udp_port(localhost(), silent.local_addr().unwrap().port(), TIMEOUT).await;

        assert_eq!(closed.state, PortState::Closed);
        assert_eq!(filtered.state, PortState::OpenFiltered);
        assert_eq!(filtered.protocol, Protocol::Udp);
        assert_eq!(filtered.banner, None);
    }

    #[test]
    fn closed_results_keep_table_label() {
        let result = PortScanResult::new(22, Protocol::Tcp, PortState::Closed);
        assert_eq!(result.service.as_deref(), Some("ssh"));
        let result = PortScanResult::new(161, Protocol::Udp, PortState::OpenFiltered);
        assert_eq!(result.service.as_deref(), Some("snmp"));
    }

    #[tokio::test]
    async fn concurrent_scan_is_complete_and_sorted_for_any_pool_size() {
        let mut ports = vec![
            banner_server(b"hello\r\n").await,
            banner_server(b"world\r\n").await,
        ];
        for _ in 0..6 {
            ports.push(closed_tcp_port().await);
        }
        // A released port may be handed out twice.
        ports.sort_unstable();
        ports.dedup();
        let n = ports.len();
        let expected = ports.clone();
        ports.reverse();

        for max_workers in [1, n, n * 4] {
            let scanner = Scanner::new(
                &ports,
                TIMEOUT,
                Execution::Concurrent { max_workers },
                ProtocolMode::Tcp,
            );
            let results = scanner.scan(localhost()).await;

            assert_eq!(results.len(), n, "max_workers = {max_workers}");
            let scanned: Vec<u16> = results.iter().map(|r| r.port).collect();
            assert_eq!(scanned, expected, "max_workers = {max_workers}");
            assert_eq!(
                results.iter().filter(|r| r.state == PortState::Open).count(),
                2
            );
        }
    }

    #[tokio::test]
    async fn sequential_and_concurrent_agree() {
        let open = banner_server(b"220 ready\r\n").await;
        let closed = closed_tcp_port().await;
        let ports = [closed, open];

        let sequential = Scanner::new(&ports, TIMEOUT, Execution::Sequential, ProtocolMode::Tcp)
            .scan(localhost())
            .await;
        let concurrent = Scanner::new(
            &ports,
            TIMEOUT,
            Execution::Concurrent { max_workers: 2 },
            ProtocolMode::Tcp,
        )
        .scan(localhost())
        .await;

        assert_eq!(sequential, concurrent);
    }

    #[tokio::test]
    async fn both_protocols_are_concatenated_not_interleaved() {
        let mut ports = vec![
            closed_tcp_port().await,
            closed_tcp_port().await,
            closed_tcp_port().await,
        ];
        ports.sort_unstable();
        ports.dedup();
        let scanner = Scanner::new(
            &ports,
            TIMEOUT,
            Execution::Concurrent { max_workers: 8 },
            ProtocolMode::Both,
        );
        let results = scanner.scan(localhost()).await;

        let expected = ports.clone();
        assert_eq!(results.len(), 2 * ports.len());

        let (tcp, udp) = results.split_at(ports.len());
        assert!(tcp.iter().all(|r| r.protocol == Protocol::Tcp));
        assert!(udp.iter().all(|r| r.protocol == Protocol::Udp));
        assert_eq!(tcp.iter().map(|r| r.port).collect::<Vec<_>>(), expected);
        assert_eq!(udp.iter().map(|r| r.port).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn duplicate_ports_are_scanned_once() {
        let scanner = Scanner::new(
            &[443, 80, 443],
            TIMEOUT,
            Execution::Sequential,
            ProtocolMode::Tcp,
        );
        assert_eq!(scanner.ports(), &[80, 443]);
    }

    #[test]
    fn worker_inference_never_exceeds_request() {
        assert_eq!(infer_max_workers(0), 1);
        assert_eq!(infer_max_workers(1), 1);
        let inferred = infer_max_workers(10_000_000);
        assert!((1..=10_000_000).contains(&inferred));
    }

    #[cfg(unix)]
    #[parameterized(
        requested = { 0, 100, 5000, 5000, 5000, 50, 50 },
        soft = { 1024, 1024, 1024, 150, 1, 1024, u64::MAX },
        expected = { 1, 100, 924, 75, 1, 50, 50 }
    )]
    fn workers_follow_file_limit(requested: usize, soft: u64, expected: usize) {
        assert_eq!(workers_for_limit(requested, soft), expected);
    }

    #[tokio::test]
    async fn port_zero_is_never_scanned() {
        let port = closed_tcp_port().await;
        let scanner = Scanner::new(
            &[0, port, 0],
            TIMEOUT,
            Execution::Concurrent { max_workers: 4 },
            ProtocolMode::Both,
        );
        assert_eq!(scanner.ports(), &[port]);

        let results = scanner.scan(localhost()).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.port == port));
    }

    #[test]
    fn states_render_like_nmap() {
        assert_eq!(PortState::OpenFiltered.to_string(), "open|filtered");
        assert_eq!(
            serde_json::to_string(&PortState::OpenFiltered).unwrap(),
            "\"open|filtered\""
        );
        assert_eq!(serde_json::to_string(&Protocol::Udp).unwrap(), "\"udp\"");
    }
}
