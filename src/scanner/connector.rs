//! Transport-level state checks.
//!
//! Every check owns its socket for its whole lifetime and closes it on every
//! exit path; errors never leave this module, they become a [`PortState`].
use log::{debug, warn};
use std::{
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};
use tokio::{
    io::{self, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    time,
};

use super::PortState;

const UDP_RECV_BUFFER: usize = 1024;

#[derive(Debug)]
pub(crate) struct ScannerConnector {
    pub(super) timeout: Duration,
}

impl ScannerConnector {
    pub(crate) const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Open if the handshake completes within the timeout, closed otherwise.
    /// Refusals and timeouts are deliberately not told apart.
    pub(crate) async fn tcp_state(&self, socket: SocketAddr) -> PortState {
        match self.connect(socket).await {
            Ok(tcp_stream) => {
                debug!("Connection was successful, shutting down stream {socket}");
                if let Err(e) = { tcp_stream }.shutdown().await {
                    debug!("Shutdown stream error {e}");
                }
                PortState::Open
            }
            Err(e) => {
                log_connect_error(socket, &e);
                PortState::Closed
            }
        }
    }

    /// Performs the connection to the socket with timeout
    pub(super) async fn connect(&self, socket: SocketAddr) -> io::Result<TcpStream> {
        time::timeout(self.timeout, TcpStream::connect(socket)).await?
    }

    /// Sends `payload` and classifies what comes back:
    ///
    /// - a datagram: open
    /// - a port/host unreachable error surfaced by the OS: closed
    /// - silence until the timeout: open|filtered
    ///
    /// A socket that cannot even be set up counts as closed.
    pub(crate) async fn udp_state(&self, socket: SocketAddr, payload: &[u8]) -> PortState {
        let udp_socket = match self.udp_bind(socket).await {
            Ok(udp_socket) => udp_socket,
            Err(e) => {
                warn!("Could not bind UDP socket for {socket}: {e}");
                return PortState::Closed;
            }
        };

        // Connecting lets the kernel route ICMP errors back to this socket.
        if let Err(e) = udp_socket.connect(socket).await {
            debug!("UDP connect to {socket} failed: {e}");
            return PortState::Closed;
        }

        if let Err(e) = udp_socket.send(payload).await {
            debug!("UDP send to {socket} failed: {e}");
            return PortState::Closed;
        }

        let mut buf = [0u8; UDP_RECV_BUFFER];
        match time::timeout(self.timeout, udp_socket.recv(&mut buf)).await {
            Ok(Ok(size)) => {
                debug!("Received {size} bytes from {socket}");
                PortState::Open
            }
            Ok(Err(e)) if is_rejection(&e) => {
                debug!("{socket} rejected the datagram: {e}");
                PortState::Closed
            }
            Ok(Err(e)) => {
                debug!("UDP receive from {socket} failed: {e}");
                PortState::OpenFiltered
            }
            Err(_) => PortState::OpenFiltered,
        }
    }

    /// Binds an ephemeral local UDP socket of the same family as `socket`.
    async fn udp_bind(&self, socket: SocketAddr) -> io::Result<UdpSocket> {
        let local_ip = match socket {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };

        UdpSocket::bind(SocketAddr::new(local_ip, 0)).await
    }
}

/// ICMP destination unreachable, as reported on a connected UDP socket.
fn is_rejection(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused | ErrorKind::HostUnreachable
    )
}

pub(super) fn log_connect_error(socket: SocketAddr, e: &io::Error) {
    if e.to_string().to_lowercase().contains("too many open files") {
        warn!("Too many open files while connecting to {socket}. Reduce max_workers.");
    } else {
        debug!("Connection to {socket} failed: {e}");
    }
}
