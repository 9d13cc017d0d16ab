//! Banner grabbing over a second, dedicated TCP connection.
//!
//! The open/closed check never sends anything; probing happens here, on a
//! fresh connection, so a service that reacts badly to the probe cannot
//! change how its port was classified.
use log::debug;
use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time,
};

use super::connector::{log_connect_error, ScannerConnector};
use crate::service::Service;

const BANNER_BUFFER_SIZE: usize = 1024;

impl ScannerConnector {
    /// Connects, sends the probe of `service` if it has one, then performs a
    /// single bounded read.
    pub(crate) async fn grab_banner(&self, socket: SocketAddr, service: Service) -> Option<String> {
        let mut stream = match self.connect(socket).await {
            Ok(stream) => stream,
            Err(e) => {
                log_connect_error(socket, &e);
                return None;
            }
        };

        let banner = self.exchange(&mut stream, service.probe()).await;
        if let Err(e) = stream.shutdown().await {
            debug!("Shutdown stream error {e}");
        }

        debug!("Banner from {socket} ({service}): {banner:?}");
        banner
    }

    async fn exchange(&self, stream: &mut TcpStream, probe: &[u8]) -> Option<String> {
        // A failed probe write still leaves already received bytes to read.
        if !probe.is_empty() {
            match time::timeout(self.timeout, stream.write_all(probe)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Probe write error {e}"),
                Err(_) => debug!("Probe write timed out"),
            }
        }

        let mut buf = [0u8; BANNER_BUFFER_SIZE];
        let size = time::timeout(self.timeout, stream.read(&mut buf))
            .await
            .ok()?
            .ok()?;

        decode_banner(&buf[..size])
    }
}

/// Grabs the banner of `host:port`, probing the way `service` expects.
///
/// Returns `None` when the connection fails, nothing arrives within
/// `timeout`, or the bytes carry no printable text.
pub async fn grab_banner(
    host: IpAddr,
    port: u16,
    service: Service,
    timeout: Duration,
) -> Option<String> {
    ScannerConnector::new(timeout)
        .grab_banner(SocketAddr::new(host, port), service)
        .await
}

/// Best-effort text of a raw banner: invalid UTF-8 is dropped and
/// surrounding whitespace trimmed.
pub fn decode_banner(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes).replace(char::REPLACEMENT_CHARACTER, "");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_owned())
}
