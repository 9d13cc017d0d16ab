//! Provides a means to parse port specifications and hold configuration
//! options for scans.
use anyhow::Context;
use itertools::Itertools;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub(crate) const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

const DEFAULT_PORTS: (u16, u16) = (20, 1024);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_WORKERS: usize = 100;

pub type Ports = Vec<u16>;

/// A port specification as handed over by a caller: either the textual
/// grammar (`"80"`, `"22,80,443"`, `"20-25,80"`) or an already built list.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum PortSpec {
    Text(String),
    List(Vec<i64>),
}

impl From<&str> for PortSpec {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for PortSpec {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&[u16]> for PortSpec {
    fn from(ports: &[u16]) -> Self {
        Self::List(ports.iter().copied().map(i64::from).collect())
    }
}

impl From<Vec<u16>> for PortSpec {
    fn from(ports: Vec<u16>) -> Self {
        Self::from(ports.as_slice())
    }
}

impl From<Vec<i64>> for PortSpec {
    fn from(ports: Vec<i64>) -> Self {
        Self::List(ports)
    }
}

/// A token of the port grammar that is not a number or a `start-end` range.
///
/// Numbers outside `1..=65535` are not errors, they are dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortParseError {
    #[error("Invalid port number '{0}'")]
    InvalidPort(String),
    #[error("Invalid range format '{0}'. Expected 'start-end'. Example: 1-1000.")]
    InvalidRange(String),
}

/// Expands a [`PortSpec`] into an ascending, duplicate-free list of ports in
/// `1..=65535`.
///
/// ```rust
/// # use reconscan::input::parse_ports;
/// assert_eq!(
///     parse_ports(&"20-25,80,443".into()).unwrap(),
///     vec![20, 21, 22, 23, 24, 25, 80, 443]
/// );
/// ```
pub fn parse_ports(spec: &PortSpec) -> Result<Ports, PortParseError> {
    match spec {
        PortSpec::Text(input) => parse_ports_and_ranges(input),
        PortSpec::List(ports) => Ok(ports
            .iter()
            .filter_map(|&port| u16::try_from(port).ok())
            .filter(|&port| port >= LOWEST_PORT_NUMBER)
            .sorted_unstable()
            .dedup()
            .collect()),
    }
}

/// Parses the comma-separated port grammar.
///
/// Reversed ranges are swapped, out of range ports are silently dropped and
/// an input without any usable port yields an empty list.
pub fn parse_ports_and_ranges(input: &str) -> Result<Ports, PortParseError> {
    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            ports.extend(parse_port_range(part)?);
        } else if let Some(port) = parse_single_port(part)? {
            ports.push(port);
        }
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

fn parse_port_range(range_str: &str) -> Result<impl Iterator<Item = u16>, PortParseError> {
    let (start, end) = range_str
        .split_once('-')
        .and_then(|(start, end)| Some((parse_number(start)?, parse_number(end)?)))
        .ok_or_else(|| PortParseError::InvalidRange(range_str.to_owned()))?;

    let (start, end) = if start > end { (end, start) } else { (start, end) };
    let start = start.max(u64::from(LOWEST_PORT_NUMBER));
    let end = end.min(u64::from(TOP_PORT_NUMBER));

    Ok((start..=end).filter_map(|port| u16::try_from(port).ok()))
}

fn parse_single_port(port_str: &str) -> Result<Option<u16>, PortParseError> {
    let port = parse_number(port_str)
        .ok_or_else(|| PortParseError::InvalidPort(port_str.to_owned()))?;

    Ok(u16::try_from(port)
        .ok()
        .filter(|&port| port >= LOWEST_PORT_NUMBER))
}

/// Decimal digits only; values too large for `u64` saturate so they are
/// dropped as out of range rather than rejected.
fn parse_number(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(s.parse().unwrap_or(u64::MAX))
}

/// Which transports a scan covers.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolMode {
    #[default]
    Tcp,
    Udp,
    #[serde(rename = "tcp+udp", alias = "both")]
    Both,
}

impl ProtocolMode {
    pub fn tcp(self) -> bool {
        matches!(self, Self::Tcp | Self::Both)
    }

    pub fn udp(self) -> bool {
        matches!(self, Self::Udp | Self::Both)
    }

    /// `tcp`, `udp` or `tcp+udp`, as recorded in a session's `scan_type`.
    pub fn label(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Both => "tcp+udp",
        }
    }
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How the per-port probes of one host are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// One port after the other, in ascending order.
    Sequential,
    /// At most `max_workers` probes in flight at once.
    Concurrent { max_workers: usize },
}

/// Everything a scan run needs besides the targets.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOptions {
    pub ports: Ports,
    pub timeout: Duration,
    pub concurrent: bool,
    pub max_workers: usize,
    pub protocols: ProtocolMode,
    /// Attach reverse DNS names to scanned targets.
    pub resolve_hostnames: bool,
    /// Comma-separated resolver IPs, or a file of them. System config otherwise.
    pub resolver: Option<String>,
}

impl ScanOptions {
    /// Replaces the port list with the expansion of `spec`.
    pub fn with_ports(mut self, spec: impl Into<PortSpec>) -> Result<Self, PortParseError> {
        self.ports = parse_ports(&spec.into())?;
        Ok(self)
    }

    pub fn execution(&self) -> Execution {
        if self.concurrent {
            Execution::Concurrent {
                max_workers: self.max_workers.max(1),
            }
        } else {
            Execution::Sequential
        }
    }

    /// Overrides every option the configuration sets explicitly.
    pub fn merge(&mut self, config: &Config) -> anyhow::Result<()> {
        macro_rules! merge {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        if let Some(spec) = &config.ports {
            self.ports = parse_ports(spec).context("invalid `ports` in configuration")?;
        }

        if let Some(secs) = config.timeout {
            self.timeout = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid `timeout` in configuration: {secs}"))?;
        }

        merge!(concurrent, max_workers, protocols, resolve_hostnames);

        if config.resolver.is_some() {
            self.resolver = config.resolver.clone();
        }

        Ok(())
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            ports: (DEFAULT_PORTS.0..=DEFAULT_PORTS.1).collect(),
            timeout: DEFAULT_TIMEOUT,
            concurrent: true,
            max_workers: DEFAULT_MAX_WORKERS,
            protocols: ProtocolMode::Tcp,
            resolve_hostnames: false,
            resolver: None,
        }
    }
}

/// Struct used to deserialize scan options from TOML. Every field is
/// optional; the ones present are merged into [`ScanOptions`].
///
/// # Format
///
/// ```toml
/// ports = "20-25,80,443"   # or [22, 80, 443]
/// timeout = 0.5            # seconds
/// concurrent = true
/// max_workers = 200
/// protocols = "tcp+udp"    # "tcp", "udp", "tcp+udp" or "both"
/// resolve_hostnames = false
/// resolver = "1.1.1.1,8.8.8.8"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    ports: Option<PortSpec>,
    timeout: Option<f64>,
    concurrent: Option<bool>,
    max_workers: Option<usize>,
    protocols: Option<ProtocolMode>,
    resolve_hostnames: Option<bool>,
    resolver: Option<String>,
}

impl Config {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("malformed scan configuration")
    }

    /// Reads the configuration file at `path`. A missing file is an empty
    /// configuration.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("in {}", path.display()))
    }
}
