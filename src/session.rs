//! Multi-target scan sessions.
//!
//! A [`ScanSession`] is the only artifact a scan run produces. It is built
//! here and handed to whatever stores or renders it; this crate never
//! persists it.
use chrono::{DateTime, Utc};
use hickory_resolver::TokioAsyncResolver;
use log::{info, warn};
use serde_derive::Serialize;

use crate::address::{get_resolver, parse_target, resolve_hostname};
use crate::input::{ProtocolMode, ScanOptions};
use crate::scanner::{PortScanResult, Scanner};

/// Why a target was not scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetError {
    /// Not an IPv4 or IPv6 literal.
    InvalidIp,
}

/// Results for one requested target, in the order targets were given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetResult {
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub results: Vec<PortScanResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TargetError>,
}

/// The full record of one scan run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSession {
    pub scan_id: String,
    pub scan_type: ProtocolMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: Vec<TargetResult>,
}

impl ScanSession {
    /// JSON rendering of the session, as handed to reporting.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// `scan-<UTC yyyymmddHHMMSS>-<8 hex digits>`.
///
/// Collisions are possible and harmless.
pub fn generate_scan_id() -> String {
    format!(
        "scan-{}-{:08x}",
        Utc::now().format("%Y%m%d%H%M%S"),
        rand::random::<u32>()
    )
}

/// Runs one scan over several targets with shared options.
#[derive(Debug)]
pub struct SessionBuilder {
    options: ScanOptions,
    scanner: Scanner,
}

impl SessionBuilder {
    pub fn new(options: ScanOptions) -> Self {
        let scanner = Scanner::from_options(&options);
        Self { options, scanner }
    }

    /// Scans every target in input order.
    ///
    /// Targets that are not IP literals are recorded with
    /// [`TargetError::InvalidIp`] and an empty result list; they never abort
    /// the run. The timestamps bracket the whole run.
    pub async fn run<I, S>(&self, targets: I) -> ScanSession
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let scan_id = generate_scan_id();
        let started_at = Utc::now();
        info!(
            "Scan {scan_id} started: {} ports over {}",
            self.scanner.ports().len(),
            self.options.protocols
        );

        let resolver = if self.options.resolve_hostnames {
            Some(get_resolver(&self.options.resolver).await)
        } else {
            None
        };

        let mut results = Vec::new();
        for target in targets {
            results.push(self.scan_target(target.as_ref(), resolver.as_ref()).await);
        }

        let finished_at = Utc::now();
        info!("Scan {scan_id} finished: {} targets", results.len());

        ScanSession {
            scan_id,
            scan_type: self.options.protocols,
            started_at,
            finished_at,
            targets: results,
        }
    }

    async fn scan_target(
        &self,
        target: &str,
        resolver: Option<&TokioAsyncResolver>,
    ) -> TargetResult {
        let Some(ip) = parse_target(target) else {
            warn!("Skipping {target:?}: not an IP address");
            return TargetResult {
                ip: target.to_owned(),
                hostname: None,
                results: Vec::new(),
                error: Some(TargetError::InvalidIp),
            };
        };

        let hostname = match resolver {
            Some(resolver) => resolve_hostname(ip, resolver).await,
            None => None,
        };

        TargetResult {
            ip: target.to_owned(),
            hostname,
            results: self.scanner.scan(ip).await,
            error: None,
        }
    }
}

/// Scans `targets` with `options`. Shorthand for [`SessionBuilder::run`].
///
/// ```rust,no_run
/// # use reconscan::input::ScanOptions;
/// # use reconscan::session::run_scan;
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let options = ScanOptions::default().with_ports("20-25,80,443")?;
/// let session = run_scan(["127.0.0.1"], options).await;
/// println!("{}", session.to_json()?);
/// # Ok(())
/// # }
/// ```
pub async fn run_scan<I, S>(targets: I, options: ScanOptions) -> ScanSession
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    SessionBuilder::new(options).run(targets).await
}
