//! This crate is the scanning core of a network reconnaissance pipeline.
//!
//! Given IP targets and a port specification it determines which TCP and
//! UDP ports are reachable, classifies their state and fingerprints the
//! service behind each open TCP port from its banner.
//!
//! ## Architecture Overview
//!
//! Data flows one way through the modules:
//!
//! 1. **Input Processing**: [`address`] validates IP literals and
//!    [`input`] expands port expressions like `"20-25,80"` into an ordered
//!    set of ports.
//! 2. **Socket Scanning**: [`scanner::Scanner`] probes every port, in
//!    sequence or through a bounded pool of tasks. TCP ports are open or
//!    closed; UDP ports are open, closed or `open|filtered`.
//! 3. **Fingerprinting**: open TCP ports get a banner grabbed over a second
//!    connection, probed according to [`service::Service`], and a version
//!    extracted by [`version::parse_version`].
//! 4. **Session Assembly**: [`session`] runs all targets and stamps the
//!    resulting [`session::ScanSession`], the structure handed on to
//!    storage and reporting.
//!
//! Failing to reach a port is a result, not an error: nothing in the
//! scanning path returns `Err`.
//!
//! ## Basic Usage Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use reconscan::input::{ProtocolMode, ScanOptions};
//! use reconscan::session::run_scan;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ScanOptions {
//!         timeout: Duration::from_millis(200),
//!         protocols: ProtocolMode::Tcp,
//!         ..ScanOptions::default()
//!     }
//!     .with_ports("20-25,80,443")?;
//!
//!     let runtime = tokio::runtime::Runtime::new()?;
//!     let session = runtime.block_on(run_scan(["127.0.0.1", "999.999.999.999"], options));
//!
//!     for target in &session.targets {
//!         println!("{} ({:?})", target.ip, target.error);
//!         for result in &target.results {
//!             println!("  {}/{} {}", result.port, result.protocol, result.state);
//!         }
//!     }
//!     assert_eq!(session.targets[0].results.len(), 8);
//!
//!     Ok(())
//! }
//! ```
#![allow(clippy::needless_doctest_main)]

pub mod address;

pub mod input;

pub mod scanner;

pub mod service;

pub mod session;

pub mod version;
