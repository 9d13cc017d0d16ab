//! Recovers a normalized version string from a raw banner.
//!
//! Matching is case-insensitive, the extracted text keeps the banner's own
//! casing. When a service-specific pattern misses, the trimmed banner itself
//! is returned, except for HTTP where only a structurally meaningful
//! `Server:` header (or an `Apache/` token) counts.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::service::Service;

static OPENSSH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)OpenSSH[_/ ](\d[\d.]*(?:p\d+)?)").unwrap());
static VSFTPD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)vsftpd (\d+(?:\.\d+)*)").unwrap());
static APACHE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Apache/(\d+(?:\.\d+)*)").unwrap());
static SERVER_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^Server:[ \t]*([^\r\n]+)").unwrap());

/// Extracts the version advertised in `banner` by `service`.
///
/// | service | extracted from | example |
/// |---|---|---|
/// | ssh | `OpenSSH_<v>` | `8.9p1` |
/// | ftp | `vsftpd <v>` | `3.0.5` |
/// | http | `Apache/<v>`, else the `Server:` header's version token | `2.4.25` |
/// | anything else | the trimmed banner | |
///
/// ```rust
/// # use reconscan::service::Service;
/// # use reconscan::version::parse_version;
/// let version = parse_version(Service::Ssh, Some("SSH-2.0-OpenSSH_8.9p1 Ubuntu-3\r\n"));
/// assert_eq!(version.as_deref(), Some("8.9p1"));
/// ```
pub fn parse_version(service: Service, banner: Option<&str>) -> Option<String> {
    let banner = banner.map(str::trim).filter(|b| !b.is_empty())?;

    let extracted = match service {
        Service::Ssh => first_group(&OPENSSH, banner),
        Service::Ftp => first_group(&VSFTPD, banner),
        Service::Http => return http_version(banner),
        _ => None,
    };

    Some(extracted.unwrap_or(banner).to_owned())
}

fn http_version(banner: &str) -> Option<String> {
    if let Some(version) = first_group(&APACHE, banner) {
        return Some(version.to_owned());
    }

    let server = first_group(&SERVER_HEADER, banner)?.trim();
    // "nginx/1.18.0 (Ubuntu)" -> "1.18.0"; a bare product name is kept whole
    let token = match server.split_once('/') {
        Some((_, rest)) => rest.split_whitespace().next().unwrap_or(rest),
        None => server,
    };
    Some(token.to_owned()).filter(|t| !t.is_empty())
}

fn first_group<'a>(pattern: &Regex, haystack: &'a str) -> Option<&'a str> {
    pattern
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
