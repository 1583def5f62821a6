//! Source adapters: one per known proxy-list site.
//!
//! An adapter is a pure extraction function from fetched markup to a list of
//! [`Candidate`]s. Resolution from a source's code to its adapter is a static
//! lookup; unknown codes are rejected explicitly so a misconfigured source
//! skips cleanly instead of failing a run. Adapters never error: malformed
//! rows are skipped and unclassifiable fields fall back to their sentinels
//! (`Anonymity::Unknown`, `Protocol::Http`).

pub mod free_proxy_cz;
pub mod free_proxy_list;
pub mod ssl_proxies;

use crate::models::Candidate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::ElementRef;

pub use free_proxy_cz::FreeProxyCz;
pub use free_proxy_list::FreeProxyLists;
pub use ssl_proxies::SslProxies;

/// Extracts proxy candidates from one source's markup
pub trait ProxyAdapter: Send + Sync {
    fn parse(&self, html: &str) -> Vec<Candidate>;
}

/// Identifier of a known source site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceCode {
    FreeProxyLists,
    SslProxies,
    FreeProxyCz,
    SpysOne,
}

impl SourceCode {
    /// Parse a stored source code; unknown codes yield `None`
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "FPLS" => Some(SourceCode::FreeProxyLists),
            "SSLP" => Some(SourceCode::SslProxies),
            "FPCZ" => Some(SourceCode::FreeProxyCz),
            "SPY1" => Some(SourceCode::SpysOne),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SourceCode::FreeProxyLists => "FPLS",
            SourceCode::SslProxies => "SSLP",
            SourceCode::FreeProxyCz => "FPCZ",
            SourceCode::SpysOne => "SPY1",
        }
    }
}

/// Static registry resolving a source code to its adapter
pub fn adapter_for(code: SourceCode) -> &'static dyn ProxyAdapter {
    match code {
        SourceCode::FreeProxyLists => &FreeProxyLists,
        SourceCode::SslProxies => &SslProxies,
        SourceCode::FreeProxyCz => &FreeProxyCz,
        // spys.one serves the same nested-table layout as free-proxy.cz
        SourceCode::SpysOne => &FreeProxyCz,
    }
}

/// Matches `ip:port` pairs embedded in cell text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b").expect("Invalid IP:PORT regex")
});

/// Whether a string is a well-formed dotted-quad IPv4 address
pub(crate) fn valid_ip(ip: &str) -> bool {
    let parts: Vec<&str> = ip.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|part| part.parse::<u32>().map_or(false, |n| n <= 255))
}

/// Extract the first valid `ip:port` pair from a text fragment
pub(crate) fn parse_ip_port(text: &str) -> Option<(String, u16)> {
    let caps = IP_PORT_REGEX.captures(text)?;
    let ip = caps.get(1)?.as_str().to_string();
    let port: u16 = caps.get(2)?.as_str().parse().ok()?;
    if !valid_ip(&ip) || port == 0 {
        return None;
    }
    Some((ip, port))
}

/// Collected, trimmed text of an element
pub(crate) fn element_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}
