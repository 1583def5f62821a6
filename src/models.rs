//! Domain models: candidates, inventory entries, sources, pages and runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Proxy protocol enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl Protocol {
    /// Parse a protocol label as it appears in source markup or CLI args
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "HTTP" => Some(Protocol::Http),
            "HTTPS" => Some(Protocol::Https),
            "SOCKS4" => Some(Protocol::Socks4),
            "SOCKS5" => Some(Protocol::Socks5),
            _ => None,
        }
    }

    /// URL scheme used when routing traffic through a proxy of this protocol.
    /// Plain and TLS proxies are both dialed over http.
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http | Protocol::Https => "http",
            Protocol::Socks4 => "socks4",
            Protocol::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "HTTP"),
            Protocol::Https => write!(f, "HTTPS"),
            Protocol::Socks4 => write!(f, "SOCKS4"),
            Protocol::Socks5 => write!(f, "SOCKS5"),
        }
    }
}

/// Anonymity class of a proxy, stored with three-letter codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
pub enum Anonymity {
    #[default]
    #[sqlx(rename = "UNK")]
    #[serde(rename = "UNK")]
    Unknown,
    #[sqlx(rename = "NOA")]
    #[serde(rename = "NOA")]
    Transparent,
    #[sqlx(rename = "ANM")]
    #[serde(rename = "ANM")]
    Anonymous,
    #[sqlx(rename = "HIA")]
    #[serde(rename = "HIA")]
    Elite,
}

impl Anonymity {
    pub fn code(&self) -> &'static str {
        match self {
            Anonymity::Unknown => "UNK",
            Anonymity::Transparent => "NOA",
            Anonymity::Anonymous => "ANM",
            Anonymity::Elite => "HIA",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "UNK" => Some(Anonymity::Unknown),
            "NOA" => Some(Anonymity::Transparent),
            "ANM" => Some(Anonymity::Anonymous),
            "HIA" => Some(Anonymity::Elite),
            _ => None,
        }
    }

    /// Map a free-text anonymity label from source markup to a class.
    /// Labels that cannot be classified fall back to `Unknown`.
    pub fn classify(label: &str) -> Self {
        let label = label.trim().to_uppercase();
        if label.contains("ELITE") || label.contains("HIGH") {
            Anonymity::Elite
        } else if label.contains("ANONYMOUS") {
            Anonymity::Anonymous
        } else if label.contains("TRANSPARENT") {
            Anonymity::Transparent
        } else {
            Self::from_code(&label).unwrap_or(Anonymity::Unknown)
        }
    }
}

impl fmt::Display for Anonymity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// An unvalidated proxy record extracted from a source page.
/// Lives only for the duration of a harvest phase; it either becomes a
/// persisted [`ProxyEntry`] or is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub ip: String,
    pub port: u16,
    pub protocol: Protocol,
    pub country: String,
    pub anonymity: Anonymity,
}

impl Candidate {
    pub fn new(ip: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            ip: ip.into(),
            port,
            protocol,
            country: String::new(),
            anonymity: Anonymity::Unknown,
        }
    }

    /// The `(ip, port)` identity a candidate is deduplicated by
    pub fn key(&self) -> (String, u16) {
        (self.ip.clone(), self.port)
    }

    /// URL for routing a request through this candidate as a forward proxy
    pub fn proxy_url(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.ip, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// A persisted, deduplicated proxy record in the inventory
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProxyEntry {
    pub id: i64,
    pub ip: String,
    pub port: u16,
    pub protocol: Protocol,
    pub country: String,
    pub anonymity: Anonymity,
    pub checked_at: Option<DateTime<Utc>>,
    pub checked_count: i64,
    pub is_dead: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProxyEntry {
    /// Re-borrow the entry as a candidate for validation
    pub fn to_candidate(&self) -> Candidate {
        Candidate {
            ip: self.ip.clone(),
            port: self.port,
            protocol: self.protocol,
            country: self.country.clone(),
            anonymity: self.anonymity,
        }
    }

    pub fn proxy_url(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.ip, self.port)
    }
}

impl fmt::Display for ProxyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Proxy: {}> {}:{}", self.id, self.ip, self.port)
    }
}

/// An external site with its own markup and a registered adapter
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub url: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Source: {}> {}", self.id, self.name)
    }
}

/// A path under a source, flagged when it needs a JS-capable renderer
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Page {
    pub id: i64,
    pub source_id: i64,
    pub path: String,
    pub has_js: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    /// Full URL of the page under its source's base URL
    pub fn full_url(&self, source: &Source) -> String {
        format!("{}{}", source.url.trim_end_matches('/'), self.path)
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Page: {}> {}", self.id, self.path)
    }
}

/// Which pipeline a run record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
pub enum RunKind {
    #[sqlx(rename = "HARVEST")]
    #[serde(rename = "HARVEST")]
    Harvest,
    #[sqlx(rename = "CHECK")]
    #[serde(rename = "CHECK")]
    HealthCheck,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Harvest => write!(f, "HARVEST"),
            RunKind::HealthCheck => write!(f, "CHECK"),
        }
    }
}

/// Audit row for one execution of a pipeline.
/// Created with `completed_at = NULL`, finalized exactly once.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RunRecord {
    pub id: i64,
    pub kind: RunKind,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_success: bool,
    pub error: Option<String>,
    pub proxies: i64,
}

impl RunRecord {
    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some()
    }
}
