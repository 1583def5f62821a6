//! Adapter for the SSLProxies table (`SSLP`)

use super::{element_text, valid_ip, ProxyAdapter};
use crate::models::{Anonymity, Candidate, Protocol};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::debug;

static ROWS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#proxylisttable tbody > tr").expect("Invalid row selector"));
static CELLS: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("Invalid cell selector"));

/// Table layout: ip, port, country code, country, anonymity, google, https,
/// last checked. The https column decides HTTP vs HTTPS.
pub struct SslProxies;

impl ProxyAdapter for SslProxies {
    fn parse(&self, html: &str) -> Vec<Candidate> {
        let document = Html::parse_document(html);
        let mut candidates = Vec::new();

        for row in document.select(&ROWS) {
            let cells: Vec<_> = row.select(&CELLS).collect();
            if cells.len() < 7 {
                continue; // wrong column count
            }

            let ip = element_text(&cells[0]);
            if !valid_ip(&ip) {
                continue;
            }
            let port: u16 = match element_text(&cells[1]).parse() {
                Ok(port) if port > 0 => port,
                _ => continue,
            };

            let country = element_text(&cells[2]).to_uppercase();
            let anonymity = Anonymity::classify(&element_text(&cells[4]));
            let protocol = if element_text(&cells[6]).eq_ignore_ascii_case("yes") {
                Protocol::Https
            } else {
                Protocol::Http
            };

            candidates.push(Candidate {
                ip,
                port,
                protocol,
                country,
                anonymity,
            });
        }

        debug!(count = candidates.len(), "SSLP parse complete");
        candidates
    }
}
