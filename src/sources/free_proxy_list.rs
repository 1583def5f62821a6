//! Adapter for the FreeProxyLists grid (`FPLS`)

use super::{element_text, valid_ip, ProxyAdapter};
use crate::models::{Anonymity, Candidate, Protocol};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::debug;

static ROWS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.DataGrid tbody > tr").expect("Invalid row selector"));
static CELLS: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("Invalid cell selector"));
static IP_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a").expect("Invalid link selector"));
static FLAG: Lazy<Selector> = Lazy::new(|| Selector::parse("img").expect("Invalid flag selector"));

/// Grid layout: ip (linked), port, protocol, anonymity, country flag image
pub struct FreeProxyLists;

impl ProxyAdapter for FreeProxyLists {
    fn parse(&self, html: &str) -> Vec<Candidate> {
        let document = Html::parse_document(html);
        let mut candidates = Vec::new();

        // first row is the grid header
        for row in document.select(&ROWS).skip(1) {
            let cells: Vec<_> = row.select(&CELLS).collect();
            if cells.len() < 5 {
                continue; // ad or spacer row
            }

            let ip = match cells[0].select(&IP_LINK).next() {
                Some(link) => element_text(&link),
                None => continue,
            };
            if !valid_ip(&ip) {
                continue;
            }
            let port: u16 = match element_text(&cells[1]).parse() {
                Ok(port) if port > 0 => port,
                _ => continue,
            };

            let protocol =
                Protocol::from_code(&element_text(&cells[2])).unwrap_or(Protocol::Http);
            let anonymity = Anonymity::classify(&element_text(&cells[3]));
            // country code is the flag image's file stem
            let country = cells[4]
                .select(&FLAG)
                .next()
                .and_then(|img| img.value().attr("src"))
                .and_then(|src| src.rsplit('/').next())
                .and_then(|file| file.split('.').next())
                .map(|code| code.to_uppercase())
                .unwrap_or_default();

            candidates.push(Candidate {
                ip,
                port,
                protocol,
                country,
                anonymity,
            });
        }

        debug!(count = candidates.len(), "FPLS parse complete");
        candidates
    }
}
