//! Adapter for the nested-table layout served by free-proxy.cz (`FPCZ`)
//! and spys.one (`SPY1`)

use super::{element_text, parse_ip_port, ProxyAdapter};
use crate::models::{Anonymity, Candidate, Protocol};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::debug;

static TABLES: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table").expect("Invalid table selector"));
static ROWS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tbody > tr").expect("Invalid row selector"));
static CELLS: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("Invalid cell selector"));
static FONT: Lazy<Selector> = Lazy::new(|| Selector::parse("font").expect("Invalid font selector"));
static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a").expect("Invalid link selector"));

/// The proxy grid sits in a table nested inside the fourth row of the page's
/// second table; the first three and last two inner rows are chrome. Cells:
/// `ip:port` in a font tag, protocol label, anonymity code in a font tag,
/// country from a link href.
pub struct FreeProxyCz;

impl ProxyAdapter for FreeProxyCz {
    fn parse(&self, html: &str) -> Vec<Candidate> {
        let document = Html::parse_document(html);
        let mut candidates = Vec::new();

        let Some(outer_table) = document.select(&TABLES).nth(1) else {
            return candidates;
        };
        let Some(grid_row) = outer_table.select(&ROWS).nth(3) else {
            return candidates;
        };
        let Some(grid) = grid_row.select(&TABLES).next() else {
            return candidates;
        };

        let rows: Vec<_> = grid.select(&ROWS).collect();
        if rows.len() <= 5 {
            return candidates;
        }

        for row in &rows[3..rows.len() - 2] {
            let cells: Vec<_> = row.select(&CELLS).collect();
            if cells.len() <= 1 {
                continue; // ad or spacer row
            }

            let Some((ip, port)) = cells
                .first()
                .and_then(|cell| cell.select(&FONT).next())
                .and_then(|font| parse_ip_port(&element_text(&font)))
            else {
                continue;
            };

            let protocol = element_text(&cells[1])
                .split_whitespace()
                .next()
                .and_then(Protocol::from_code)
                .unwrap_or(Protocol::Http);
            let anonymity = cells
                .get(2)
                .and_then(|cell| cell.select(&FONT).next())
                .map(|font| Anonymity::classify(&element_text(&font)))
                .unwrap_or(Anonymity::Unknown);
            let country = cells
                .get(3)
                .and_then(|cell| cell.select(&LINK).next())
                .and_then(|link| link.value().attr("href"))
                .and_then(|href| href.split('/').filter(|s| !s.is_empty()).last())
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

        debug!(count = candidates.len(), "FPCZ parse complete");
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
<html>
    <body>
        <table><tbody><tr><td>nav</td></tr></tbody></table>
        <table>
            <tbody>
            <tr><td></td></tr>
            <tr><td></td></tr>
            <tr><td></td></tr>
            <tr><td>
                <table>
                    <tbody>
                    <tr><td>chrome</td></tr>
                    <tr><td>chrome</td></tr>
                    <tr><td>chrome</td></tr>
                    <tr>
                        <td><font>127.1.2.3:12345</font></td>
                        <td>HTTP Unsecure</td>
                        <td><font>ANM</font></td>
                        <td><a href="/path/BD/">Bangladesh</a></td>
                    </tr>
                    <tr><td>chrome</td></tr>
                    <tr><td>chrome</td></tr>
                    </tbody>
                </table>
            </td></tr>
            </tbody>
        </table>
    </body>
</html>
"#;

    #[test]
    fn test_parse_nested_tables() {
        let candidates = FreeProxyCz.parse(FIXTURE);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].ip, "127.1.2.3");
        assert_eq!(candidates[0].port, 12345);
        assert_eq!(candidates[0].protocol, Protocol::Http);
        assert_eq!(candidates[0].anonymity, Anonymity::Anonymous);
        assert_eq!(candidates[0].country, "BD");
    }

    #[test]
    fn test_missing_grid_yields_empty() {
        assert!(FreeProxyCz.parse("<html><body></body></html>").is_empty());
        assert!(FreeProxyCz
            .parse("<html><body><table><tbody><tr><td>only one</td></tr></tbody></table></body></html>")
            .is_empty());
    }

    #[test]
    fn test_single_cell_rows_are_skipped() {
        // grid exists but every data row is an ad row
        let html = FIXTURE.replace(
            r#"<td><font>127.1.2.3:12345</font></td>
                        <td>HTTP Unsecure</td>
                        <td><font>ANM</font></td>
                        <td><a href="/path/BD/">Bangladesh</a></td>"#,
            "<td>advertisement</td>",
        );
        assert!(FreeProxyCz.parse(&html).is_empty());
    }
}
