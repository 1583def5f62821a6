//! SQLite-backed store for the proxy inventory and run audit records.
//!
//! All writes are upserts or deletes keyed by the unique `(ip, port)`
//! identity, so concurrent writers from different runs resolve to "record
//! already exists" instead of duplicating rows.

use crate::models::{Anonymity, Candidate, Page, Protocol, ProxyEntry, RunKind, RunRecord, Source};
use crate::Result;
use anyhow::anyhow;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        code TEXT NOT NULL UNIQUE,
        url TEXT NOT NULL UNIQUE,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        has_js INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (source_id, path)
    )",
    "CREATE TABLE IF NOT EXISTS proxies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ip TEXT NOT NULL,
        port INTEGER NOT NULL,
        protocol TEXT NOT NULL,
        country TEXT NOT NULL DEFAULT '',
        anonymity TEXT NOT NULL DEFAULT 'UNK',
        checked_at TEXT,
        checked_count INTEGER NOT NULL DEFAULT 0,
        is_dead INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (ip, port)
    )",
    "CREATE INDEX IF NOT EXISTS idx_proxies_ip_port ON proxies (ip, port)",
    "CREATE INDEX IF NOT EXISTS idx_proxies_checked_at ON proxies (checked_at)",
    "CREATE INDEX IF NOT EXISTS idx_proxies_created_at ON proxies (created_at)",
    "CREATE TABLE IF NOT EXISTS proxy_pages (
        proxy_id INTEGER NOT NULL REFERENCES proxies(id) ON DELETE CASCADE,
        page_id INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
        PRIMARY KEY (proxy_id, page_id)
    )",
    "CREATE TABLE IF NOT EXISTS runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        created_at TEXT NOT NULL,
        completed_at TEXT,
        is_success INTEGER NOT NULL DEFAULT 0,
        error TEXT,
        proxies INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS run_sources (
        run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
        source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        PRIMARY KEY (run_id, source_id)
    )",
    "CREATE TABLE IF NOT EXISTS run_pages (
        run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
        page_id INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
        PRIMARY KEY (run_id, page_id)
    )",
];

const PROXY_COLUMNS: &str = "id, ip, port, protocol, country, anonymity, checked_at, \
     checked_count, is_dead, is_active, created_at, updated_at";

/// Selection filter over the active inventory
#[derive(Debug, Clone)]
pub struct ProxyFilter {
    /// Restrict to these anonymity classes; `None` means any
    pub anonymity: Option<Vec<Anonymity>>,
    /// Restrict to one protocol
    pub protocol: Option<Protocol>,
}

impl Default for ProxyFilter {
    /// The selection default: anonymous or elite proxies only
    fn default() -> Self {
        Self {
            anonymity: Some(vec![Anonymity::Anonymous, Anonymity::Elite]),
            protocol: None,
        }
    }
}

impl ProxyFilter {
    /// No restrictions beyond active and not dead
    pub fn any() -> Self {
        Self {
            anonymity: None,
            protocol: None,
        }
    }
}

/// Inventory and run-record store
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) a database at the given path or URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let url = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };
        let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// In-memory database for tests. A single connection is used so all
    /// queries see the same `:memory:` instance.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // --- sources and pages ---

    pub async fn add_source(&self, name: &str, code: &str, url: &str) -> Result<Source> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO sources (name, code, url, is_active, created_at, updated_at)
             VALUES (?, ?, ?, 1, ?, ?)",
        )
        .bind(name)
        .bind(code.to_uppercase())
        .bind(url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.source_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow!("source vanished after insert"))
    }

    pub async fn add_page(&self, source_id: i64, path: &str, has_js: bool) -> Result<Page> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO pages (source_id, path, has_js, is_active, created_at, updated_at)
             VALUES (?, ?, ?, 1, ?, ?)",
        )
        .bind(source_id)
        .bind(path)
        .bind(has_js)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let page = sqlx::query_as::<_, Page>("SELECT * FROM pages WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(&self.pool)
            .await?;
        Ok(page)
    }

    pub async fn source_by_id(&self, id: i64) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(source)
    }

    pub async fn source_by_code(&self, code: &str) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE code = ?")
            .bind(code.to_uppercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(source)
    }

    pub async fn active_sources(&self) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>(
            "SELECT * FROM sources WHERE is_active = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    pub async fn all_sources(&self) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>("SELECT * FROM sources ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(sources)
    }

    pub async fn active_pages(&self, source_id: i64) -> Result<Vec<Page>> {
        let pages = sqlx::query_as::<_, Page>(
            "SELECT * FROM pages WHERE source_id = ? AND is_active = 1 ORDER BY id",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(pages)
    }

    /// Seed the built-in sources and their landing pages. Idempotent.
    pub async fn seed_known_sources(&self) -> Result<()> {
        let known: &[(&str, &str, &str, &str, bool)] = &[
            ("FreeProxyLists", "FPLS", "http://www.freeproxylists.net", "/", true),
            ("SSLProxies", "SSLP", "https://www.sslproxies.org", "/", false),
            ("Free-Proxy", "FPCZ", "http://free-proxy.cz", "/en/", true),
            ("Spys.one", "SPY1", "http://spys.one", "/en/", true),
        ];
        let now = Utc::now();
        for (name, code, url, path, has_js) in known {
            sqlx::query(
                "INSERT OR IGNORE INTO sources (name, code, url, is_active, created_at, updated_at)
                 VALUES (?, ?, ?, 1, ?, ?)",
            )
            .bind(name)
            .bind(code)
            .bind(url)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if let Some(source) = self.source_by_code(code).await? {
                sqlx::query(
                    "INSERT OR IGNORE INTO pages
                     (source_id, path, has_js, is_active, created_at, updated_at)
                     VALUES (?, ?, ?, 1, ?, ?)",
                )
                .bind(source.id)
                .bind(path)
                .bind(has_js)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    // --- proxies ---

    pub async fn find_proxy(&self, ip: &str, port: u16) -> Result<Option<ProxyEntry>> {
        let sql = format!("SELECT {PROXY_COLUMNS} FROM proxies WHERE ip = ? AND port = ?");
        let entry = sqlx::query_as::<_, ProxyEntry>(&sql)
            .bind(ip)
            .bind(port)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    /// Whether an active, non-dead entry already exists for this identity
    pub async fn proxy_exists(&self, ip: &str, port: u16) -> Result<bool> {
        let entry = self.find_proxy(ip, port).await?;
        Ok(entry.map_or(false, |e| e.is_active && !e.is_dead))
    }

    /// Create-or-fetch by `(ip, port)`. On create all fields are set and
    /// `checked_at = now`; on conflict the existing row is left untouched.
    /// The page association is recorded on both branches. Returns the entry
    /// and whether it was newly created.
    pub async fn upsert_proxy(
        &self,
        page_id: Option<i64>,
        candidate: &Candidate,
    ) -> Result<(ProxyEntry, bool)> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO proxies
             (ip, port, protocol, country, anonymity, checked_at, checked_count,
              is_dead, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, 0, 1, ?, ?)
             ON CONFLICT (ip, port) DO NOTHING",
        )
        .bind(&candidate.ip)
        .bind(candidate.port)
        .bind(candidate.protocol)
        .bind(&candidate.country)
        .bind(candidate.anonymity)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        let created = result.rows_affected() > 0;

        let entry = self
            .find_proxy(&candidate.ip, candidate.port)
            .await?
            .ok_or_else(|| anyhow!("proxy vanished after upsert: {}", candidate))?;

        if let Some(page_id) = page_id {
            sqlx::query("INSERT OR IGNORE INTO proxy_pages (proxy_id, page_id) VALUES (?, ?)")
                .bind(entry.id)
                .bind(page_id)
                .execute(&self.pool)
                .await?;
        }

        Ok((entry, created))
    }

    /// Active, non-dead inventory matching the filter
    pub async fn active_proxies(&self, filter: &ProxyFilter) -> Result<Vec<ProxyEntry>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {PROXY_COLUMNS} FROM proxies WHERE is_active = 1 AND is_dead = 0"
        ));
        if let Some(anonymity) = &filter.anonymity {
            qb.push(" AND anonymity IN (");
            let mut separated = qb.separated(", ");
            for class in anonymity {
                separated.push_bind(*class);
            }
            qb.push(")");
        }
        if let Some(protocol) = filter.protocol {
            qb.push(" AND protocol = ").push_bind(protocol);
        }
        qb.push(" ORDER BY ip, port");

        let entries = qb.build_query_as::<ProxyEntry>().fetch_all(&self.pool).await?;
        Ok(entries)
    }

    /// Record a successful verification: bump the counter, stamp `checked_at`
    pub async fn mark_checked(&self, proxy_id: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE proxies
             SET checked_at = ?, checked_count = checked_count + 1, updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(proxy_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flag an entry dead. The attempt still counts.
    pub async fn mark_dead(&self, proxy_id: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE proxies
             SET is_dead = 1, checked_count = checked_count + 1, updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(proxy_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_proxy(&self, proxy_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM proxy_pages WHERE proxy_id = ?")
            .bind(proxy_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM proxies WHERE id = ?")
            .bind(proxy_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Page ids a proxy was found in
    pub async fn pages_for_proxy(&self, proxy_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT page_id FROM proxy_pages WHERE proxy_id = ? ORDER BY page_id")
                .bind(proxy_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // --- runs ---

    /// Open a run record with `completed_at = NULL`
    pub async fn create_run(&self, kind: RunKind) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO runs (kind, created_at, is_success, proxies) VALUES (?, ?, 0, 0)",
        )
        .bind(kind)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Finalize a run record. Intended to be called exactly once per run.
    pub async fn finish_run(
        &self,
        run_id: i64,
        is_success: bool,
        error: Option<&str>,
        proxies: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET completed_at = ?, is_success = ?, error = ?, proxies = ?
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(is_success)
        .bind(error)
        .bind(proxies)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: i64) -> Result<Option<RunRecord>> {
        let run = sqlx::query_as::<_, RunRecord>("SELECT * FROM runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let runs = sqlx::query_as::<_, RunRecord>(
            "SELECT * FROM runs ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    pub async fn link_run_source(&self, run_id: i64, source_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO run_sources (run_id, source_id) VALUES (?, ?)")
            .bind(run_id)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn link_run_page(&self, run_id: i64, page_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO run_pages (run_id, page_id) VALUES (?, ?)")
            .bind(run_id)
            .bind(page_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_page() -> (Store, Page) {
        let store = Store::open_in_memory().await.unwrap();
        let source = store
            .add_source("SSLProxies", "sslp", "https://www.sslproxies.org")
            .await
            .unwrap();
        let page = store.add_page(source.id, "/", false).await.unwrap();
        (store, page)
    }

    fn candidate(ip: &str, port: u16) -> Candidate {
        Candidate {
            ip: ip.to_string(),
            port,
            protocol: Protocol::Http,
            country: "BD".to_string(),
            anonymity: Anonymity::Anonymous,
        }
    }

    #[tokio::test]
    async fn test_source_code_is_uppercased() {
        let (store, _) = store_with_page().await;
        let source = store.source_by_code("SSLP").await.unwrap().unwrap();
        assert_eq!(source.code, "SSLP");
        assert!(store.source_by_code("sslp").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_creates_once() {
        let (store, page) = store_with_page().await;
        let c = candidate("1.2.3.4", 8080);

        let (first, created) = store.upsert_proxy(Some(page.id), &c).await.unwrap();
        assert!(created);
        assert!(first.checked_at.is_some());

        let (second, created) = store.upsert_proxy(Some(page.id), &c).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_upsert_accumulates_found_in_pages() {
        let (store, page) = store_with_page().await;
        let source = store
            .add_source("FreeProxyLists", "FPLS", "http://www.freeproxylists.net")
            .await
            .unwrap();
        let other_page = store.add_page(source.id, "/", true).await.unwrap();

        let c = candidate("1.2.3.4", 8080);
        let (entry, _) = store.upsert_proxy(Some(page.id), &c).await.unwrap();
        store.upsert_proxy(Some(other_page.id), &c).await.unwrap();

        let pages = store.pages_for_proxy(entry.id).await.unwrap();
        assert_eq!(pages, vec![page.id, other_page.id]);
    }

    #[tokio::test]
    async fn test_dead_proxies_excluded_from_selection() {
        let (store, page) = store_with_page().await;
        let (entry, _) = store
            .upsert_proxy(Some(page.id), &candidate("1.2.3.4", 8080))
            .await
            .unwrap();
        store
            .upsert_proxy(Some(page.id), &candidate("5.6.7.8", 3128))
            .await
            .unwrap();

        store.mark_dead(entry.id).await.unwrap();

        let alive = store.active_proxies(&ProxyFilter::any()).await.unwrap();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].ip, "5.6.7.8");
    }

    #[tokio::test]
    async fn test_filter_by_anonymity() {
        let (store, page) = store_with_page().await;
        let mut transparent = candidate("1.2.3.4", 8080);
        transparent.anonymity = Anonymity::Transparent;
        store.upsert_proxy(Some(page.id), &transparent).await.unwrap();

        let mut elite = candidate("5.6.7.8", 3128);
        elite.anonymity = Anonymity::Elite;
        store.upsert_proxy(Some(page.id), &elite).await.unwrap();

        let selected = store.active_proxies(&ProxyFilter::default()).await.unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].anonymity, Anonymity::Elite);

        let all = store.active_proxies(&ProxyFilter::any()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_checked_bumps_counter() {
        let (store, page) = store_with_page().await;
        let (entry, _) = store
            .upsert_proxy(Some(page.id), &candidate("1.2.3.4", 8080))
            .await
            .unwrap();
        assert_eq!(entry.checked_count, 0);

        store.mark_checked(entry.id).await.unwrap();
        store.mark_checked(entry.id).await.unwrap();

        let entry = store.find_proxy("1.2.3.4", 8080).await.unwrap().unwrap();
        assert_eq!(entry.checked_count, 2);
        assert!(entry.checked_at.is_some());
    }

    #[tokio::test]
    async fn test_delete_proxy_removes_associations() {
        let (store, page) = store_with_page().await;
        let (entry, _) = store
            .upsert_proxy(Some(page.id), &candidate("1.2.3.4", 8080))
            .await
            .unwrap();

        store.delete_proxy(entry.id).await.unwrap();

        assert!(store.find_proxy("1.2.3.4", 8080).await.unwrap().is_none());
        assert!(store.pages_for_proxy(entry.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let store = Store::open_in_memory().await.unwrap();
        let run_id = store.create_run(RunKind::Harvest).await.unwrap();

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert!(!run.is_finished());
        assert!(!run.is_success);

        store.finish_run(run_id, true, None, 42).await.unwrap();
        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert!(run.is_finished());
        assert!(run.is_success);
        assert_eq!(run.proxies, 42);
        assert!(run.error.is_none());
    }

    #[tokio::test]
    async fn test_failed_run_records_error() {
        let store = Store::open_in_memory().await.unwrap();
        let run_id = store.create_run(RunKind::HealthCheck).await.unwrap();
        store
            .finish_run(run_id, false, Some("inventory unreachable"), 0)
            .await
            .unwrap();

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert!(!run.is_success);
        assert_eq!(run.error.as_deref(), Some("inventory unreachable"));
    }

    #[tokio::test]
    async fn test_seed_known_sources_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        store.seed_known_sources().await.unwrap();
        store.seed_known_sources().await.unwrap();

        let sources = store.all_sources().await.unwrap();
        assert_eq!(sources.len(), 4);
        for source in sources {
            let pages = store.active_pages(source.id).await.unwrap();
            assert_eq!(pages.len(), 1);
        }
    }
}
