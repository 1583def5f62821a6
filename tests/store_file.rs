//! The store against a real database file: creation on first open and
//! persistence across handles.

use proxy_harvester::database::{ProxyFilter, Store};
use proxy_harvester::models::{Candidate, Protocol};

#[tokio::test]
async fn store_creates_and_reopens_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxies.db");
    let path = path.to_str().unwrap();

    {
        let store = Store::new(path).await.unwrap();
        store.seed_known_sources().await.unwrap();
        store
            .upsert_proxy(None, &Candidate::new("1.2.3.4", 8080, Protocol::Http))
            .await
            .unwrap();
    }

    let reopened = Store::new(path).await.unwrap();
    assert_eq!(reopened.all_sources().await.unwrap().len(), 4);
    let entries = reopened.active_proxies(&ProxyFilter::any()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].ip, "1.2.3.4");
}
