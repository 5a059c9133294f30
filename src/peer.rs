//! Peer registry. Unlike the `facts`/`blocks` tables, `peers` is small
//! and constantly rewritten (`last_seen_utc` on every touch), so reads
//! go through the store directly rather than an in-memory cache —
//! there is no connection-pool pressure at the volumes this node
//! targets (§5).

use chrono::Utc;
use rand::seq::SliceRandom;
use rusqlite::params;
use tracing::debug;

use crate::error::StoreError;
use crate::store::Store;

pub const DEFAULT_REPUTATION: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub url: String,
    pub last_seen_utc: String,
    pub reputation: f64,
}

/// Strips a trailing slash so `http://host:1` and `http://host:1/` are
/// the same peer.
pub fn canonicalize(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Registers `url` as a peer, or just bumps `last_seen_utc` if already
/// known. Never registers our own advertised URL.
pub fn register_peer(store: &Store, url: &str, self_url: &str) -> Result<(), StoreError> {
    let canonical = canonicalize(url);
    if canonical.is_empty() || canonical == canonicalize(self_url) {
        return Ok(());
    }

    let now = Utc::now().to_rfc3339();
    let conn = store.lock();
    conn.execute(
        "INSERT INTO peers (url, last_seen_utc, reputation) VALUES (?1, ?2, ?3)
         ON CONFLICT(url) DO UPDATE SET last_seen_utc = excluded.last_seen_utc",
        params![canonical, now, DEFAULT_REPUTATION],
    )?;
    debug!(peer = %canonical, "peer registered/refreshed");
    Ok(())
}

pub fn list_peers(store: &Store) -> Result<Vec<PeerRecord>, StoreError> {
    let conn = store.lock();
    let mut stmt = conn.prepare("SELECT url, last_seen_utc, reputation FROM peers ORDER BY url")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PeerRecord {
                url: row.get(0)?,
                last_seen_utc: row.get(1)?,
                reputation: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn peer_urls(store: &Store) -> Result<Vec<String>, StoreError> {
    Ok(list_peers(store)?.into_iter().map(|p| p.url).collect())
}

/// Uniformly samples up to `n` distinct peer URLs.
pub fn sample_peers(store: &Store, n: usize) -> Result<Vec<String>, StoreError> {
    let mut urls = peer_urls(store)?;
    let mut rng = rand::thread_rng();
    urls.shuffle(&mut rng);
    urls.truncate(n);
    Ok(urls)
}
