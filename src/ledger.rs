//! C1 — the content-addressed fact ledger.

use std::io::{Read, Write};

use chrono::Utc;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::StoreError;
use crate::store::Store;

/// Peer-opinion trust-score floor (§4.3). The core leaves the exact
/// reputation formula undefined; this is the implementation's choice for
/// "decent trust", documented in DESIGN.md.
pub const TRUST_FLOOR: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactStatus {
    Uncorroborated,
    Trusted,
    Disputed,
}

impl FactStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FactStatus::Uncorroborated => "uncorroborated",
            FactStatus::Trusted => "trusted",
            FactStatus::Disputed => "disputed",
        }
    }

    fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "uncorroborated" => Ok(FactStatus::Uncorroborated),
            "trusted" => Ok(FactStatus::Trusted),
            "disputed" => Ok(FactStatus::Disputed),
            other => Err(StoreError::UnknownEnumValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentState {
    Unknown,
    SuspectedFragment,
    ConfirmedFragment,
    RejectedFragment,
}

impl FragmentState {
    pub fn as_str(self) -> &'static str {
        match self {
            FragmentState::Unknown => "unknown",
            FragmentState::SuspectedFragment => "suspected_fragment",
            FragmentState::ConfirmedFragment => "confirmed_fragment",
            FragmentState::RejectedFragment => "rejected_fragment",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "unknown" => Ok(FragmentState::Unknown),
            "suspected_fragment" => Ok(FragmentState::SuspectedFragment),
            "confirmed_fragment" => Ok(FragmentState::ConfirmedFragment),
            "rejected_fragment" => Ok(FragmentState::RejectedFragment),
            other => Err(StoreError::UnknownEnumValue {
                field: "fragment_state",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FactRecord {
    pub fact_id: String,
    pub content: String,
    pub adl_summary: String,
    pub source_url: String,
    pub ingest_timestamp_utc: String,
    pub status: FactStatus,
    pub trust_score: i64,
    pub fragment_state: FragmentState,
    pub fragment_score: f64,
    pub fragment_reason: Option<String>,
}

/// `fact_id = SHA256(normalized_text)`, hex-encoded.
pub fn compute_fact_id(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn compress(text: &str) -> Result<Vec<u8>, StoreError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| StoreError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| StoreError::Compression(e.to_string()))
}

pub(crate) fn decompress(data: &[u8]) -> Result<String, StoreError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(|e| StoreError::Compression(e.to_string()))?;
    Ok(out)
}

/// Inserts `content` as a fresh uncorroborated fact, or returns the
/// existing `fact_id` unchanged if this content was already stored. The
/// `bool` in the result is `true` iff this call performed the insert.
pub fn insert_uncorroborated_fact(
    store: &Store,
    content: &str,
    source_url: &str,
    adl_summary: &str,
    fragment_state: FragmentState,
    fragment_score: f64,
    fragment_reason: Option<&str>,
) -> Result<(String, bool), StoreError> {
    let fact_id = compute_fact_id(content);
    let conn = store.lock();

    let existing: Option<String> = conn
        .query_row(
            "SELECT fact_id FROM facts WHERE fact_id = ?1",
            params![fact_id],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        if !source_url.is_empty() {
            conn.execute(
                "INSERT OR IGNORE INTO fact_sources (fact_id, source_url) VALUES (?1, ?2)",
                params![id, source_url],
            )?;
        }
        return Ok((id, false));
    }

    let compressed = match compress(content) {
        Ok(c) => c,
        Err(e) => {
            warn!(fact_id = %fact_id, error = %e, "compression failed on insert; skipping fact");
            return Err(e);
        }
    };

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO facts
            (fact_id, content, adl_summary, source_url, ingest_timestamp_utc,
             status, trust_score, fragment_state, fragment_score, fragment_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9)",
        params![
            fact_id,
            compressed,
            adl_summary,
            source_url,
            now,
            FactStatus::Uncorroborated.as_str(),
            fragment_state.as_str(),
            fragment_score,
            fragment_reason,
        ],
    )?;

    if !source_url.is_empty() {
        conn.execute(
            "INSERT OR IGNORE INTO fact_sources (fact_id, source_url) VALUES (?1, ?2)",
            params![fact_id, source_url],
        )?;
    }

    Ok((fact_id, true))
}

/// Records an independent corroboration. No-op if the fact is unknown or
/// `new_source_url` was already recorded. Never downgrades `disputed`.
pub fn corroborate(store: &Store, fact_id: &str, new_source_url: &str) -> Result<(), StoreError> {
    let conn = store.lock();

    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM facts WHERE fact_id = ?1",
            params![fact_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(status) = status else {
        return Ok(());
    };

    if !new_source_url.is_empty() {
        let already: i64 = conn.query_row(
            "SELECT COUNT(*) FROM fact_sources WHERE fact_id = ?1 AND source_url = ?2",
            params![fact_id, new_source_url],
            |row| row.get(0),
        )?;
        if already > 0 {
            return Ok(());
        }
        conn.execute(
            "INSERT OR IGNORE INTO fact_sources (fact_id, source_url) VALUES (?1, ?2)",
            params![fact_id, new_source_url],
        )?;
    }

    conn.execute(
        "UPDATE facts SET trust_score = trust_score + 1 WHERE fact_id = ?1",
        params![fact_id],
    )?;

    let trust_score: i64 = conn.query_row(
        "SELECT trust_score FROM facts WHERE fact_id = ?1",
        params![fact_id],
        |row| row.get(0),
    )?;

    if trust_score >= 2 && status == FactStatus::Uncorroborated.as_str() {
        conn.execute(
            "UPDATE facts SET status = ?1 WHERE fact_id = ?2",
            params![FactStatus::Trusted.as_str(), fact_id],
        )?;
    }

    Ok(())
}

/// Marks both facts disputed and records a `contradicts` relationship.
pub fn mark_disputed(store: &Store, fact_id_a: &str, fact_id_b: &str) -> Result<(), StoreError> {
    let conn = store.lock();
    conn.execute(
        "UPDATE facts SET status = ?1 WHERE fact_id IN (?2, ?3)",
        params![FactStatus::Disputed.as_str(), fact_id_a, fact_id_b],
    )?;
    conn.execute(
        "INSERT INTO fact_relationships (fact_a, fact_b, kind) VALUES (?1, ?2, 'contradicts')",
        params![fact_id_a, fact_id_b],
    )?;
    Ok(())
}

pub fn get_fact_ids(store: &Store) -> Result<Vec<String>, StoreError> {
    let conn = store.lock();
    let mut stmt = conn.prepare("SELECT fact_id FROM facts")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

pub fn fact_count(store: &Store) -> Result<i64, StoreError> {
    let conn = store.lock();
    Ok(conn.query_row("SELECT COUNT(*) FROM facts", [], |row| row.get(0))?)
}

fn row_to_record(
    fact_id: String,
    content: Vec<u8>,
    adl_summary: String,
    source_url: String,
    ingest_timestamp_utc: String,
    status: String,
    trust_score: i64,
    fragment_state: String,
    fragment_score: f64,
    fragment_reason: Option<String>,
) -> Result<FactRecord, StoreError> {
    Ok(FactRecord {
        fact_id,
        content: decompress(&content)?,
        adl_summary,
        source_url,
        ingest_timestamp_utc,
        status: FactStatus::parse(&status)?,
        trust_score,
        fragment_state: FragmentState::parse(&fragment_state)?,
        fragment_score,
        fragment_reason,
    })
}

/// Returns the subset of `ids` that are present locally, with
/// decompressed content. Unknown ids are omitted silently.
pub fn get_facts_by_id(store: &Store, ids: &[String]) -> Result<Vec<FactRecord>, StoreError> {
    let conn = store.lock();
    let mut out = Vec::with_capacity(ids.len());

    let mut stmt = conn.prepare(
        "SELECT fact_id, content, adl_summary, source_url, ingest_timestamp_utc,
                status, trust_score, fragment_state, fragment_score, fragment_reason
         FROM facts WHERE fact_id = ?1",
    )?;

    for id in ids {
        let row = stmt
            .query_row(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, f64>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })
            .optional()?;

        if let Some((fact_id, content, adl_summary, source_url, ts, status, trust, fstate, fscore, freason)) =
            row
        {
            out.push(row_to_record(
                fact_id, content, adl_summary, source_url, ts, status, trust, fstate, fscore, freason,
            )?);
        }
    }

    Ok(out)
}

pub fn update_fragment(
    store: &Store,
    fact_id: &str,
    state: FragmentState,
    score: f64,
    reason: Option<&str>,
) -> Result<(), StoreError> {
    let conn = store.lock();
    conn.execute(
        "UPDATE facts SET fragment_state = ?1, fragment_score = ?2, fragment_reason = ?3
         WHERE fact_id = ?4",
        params![state.as_str(), score, reason, fact_id],
    )?;
    Ok(())
}

/// Self-healing migration: any row whose `content` is not a valid zlib
/// blob (i.e. predates compression) is recompressed in place.
pub fn migrate_fact_content_to_compressed(store: &Store) -> Result<usize, StoreError> {
    let conn = store.lock();
    let rows: Vec<(String, Vec<u8>)> = conn
        .prepare("SELECT fact_id, content FROM facts")?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;

    let mut migrated = 0usize;
    for (fact_id, content) in rows {
        if decompress(&content).is_ok() {
            continue;
        }
        let Ok(plaintext) = String::from_utf8(content) else {
            warn!(fact_id = %fact_id, "content migration: row is neither valid zlib nor UTF-8; leaving as-is");
            continue;
        };
        match compress(&plaintext) {
            Ok(compressed) => {
                conn.execute(
                    "UPDATE facts SET content = ?1 WHERE fact_id = ?2",
                    params![compressed, fact_id],
                )?;
                migrated += 1;
            }
            Err(e) => warn!(fact_id = %fact_id, error = %e, "content migration: compression failed"),
        }
    }

    if migrated > 0 {
        tracing::info!(count = migrated, "migrated plaintext fact content to compressed blobs");
    }

    Ok(migrated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        Store::open(":memory:").unwrap()
    }

    #[test]
    fn fact_id_is_content_hash() {
        let id = compute_fact_id("The sky is blue.");
        let mut hasher = Sha256::new();
        hasher.update("The sky is blue.".as_bytes());
        assert_eq!(id, hex::encode(hasher.finalize()));
    }

    #[test]
    fn insert_is_idempotent() {
        let store = test_store();
        let (id1, new1) =
            insert_uncorroborated_fact(&store, "Water boils at 100C.", "a.example", "", FragmentState::Unknown, 0.0, None)
                .unwrap();
        let (id2, new2) =
            insert_uncorroborated_fact(&store, "Water boils at 100C.", "b.example", "", FragmentState::Unknown, 0.0, None)
                .unwrap();
        assert_eq!(id1, id2);
        assert!(new1);
        assert!(!new2);
        assert_eq!(fact_count(&store).unwrap(), 1);
    }

    #[test]
    fn corroborate_promotes_to_trusted_and_never_downgrades() {
        let store = test_store();
        let (id, _) =
            insert_uncorroborated_fact(&store, "Paris is the capital of France.", "a.example", "", FragmentState::Unknown, 0.0, None)
                .unwrap();
        corroborate(&store, &id, "b.example").unwrap();
        let record = get_facts_by_id(&store, &[id.clone()]).unwrap().remove(0);
        assert_eq!(record.status, FactStatus::Trusted);
        assert_eq!(record.trust_score, 2);

        mark_disputed(&store, &id, &id).unwrap();
        // corroborating a disputed fact must not move it back to trusted-only semantics
        corroborate(&store, &id, "c.example").unwrap();
        let record = get_facts_by_id(&store, &[id]).unwrap().remove(0);
        assert_eq!(record.status, FactStatus::Disputed);
    }

    #[test]
    fn corroborate_same_source_twice_does_not_double_count() {
        let store = test_store();
        let (id, _) =
            insert_uncorroborated_fact(&store, "The moon orbits the earth.", "a.example", "", FragmentState::Unknown, 0.0, None)
                .unwrap();
        corroborate(&store, &id, "a.example").unwrap();
        let record = get_facts_by_id(&store, &[id]).unwrap().remove(0);
        assert_eq!(record.trust_score, 1);
        assert_eq!(record.status, FactStatus::Uncorroborated);
    }

    #[test]
    fn migration_recompresses_plaintext_rows() {
        let store = test_store();
        {
            let conn = store.lock();
            conn.execute(
                "INSERT INTO facts (fact_id, content, ingest_timestamp_utc) VALUES (?1, ?2, ?3)",
                params!["deadbeef", b"legacy plaintext".to_vec(), "2020-01-01T00:00:00+00:00"],
            )
            .unwrap();
        }
        let migrated = migrate_fact_content_to_compressed(&store).unwrap();
        assert_eq!(migrated, 1);
        let record = get_facts_by_id(&store, &["deadbeef".to_string()]).unwrap().remove(0);
        assert_eq!(record.content, "legacy plaintext");
    }

    #[test]
    fn unknown_status_value_is_rejected_on_read() {
        assert!(FactStatus::parse("bogus").is_err());
        assert!(FragmentState::parse("bogus").is_err());
    }
}
