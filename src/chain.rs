//! C2 — the hash-linked commitment chain. No VDF, no PoW, no reorgs:
//! each block simply commits a batch of fact_ids on top of the current
//! head, and is accepted iff it extends that head by exactly one height.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::StoreError;
use crate::store::Store;

pub const GENESIS_BLOCK_ID: &str = "axiom_genesis_v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub block_id: String,
    pub previous_block_id: String,
    pub height: i64,
    pub created_at_utc: String,
    pub fact_ids: Vec<String>,
}

fn compute_block_id(
    previous_block_id: &str,
    height: i64,
    created_at_utc: &str,
    fact_ids: &[String],
) -> Result<String, StoreError> {
    let fact_ids_json = serde_json::to_string(fact_ids)?;
    let mut hasher = Sha256::new();
    hasher.update(previous_block_id.as_bytes());
    hasher.update(height.to_string().as_bytes());
    hasher.update(created_at_utc.as_bytes());
    hasher.update(fact_ids_json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn row_to_block(
    block_id: String,
    previous_block_id: String,
    height: i64,
    created_at_utc: String,
    fact_ids_json: String,
) -> Result<BlockRecord, StoreError> {
    Ok(BlockRecord {
        block_id,
        previous_block_id,
        height,
        created_at_utc,
        fact_ids: serde_json::from_str(&fact_ids_json)?,
    })
}

/// Inserts the fixed genesis block if the chain is empty. Idempotent.
pub fn initialize_chain(store: &Store) -> Result<(), StoreError> {
    let conn = store.lock();
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
    if count == 0 {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO blocks (block_id, previous_block_id, height, created_at_utc, fact_ids)
             VALUES (?1, '', 0, ?2, '[]')",
            params![GENESIS_BLOCK_ID, now],
        )?;
        tracing::info!("genesis block created");
    }
    Ok(())
}

pub fn block_count(store: &Store) -> Result<i64, StoreError> {
    let conn = store.lock();
    Ok(conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?)
}

/// The stored block with the maximum height. Two blocks sharing a
/// height is a corruption condition under this protocol (no reorgs are
/// ever performed) — if it happens anyway, the lexicographically
/// smallest `block_id` is treated as head and a warning is logged.
pub fn get_chain_head(store: &Store) -> Result<BlockRecord, StoreError> {
    let conn = store.lock();
    let max_height: Option<i64> =
        conn.query_row("SELECT MAX(height) FROM blocks", [], |row| row.get(0))?;
    let Some(height) = max_height else {
        return Err(StoreError::UninitializedChain);
    };

    let mut stmt = conn.prepare(
        "SELECT block_id, previous_block_id, height, created_at_utc, fact_ids
         FROM blocks WHERE height = ?1 ORDER BY block_id ASC",
    )?;
    let rows: Vec<BlockRecord> = stmt
        .query_map(params![height], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(a, b, c, d, e)| row_to_block(a, b, c, d, e))
        .collect::<Result<Vec<_>, _>>()?;

    if rows.len() > 1 {
        warn!(
            height,
            candidates = rows.len(),
            "multiple blocks share the max height — treating the lexicographically \
             smallest block_id as head"
        );
    }

    rows.into_iter().next().ok_or(StoreError::UninitializedChain)
}

/// Commits `fact_ids` (in the given order) as the next block. Mutually
/// exclusive with `append_block` via `head_lock`, held across
/// read-head/compute/insert so at most one head advancement is ever in
/// flight on this node.
pub fn create_block(
    store: &Store,
    head_lock: &Mutex<()>,
    fact_ids: Vec<String>,
) -> Result<BlockRecord, StoreError> {
    if fact_ids.is_empty() {
        return Err(StoreError::EmptyBlock);
    }

    let _guard = head_lock.lock();
    let head = get_chain_head(store)?;
    let height = head.height + 1;
    let created_at_utc = Utc::now().to_rfc3339();
    let block_id = compute_block_id(&head.block_id, height, &created_at_utc, &fact_ids)?;
    let fact_ids_json = serde_json::to_string(&fact_ids)?;

    let conn = store.lock();
    conn.execute(
        "INSERT INTO blocks (block_id, previous_block_id, height, created_at_utc, fact_ids)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![block_id, head.block_id, height, created_at_utc, fact_ids_json],
    )?;

    Ok(BlockRecord {
        block_id,
        previous_block_id: head.block_id,
        height,
        created_at_utc,
        fact_ids,
    })
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Passes iff the recomputed hash matches the candidate's own payload,
/// the candidate extends the current head by exactly one height, and
/// every fact_id is well-formed hex.
pub fn validate_block(store: &Store, candidate: &BlockRecord) -> Result<(), StoreError> {
    let head = get_chain_head(store)?;

    let recomputed = compute_block_id(
        &candidate.previous_block_id,
        candidate.height,
        &candidate.created_at_utc,
        &candidate.fact_ids,
    )?;
    if recomputed != candidate.block_id {
        return Err(StoreError::InvalidBlock(format!(
            "block {} hash does not match its payload",
            candidate.block_id
        )));
    }

    if candidate.previous_block_id != head.block_id {
        return Err(StoreError::InvalidBlock(format!(
            "block {} does not extend current head {}",
            candidate.block_id, head.block_id
        )));
    }

    if candidate.height != head.height + 1 {
        return Err(StoreError::InvalidBlock(format!(
            "block {} has height {}, expected {}",
            candidate.block_id,
            candidate.height,
            head.height + 1
        )));
    }

    if !candidate.fact_ids.iter().all(|id| is_hex64(id)) {
        return Err(StoreError::InvalidBlock(format!(
            "block {} contains a malformed fact_id",
            candidate.block_id
        )));
    }

    Ok(())
}

/// Re-validates `candidate` against the current head and appends it.
/// No reorg logic: a block that doesn't extend the head is rejected
/// outright, leaving it to the sync layer to stop pulling from that peer.
pub fn append_block(
    store: &Store,
    head_lock: &Mutex<()>,
    candidate: BlockRecord,
) -> Result<(), StoreError> {
    let _guard = head_lock.lock();
    validate_block(store, &candidate)?;

    let fact_ids_json = serde_json::to_string(&candidate.fact_ids)?;
    let conn = store.lock();
    conn.execute(
        "INSERT INTO blocks (block_id, previous_block_id, height, created_at_utc, fact_ids)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            candidate.block_id,
            candidate.previous_block_id,
            candidate.height,
            candidate.created_at_utc,
            fact_ids_json
        ],
    )?;
    Ok(())
}

/// Ascending-height blocks with `height > n`, for chain-sync responses.
pub fn get_blocks_after(store: &Store, n: i64) -> Result<Vec<BlockRecord>, StoreError> {
    let conn = store.lock();
    let mut stmt = conn.prepare(
        "SELECT block_id, previous_block_id, height, created_at_utc, fact_ids
         FROM blocks WHERE height > ?1 ORDER BY height ASC",
    )?;
    let rows = stmt
        .query_map(params![n], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(a, b, c, d, e)| row_to_block(a, b, c, d, e))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        Store::open(":memory:").unwrap()
    }

    #[test]
    fn genesis_is_fixed_and_idempotent() {
        let store = test_store();
        initialize_chain(&store).unwrap();
        initialize_chain(&store).unwrap();
        let head = get_chain_head(&store).unwrap();
        assert_eq!(head.block_id, GENESIS_BLOCK_ID);
        assert_eq!(head.height, 0);
        assert_eq!(head.previous_block_id, "");
        assert!(head.fact_ids.is_empty());
        assert_eq!(block_count(&store).unwrap(), 1);
    }

    #[test]
    fn create_block_links_to_head_and_recomputes_hash() {
        let store = test_store();
        initialize_chain(&store).unwrap();
        let lock = Mutex::new(());
        let block = create_block(&store, &lock, vec!["a".repeat(64), "b".repeat(64)]).unwrap();
        assert_eq!(block.height, 1);
        assert_eq!(block.previous_block_id, GENESIS_BLOCK_ID);

        let recomputed = compute_block_id(
            &block.previous_block_id,
            block.height,
            &block.created_at_utc,
            &block.fact_ids,
        )
        .unwrap();
        assert_eq!(recomputed, block.block_id);
    }

    #[test]
    fn empty_fact_ids_does_not_create_a_block() {
        let store = test_store();
        initialize_chain(&store).unwrap();
        let lock = Mutex::new(());
        assert!(matches!(
            create_block(&store, &lock, vec![]),
            Err(StoreError::EmptyBlock)
        ));
        assert_eq!(get_chain_head(&store).unwrap().height, 0);
    }

    #[test]
    fn append_block_rejects_non_extending_block() {
        let store = test_store();
        initialize_chain(&store).unwrap();
        let lock = Mutex::new(());

        let bogus = BlockRecord {
            block_id: "x".repeat(64),
            previous_block_id: "not-the-head".to_string(),
            height: 1,
            created_at_utc: Utc::now().to_rfc3339(),
            fact_ids: vec![],
        };
        assert!(append_block(&store, &lock, bogus).is_err());
        assert_eq!(get_chain_head(&store).unwrap().height, 0);
    }

    #[test]
    fn get_blocks_after_is_ascending_and_excludes_head() {
        let store = test_store();
        initialize_chain(&store).unwrap();
        let lock = Mutex::new(());
        create_block(&store, &lock, vec!["a".repeat(64)]).unwrap();
        create_block(&store, &lock, vec!["b".repeat(64)]).unwrap();

        let blocks = get_blocks_after(&store, 0).unwrap();
        assert_eq!(
            blocks.iter().map(|b| b.height).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(get_blocks_after(&store, 99).unwrap().is_empty());
    }
}
