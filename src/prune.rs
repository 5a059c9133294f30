//! C4 — metacognitive prune: deletes stale, low-trust, fragment-tagged
//! facts. Blocks are never rewritten; a pruned fact's `fact_id` may
//! still dangle inside an already-committed block, which is accepted
//! as historical record rather than treated as corruption.

use rusqlite::params;

use crate::error::StoreError;
use crate::ledger::FragmentState;
use crate::store::Store;

const MAX_AGE_DAYS: i64 = 90;
const TRUST_SCORE_CEILING: i64 = 2;
const MIN_ADL_SUMMARY_LEN: usize = 10;

/// Deletes every fact (and its `fact_relationships` rows) that is
/// older than `MAX_AGE_DAYS`, has `trust_score <= TRUST_SCORE_CEILING`,
/// and is either a confirmed fragment or carries a near-empty summary.
/// Returns the number of facts deleted.
pub fn run_prune(store: &Store) -> Result<usize, StoreError> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(MAX_AGE_DAYS)).to_rfc3339();
    let conn = store.lock();

    let candidates: Vec<String> = conn
        .prepare(
            "SELECT fact_id FROM facts
             WHERE ingest_timestamp_utc < ?1
               AND trust_score <= ?2
               AND (fragment_state = ?3 OR length(adl_summary) < ?4)",
        )?
        .query_map(
            params![
                cutoff,
                TRUST_SCORE_CEILING,
                FragmentState::ConfirmedFragment.as_str(),
                MIN_ADL_SUMMARY_LEN as i64,
            ],
            |row| row.get::<_, String>(0),
        )?
        .collect::<Result<_, _>>()?;

    for fact_id in &candidates {
        conn.execute("DELETE FROM fact_relationships WHERE fact_a = ?1 OR fact_b = ?1", params![fact_id])?;
        conn.execute("DELETE FROM facts WHERE fact_id = ?1", params![fact_id])?;
    }

    if !candidates.is_empty() {
        tracing::info!(count = candidates.len(), "pruned stale facts");
    }

    Ok(candidates.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{insert_uncorroborated_fact, update_fragment};

    fn test_store() -> Store {
        Store::open(":memory:").unwrap()
    }

    fn backdate(store: &Store, fact_id: &str, days_ago: i64) {
        let ts = (chrono::Utc::now() - chrono::Duration::days(days_ago)).to_rfc3339();
        let conn = store.lock();
        conn.execute(
            "UPDATE facts SET ingest_timestamp_utc = ?1 WHERE fact_id = ?2",
            params![ts, fact_id],
        )
        .unwrap();
    }

    #[test]
    fn prunes_old_low_trust_confirmed_fragment() {
        let store = test_store();
        let (id, _) =
            insert_uncorroborated_fact(&store, "he went there", "", "", FragmentState::Unknown, 0.0, None)
                .unwrap();
        update_fragment(&store, &id, FragmentState::ConfirmedFragment, 0.9, None).unwrap();
        backdate(&store, &id, 100);

        let deleted = run_prune(&store).unwrap();
        assert_eq!(deleted, 1);
        assert!(crate::ledger::get_facts_by_id(&store, &[id]).unwrap().is_empty());
    }

    #[test]
    fn survives_with_higher_trust_score() {
        let store = test_store();
        let (id, _) =
            insert_uncorroborated_fact(&store, "he went there", "a", "", FragmentState::Unknown, 0.0, None)
                .unwrap();
        update_fragment(&store, &id, FragmentState::ConfirmedFragment, 0.9, None).unwrap();
        crate::ledger::corroborate(&store, &id, "b").unwrap();
        crate::ledger::corroborate(&store, &id, "c").unwrap();
        backdate(&store, &id, 100);

        let deleted = run_prune(&store).unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(crate::ledger::get_facts_by_id(&store, &[id]).unwrap().len(), 1);
    }

    #[test]
    fn recent_fact_is_not_pruned_regardless_of_trust() {
        let store = test_store();
        let (id, _) =
            insert_uncorroborated_fact(&store, "he went there", "", "", FragmentState::Unknown, 0.0, None)
                .unwrap();
        update_fragment(&store, &id, FragmentState::ConfirmedFragment, 0.9, None).unwrap();

        let deleted = run_prune(&store).unwrap();
        assert_eq!(deleted, 0);
    }

    #[test]
    fn short_summary_alone_qualifies_without_fragment_tag() {
        let store = test_store();
        let (id, _) =
            insert_uncorroborated_fact(&store, "A well formed fact.", "", "short", FragmentState::Unknown, 0.0, None)
                .unwrap();
        backdate(&store, &id, 100);

        let deleted = run_prune(&store).unwrap();
        assert_eq!(deleted, 1);
    }
}
