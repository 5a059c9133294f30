//! End-to-end scenarios exercising the node's public modules together
//! rather than any single unit. Peer-dependent scenarios spin up a
//! second, real HTTP listener via `actix_web::test::start` so the sync
//! and fragment-audit code paths run over an actual socket.

use actix_web::{web, App};

use axiom_core::chain::{self, BlockRecord, GENESIS_BLOCK_ID};
use axiom_core::fragment;
use axiom_core::ledger::{self, FragmentState};
use axiom_core::prune;
use axiom_core::store::Store;
use axiom_core::sync::PeerClient;

fn fresh_store() -> Store {
    let store = Store::open(":memory:").unwrap();
    chain::initialize_chain(&store).unwrap();
    store
}

#[test]
fn scenario_1_genesis() {
    let store = fresh_store();
    let head = chain::get_chain_head(&store).unwrap();
    assert_eq!(head.block_id, GENESIS_BLOCK_ID);
    assert_eq!(head.height, 0);
    assert!(chain::get_blocks_after(&store, 0).unwrap().is_empty());
}

#[test]
fn scenario_2_first_commit() {
    let store = fresh_store();
    let lock = parking_lot::Mutex::new(());

    let (id_a, _) =
        ledger::insert_uncorroborated_fact(&store, "A", "", "", FragmentState::Unknown, 0.0, None).unwrap();
    let (id_b, _) =
        ledger::insert_uncorroborated_fact(&store, "B", "", "", FragmentState::Unknown, 0.0, None).unwrap();
    let (id_c, _) =
        ledger::insert_uncorroborated_fact(&store, "C", "", "", FragmentState::Unknown, 0.0, None).unwrap();

    let block = chain::create_block(&store, &lock, vec![id_a.clone(), id_b.clone(), id_c.clone()]).unwrap();

    let head = chain::get_chain_head(&store).unwrap();
    assert_eq!(head.height, 1);
    assert_eq!(head.fact_ids, vec![id_a, id_b, id_c]);
    assert_eq!(head.block_id, block.block_id);
}

#[test]
fn scenario_3_empty_cycle_creates_no_block() {
    let store = fresh_store();
    let lock = parking_lot::Mutex::new(());

    let new_fact_ids: Vec<String> = Vec::new();
    if !new_fact_ids.is_empty() {
        chain::create_block(&store, &lock, new_fact_ids).unwrap();
    }

    assert_eq!(chain::get_chain_head(&store).unwrap().height, 0);
}

#[derive(serde::Serialize)]
struct ChainHeadResponse {
    block_id: String,
    height: i64,
}

async fn peer_get_chain_head(store: web::Data<Store>) -> actix_web::HttpResponse {
    let head = chain::get_chain_head(store.get_ref()).unwrap();
    actix_web::HttpResponse::Ok().json(ChainHeadResponse { block_id: head.block_id, height: head.height })
}

#[derive(serde::Deserialize)]
struct HeightQuery {
    height: i64,
}

#[derive(serde::Serialize)]
struct BlocksAfterResponse {
    blocks: Vec<BlockRecord>,
}

async fn peer_get_blocks_after(store: web::Data<Store>, query: web::Query<HeightQuery>) -> actix_web::HttpResponse {
    let blocks = chain::get_blocks_after(store.get_ref(), query.height).unwrap();
    actix_web::HttpResponse::Ok().json(BlocksAfterResponse { blocks })
}

/// Copies the stored block row at `height` from `src` into `dst` verbatim
/// (same `block_id`/`created_at_utc`/`fact_ids`), so `dst` ends up with a
/// byte-for-byte prefix of `src`'s chain rather than a divergent chain
/// that merely has the same height and fact count.
fn copy_block(src: &Store, dst: &Store, height: i64) {
    let block = chain::get_blocks_after(src, height - 1)
        .unwrap()
        .into_iter()
        .find(|b| b.height == height)
        .unwrap();
    let fact_ids_json = serde_json::to_string(&block.fact_ids).unwrap();
    dst.lock()
        .execute(
            "INSERT INTO blocks (block_id, previous_block_id, height, created_at_utc, fact_ids)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                block.block_id,
                block.previous_block_id,
                block.height,
                block.created_at_utc,
                fact_ids_json
            ],
        )
        .unwrap();
}

#[actix_web::test]
async fn scenario_4_pull_sync_a_chain() {
    let y_store = fresh_store();
    let y_lock = parking_lot::Mutex::new(());
    for label in ["f1", "f2", "f3", "f4", "f5"] {
        let (id, _) =
            ledger::insert_uncorroborated_fact(&y_store, label, "", "", FragmentState::Unknown, 0.0, None).unwrap();
        chain::create_block(&y_store, &y_lock, vec![id]).unwrap();
    }
    assert_eq!(chain::get_chain_head(&y_store).unwrap().height, 5);

    let y_data = web::Data::new(y_store.clone());
    let server = actix_web::test::start(move || {
        App::new().app_data(y_data.clone()).service(
            web::scope("")
                .route("/get_chain_head", web::get().to(peer_get_chain_head))
                .route("/get_blocks_after", web::get().to(peer_get_blocks_after)),
        )
    });
    let peer_url = server.url("").trim_end_matches('/').to_string();

    // X starts as a genuine prefix of Y's chain (blocks 1-3 copied
    // verbatim, not independently minted) so Y's block 4 really does
    // extend X's head.
    let x_store = fresh_store();
    let x_lock = parking_lot::Mutex::new(());
    for height in 1..=3 {
        copy_block(&y_store, &x_store, height);
    }
    assert_eq!(chain::get_chain_head(&x_store).unwrap().height, 3);
    assert_eq!(
        chain::get_chain_head(&x_store).unwrap().block_id,
        chain::get_blocks_after(&y_store, 2).unwrap()[0].block_id
    );

    let client = PeerClient::new("http://test-node".to_string());
    let summary = axiom_core::sync::sync_with_peer(&x_store, &client, &x_lock, &peer_url).await;
    assert_eq!(summary.blocks_applied, 2);

    let x_head = chain::get_chain_head(&x_store).unwrap();
    let y_head = chain::get_chain_head(&y_store).unwrap();
    assert_eq!(x_head.block_id, y_head.block_id);
    assert_eq!(x_head.height, 5);
}

async fn peer_fragment_opinion_unseen() -> actix_web::HttpResponse {
    actix_web::HttpResponse::Ok().json(axiom_core::sync::FragmentOpinion {
        seen: false,
        status: None,
        trust_score: None,
        fragment_state: None,
        fragment_score: None,
    })
}

#[actix_web::test]
async fn scenario_5_fragment_audit_promotes_through_peer_consensus() {
    let server = actix_web::test::start(|| {
        App::new().route("/fragment_opinion", web::get().to(peer_fragment_opinion_unseen))
    });
    let peer_url = server.url("").trim_end_matches('/').to_string();

    let store = fresh_store();
    let (fact_id, _) =
        ledger::insert_uncorroborated_fact(&store, "he went there.", "", "", FragmentState::Unknown, 0.0, None)
            .unwrap();

    let client = PeerClient::new("http://test-node".to_string());

    let changed = fragment::run_audit(&store, &client, &[]).await.unwrap();
    assert_eq!(changed, 1);
    let record = ledger::get_facts_by_id(&store, &[fact_id.clone()]).unwrap().remove(0);
    assert_eq!(record.fragment_state, FragmentState::SuspectedFragment);

    let peers = vec![peer_url.clone(), peer_url.clone(), peer_url];
    fragment::run_audit(&store, &client, &peers).await.unwrap();
    let record = ledger::get_facts_by_id(&store, &[fact_id]).unwrap().remove(0);
    assert_eq!(record.fragment_state, FragmentState::ConfirmedFragment);
}

#[test]
fn scenario_6_prune_respects_trust_score() {
    let store = fresh_store();

    let (low_trust, _) =
        ledger::insert_uncorroborated_fact(&store, "he went there", "", "", FragmentState::Unknown, 0.0, None)
            .unwrap();
    ledger::update_fragment(&store, &low_trust, FragmentState::ConfirmedFragment, 0.9, None).unwrap();

    let (high_trust, _) =
        ledger::insert_uncorroborated_fact(&store, "she went there", "a", "", FragmentState::Unknown, 0.0, None)
            .unwrap();
    ledger::update_fragment(&store, &high_trust, FragmentState::ConfirmedFragment, 0.9, None).unwrap();
    ledger::corroborate(&store, &high_trust, "b").unwrap();
    ledger::corroborate(&store, &high_trust, "c").unwrap();

    let old_timestamp = (chrono::Utc::now() - chrono::Duration::days(100)).to_rfc3339();
    {
        let conn = store.lock();
        conn.execute(
            "UPDATE facts SET ingest_timestamp_utc = ?1 WHERE fact_id IN (?2, ?3)",
            rusqlite::params![old_timestamp, low_trust, high_trust],
        )
        .unwrap();
    }

    let deleted = prune::run_prune(&store).unwrap();
    assert_eq!(deleted, 1);
    assert!(ledger::get_facts_by_id(&store, &[low_trust]).unwrap().is_empty());
    assert_eq!(ledger::get_facts_by_id(&store, &[high_trust]).unwrap().len(), 1);
}

#[test]
fn reopening_an_on_disk_store_preserves_facts_and_chain_head() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("axiom_ledger.db");
    let db_path = db_path.to_str().unwrap();

    let fact_id = {
        let store = Store::open(db_path).unwrap();
        chain::initialize_chain(&store).unwrap();
        let lock = parking_lot::Mutex::new(());
        let (id, _) =
            ledger::insert_uncorroborated_fact(&store, "Mount Everest is the tallest mountain.", "", "", FragmentState::Unknown, 0.0, None).unwrap();
        chain::create_block(&store, &lock, vec![id.clone()]).unwrap();
        id
    };

    // Reopen: migration must be idempotent and prior rows/blocks survive.
    let store = Store::open(db_path).unwrap();
    chain::initialize_chain(&store).unwrap();
    let head = chain::get_chain_head(&store).unwrap();
    assert_eq!(head.height, 1);
    assert_eq!(head.fact_ids, vec![fact_id.clone()]);

    let record = ledger::get_facts_by_id(&store, &[fact_id]).unwrap().remove(0);
    assert_eq!(record.content, "Mount Everest is the tallest mountain.");
}
