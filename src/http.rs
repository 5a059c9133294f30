//! C6 — the HTTP interface. Handlers are pure functions of the store
//! snapshot at request time: they never initiate a sync round
//! themselves, matching the donor's `explorer-backend` handler shape
//! (`async fn(web::Data<...>, ...) -> impl Responder` reading shared
//! state directly).

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use crate::node::NodeContext;
use crate::{chain, fragment, ledger, peer};

const PEER_HEADER: &str = "X-Axiom-Peer";

fn register_sender_as_peer(req: &HttpRequest, ctx: &NodeContext) {
    if let Some(value) = req.headers().get(PEER_HEADER).and_then(|v| v.to_str().ok()) {
        if let Err(err) = peer::register_peer(&ctx.store, value, &ctx.config.advertised_url) {
            tracing::warn!(peer = value, %err, "failed to register inbound peer");
        }
    }
}

#[derive(Serialize)]
struct FactIdsBody {
    fact_ids: Vec<String>,
}

pub async fn get_fact_ids(req: HttpRequest, ctx: web::Data<NodeContext>) -> impl Responder {
    register_sender_as_peer(&req, &ctx);
    match ledger::get_fact_ids(&ctx.store) {
        Ok(fact_ids) => HttpResponse::Ok().json(FactIdsBody { fact_ids }),
        Err(err) => {
            tracing::error!(%err, "get_fact_ids failed");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[derive(Serialize)]
struct FactView {
    fact_id: String,
    content: String,
    source_url: String,
    adl_summary: String,
    status: &'static str,
    trust_score: i64,
    fragment_state: &'static str,
    fragment_score: f64,
    ingest_timestamp_utc: String,
}

impl From<ledger::FactRecord> for FactView {
    fn from(record: ledger::FactRecord) -> Self {
        Self {
            fact_id: record.fact_id,
            content: record.content,
            source_url: record.source_url,
            adl_summary: record.adl_summary,
            status: record.status.as_str(),
            trust_score: record.trust_score,
            fragment_state: record.fragment_state.as_str(),
            fragment_score: record.fragment_score,
            ingest_timestamp_utc: record.ingest_timestamp_utc,
        }
    }
}

#[derive(Serialize)]
struct FactsByIdBody {
    facts: Vec<FactView>,
}

#[derive(Deserialize)]
pub struct GetFactsByIdQuery {
    ids: Option<String>,
}

#[derive(Deserialize)]
pub struct GetFactsByIdRequestBody {
    ids: Vec<String>,
}

fn facts_by_id_response(ctx: &NodeContext, ids: &[String]) -> HttpResponse {
    match ledger::get_facts_by_id(&ctx.store, ids) {
        Ok(facts) => HttpResponse::Ok().json(FactsByIdBody {
            facts: facts.into_iter().map(FactView::from).collect(),
        }),
        Err(err) => {
            tracing::error!(%err, "get_facts_by_id failed");
            HttpResponse::InternalServerError().finish()
        }
    }
}

pub async fn get_facts_by_id_query(
    req: HttpRequest,
    ctx: web::Data<NodeContext>,
    query: web::Query<GetFactsByIdQuery>,
) -> impl Responder {
    register_sender_as_peer(&req, &ctx);
    let ids: Vec<String> = match &query.ids {
        Some(raw) => raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect(),
        None => Vec::new(),
    };
    facts_by_id_response(&ctx, &ids)
}

pub async fn get_facts_by_id_post(
    req: HttpRequest,
    ctx: web::Data<NodeContext>,
    body: web::Json<GetFactsByIdRequestBody>,
) -> impl Responder {
    register_sender_as_peer(&req, &ctx);
    facts_by_id_response(&ctx, &body.ids)
}

#[derive(Serialize)]
struct ChainHeadBody {
    block_id: String,
    height: i64,
}

pub async fn get_chain_head(req: HttpRequest, ctx: web::Data<NodeContext>) -> impl Responder {
    register_sender_as_peer(&req, &ctx);
    match chain::get_chain_head(&ctx.store) {
        Ok(head) => HttpResponse::Ok().json(ChainHeadBody { block_id: head.block_id, height: head.height }),
        Err(err) => {
            tracing::error!(%err, "get_chain_head failed");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[derive(Serialize)]
struct BlockView {
    block_id: String,
    previous_block_id: String,
    height: i64,
    created_at_utc: String,
    fact_ids: Vec<String>,
}

impl From<chain::BlockRecord> for BlockView {
    fn from(b: chain::BlockRecord) -> Self {
        Self {
            block_id: b.block_id,
            previous_block_id: b.previous_block_id,
            height: b.height,
            created_at_utc: b.created_at_utc,
            fact_ids: b.fact_ids,
        }
    }
}

#[derive(Serialize)]
struct BlocksAfterBody {
    blocks: Vec<BlockView>,
}

#[derive(Deserialize)]
pub struct GetBlocksAfterQuery {
    height: i64,
}

pub async fn get_blocks_after(
    req: HttpRequest,
    ctx: web::Data<NodeContext>,
    query: web::Query<GetBlocksAfterQuery>,
) -> impl Responder {
    register_sender_as_peer(&req, &ctx);
    match chain::get_blocks_after(&ctx.store, query.height) {
        Ok(blocks) => HttpResponse::Ok().json(BlocksAfterBody {
            blocks: blocks.into_iter().map(BlockView::from).collect(),
        }),
        Err(err) => {
            tracing::error!(%err, "get_blocks_after failed");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[derive(Serialize)]
struct PeersBody {
    peers: Vec<String>,
}

pub async fn get_peers(req: HttpRequest, ctx: web::Data<NodeContext>) -> impl Responder {
    register_sender_as_peer(&req, &ctx);
    match peer::peer_urls(&ctx.store) {
        Ok(peers) => HttpResponse::Ok().json(PeersBody { peers }),
        Err(err) => {
            tracing::error!(%err, "get_peers failed");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[derive(Serialize)]
struct FragmentOpinionBody {
    seen: bool,
    status: Option<&'static str>,
    trust_score: Option<i64>,
    fragment_state: Option<&'static str>,
    fragment_score: Option<f64>,
}

#[derive(Deserialize)]
pub struct FragmentOpinionQuery {
    fact_id: String,
}

pub async fn fragment_opinion(
    req: HttpRequest,
    ctx: web::Data<NodeContext>,
    query: web::Query<FragmentOpinionQuery>,
) -> impl Responder {
    register_sender_as_peer(&req, &ctx);
    match fragment::local_opinion(&ctx.store, &query.fact_id) {
        Ok(Some(record)) => HttpResponse::Ok().json(FragmentOpinionBody {
            seen: true,
            status: Some(record.status.as_str()),
            trust_score: Some(record.trust_score),
            fragment_state: Some(record.fragment_state.as_str()),
            fragment_score: Some(record.fragment_score),
        }),
        Ok(None) => HttpResponse::Ok().json(FragmentOpinionBody {
            seen: false,
            status: None,
            trust_score: None,
            fragment_state: None,
            fragment_score: None,
        }),
        Err(err) => {
            tracing::error!(%err, "fragment_opinion failed");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[derive(Serialize)]
struct IdleStateBody {
    node_port: u16,
    node_role: &'static str,
    advertised_url: String,
    db_path: String,
    main_cycle_interval_sec: u64,
    idle_suite_interval_sec: u64,
    last_main_cycle_age_sec: Option<u64>,
    last_idle_learning_age_sec: Option<u64>,
    last_code_introspection_age_sec: Option<u64>,
    last_data_quality_age_sec: Option<u64>,
    last_fragment_audit_age_sec: Option<u64>,
    last_health_snapshot_age_sec: Option<u64>,
    last_self_checks_age_sec: Option<u64>,
}

pub async fn debug_idle_state(ctx: web::Data<NodeContext>) -> impl Responder {
    match chain::block_count(&ctx.store) {
        Ok(0) | Err(_) => return HttpResponse::ServiceUnavailable().finish(),
        Ok(_) => {}
    }

    let schedule = ctx.schedule.read();
    let age = |i: Option<std::time::Instant>| i.map(|t| t.elapsed().as_secs());

    HttpResponse::Ok().json(IdleStateBody {
        node_port: ctx.config.port,
        node_role: if ctx.config.bootstrap_peer.is_none() { "bootstrap" } else { "peer" },
        advertised_url: ctx.config.advertised_url.clone(),
        db_path: ctx.config.db_path.clone(),
        main_cycle_interval_sec: ctx.config.main_cycle_interval.as_secs(),
        idle_suite_interval_sec: ctx.config.idle_suite_interval.as_secs(),
        last_main_cycle_age_sec: age(schedule.last_main_cycle),
        last_idle_learning_age_sec: age(schedule.last_idle_learning),
        last_code_introspection_age_sec: age(schedule.last_code_introspection),
        last_data_quality_age_sec: age(schedule.last_data_quality),
        last_fragment_audit_age_sec: age(schedule.last_fragment_audit),
        last_health_snapshot_age_sec: age(schedule.last_health_snapshot),
        last_self_checks_age_sec: age(schedule.last_self_checks),
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/get_fact_ids", web::get().to(get_fact_ids))
        .route("/get_facts_by_id", web::get().to(get_facts_by_id_query))
        .route("/get_facts_by_id", web::post().to(get_facts_by_id_post))
        .route("/get_chain_head", web::get().to(get_chain_head))
        .route("/get_blocks_after", web::get().to(get_blocks_after))
        .route("/get_peers", web::get().to(get_peers))
        .route("/fragment_opinion", web::get().to(fragment_opinion))
        .route("/debug/idle_state", web::get().to(debug_idle_state));
}
