//! C5 — pull-based P2P sync: fact sync, chain sync, peer discovery.
//! Every outbound call goes through one shared `reqwest::Client` and
//! always carries `X-Axiom-Peer` so the remote learns us back.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::chain::{self, BlockRecord};
use crate::error::SyncError;
use crate::ledger::{self, FragmentState};
use crate::peer;
use crate::store::Store;

const PEER_HEADER: &str = "X-Axiom-Peer";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const FACT_BATCH_SIZE: usize = 200;

#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    advertised_url: String,
}

#[derive(Debug, Deserialize)]
struct FactIdsResponse {
    fact_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GetFactsByIdRequest<'a> {
    ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct FactsByIdResponse {
    facts: Vec<RemoteFact>,
}

#[derive(Debug, Deserialize)]
struct RemoteFact {
    fact_id: String,
    content: String,
    source_url: String,
    adl_summary: String,
}

#[derive(Debug, Deserialize)]
struct ChainHeadResponse {
    block_id: String,
    height: i64,
}

#[derive(Debug, Deserialize)]
struct BlocksAfterResponse {
    blocks: Vec<BlockRecord>,
}

#[derive(Debug, Deserialize)]
struct PeersResponse {
    peers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentOpinion {
    pub seen: bool,
    pub status: Option<String>,
    pub trust_score: Option<i64>,
    pub fragment_state: Option<String>,
    pub fragment_score: Option<f64>,
}

impl PeerClient {
    pub fn new(advertised_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client config is static and always valid");
        Self { http, advertised_url }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.get(url).header(PEER_HEADER, &self.advertised_url)
    }

    async fn get_fact_ids(&self, peer: &str) -> Result<Vec<String>, SyncError> {
        let url = format!("{peer}/get_fact_ids");
        let resp = self
            .request(&url)
            .send()
            .await
            .map_err(|source| SyncError::Request { peer: peer.to_string(), source })?;
        let body: FactIdsResponse = resp
            .json()
            .await
            .map_err(|source| SyncError::Request { peer: peer.to_string(), source })?;
        Ok(body.fact_ids)
    }

    async fn get_facts_by_id(&self, peer: &str, ids: &[String]) -> Result<Vec<RemoteFact>, SyncError> {
        let url = format!("{peer}/get_facts_by_id");
        let resp = self
            .http
            .post(&url)
            .header(PEER_HEADER, &self.advertised_url)
            .json(&GetFactsByIdRequest { ids })
            .send()
            .await
            .map_err(|source| SyncError::Request { peer: peer.to_string(), source })?;
        let body: FactsByIdResponse = resp
            .json()
            .await
            .map_err(|source| SyncError::Request { peer: peer.to_string(), source })?;
        Ok(body.facts)
    }

    async fn get_chain_head(&self, peer: &str) -> Result<ChainHeadResponse, SyncError> {
        let url = format!("{peer}/get_chain_head");
        let resp = self
            .request(&url)
            .send()
            .await
            .map_err(|source| SyncError::Request { peer: peer.to_string(), source })?;
        resp.json()
            .await
            .map_err(|source| SyncError::Request { peer: peer.to_string(), source })
    }

    async fn get_blocks_after(&self, peer: &str, height: i64) -> Result<Vec<BlockRecord>, SyncError> {
        let url = format!("{peer}/get_blocks_after?height={height}");
        let resp = self
            .request(&url)
            .send()
            .await
            .map_err(|source| SyncError::Request { peer: peer.to_string(), source })?;
        let body: BlocksAfterResponse = resp
            .json()
            .await
            .map_err(|source| SyncError::Request { peer: peer.to_string(), source })?;
        Ok(body.blocks)
    }

    async fn get_peers(&self, peer: &str) -> Result<Vec<String>, SyncError> {
        let url = format!("{peer}/get_peers");
        let resp = self
            .request(&url)
            .send()
            .await
            .map_err(|source| SyncError::Request { peer: peer.to_string(), source })?;
        let body: PeersResponse = resp
            .json()
            .await
            .map_err(|source| SyncError::Request { peer: peer.to_string(), source })?;
        Ok(body.peers)
    }

    pub async fn fragment_opinion(&self, peer: &str, fact_id: &str) -> Result<FragmentOpinion, SyncError> {
        let url = format!("{peer}/fragment_opinion?fact_id={fact_id}");
        let resp = self
            .request(&url)
            .send()
            .await
            .map_err(|source| SyncError::Request { peer: peer.to_string(), source })?;
        resp.json()
            .await
            .map_err(|source| SyncError::Request { peer: peer.to_string(), source })
    }
}

#[derive(Debug, Default)]
pub struct SyncSummary {
    pub facts_pulled: usize,
    pub blocks_applied: usize,
    pub peers_discovered: usize,
}

/// One full sync round against a single peer: fact sync, then chain
/// sync, then peer discovery. Each phase's errors are logged and the
/// round continues with the next phase rather than aborting.
pub async fn sync_with_peer(
    store: &Store,
    client: &PeerClient,
    head_lock: &Mutex<()>,
    peer_url: &str,
) -> SyncSummary {
    let mut summary = SyncSummary::default();

    match fact_sync(store, client, peer_url).await {
        Ok(n) => summary.facts_pulled = n,
        Err(err) => warn!(peer = peer_url, %err, "fact sync failed"),
    }

    match chain_sync(store, client, head_lock, peer_url).await {
        Ok(n) => summary.blocks_applied = n,
        Err(err) => warn!(peer = peer_url, %err, "chain sync failed"),
    }

    match peer_discovery(store, client, peer_url).await {
        Ok(n) => summary.peers_discovered = n,
        Err(err) => warn!(peer = peer_url, %err, "peer discovery failed"),
    }

    summary
}

async fn fact_sync(store: &Store, client: &PeerClient, peer_url: &str) -> Result<usize, SyncError> {
    let remote_ids = client.get_fact_ids(peer_url).await?;
    let local_ids: std::collections::HashSet<String> =
        ledger::get_fact_ids(store)?.into_iter().collect();

    let missing: Vec<String> = remote_ids.into_iter().filter(|id| !local_ids.contains(id)).collect();
    if missing.is_empty() {
        return Ok(0);
    }

    let mut pulled = 0;
    for batch in missing.chunks(FACT_BATCH_SIZE) {
        let facts = client.get_facts_by_id(peer_url, batch).await?;
        for fact in facts {
            if !content_matches_id(&fact.content, &fact.fact_id) {
                warn!(peer = peer_url, fact_id = %fact.fact_id, "fact content hash mismatch, dropping");
                continue;
            }

            match ledger::insert_uncorroborated_fact(
                store,
                &fact.content,
                &fact.source_url,
                &fact.adl_summary,
                FragmentState::Unknown,
                0.0,
                None,
            ) {
                Ok((_, true)) => pulled += 1,
                Ok((_, false)) => {}
                Err(err) => warn!(peer = peer_url, fact_id = %fact.fact_id, %err, "failed to store pulled fact"),
            }
        }
    }

    Ok(pulled)
}

fn content_matches_id(content: &str, fact_id: &str) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize()) == fact_id
}

async fn chain_sync(
    store: &Store,
    client: &PeerClient,
    head_lock: &Mutex<()>,
    peer_url: &str,
) -> Result<usize, SyncError> {
    let local_head = chain::get_chain_head(store).map_err(SyncError::Store)?;
    let remote_head = client.get_chain_head(peer_url).await?;

    if remote_head.height <= local_head.height {
        return Ok(0);
    }

    let blocks = client.get_blocks_after(peer_url, local_head.height).await?;
    let mut applied = 0;
    for block in blocks {
        match chain::append_block(store, head_lock, block.clone()) {
            Ok(()) => applied += 1,
            Err(err) => {
                warn!(peer = peer_url, block_id = %block.block_id, %err, "stopping chain sync: block rejected");
                break;
            }
        }
    }
    Ok(applied)
}

async fn peer_discovery(store: &Store, client: &PeerClient, peer_url: &str) -> Result<usize, SyncError> {
    let remote_peers = client.get_peers(peer_url).await?;

    let mut registered = 0;
    for url in remote_peers {
        peer::register_peer(store, &url, &client.advertised_url)?;
        registered += 1;
    }
    Ok(registered)
}
