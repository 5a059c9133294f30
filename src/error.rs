//! Error taxonomy for the store (C1/C2) and the P2P sync layer (C5).
//!
//! Kept as two focused enums rather than one crate-wide error: callers of
//! the store never need to match on a network variant, and vice versa.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("content compression failed: {0}")]
    Compression(String),

    #[error("unknown enum value {value:?} for {field}")]
    UnknownEnumValue { field: &'static str, value: String },

    #[error("block {0} is not a valid extension of the current head")]
    InvalidBlock(String),

    #[error("cannot create a block with no facts")]
    EmptyBlock,

    #[error("chain has no blocks — initialize_chain was never run")]
    UninitializedChain,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("request to {peer} failed: {source}")]
    Request {
        peer: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed response from {peer}: {source}")]
    Decode {
        peer: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("fact content hash mismatch from {peer} for fact_id {fact_id}")]
    HashMismatch { peer: String, fact_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
