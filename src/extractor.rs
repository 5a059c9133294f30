//! The natural-language fact extractor is an external collaborator —
//! this crate only specifies its interface (§6/out-of-scope) and
//! supplies a no-op implementation so the main cycle has something to
//! call. A real extractor plugs in by implementing `FactExtractor` and
//! handing an instance to `NodeContext`.

use async_trait::async_trait;

/// A candidate fact emitted by the extractor, not yet content-addressed
/// or persisted.
#[derive(Debug, Clone)]
pub struct CandidateFact {
    pub content: String,
    pub source_url: String,
    pub adl_summary: String,
}

#[async_trait]
pub trait FactExtractor: Send + Sync {
    async fn extract(&self) -> Vec<CandidateFact>;
}

/// Emits nothing. Keeps the main cycle's insert/commit/sync sequence
/// exercisable without a real extraction backend attached.
pub struct NoopExtractor;

#[async_trait]
impl FactExtractor for NoopExtractor {
    async fn extract(&self) -> Vec<CandidateFact> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_extractor_emits_nothing() {
        let extractor = NoopExtractor;
        assert!(extractor.extract().await.is_empty());
    }
}
