//! The embedding and reranking capabilities, called with a deadline.

use std::sync::Arc;
use std::time::Duration;

use crate::semantic::embeddings::{Embedder, EmbeddingError};
use crate::semantic::rerank::{RerankError, Reranker};
use crate::semantic::timeout::{call_with_timeout, CallError};

#[derive(Clone)]
pub struct Models {
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    timeout: Duration,
}

impl Models {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            reranker,
            timeout,
        }
    }

    pub fn embedding_model_id(&self) -> &str {
        self.embedder.model_id()
    }

    pub fn reranker_model_id(&self) -> &str {
        self.reranker.model_id()
    }

    pub fn embed_batch(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, CallError<EmbeddingError>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let expected = texts.len();
        let embedder = Arc::clone(&self.embedder);
        let embeddings = call_with_timeout("embedder", self.timeout, move || {
            embedder.embed_batch(&texts)
        })?;

        if embeddings.len() != expected {
            return Err(CallError::Failed(EmbeddingError::EmbeddingFailed(format!(
                "expected {expected} embeddings, got {}",
                embeddings.len()
            ))));
        }

        Ok(embeddings)
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>, CallError<EmbeddingError>> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        call_with_timeout("embedder", self.timeout, move || embedder.embed(&text))
    }

    /// One relevance score per document, in document order.
    pub fn rerank(
        &self,
        query: &str,
        documents: Vec<String>,
    ) -> Result<Vec<f32>, CallError<RerankError>> {
        if documents.is_empty() {
            return Ok(vec![]);
        }

        let expected = documents.len();
        let reranker = Arc::clone(&self.reranker);
        let query = query.to_string();
        let scores = call_with_timeout("reranker", self.timeout, move || {
            reranker.score(&query, &documents)
        })?;

        if scores.len() != expected {
            return Err(CallError::Failed(RerankError::RerankFailed(format!(
                "expected {expected} scores, got {}",
                scores.len()
            ))));
        }

        if let Some(pos) = scores.iter().position(|score| !score.is_finite()) {
            return Err(CallError::Failed(RerankError::RerankFailed(format!(
                "score {} of document {pos} is not a number",
                scores[pos]
            ))));
        }

        Ok(scores)
    }

    pub fn probe_embedder(&self) -> Result<(), CallError<EmbeddingError>> {
        let embedder = Arc::clone(&self.embedder);
        call_with_timeout("embedder-probe", self.timeout, move || embedder.probe())
    }

    pub fn probe_reranker(&self) -> Result<(), CallError<RerankError>> {
        let reranker = Arc::clone(&self.reranker);
        call_with_timeout("reranker-probe", self.timeout, move || reranker.probe())
    }
}
