//! Two stage retrieval: a vector shortlist, optionally reranked.

use std::sync::Arc;

use crate::issue::SearchResult;
use crate::semantic::collection::{CollectionError, IssueCollection};
use crate::semantic::embeddings::EmbeddingError;
use crate::semantic::index::Neighbor;
use crate::semantic::models::Models;
use crate::semantic::preprocess::document_text;
use crate::semantic::rerank::RerankError;
use crate::semantic::timeout::CallError;

pub const DEFAULT_TOP_K: usize = 10;
pub const MAX_TOP_K: usize = 100;
pub const MAX_RERANK_TOP_K: usize = 50;

/// Shortlist size relative to the requested result count when reranking.
pub const SHORTLIST_MULTIPLIER: usize = 3;

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
    pub rerank: bool,
    pub rerank_top_k: Option<usize>,
    pub filter_labels: Option<Vec<String>>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            top_k: DEFAULT_TOP_K,
            rerank: true,
            rerank_top_k: None,
            filter_labels: None,
        }
    }

    fn validate(&self) -> Result<(), QueryError> {
        if self.text.trim().is_empty() {
            return Err(QueryError::InvalidQuery("query must not be empty".to_string()));
        }

        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(QueryError::InvalidQuery(format!(
                "top_k must be between 1 and {MAX_TOP_K}, got {}",
                self.top_k
            )));
        }

        if let Some(rerank_top_k) = self.rerank_top_k {
            if !(1..=MAX_RERANK_TOP_K).contains(&rerank_top_k) {
                return Err(QueryError::InvalidQuery(format!(
                    "rerank_top_k must be between 1 and {MAX_RERANK_TOP_K}, got {rerank_top_k}"
                )));
            }
        }

        Ok(())
    }

    /// Non-empty label filter, if any.
    fn label_filter(&self) -> Option<&[String]> {
        self.filter_labels
            .as_deref()
            .filter(|labels| !labels.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    /// The collection held no issues when the query ran.
    pub empty_collection: bool,
}

impl SearchOutcome {
    fn empty_collection() -> Self {
        Self {
            results: vec![],
            empty_collection: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("{0}")]
    InvalidQuery(String),

    #[error("embedding model unavailable: {0}")]
    EmbeddingUnavailable(#[from] CallError<EmbeddingError>),

    #[error("reranker unavailable: {0}")]
    RerankUnavailable(#[from] CallError<RerankError>),

    #[error(transparent)]
    Collection(#[from] CollectionError),
}

pub struct QueryEngine {
    collection: Arc<IssueCollection>,
    models: Models,
}

impl QueryEngine {
    pub fn new(collection: Arc<IssueCollection>, models: Models) -> Self {
        Self { collection, models }
    }

    pub fn search(&self, query: &SearchQuery) -> Result<SearchOutcome, QueryError> {
        query.validate()?;

        if self.collection.is_empty()? {
            return Ok(SearchOutcome::empty_collection());
        }

        let vector = self.models.embed(query.text.trim())?;

        let shortlist_size = if query.rerank {
            query.top_k.max(query.rerank_top_k.unwrap_or(query.top_k)) * SHORTLIST_MULTIPLIER
        } else {
            query.top_k
        };

        // cleared while the query was being embedded
        let Some(neighbors) = self
            .collection
            .search(&vector, shortlist_size, query.label_filter())?
        else {
            return Ok(SearchOutcome::empty_collection());
        };

        log::debug!(
            "query {:?}: {} candidates (rerank: {})",
            query.text,
            neighbors.len(),
            query.rerank
        );

        let results = if query.rerank {
            let keep = query.rerank_top_k.unwrap_or(query.top_k);
            self.rerank(query.text.trim(), neighbors, keep)?
        } else {
            neighbors
                .into_iter()
                .take(query.top_k)
                .map(|n| SearchResult::new(n.id, n.payload, n.similarity))
                .collect()
        };

        Ok(SearchOutcome {
            results,
            empty_collection: false,
        })
    }

    fn rerank(
        &self,
        query: &str,
        neighbors: Vec<Neighbor>,
        keep: usize,
    ) -> Result<Vec<SearchResult>, QueryError> {
        let documents: Vec<String> = neighbors
            .iter()
            .map(|n| document_text(&n.payload.title, &n.payload.body))
            .collect();

        let scores = self.models.rerank(query, documents)?;

        let mut scored: Vec<(Neighbor, f32)> = neighbors.into_iter().zip(scores).collect();
        // stable: equal scores keep their similarity order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(keep);

        Ok(scored
            .into_iter()
            .map(|(n, score)| SearchResult::new(n.id, n.payload, score))
            .collect())
    }
}
