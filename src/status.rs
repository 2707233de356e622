use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::semantic::{IssueCollection, Models};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub healthy: bool,
    pub record_count: usize,
    pub embedding_model_id: String,
    pub reranker_model_id: String,
}

pub struct StatusReporter {
    collection: Arc<IssueCollection>,
    models: Models,
}

impl StatusReporter {
    pub fn new(collection: Arc<IssueCollection>, models: Models) -> Self {
        Self { collection, models }
    }

    /// Probe the index and both models. Never mutates anything.
    pub fn status(&self) -> StatusReport {
        let record_count = match self.collection.size() {
            Ok(count) => Some(count),
            Err(err) => {
                log::error!("status: {err}");
                None
            }
        };

        let embedder_ok = self
            .models
            .probe_embedder()
            .map_err(|err| log::error!("status: embedding model: {err}"))
            .is_ok();
        let reranker_ok = self
            .models
            .probe_reranker()
            .map_err(|err| log::error!("status: reranker: {err}"))
            .is_ok();

        StatusReport {
            healthy: record_count.is_some()
                && self.collection.is_healthy()
                && embedder_ok
                && reranker_ok,
            record_count: record_count.unwrap_or(0),
            embedding_model_id: self.models.embedding_model_id().to_string(),
            reranker_model_id: self.models.reranker_model_id().to_string(),
        }
    }
}
