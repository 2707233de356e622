//! Reranking capability.
//!
//! A reranker scores (query, document) pairs jointly, which is slower but more
//! precise than comparing independent embeddings. Queries shortlist by vector
//! similarity first and only rerank the shortlist.

use fastembed::{RerankInitOptions, TextRerank};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::semantic::liveness::Liveness;

#[derive(Debug, thiserror::Error)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitFailed(String),

    #[error("Reranking failed: {0}")]
    RerankFailed(String),

    #[error("Invalid reranker name: {0}")]
    InvalidModel(String),
}

/// Scores documents against a query. Higher is more relevant.
pub trait Reranker: Send + Sync {
    fn model_id(&self) -> &str;

    /// One score per document, in document order.
    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError>;

    fn probe(&self) -> Result<(), RerankError> {
        self.score("health check", &["health check".to_string()])
            .map(|_| ())
    }
}

/// fastembed cross-encoder. Mutex for the same reason as the embedding model.
pub struct RerankModel {
    model: Mutex<TextRerank>,
    model_name: String,
    liveness: Liveness,
}

impl RerankModel {
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, RerankError> {
        let model_enum = parse_reranker_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            RerankError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = RerankInitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let model =
            TextRerank::try_new(options).map_err(|e| RerankError::InitFailed(e.to_string()))?;
        log::info!("loaded reranker {model_name}");

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            liveness: Liveness::default(),
        })
    }

    fn run(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
        let mut model = self.model.lock().map_err(|e| {
            RerankError::RerankFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let docs: Vec<&str> = documents.iter().map(String::as_str).collect();
        let ranked = model
            .rerank(query, docs, false, None)
            .map_err(|e| RerankError::RerankFailed(e.to_string()))?;

        // results come back sorted by score, put them back in input order
        let mut scores = vec![None; documents.len()];
        for result in ranked {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = Some(result.score);
            }
        }

        scores
            .into_iter()
            .enumerate()
            .map(|(i, score)| {
                score.ok_or_else(|| RerankError::RerankFailed(format!("no score for document {i}")))
            })
            .collect()
    }
}

impl Reranker for RerankModel {
    fn model_id(&self) -> &str {
        &self.model_name
    }

    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
        if documents.is_empty() {
            return Ok(vec![]);
        }

        let result = self.run(query, documents);
        self.liveness.record(&result);
        result
    }

    fn probe(&self) -> Result<(), RerankError> {
        self.liveness
            .check(&self.model)
            .map_err(RerankError::RerankFailed)
    }
}

fn parse_reranker_name(name: &str) -> Result<fastembed::RerankerModel, RerankError> {
    match name.to_lowercase().as_str() {
        "bge-reranker-base" | "bgererankerbase" => Ok(fastembed::RerankerModel::BGERerankerBase),
        "bge-reranker-v2-m3" | "bgererankerv2m3" => Ok(fastembed::RerankerModel::BGERerankerV2M3),
        "jina-reranker-v1-turbo-en" | "jinarerankerv1turboen" => {
            Ok(fastembed::RerankerModel::JINARerankerV1TurboEn)
        }
        "jina-reranker-v2-base-multilingual" | "jinarerankerv2basemultilingual" => {
            Ok(fastembed::RerankerModel::JINARerankerV2BaseMultiligual)
        }
        _ => Err(RerankError::InvalidModel(format!(
            "Unknown reranker: {}. Supported rerankers: bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v1-turbo-en, jina-reranker-v2-base-multilingual",
            name
        ))),
    }
}
