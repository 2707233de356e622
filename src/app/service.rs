use std::path::Path;
use std::sync::Arc;

use crate::app::errors::ServiceError;
use crate::config::Config;
use crate::identity::IssueId;
use crate::issue::{IssueRecord, NewIssue, SearchResult};
use crate::labels::{self, LabelSuggestion};
use crate::loader::{BulkLoader, LoadError, LoadReport};
use crate::semantic::{
    Embedder, EmbeddingModel, IndexPersistence, IssueCollection, Models, QueryEngine, RerankModel,
    Reranker, SearchOutcome, SearchQuery, VectorStorage,
};
use crate::status::{StatusReport, StatusReporter};

/// Everything the CLI and the HTTP daemon call into.
pub struct IssueService {
    config: Config,
    collection: Arc<IssueCollection>,
    queries: QueryEngine,
    loader: BulkLoader,
    status: StatusReporter,
}

impl IssueService {
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        persistence: Box<dyn IndexPersistence>,
    ) -> Result<Self, ServiceError> {
        let collection = Arc::new(IssueCollection::open(
            persistence,
            embedder.model_id(),
            embedder.dimensions(),
        )?);

        let models = Models::new(embedder, reranker, config.capability_timeout());

        Ok(Self {
            queries: QueryEngine::new(collection.clone(), models.clone()),
            loader: BulkLoader::new(collection.clone(), models.clone(), config.batch_size),
            status: StatusReporter::new(collection.clone(), models),
            collection,
            config,
        })
    }

    /// Load the configured fastembed models and the persisted collection.
    pub fn open(config: Config) -> Result<Self, ServiceError> {
        log::info!(
            "loading embedding model {} and reranker {}",
            config.embedding_model,
            config.reranker_model
        );

        let embedder = EmbeddingModel::new(&config.embedding_model, config.data_path.clone())
            .map_err(|err| ServiceError::EmbeddingUnavailable(err.to_string()))?;
        let reranker = RerankModel::new(&config.reranker_model, config.data_path.clone())
            .map_err(|err| ServiceError::RerankUnavailable(err.to_string()))?;

        let storage = VectorStorage::new(config.index_file());
        log::info!("collection file: {}", storage.path().display());

        Self::new(config, Arc::new(embedder), Arc::new(reranker), Box::new(storage))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fill an empty collection from the source directory, if configured to.
    pub fn load_on_startup(&self) -> Result<Option<LoadReport>, ServiceError> {
        if !self.config.load_on_startup || !self.collection.is_empty()? {
            return Ok(None);
        }

        log::info!(
            "collection is empty, loading {}",
            self.config.source_dir.display()
        );

        match self.loader.load_path(&self.config.source_dir) {
            Ok(report) => Ok(Some(report)),
            Err(LoadError::NotFound(path)) => {
                log::warn!("{} does not exist, starting empty", path.display());
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn search(&self, query: &SearchQuery) -> Result<SearchOutcome, ServiceError> {
        Ok(self.queries.search(query)?)
    }

    pub fn suggest_labels(
        &self,
        results: &[SearchResult],
        max_labels: usize,
    ) -> Vec<LabelSuggestion> {
        labels::suggest(results.iter().map(|r| r.labels.as_slice()), max_labels)
    }

    pub fn index_issues(&self, issues: Vec<NewIssue>) -> Result<LoadReport, ServiceError> {
        Ok(self.loader.load_issues(issues)?)
    }

    pub fn load_path(&self, path: &Path) -> Result<LoadReport, ServiceError> {
        Ok(self.loader.load_path(path)?)
    }

    pub fn issue(&self, id: &IssueId) -> Result<IssueRecord, ServiceError> {
        self.collection.get(id)?.ok_or(ServiceError::NotFound)
    }

    /// Rebuild the collection from the source directory.
    pub fn reindex(&self) -> Result<LoadReport, ServiceError> {
        Ok(self.loader.reindex(&self.config.source_dir)?)
    }

    pub fn clear(&self) -> Result<(), ServiceError> {
        self.collection.clear()?;
        log::info!("collection cleared");
        Ok(())
    }

    pub fn size(&self) -> Result<usize, ServiceError> {
        Ok(self.collection.size()?)
    }

    pub fn status(&self) -> StatusReport {
        self.status.status()
    }
}
