use crate::identity::IdentityError;
use crate::issue::RecordError;
use crate::loader::LoadError;
use crate::semantic::{CollectionError, QueryError, VectorStorageError};

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("embedding model unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("reranker unavailable: {0}")]
    RerankUnavailable(String),

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("issue not found")]
    NotFound,

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<RecordError> for ServiceError {
    fn from(err: RecordError) -> Self {
        ServiceError::InvalidRecord(err.to_string())
    }
}

impl From<IdentityError> for ServiceError {
    fn from(err: IdentityError) -> Self {
        ServiceError::InvalidRecord(err.to_string())
    }
}

impl From<CollectionError> for ServiceError {
    fn from(err: CollectionError) -> Self {
        ServiceError::IndexUnavailable(err.to_string())
    }
}

impl From<VectorStorageError> for ServiceError {
    fn from(err: VectorStorageError) -> Self {
        ServiceError::IndexUnavailable(err.to_string())
    }
}

impl From<QueryError> for ServiceError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::InvalidQuery(msg) => ServiceError::InvalidQuery(msg),
            QueryError::EmbeddingUnavailable(err) => {
                ServiceError::EmbeddingUnavailable(err.to_string())
            }
            QueryError::RerankUnavailable(err) => ServiceError::RerankUnavailable(err.to_string()),
            QueryError::Collection(err) => err.into(),
        }
    }
}

impl From<LoadError> for ServiceError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Collection(err) => err.into(),
            other => ServiceError::Other(other.into()),
        }
    }
}
