//! Vector indexing and similarity search over issue reports.
//!
//! # Architecture
//!
//! - `embeddings`: `Embedder` capability, fastembed implementation
//! - `rerank`: `Reranker` capability, fastembed cross-encoder implementation
//! - `models`: both capabilities behind a call deadline
//! - `liveness`: non-blocking health of the fastembed models
//! - `index`: in-memory vector index with cosine similarity search
//! - `storage`: binary file I/O for issues.bin persistence
//! - `collection`: the shared, persisted index with serialized writers
//! - `query`: shortlist, rerank and result shaping
//! - `preprocess`: document text and content hashing

pub mod collection;
pub mod embeddings;
pub mod index;
mod liveness;
pub mod models;
mod preprocess;
pub mod query;
pub mod rerank;
pub mod storage;
mod timeout;

pub use collection::{CollectionError, EntrySink, IssueCollection};
pub use embeddings::{Embedder, EmbeddingModel};
pub use index::VectorEntry;
pub use models::Models;
pub use preprocess::{content_hash, document_text};
pub use query::{QueryEngine, QueryError, SearchOutcome, SearchQuery};
pub use rerank::{RerankModel, Reranker};
pub use storage::{IndexPersistence, VectorStorage, VectorStorageError};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "bge-base-en-v1.5";

/// Default reranker model name
pub const DEFAULT_RERANKER: &str = "bge-reranker-base";
