//! The issue collection: a vector index shared between readers and writers.
//!
//! Readers (queries, lookups, status) share a read lock on the index. Every
//! mutation first takes the writer mutex, so upserts, clears and rebuilds are
//! serialized; the index write lock is only held to apply a change in memory.
//! A rebuild fills a fresh index while queries keep reading the current one,
//! then swaps it in.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::identity::IssueId;
use crate::issue::IssueRecord;
use crate::semantic::embeddings::model_id_hash;
use crate::semantic::index::{
    IndexError, Neighbor, UpsertOutcome, VectorEntry, VectorIndex, SIMILARITY_METRIC,
};
use crate::semantic::storage::{IndexPersistence, VectorStorageError};

#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("index is unavailable: {0}")]
    Unavailable(String),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Storage(#[from] VectorStorageError),
}

/// Destination for freshly embedded entries.
pub trait EntrySink {
    fn upsert(&mut self, entries: Vec<VectorEntry>) -> Result<UpsertOutcome, CollectionError>;
}

impl EntrySink for VectorIndex {
    fn upsert(&mut self, entries: Vec<VectorEntry>) -> Result<UpsertOutcome, CollectionError> {
        Ok(VectorIndex::upsert(self, entries))
    }
}

pub struct IssueCollection {
    index: RwLock<VectorIndex>,
    writer: Mutex<()>,
    persistence: Box<dyn IndexPersistence>,
    model_id: [u8; 32],
    dimensions: usize,
}

impl IssueCollection {
    /// Open the collection for the given embedding model, restoring whatever
    /// was persisted for it.
    pub fn open(
        persistence: Box<dyn IndexPersistence>,
        embedding_model_id: &str,
        dimensions: usize,
    ) -> Result<Self, CollectionError> {
        let model_id = model_id_hash(embedding_model_id);

        let index = match persistence.restore(&model_id, dimensions)? {
            Some(index) => index,
            None => {
                log::info!("starting with an empty collection");
                VectorIndex::new(dimensions)
            }
        };
        log::debug!("{dimensions} dimensions, {SIMILARITY_METRIC} similarity");

        Ok(Self {
            index: RwLock::new(index),
            writer: Mutex::new(()),
            persistence,
            model_id,
            dimensions,
        })
    }

    pub fn size(&self) -> Result<usize, CollectionError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, CollectionError> {
        Ok(self.read()?.is_empty())
    }

    /// False once a writer panicked while holding the index.
    pub fn is_healthy(&self) -> bool {
        !self.index.is_poisoned()
    }

    pub fn get(&self, id: &IssueId) -> Result<Option<IssueRecord>, CollectionError> {
        Ok(self.read()?.get(id).map(|entry| IssueRecord {
            id: entry.id.clone(),
            payload: entry.payload.clone(),
        }))
    }

    /// Nearest neighbors of `vector`, or `None` if the collection is empty.
    pub fn search(
        &self,
        vector: &[f32],
        limit: usize,
        label_filter: Option<&[String]>,
    ) -> Result<Option<Vec<Neighbor>>, CollectionError> {
        let index = self.read()?;
        if index.is_empty() {
            return Ok(None);
        }
        Ok(Some(index.search(vector, limit, label_filter)?))
    }

    /// The stored embedding of `id`, if its content is unchanged.
    pub fn reusable_embedding(
        &self,
        id: &IssueId,
        content_hash: u64,
    ) -> Result<Option<Vec<f32>>, CollectionError> {
        Ok(self
            .read()?
            .get(id)
            .filter(|entry| entry.content_hash == content_hash)
            .map(|entry| entry.embedding.clone()))
    }

    /// Run a sequence of upserts as the only writer, persisting once at the
    /// end if anything changed. Applied batches are visible to readers as
    /// soon as each upsert returns, and are persisted even if `f` fails.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut CollectionWriter<'_>) -> Result<T, E>,
        E: From<CollectionError>,
    {
        let _writer = self.lock_writer()?;

        let mut writer = CollectionWriter {
            collection: self,
            dirty: false,
        };
        let result = f(&mut writer);

        if writer.dirty {
            self.persist()?;
        }

        result
    }

    /// Replace the whole collection with the index built by `f`.
    ///
    /// The new index is persisted before it is swapped in; if `f` or the
    /// persist fails, the current collection stays as it was.
    pub fn rebuild<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut VectorIndex) -> Result<T, E>,
        E: From<CollectionError>,
    {
        let _writer = self.lock_writer()?;

        let mut shadow = VectorIndex::new(self.dimensions);
        let result = f(&mut shadow)?;

        self.persistence
            .persist(&shadow, &self.model_id)
            .map_err(CollectionError::from)?;

        let previous = std::mem::replace(&mut *self.write_index()?, shadow);
        log::info!("collection rebuilt, replaced {} issues", previous.len());

        Ok(result)
    }

    /// Remove every issue. Idempotent.
    pub fn clear(&self) -> Result<(), CollectionError> {
        let _writer = self.lock_writer()?;

        self.write_index()?.clear();
        self.persist()
    }

    fn persist(&self) -> Result<(), CollectionError> {
        let index = self.read()?;
        self.persistence.persist(&index, &self.model_id).map_err(|err| {
            log::error!("failed to persist collection: {err}");
            err.into()
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, VectorIndex>, CollectionError> {
        self.index
            .read()
            .map_err(|e| CollectionError::Unavailable(format!("Lock poisoned: {}", e)))
    }

    fn write_index(&self) -> Result<RwLockWriteGuard<'_, VectorIndex>, CollectionError> {
        self.index
            .write()
            .map_err(|e| CollectionError::Unavailable(format!("Lock poisoned: {}", e)))
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>, CollectionError> {
        self.writer
            .lock()
            .map_err(|e| CollectionError::Unavailable(format!("Writer lock poisoned: {}", e)))
    }
}

/// Handle passed to [`IssueCollection::write`].
pub struct CollectionWriter<'a> {
    collection: &'a IssueCollection,
    dirty: bool,
}

impl EntrySink for CollectionWriter<'_> {
    fn upsert(&mut self, entries: Vec<VectorEntry>) -> Result<UpsertOutcome, CollectionError> {
        let outcome = self.collection.write_index()?.upsert(entries);
        if outcome.applied > 0 {
            self.dirty = true;
        }
        Ok(outcome)
    }
}
