//! In-memory vector index with cosine similarity search.
//!
//! Entries are kept in insertion order so that equal scores come back in a
//! stable order; an id map gives O(1) upserts and lookups.

use std::collections::HashMap;

use crate::identity::IssueId;
use crate::issue::IssuePayload;

/// Similarity metric of the index. Fixed for the lifetime of a collection.
pub const SIMILARITY_METRIC: &str = "cosine";

/// An entry in the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub id: IssueId,
    /// Hash of the content that was embedded
    pub content_hash: u64,
    pub embedding: Vec<f32>,
    pub payload: IssuePayload,
}

/// A query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: IssueId,
    pub payload: IssuePayload,
    /// Cosine similarity in [-1.0, 1.0]
    pub similarity: f32,
}

/// Result of a batch upsert.
#[derive(Debug, Default)]
pub struct UpsertOutcome {
    pub applied: usize,
    pub failed: Vec<(IssueId, IndexError)>,
}

#[derive(Debug)]
pub struct VectorIndex {
    entries: Vec<VectorEntry>,
    /// Issue id -> position in `entries`
    positions: HashMap<IssueId, usize>,
    dimensions: usize,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self::with_capacity(dimensions, 0)
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace an entry.
    ///
    /// Rejects embeddings of the wrong dimension or with zero norm.
    pub fn insert(&mut self, entry: VectorEntry) -> Result<(), IndexError> {
        self.check_vector(&entry.embedding)?;

        match self.positions.get(&entry.id) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.positions.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }

        Ok(())
    }

    /// Insert every valid entry, reporting the rejected ones.
    pub fn upsert(&mut self, batch: Vec<VectorEntry>) -> UpsertOutcome {
        let mut outcome = UpsertOutcome::default();

        for entry in batch {
            let id = entry.id.clone();
            match self.insert(entry) {
                Ok(()) => outcome.applied += 1,
                Err(err) => outcome.failed.push((id, err)),
            }
        }

        outcome
    }

    pub fn get(&self, id: &IssueId) -> Option<&VectorEntry> {
        self.positions.get(id).map(|&pos| &self.entries[pos])
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &VectorEntry> {
        self.entries.iter()
    }

    /// Find the `limit` entries most similar to `query`.
    ///
    /// With a label filter only entries sharing at least one label with it are
    /// candidates; the filter applies before truncation, so `limit` bounds the
    /// filtered results. Results are sorted by similarity, highest first, ties
    /// in insertion order.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        label_filter: Option<&[String]>,
    ) -> Result<Vec<Neighbor>, IndexError> {
        self.check_vector(query)?;

        if limit == 0 {
            return Ok(vec![]);
        }

        let query_norm = l2_norm(query);
        let label_filter = label_filter.filter(|labels| !labels.is_empty());

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                label_filter
                    .map(|wanted| entry.payload.labels.iter().any(|l| wanted.contains(l)))
                    .unwrap_or(true)
            })
            .map(|(pos, entry)| (pos, cosine_similarity(query, &entry.embedding, query_norm)))
            .collect();

        // stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(pos, similarity)| {
                let entry = &self.entries[pos];
                Neighbor {
                    id: entry.id.clone(),
                    payload: entry.payload.clone(),
                    similarity,
                }
            })
            .collect())
    }

    /// Clear all entries from the index.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        let norm = l2_norm(vector);
        if !norm.is_finite() || norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        Ok(())
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with a precomputed query norm.
fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot_product / (query_norm * target_norm)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}
