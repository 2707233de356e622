//! Text preparation for embedding and reranking.
//!
//! An issue's document is its title and body joined by a blank line, the same
//! text is fed to the embedding model at ingestion and to the reranker at query
//! time. Input is truncated to keep model calls bounded.

use sha2::{Digest, Sha256};

/// Maximum document length in characters (models truncate by tokens anyway)
const MAX_DOCUMENT_CHARS: usize = 4096;

/// Separator between title and body
const TITLE_BODY_SEPARATOR: &str = "\n\n";

/// Build the document text for an issue.
pub fn document_text(title: &str, body: &str) -> String {
    let title = title.trim();
    let body = body.trim();

    let content = if body.is_empty() {
        title.to_string()
    } else {
        format!("{title}{TITLE_BODY_SEPARATOR}{body}")
    };

    truncate_chars(content)
}

fn truncate_chars(content: String) -> String {
    match content.char_indices().nth(MAX_DOCUMENT_CHARS) {
        Some((byte_idx, _)) => content[..byte_idx].to_string(),
        None => content,
    }
}

/// Hash of the embedded content, used to skip re-embedding unchanged issues.
///
/// Persisted alongside vectors, so it must stay stable across builds.
pub fn content_hash(title: &str, body: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(title.trim().as_bytes());
    hasher.update([0u8]);
    hasher.update(body.trim().as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
