//! Deterministic stand-ins for the model capabilities, and a service wired to
//! a temporary data directory.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::app::IssueService;
use crate::config::Config;
use crate::issue::NewIssue;
use crate::semantic::embeddings::EmbeddingError;
use crate::semantic::rerank::RerankError;
use crate::semantic::{Embedder, Reranker, VectorStorage};

pub const DIMENSIONS: usize = 64;

pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Bag of words hashed into a fixed number of buckets.
#[derive(Default)]
pub struct HashingEmbedder {
    pub calls: AtomicUsize,
    pub embedded_texts: AtomicUsize,
    pub fail: AtomicBool,
    /// Milliseconds to sleep per call
    pub delay_ms: AtomicU64,
    /// Fail any batch containing this marker
    pub poison: std::sync::Mutex<Option<String>>,
}

impl HashingEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; DIMENSIONS];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = digest[0] as usize % DIMENSIONS;
            vector[bucket] += 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        "test-hashing-embedder"
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::EmbeddingFailed("embedder is down".into()));
        }

        if let Some(marker) = self.poison.lock().unwrap().as_deref() {
            if texts.iter().any(|t| t.contains(marker)) {
                return Err(EmbeddingError::EmbeddingFailed("poisoned batch".into()));
            }
        }

        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Scores a document by the share of query tokens it contains.
#[derive(Default)]
pub struct OverlapReranker {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub delay_ms: AtomicU64,
    /// Score every third document as NaN
    pub nan: AtomicBool,
}

impl Reranker for OverlapReranker {
    fn model_id(&self) -> &str {
        "test-overlap-reranker"
    }

    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(RerankError::RerankFailed("reranker is down".into()));
        }

        let nan = self.nan.load(Ordering::SeqCst);
        let query_tokens = tokens(query);
        Ok(documents
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                if nan && i % 3 == 2 {
                    return f32::NAN;
                }
                let doc_tokens = tokens(doc);
                let hits = query_tokens.iter().filter(|t| doc_tokens.contains(t)).count();
                hits as f32 / query_tokens.len().max(1) as f32
            })
            .collect())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub embedder: Arc<HashingEmbedder>,
    pub reranker: Arc<OverlapReranker>,
    pub service: Arc<IssueService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            data_path: dir.path().join("index"),
            source_dir: dir.path().join("issues"),
            capability_timeout_secs: 1,
            ..Default::default()
        };
        tweak(&mut config);

        let embedder = Arc::new(HashingEmbedder::default());
        let reranker = Arc::new(OverlapReranker::default());
        let service = Arc::new(build_service(config, &embedder, &reranker));

        Harness {
            dir,
            embedder,
            reranker,
            service,
        }
    }

    /// A fresh service over the same data directory, as after a restart.
    pub fn restart(&self) -> IssueService {
        build_service(self.service.config().clone(), &self.embedder, &self.reranker)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.service.config().source_dir.clone()
    }
}

fn build_service(
    config: Config,
    embedder: &Arc<HashingEmbedder>,
    reranker: &Arc<OverlapReranker>,
) -> IssueService {
    let storage = VectorStorage::new(config.index_file());
    IssueService::new(
        config,
        embedder.clone(),
        reranker.clone(),
        Box::new(storage),
    )
    .unwrap()
}

pub fn new_issue(n: usize, title: &str, body: &str, labels: &[&str]) -> NewIssue {
    NewIssue {
        title: Some(title.to_string()),
        body: Some(body.to_string()),
        labels: Some(labels.iter().map(|l| l.to_string()).collect()),
        url: Some(format!("https://github.com/org/repo/issues/{n}")),
        ..Default::default()
    }
}

/// A small corpus with distinct vocabularies per topic.
pub fn corpus() -> Vec<NewIssue> {
    vec![
        new_issue(
            1,
            "CUDA out of memory during training",
            "GPU memory runs out with batch size 64",
            &["bug", "cuda"],
        ),
        new_issue(
            2,
            "Memory leak in dataloader workers",
            "RSS grows every epoch when workers are enabled",
            &["bug", "memory"],
        ),
        new_issue(3, "Docs typo in installation guide", "The pip command is misspelled", &["docs"]),
        new_issue(
            4,
            "Segfault when loading checkpoint",
            "Crash in torch load on large files",
            &["bug", "crash"],
        ),
        new_issue(
            5,
            "Add support for bfloat16 on CPU",
            "Feature request for bf16 kernels",
            &["feature"],
        ),
        new_issue(
            6,
            "GPU memory not released after training",
            "CUDA memory stays allocated after the loop",
            &["cuda", "memory"],
        ),
        new_issue(
            7,
            "Build fails on macOS with clang",
            "Linker error with the latest compiler",
            &["build"],
        ),
        new_issue(
            8,
            "Slow training on multi GPU setup",
            "Scaling is poor beyond two GPUs",
            &["performance", "cuda"],
        ),
    ]
}

/// Write a CSV file with a `title,url,body,label` header.
pub fn write_csv(dir: &Path, name: &str, rows: &[(&str, &str, &str, &str)]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);

    let mut writer = csv::Writer::from_path(&path).unwrap();
    writer.write_record(["title", "url", "body", "label"]).unwrap();
    for row in rows {
        writer.write_record([row.0, row.1, row.2, row.3]).unwrap();
    }
    writer.flush().unwrap();

    path
}
