//! Bulk ingestion from CSV files and API payloads.
//!
//! Records are validated one by one; a bad row is counted in the report and
//! never stops the load. Valid records are embedded and upserted in batches.
//! An issue whose title and body did not change keeps its stored embedding.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::issue::{parse_labels, IssueRecord, NewIssue};
use crate::semantic::{
    content_hash, document_text, CollectionError, EntrySink, IssueCollection, Models, VectorEntry,
};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub errors: usize,
    pub error_details: Vec<String>,
}

impl LoadReport {
    pub fn record_error(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        log::warn!("{detail}");
        self.errors += 1;
        self.error_details.push(detail);
    }

    pub fn merge(&mut self, other: LoadReport) {
        self.loaded += other.loaded;
        self.errors += other.errors;
        self.error_details.extend(other.error_details);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("source {0} does not exist")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Collection(#[from] CollectionError),
}

/// A record plus where it came from, for error details.
struct Sourced<T> {
    origin: String,
    item: T,
}

pub struct BulkLoader {
    collection: Arc<IssueCollection>,
    models: Models,
    batch_size: usize,
}

impl BulkLoader {
    pub fn new(collection: Arc<IssueCollection>, models: Models, batch_size: usize) -> Self {
        Self {
            collection,
            models,
            batch_size: batch_size.max(1),
        }
    }

    /// Load a CSV file, or every `*.csv` file of a directory, into the
    /// collection.
    pub fn load_path(&self, path: &Path) -> Result<LoadReport, LoadError> {
        let files = csv_files(path)?;

        self.collection.write(|writer| {
            let mut report = LoadReport::default();
            for file in &files {
                report.merge(self.load_file(writer, file)?);
            }
            Ok(report)
        })
    }

    /// Ingest issues submitted over the API.
    pub fn load_issues(&self, issues: Vec<NewIssue>) -> Result<LoadReport, LoadError> {
        let sourced = issues
            .into_iter()
            .enumerate()
            .map(|(i, issue)| Sourced {
                origin: format!("issue {}", i + 1),
                item: issue,
            })
            .collect();

        self.collection.write(|writer| {
            let mut report = LoadReport::default();
            self.ingest(writer, sourced, &mut report)?;
            Ok(report)
        })
    }

    /// Rebuild the collection from `source`. The current collection keeps
    /// serving queries until the rebuilt one replaces it.
    pub fn reindex(&self, source: &Path) -> Result<LoadReport, LoadError> {
        let files = csv_files(source)?;
        let started = Instant::now();

        let report = self.collection.rebuild(|shadow| {
            let mut report = LoadReport::default();
            for file in &files {
                report.merge(self.load_file(shadow, file)?);
            }
            Ok::<_, LoadError>(report)
        })?;

        log::info!(
            "reindexed {} issues ({} errors) in {:.1}s",
            report.loaded,
            report.errors,
            started.elapsed().as_secs_f64()
        );
        Ok(report)
    }

    fn load_file<S: EntrySink>(&self, sink: &mut S, path: &Path) -> Result<LoadReport, LoadError> {
        let mut report = LoadReport::default();
        let rows = read_csv(path, &mut report)?;
        log::info!("{}: {} rows", display_name(path), rows.len() + report.errors);

        self.ingest(sink, rows, &mut report)?;
        log::info!(
            "{}: loaded {} issues ({} errors)",
            display_name(path),
            report.loaded,
            report.errors
        );
        Ok(report)
    }

    fn ingest<S: EntrySink>(
        &self,
        sink: &mut S,
        issues: Vec<Sourced<NewIssue>>,
        report: &mut LoadReport,
    ) -> Result<(), LoadError> {
        let mut records = Vec::with_capacity(issues.len());
        for Sourced { origin, item } in issues {
            match IssueRecord::normalize(item) {
                Ok(record) => records.push(Sourced {
                    origin,
                    item: record,
                }),
                Err(err) => report.record_error(format!("{origin}: {err}")),
            }
        }

        let batch_count = records.len().div_ceil(self.batch_size);
        let mut records = records.into_iter().peekable();
        let mut batch_no = 0;

        while records.peek().is_some() {
            batch_no += 1;
            let batch: Vec<Sourced<IssueRecord>> = records.by_ref().take(self.batch_size).collect();
            let batch_len = batch.len();

            let entries = match self.embed_batch(batch) {
                Ok(entries) => entries,
                Err(err) => {
                    log::error!("batch {batch_no}/{batch_count}: {err}");
                    report.errors += batch_len;
                    report
                        .error_details
                        .push(format!("batch {batch_no}: {batch_len} issues not embedded: {err}"));
                    continue;
                }
            };

            let outcome = sink.upsert(entries)?;
            report.loaded += outcome.applied;
            for (id, err) in outcome.failed {
                report.record_error(format!("{id}: {err}"));
            }

            log::info!(
                "batch {batch_no}/{batch_count}: {} of {batch_len} issues indexed",
                outcome.applied
            );
        }

        Ok(())
    }

    /// Embed a batch, reusing stored vectors for unchanged issues.
    fn embed_batch(&self, batch: Vec<Sourced<IssueRecord>>) -> Result<Vec<VectorEntry>, String> {
        let mut entries = Vec::with_capacity(batch.len());
        let mut pending = Vec::new();

        for Sourced { item: record, .. } in batch {
            let hash = content_hash(&record.payload.title, &record.payload.body);
            let reused = self
                .collection
                .reusable_embedding(&record.id, hash)
                .map_err(|err| err.to_string())?;

            match reused {
                Some(embedding) => entries.push(VectorEntry {
                    id: record.id,
                    content_hash: hash,
                    embedding,
                    payload: record.payload,
                }),
                None => pending.push((record, hash)),
            }
        }

        if !pending.is_empty() {
            let texts = pending
                .iter()
                .map(|(record, _)| document_text(&record.payload.title, &record.payload.body))
                .collect();
            let embeddings = self
                .models
                .embed_batch(texts)
                .map_err(|err| format!("embedding failed: {err}"))?;

            for ((record, hash), embedding) in pending.into_iter().zip(embeddings) {
                entries.push(VectorEntry {
                    id: record.id,
                    content_hash: hash,
                    embedding,
                    payload: record.payload,
                });
            }
        }

        Ok(entries)
    }
}

/// The CSV files a source path stands for, sorted by name.
fn csv_files(path: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(LoadError::NotFound(path.to_path_buf()))
        }
        Err(err) => return Err(io_err(err)),
    };

    if metadata.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = vec![];
    for entry in std::fs::read_dir(path).map_err(io_err)? {
        let file = entry.map_err(io_err)?.path();
        let is_csv = file
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv && file.is_file() {
            files.push(file);
        }
    }
    files.sort();

    if files.is_empty() {
        log::warn!("no csv files found in {}", path.display());
    }

    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Column positions of a source file.
struct Columns {
    title: usize,
    url: usize,
    body: Option<usize>,
    label: Option<usize>,
    state: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, &'static str> {
        let find = |names: &[&str]| {
            headers.iter().position(|header| {
                names
                    .iter()
                    .any(|name| header.trim().eq_ignore_ascii_case(name))
            })
        };

        Ok(Columns {
            title: find(&["title"]).ok_or("missing required column title")?,
            url: find(&["url"]).ok_or("missing required column url")?,
            body: find(&["body"]),
            label: find(&["label", "labels"]),
            state: find(&["state"]),
        })
    }
}

/// Read a CSV file into unvalidated issues. File and row problems are
/// recorded in `report`; only failing to read the file at all is an error.
fn read_csv(path: &Path, report: &mut LoadReport) -> Result<Vec<Sourced<NewIssue>>, LoadError> {
    let name = display_name(path);
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            log::warn!("{name} is not valid UTF-8, reading it as Latin-1");
            err.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());

    let columns = match reader.headers().map(|headers| Columns::from_headers(headers)) {
        Ok(Ok(columns)) => columns,
        Ok(Err(missing)) => {
            report.record_error(format!("{name}: {missing}, file skipped"));
            return Ok(vec![]);
        }
        Err(err) => {
            report.record_error(format!("{name}: unreadable header: {err}, file skipped"));
            return Ok(vec![]);
        }
    };

    let mut rows = vec![];
    for (idx, record) in reader.records().enumerate() {
        let origin = format!("{name}: row {}", idx + 1);

        let record = match record {
            Ok(record) => record,
            Err(err) => {
                report.record_error(format!("{origin}: {err}"));
                continue;
            }
        };

        let field = |pos: Option<usize>| {
            pos.and_then(|pos| record.get(pos))
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        rows.push(Sourced {
            origin,
            item: NewIssue {
                title: field(Some(columns.title)),
                url: field(Some(columns.url)),
                body: field(columns.body),
                labels: field(columns.label).map(|labels| parse_labels(&labels)),
                state: field(columns.state),
                ..Default::default()
            },
        });
    }

    Ok(rows)
}
