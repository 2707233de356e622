use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, collections::HashSet, str::FromStr};

use crate::identity::{self, IdentityError, IssueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    #[default]
    Open,
    Closed,
}

impl FromStr for IssueState {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "open" => Ok(IssueState::Open),
            "closed" => Ok(IssueState::Closed),
            other => Err(RecordError::UnknownState(other.to_string())),
        }
    }
}

/// Everything stored next to an embedding.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IssuePayload {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub state: IssueState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Always carries `url`.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A validated issue, ready to be embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: IssueId,
    #[serde(flatten)]
    pub payload: IssuePayload,
}

/// An issue as submitted by a caller or read from a source file, before
/// validation. The identity always comes from the url, never from the caller.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NewIssue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Falls back to `metadata.url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("missing title")]
    MissingTitle,

    #[error("missing url")]
    MissingUrl,

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] IdentityError),

    #[error("unknown state {0:?}, expected open or closed")]
    UnknownState(String),
}

impl IssueRecord {
    pub fn normalize(issue: NewIssue) -> Result<IssueRecord, RecordError> {
        let title = issue
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .ok_or(RecordError::MissingTitle)?;

        let mut metadata = flatten_metadata(issue.metadata.unwrap_or_default());

        let url = issue
            .url
            .or_else(|| metadata.remove("url"))
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or(RecordError::MissingUrl)?;

        let id = identity::assign(&url)?;
        metadata.insert("url".to_string(), url);

        let state = match issue.state {
            Some(state) => state.parse()?,
            None => IssueState::default(),
        };

        Ok(IssueRecord {
            id,
            payload: IssuePayload {
                title,
                body: issue.body.unwrap_or_default(),
                labels: normalize_labels(issue.labels.unwrap_or_default()),
                state,
                created_at: issue.created_at.filter(|c| !c.trim().is_empty()),
                metadata,
            },
        })
    }
}

/// Keeps flat scalar values, stringifying numbers and booleans.
fn flatten_metadata(metadata: serde_json::Map<String, Value>) -> BTreeMap<String, String> {
    metadata
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key, s)),
            Value::Number(n) => Some((key, n.to_string())),
            Value::Bool(b) => Some((key, b.to_string())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        })
        .collect()
}

/// Splits a comma separated label cell.
pub fn parse_labels(labels: &str) -> Vec<String> {
    normalize_labels(labels.split(','))
}

/// Trims, drops empties and deduplicates, keeping first occurrences.
pub fn normalize_labels<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    labels
        .into_iter()
        .map(|label| label.as_ref().trim().to_string())
        .filter(|label| !label.is_empty())
        .filter(|label| seen.insert(label.clone()))
        .collect()
}

/// A single query hit. `score` is the similarity or, after reranking, the
/// reranker's relevance; higher is better either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: IssueId,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub state: IssueState,
    pub score: f32,
    pub metadata: BTreeMap<String, String>,
}

impl SearchResult {
    pub fn new(id: IssueId, payload: IssuePayload, score: f32) -> Self {
        SearchResult {
            id,
            title: payload.title,
            body: payload.body,
            labels: payload.labels,
            state: payload.state,
            score,
            metadata: payload.metadata,
        }
    }
}
