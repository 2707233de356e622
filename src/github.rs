//! Import issues from the GitHub REST API into a running daemon.

use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::app::IndexClient;
use crate::issue::NewIssue;

const GITHUB_API: &str = "https://api.github.com";
const PER_PAGE: usize = 100;
/// Pause when fewer requests than this remain in the rate limit window
const RATE_LIMIT_FLOOR: u64 = 10;
const PAGE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub owner: String,
    pub repo: String,
    pub token: Option<String>,
    pub max_issues: usize,
    /// open, closed or all
    pub state: String,
    pub batch_size: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub fetched: usize,
    pub indexed: usize,
    pub errors: usize,
    pub failed_batches: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubLabel {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubUser {
    login: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<GithubLabel>,
    state: String,
    #[serde(default)]
    created_at: Option<String>,
    html_url: String,
    #[serde(default)]
    user: Option<GithubUser>,
    #[serde(default)]
    comments: u64,
    /// Present only on pull requests
    #[serde(default)]
    pull_request: Option<Value>,
}

impl GithubIssue {
    fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    fn into_new_issue(self) -> NewIssue {
        let mut metadata = serde_json::Map::new();
        metadata.insert("number".to_string(), json!(self.number));
        metadata.insert("url".to_string(), json!(self.html_url));
        if let Some(user) = self.user {
            metadata.insert("user".to_string(), json!(user.login));
        }
        metadata.insert("comments".to_string(), json!(self.comments));

        NewIssue {
            title: Some(self.title),
            body: self.body,
            labels: Some(self.labels.into_iter().map(|label| label.name).collect()),
            state: Some(self.state),
            url: Some(self.html_url),
            created_at: self.created_at,
            metadata: Some(metadata),
        }
    }
}

pub struct GithubImporter {
    client: reqwest::blocking::Client,
    api_url: String,
}

impl GithubImporter {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_api_url(GITHUB_API)
    }

    pub fn with_api_url(api_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch up to `max_issues` issues, newest first, skipping pull requests.
    ///
    /// A failed request ends the fetch; whatever was fetched so far is kept.
    pub fn fetch(&self, opts: &ImportOptions) -> Vec<NewIssue> {
        let url = format!("{}/repos/{}/{}/issues", self.api_url, opts.owner, opts.repo);
        let mut issues = vec![];
        let mut page = 1;

        log::info!("fetching issues from {}/{}", opts.owner, opts.repo);

        while issues.len() < opts.max_issues {
            let mut request = self
                .client
                .get(&url)
                .header("Accept", "application/vnd.github.v3+json")
                .query(&[
                    ("state", opts.state.as_str()),
                    ("page", &page.to_string()),
                    ("per_page", &PER_PAGE.to_string()),
                    ("sort", "created"),
                    ("direction", "desc"),
                ]);
            if let Some(token) = &opts.token {
                request = request.header("Authorization", format!("token {token}"));
            }

            let response = match request.send().and_then(|r| r.error_for_status()) {
                Ok(response) => response,
                Err(err) => {
                    log::error!("error fetching issues: {err}");
                    break;
                }
            };

            if let Some(wait) = rate_limit_wait(response.headers(), now_secs()) {
                log::warn!("rate limit low, waiting {}s", wait.as_secs());
                std::thread::sleep(wait);
            }

            let page_issues: Vec<GithubIssue> = match response.json() {
                Ok(page_issues) => page_issues,
                Err(err) => {
                    log::error!("unexpected response from GitHub: {err}");
                    break;
                }
            };

            if page_issues.is_empty() {
                break;
            }

            issues.extend(
                page_issues
                    .into_iter()
                    .filter(|issue| !issue.is_pull_request())
                    .map(GithubIssue::into_new_issue),
            );
            log::info!("fetched {} issues so far", issues.len());

            page += 1;
            std::thread::sleep(PAGE_DELAY);
        }

        issues.truncate(opts.max_issues);
        log::info!("fetched {} issues", issues.len());
        issues
    }
}

/// Fetch issues from GitHub and post them to the daemon in batches. A batch
/// the daemon rejects is logged and skipped.
pub fn import(
    importer: &GithubImporter,
    target: &IndexClient,
    opts: &ImportOptions,
) -> ImportSummary {
    let issues = importer.fetch(opts);
    let mut summary = ImportSummary {
        fetched: issues.len(),
        ..Default::default()
    };

    for batch in issues.chunks(opts.batch_size.max(1)) {
        match target.index(batch.to_vec()) {
            Ok(response) => {
                summary.indexed += response.indexed;
                summary.errors += response.errors;
                log::info!(
                    "indexed {}/{} issues",
                    summary.indexed + summary.errors,
                    summary.fetched
                );
            }
            Err(err) => {
                log::error!("error indexing batch: {err}");
                summary.failed_batches += 1;
            }
        }
    }

    log::info!(
        "import complete: {} issues indexed, {} rejected, {} batches failed",
        summary.indexed,
        summary.errors,
        summary.failed_batches
    );
    summary
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// How long to pause before the next request, if the rate limit is nearly
/// used up. Missing headers mean no limit is being reported.
fn rate_limit_wait(headers: &reqwest::header::HeaderMap, now: u64) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
    };

    let remaining = header("X-RateLimit-Remaining")?;
    if remaining >= RATE_LIMIT_FLOOR {
        return None;
    }

    let reset = header("X-RateLimit-Reset").unwrap_or(now);
    Some(Duration::from_secs(reset.saturating_sub(now) + 1))
}
