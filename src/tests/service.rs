use serde_json::json;
use std::sync::atomic::Ordering;

use super::support::{corpus, new_issue, Harness};
use crate::app::ServiceError;
use crate::identity::{self, IssueId};
use crate::issue::{IssueState, NewIssue};
use crate::semantic::SearchQuery;

#[test]
fn test_index_and_get() {
    let harness = Harness::new();
    let report = harness.service.index_issues(corpus()).unwrap();

    assert_eq!(report.loaded, 8);
    assert_eq!(report.errors, 0);
    assert_eq!(harness.service.size().unwrap(), 8);

    let id = identity::assign("https://github.com/org/repo/issues/2").unwrap();
    let record = harness.service.issue(&id).unwrap();
    assert_eq!(record.payload.title, "Memory leak in dataloader workers");
    assert_eq!(record.payload.labels, vec!["bug", "memory"]);
    assert_eq!(record.payload.state, IssueState::Open);
}

#[test]
fn test_unknown_issue_is_not_found() {
    let harness = Harness::new();
    harness.service.index_issues(corpus()).unwrap();

    let result = harness.service.issue(&IssueId::from("v1-0000"));
    assert!(matches!(result, Err(ServiceError::NotFound)));
}

#[test]
fn test_reingest_overwrites() {
    let harness = Harness::new();
    harness.service.index_issues(corpus()).unwrap();

    let mut updated = new_issue(3, "Docs typo in quickstart", "", &["docs", "good first issue"]);
    updated.state = Some("closed".into());
    harness.service.index_issues(vec![updated]).unwrap();

    assert_eq!(harness.service.size().unwrap(), 8);
    let id = identity::assign("https://github.com/org/repo/issues/3").unwrap();
    let record = harness.service.issue(&id).unwrap();
    assert_eq!(record.payload.title, "Docs typo in quickstart");
    assert_eq!(record.payload.state, IssueState::Closed);
    assert_eq!(record.payload.labels, vec!["docs", "good first issue"]);
}

#[test]
fn test_unchanged_issues_are_not_reembedded() {
    let harness = Harness::new();
    harness.service.index_issues(corpus()).unwrap();
    assert_eq!(harness.embedder.embedded_texts.load(Ordering::SeqCst), 8);

    // labels changed, title and body did not
    let mut issues = corpus();
    issues[0].labels = Some(vec!["triaged".into()]);
    issues[1].body = Some("a different body".into());
    let report = harness.service.index_issues(issues).unwrap();

    assert_eq!(report.loaded, 8);
    assert_eq!(harness.embedder.embedded_texts.load(Ordering::SeqCst), 9);

    let id = identity::assign("https://github.com/org/repo/issues/1").unwrap();
    assert_eq!(harness.service.issue(&id).unwrap().payload.labels, vec!["triaged"]);
}

#[test]
fn test_invalid_issues_are_reported_not_fatal() {
    let harness = Harness::new();
    let issues: Vec<NewIssue> = serde_json::from_value(json!([
        {"title": "Valid one", "url": "https://github.com/org/repo/issues/1"},
        {"body": "no title", "url": "https://github.com/org/repo/issues/2"},
        {"title": "No url"},
        {"title": "Bad url", "url": "not a url"},
        {"title": "Bad state", "url": "https://github.com/org/repo/issues/5", "state": "merged"},
        {
            "id": "caller-id",
            "title": "Url in metadata",
            "metadata": {"url": "https://github.com/org/repo/issues/6", "number": 6}
        }
    ]))
    .unwrap();

    let report = harness.service.index_issues(issues).unwrap();

    assert_eq!(report.loaded, 2);
    assert_eq!(report.errors, 4);
    assert_eq!(report.error_details.len(), 4);
    assert!(report.error_details[0].starts_with("issue 2: missing title"));
    assert!(report.error_details[1].starts_with("issue 3: missing url"));

    // the caller's id is ignored, identity comes from the url
    let id = identity::assign("https://github.com/org/repo/issues/6").unwrap();
    let record = harness.service.issue(&id).unwrap();
    assert_eq!(record.payload.metadata["number"], "6");
    assert!(harness.service.issue(&IssueId::from("caller-id")).is_err());
}

#[test]
fn test_collection_survives_restart() {
    let harness = Harness::new();
    harness.service.index_issues(corpus()).unwrap();

    let query = SearchQuery {
        rerank: false,
        ..SearchQuery::new("cuda memory")
    };
    let before = harness.service.search(&query).unwrap();

    let restarted = harness.restart();
    assert_eq!(restarted.size().unwrap(), 8);

    let after = restarted.search(&query).unwrap();
    let ids = |results: &[crate::issue::SearchResult]| {
        results.iter().map(|r| r.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&before.results), ids(&after.results));
}

#[test]
fn test_clear_survives_restart() {
    let harness = Harness::new();
    harness.service.index_issues(corpus()).unwrap();
    harness.service.clear().unwrap();

    assert_eq!(harness.restart().size().unwrap(), 0);
}

#[test]
fn test_status() {
    let harness = Harness::new();
    harness.service.index_issues(corpus()).unwrap();

    let report = harness.service.status();
    assert!(report.healthy);
    assert_eq!(report.record_count, 8);
    assert_eq!(report.embedding_model_id, "test-hashing-embedder");
    assert_eq!(report.reranker_model_id, "test-overlap-reranker");

    // status never mutates
    assert_eq!(harness.service.size().unwrap(), 8);
}

#[test]
fn test_status_degraded_when_a_model_fails() {
    let harness = Harness::new();

    harness.reranker.fail.store(true, Ordering::SeqCst);
    assert!(!harness.service.status().healthy);

    harness.reranker.fail.store(false, Ordering::SeqCst);
    harness.embedder.fail.store(true, Ordering::SeqCst);
    let report = harness.service.status();
    assert!(!report.healthy);
    assert_eq!(report.record_count, 0);
}

#[test]
fn test_load_on_startup_fills_empty_collection() {
    let harness = Harness::new();
    super::support::write_csv(
        &harness.source_dir(),
        "issues.csv",
        &[
            ("Crash on start", "https://x.dev/1", "", "bug"),
            ("Slow build", "https://x.dev/2", "", "build"),
        ],
    );

    let report = harness.service.load_on_startup().unwrap().unwrap();
    assert_eq!(report.loaded, 2);

    // not empty anymore, so a second startup does nothing
    assert!(harness.service.load_on_startup().unwrap().is_none());
}

#[test]
fn test_load_on_startup_tolerates_missing_source() {
    let harness = Harness::new();
    assert!(harness.service.load_on_startup().unwrap().is_none());
    assert_eq!(harness.service.size().unwrap(), 0);
}

#[test]
fn test_load_on_startup_can_be_disabled() {
    let harness = Harness::with_config(|config| config.load_on_startup = false);
    super::support::write_csv(
        &harness.source_dir(),
        "issues.csv",
        &[("Crash on start", "https://x.dev/1", "", "bug")],
    );

    assert!(harness.service.load_on_startup().unwrap().is_none());
    assert_eq!(harness.service.size().unwrap(), 0);
}
