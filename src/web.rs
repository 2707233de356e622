use crate::{
    app::{IssueService, ServiceError},
    identity::IssueId,
    issue::{IssueRecord, NewIssue, SearchResult},
    labels::{LabelSuggestion, DEFAULT_MAX_LABELS},
    loader::LoadReport,
    semantic::{query::DEFAULT_TOP_K, SearchQuery},
    status::StatusReport,
};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    service: Arc<IssueService>,
}

pub fn router(service: Arc<IssueService>) -> Router {
    let shared_state = Arc::new(SharedState { service });

    Router::new()
        .route("/health", get(health))
        .route("/search", post(search))
        .route("/index", post(index))
        .route("/issue/:id", get(issue))
        .route("/reindex", post(reindex))
        .route("/collection", delete(clear_collection))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(service: IssueService) -> anyhow::Result<()> {
    let addr = service.config().bind_addr();
    let app = router(Arc::new(service));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::warn!("received Ctrl+C, shutting down"),
        _ = terminate => log::warn!("received SIGTERM, shutting down"),
    }
}

pub fn start_daemon(service: IssueService) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(service))
}

#[derive(Debug)]
struct HttpError(ServiceError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            ServiceError::InvalidQuery(_) | ServiceError::InvalidRecord(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::EmbeddingUnavailable(_)
            | ServiceError::RerankUnavailable(_)
            | ServiceError::IndexUnavailable(_) => {
                log::error!("{self:?}");
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Other(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<ServiceError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_rerank() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchRequest {
    pub query: String,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Rerank the shortlist with the cross-encoder.
    #[serde(default = "default_rerank")]
    pub rerank: bool,

    /// Results to keep after reranking, defaults to `top_k`
    #[serde(default)]
    pub rerank_top_k: Option<usize>,

    /// Only return issues carrying at least one of these labels
    #[serde(default)]
    pub filter_labels: Option<Vec<String>>,

    #[serde(default)]
    pub suggest_labels: bool,

    #[serde(default)]
    pub max_labels: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub query: String,
    pub total_results: usize,
    pub empty_collection: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_labels: Option<Vec<LabelSuggestion>>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, HttpError> {
    let Json(payload) =
        payload.map_err(|rejection| ServiceError::InvalidQuery(rejection.body_text()))?;
    log::debug!("payload: {payload:?}");

    let query = SearchQuery {
        top_k: payload.top_k,
        rerank: payload.rerank,
        rerank_top_k: payload.rerank_top_k,
        filter_labels: payload.filter_labels.clone(),
        ..SearchQuery::new(payload.query.clone())
    };

    let service = state.service.clone();
    tokio::task::block_in_place(move || {
        let outcome = service.search(&query)?;

        let suggested_labels = payload.suggest_labels.then(|| {
            service.suggest_labels(
                &outcome.results,
                payload.max_labels.unwrap_or(DEFAULT_MAX_LABELS),
            )
        });

        Ok(Json(SearchResponse {
            total_results: outcome.results.len(),
            results: outcome.results,
            query: payload.query,
            empty_collection: outcome.empty_collection,
            suggested_labels,
        }))
    })
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexRequest {
    pub issues: Vec<NewIssue>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexResponse {
    pub status: String,
    pub indexed: usize,
    pub errors: usize,
    pub error_details: Vec<String>,
    pub total_issues: usize,
}

fn load_status(report: &LoadReport) -> &'static str {
    match (report.loaded, report.errors) {
        (_, 0) => "success",
        (0, _) => "failed",
        _ => "partial",
    }
}

async fn index(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<IndexRequest>, JsonRejection>,
) -> Result<Json<IndexResponse>, HttpError> {
    let Json(payload) =
        payload.map_err(|rejection| ServiceError::InvalidRecord(rejection.body_text()))?;
    log::debug!("indexing {} issues", payload.issues.len());

    let service = state.service.clone();
    tokio::task::block_in_place(move || {
        let report = service.index_issues(payload.issues)?;

        Ok(Json(IndexResponse {
            status: load_status(&report).to_string(),
            indexed: report.loaded,
            errors: report.errors,
            error_details: report.error_details,
            total_issues: service.size()?,
        }))
    })
}

async fn issue(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> Result<Json<IssueRecord>, HttpError> {
    let service = state.service.clone();
    tokio::task::block_in_place(move || Ok(Json(service.issue(&IssueId::from(id))?)))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReindexResponse {
    pub status: String,
    #[serde(flatten)]
    pub report: LoadReport,
    pub total_issues: usize,
}

async fn reindex(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<ReindexResponse>, HttpError> {
    let service = state.service.clone();
    tokio::task::block_in_place(move || {
        let report = service.reindex()?;

        Ok(Json(ReindexResponse {
            status: load_status(&report).to_string(),
            report,
            total_issues: service.size()?,
        }))
    })
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClearResponse {
    pub status: String,
    pub message: String,
    pub indexed_issues: usize,
}

async fn clear_collection(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<ClearResponse>, HttpError> {
    let service = state.service.clone();
    tokio::task::block_in_place(move || {
        service.clear()?;

        Ok(Json(ClearResponse {
            status: "success".to_string(),
            message: "collection cleared".to_string(),
            indexed_issues: service.size()?,
        }))
    })
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(flatten)]
    pub report: StatusReport,
}

async fn health(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    let service = state.service.clone();
    let report = tokio::task::block_in_place(move || service.status());

    let (code, status) = if report.healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            report,
        }),
    )
}
