use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::catalog::{MetadataError, MetadataResolver};
use crate::cli::ServeArgs;
use crate::config::Config;
use crate::gemini::GeminiClient;
use crate::search::{SearchError, SearchProxy};
use crate::summarize::{BookResolver, GenerateError, SummaryMode, SummaryOrchestrator, TextGenerator};

#[derive(Clone)]
pub struct AppState {
    search: Arc<SearchProxy>,
    resolver: Arc<MetadataResolver>,
    orchestrator: Arc<SummaryOrchestrator>,
    generator: Option<Arc<GeminiClient>>,
}

pub fn router(config: &Config) -> anyhow::Result<Router> {
    let resolver = Arc::new(MetadataResolver::from_config(config)?);
    let generator = GeminiClient::from_config(config)?.map(Arc::new);
    let orchestrator = Arc::new(SummaryOrchestrator::new(
        Arc::clone(&resolver) as Arc<dyn BookResolver>,
        generator
            .clone()
            .map(|client| client as Arc<dyn TextGenerator>),
        config.default_model.clone(),
    ));
    let state = AppState {
        search: Arc::new(SearchProxy::from_config(config)?),
        resolver,
        orchestrator,
        generator,
    };

    Ok(Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/search", get(search_handler))
        .route("/metadata/:id", get(metadata_handler))
        .route("/generate", post(generate_handler))
        .route("/models", get(models_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let config = Config::from_env();
    if config.books_api_key.is_none() {
        tracing::info!("no primary search credential; search will use Open Library");
    }
    if config.gemini_api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY is not set; /generate will fail until configured");
    }

    let app = router(&config)?;
    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: String,
    #[serde(default = "default_search_limit")]
    limit: u32,
}

fn default_search_limit() -> u32 {
    20
}

async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    tracing::info!(query = %params.query, limit = params.limit, "incoming search");
    match state.search.search(&params.query, params.limit).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn metadata_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.resolver.resolve(&id).await {
        Ok(record) => Json(record).into_response(),
        Err(err @ MetadataError::NotFound(_)) => {
            tracing::warn!(error = %err, "metadata resolution failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "Could not fetch book info" })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateBody {
    id: Option<String>,
    // The original web client sent this field as `length`.
    #[serde(alias = "length")]
    mode: Option<SummaryMode>,
}

async fn generate_handler(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let Some(id) = body
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing book id" })),
        )
            .into_response();
    };
    let mode = body.mode.unwrap_or(SummaryMode::Long);
    tracing::info!(%request_id, id, ?mode, "incoming generate request");

    match state.orchestrator.generate(id, mode).await {
        Ok(summary) => Json(json!({
            "summary": summary.text,
            "model": summary.model,
            "attempt": summary.attempt,
        }))
        .into_response(),
        Err(err) => {
            tracing::warn!(%request_id, error = %err, "generate request failed");
            err.into_response()
        }
    }
}

async fn models_handler(State(state): State<AppState>) -> Response {
    match &state.generator {
        Some(generator) => Json(json!({ "models": generator.list_models().await })).into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "GEMINI_API_KEY is not set" })),
        )
            .into_response(),
    }
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "search failed");
        match self {
            SearchError::Upstream { status, message } => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                Json(json!({ "error": message })),
            )
                .into_response(),
            SearchError::Transport(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
                .into_response(),
        }
    }
}

impl IntoResponse for GenerateError {
    fn into_response(self) -> Response {
        match self {
            GenerateError::BookNotFound => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
            GenerateError::ConfigMissing => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
            GenerateError::AllModelsFailed {
                ref attempted,
                ref errors,
                ref models,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": self.to_string(),
                    "attempted": attempted,
                    "errors": errors,
                    "models": models,
                })),
            )
                .into_response(),
        }
    }
}
