use crate::error::ApiError;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use plugin::{Action, Context, Dispatcher, Registry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

/// Shared server state: the plugin registry and the cached dispatcher.
/// The dispatcher owns the only process-wide cache.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    async fn find_entry(
        &self,
        ctx: &Context,
        path: &str,
    ) -> Result<Arc<dyn plugin::Entry>, ApiError> {
        Ok(self.registry.find_entry(&self.dispatcher, ctx, path).await?)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/fs/list", get(handle_list))
        .route("/fs/info", get(handle_info))
        .route("/fs/read", get(handle_read))
        .route("/fs/stream", get(handle_stream))
        .route("/fs/exec", post(handle_exec))
        .route("/fs/metadata", get(handle_metadata))
        .route("/fs/schema", get(handle_schema))
        .route("/fs/delete", delete(handle_delete))
        .route("/find", post(handle_find))
        .route("/cache", delete(handle_clear_cache))
        .with_state(state)
}

/// Serves the API on the daemon's UNIX socket until `shutdown` fires.
pub async fn serve(
    listener: UnixListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[derive(Debug, Deserialize)]
struct PathParams {
    path: String,
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    path: String,
    #[serde(default)]
    recurse: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ExecBody {
    cmd: String,
    #[serde(default)]
    args: Vec<String>,
}

/// The body of POST /find: a start path, traversal options, and an
/// RQL query.
#[derive(Debug, Serialize, Deserialize)]
pub struct FindBody {
    pub path: String,
    #[serde(default)]
    pub options: FindOptions,
    pub query: serde_json::Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
}

async fn handle_list(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> Result<Json<Vec<rql::Entry>>, ApiError> {
    let ctx = Context::new();
    let entry = state.find_entry(&ctx, &params.path).await?;
    if !entry.capabilities().contains(Action::List) {
        return Err(entry.unsupported(Action::List).into());
    }

    let children = state.dispatcher.cached_list(&ctx, &entry).await?;
    let base = params.path.trim_end_matches('/');
    let mut result: Vec<rql::Entry> = children
        .iter()
        .map(|(cname, child)| rql::Entry::new(child.as_ref(), format!("{base}/{cname}")))
        .collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!(path = params.path, entries = result.len(), "API: List");
    Ok(Json(result))
}

async fn handle_info(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> Result<Json<rql::Entry>, ApiError> {
    let ctx = Context::new();
    let entry = state.find_entry(&ctx, &params.path).await?;
    Ok(Json(rql::Entry::new(entry.as_ref(), params.path)))
}

async fn handle_read(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = Context::new();
    let entry = state.find_entry(&ctx, &params.path).await?;
    let content = state.dispatcher.cached_open(&ctx, &entry).await?;
    Ok(content)
}

async fn handle_stream(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = Context::new();
    let entry = state.find_entry(&ctx, &params.path).await?;
    if !entry.capabilities().contains(Action::Stream) {
        return Err(entry.unsupported(Action::Stream).into());
    }
    let stream = entry.stream(&ctx).await?;
    Ok(Body::from_stream(tokio_util::io::ReaderStream::new(stream)))
}

async fn handle_exec(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
    Json(body): Json<ExecBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = Context::new();
    let entry = state.find_entry(&ctx, &params.path).await?;
    if !entry.capabilities().contains(Action::Exec) {
        return Err(entry.unsupported(Action::Exec).into());
    }
    let result = entry.exec(&ctx, &body.cmd, &body.args).await?;
    Ok(Json(serde_json::json!({
        "exit_code": result.exit_code,
        "stdout": String::from_utf8_lossy(&result.stdout),
        "stderr": String::from_utf8_lossy(&result.stderr),
    })))
}

async fn handle_metadata(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> Result<Json<plugin::JsonObject>, ApiError> {
    let ctx = Context::new();
    let entry = state.find_entry(&ctx, &params.path).await?;
    let metadata = state.dispatcher.cached_metadata(&ctx, &entry).await?;
    Ok(Json(metadata.as_ref().clone()))
}

async fn handle_schema(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> Result<Json<Option<plugin::SchemaGraph>>, ApiError> {
    let ctx = Context::new();
    let entry = state.find_entry(&ctx, &params.path).await?;
    Ok(Json(state.registry.schema_for(entry.as_ref())))
}

async fn handle_delete(
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode, ApiError> {
    let ctx = Context::new();
    let entry = state.find_entry(&ctx, &params.path).await?;
    if !entry.capabilities().contains(Action::Delete) {
        return Err(entry.unsupported(Action::Delete).into());
    }
    if entry.capabilities().contains(Action::List) && params.recurse != Some(true) {
        return Err(plugin::Error::BadRequest(
            "parent entries can only be deleted when the recurse option is set".to_string(),
        )
        .into());
    }
    entry.delete(&ctx).await?;
    // The entry and anything cached beneath it are now stale.
    state.dispatcher.clear_path(&params.path);
    tracing::debug!(path = params.path, "API: Delete");
    Ok(StatusCode::OK)
}

async fn handle_find(
    State(state): State<AppState>,
    Json(body): Json<FindBody>,
) -> Result<Json<Vec<rql::Entry>>, ApiError> {
    let query = rql::Query::unmarshal(&body.query).map_err(ApiError::from)?;

    let ctx = Context::new();
    let start = state.find_entry(&ctx, &body.path).await?;
    let mut options = rql::Options::default();
    if let Some(min_depth) = body.options.min_depth {
        options.min_depth = min_depth;
    }
    if let Some(max_depth) = body.options.max_depth {
        options.max_depth = max_depth;
    }

    let graph = state.registry.schema_graph();
    let walk = rql::walk(&state.dispatcher, &graph, &ctx, start, &query, options).await;
    if let Some(error) = walk.error {
        return Err(error.into());
    }
    tracing::debug!(path = body.path, entries = walk.entries.len(), "API: Find");
    Ok(Json(walk.entries))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearedCache {
    pub deleted: Vec<String>,
}

async fn handle_clear_cache(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> Result<Json<ClearedCache>, ApiError> {
    let deleted = state.dispatcher.clear_path(&params.path);
    tracing::debug!(path = params.path, keys = deleted.len(), "API: ClearCache");
    Ok(Json(ClearedCache { deleted }))
}
