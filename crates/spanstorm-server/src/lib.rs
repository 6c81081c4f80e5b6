//! HTTP control surface for the spanstorm trace generator.
//!
//! Serves a small JSON API plus the bundled control page: configuration
//! reads and validated partial updates, start/stop toggles and a status
//! endpoint with the engine's counters. The engine itself runs in its own
//! task; handlers only talk to it through the [`ConfigStore`] and the
//! [`TraceSpammer`] handle.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use spanstorm::{ConfigStore, ConfigUpdate, TraceSpammer, TracingConfig};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub spammer: TraceSpammer,
}

#[derive(Serialize)]
struct StatusBody {
    running: bool,
    traces_emitted: u64,
    pipeline_builds: u64,
}

/// Build the control-surface router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/start", post(start))
        .route("/api/stop", post(stop))
        .route("/api/status", get(status))
        .with_state(state)
}

/// Serve the control surface until `cancel` fires.
pub async fn run_server(
    host: &str,
    port: u16,
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("control surface listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(include_str!("ui/index.html"))
}

async fn get_config(State(state): State<AppState>) -> Json<TracingConfig> {
    Json(state.store.snapshot())
}

async fn put_config(State(state): State<AppState>, Json(update): Json<ConfigUpdate>) -> Response {
    match state.store.apply(&update) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => (StatusCode::UNPROCESSABLE_ENTITY, Json(err)).into_response(),
    }
}

async fn start(State(state): State<AppState>) -> Json<StatusBody> {
    state.spammer.start();
    tracing::info!("trace generation started");
    Json(status_body(&state))
}

async fn stop(State(state): State<AppState>) -> Json<StatusBody> {
    state.spammer.stop();
    tracing::info!("trace generation stopped");
    Json(status_body(&state))
}

async fn status(State(state): State<AppState>) -> Json<StatusBody> {
    Json(status_body(&state))
}

fn status_body(state: &AppState) -> StatusBody {
    let stats = state.spammer.stats();
    StatusBody {
        running: state.spammer.is_running(),
        traces_emitted: stats.traces_emitted,
        pipeline_builds: stats.pipeline_builds,
    }
}
