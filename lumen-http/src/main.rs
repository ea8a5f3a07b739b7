use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use lumen_core::{ConversationSession, Settings, SubmitOutcome, TurnPhase};
use lumen_host::{HostPlatform, InMemoryHost, NullHost};
use lumen_types::Message;

#[derive(Clone)]
struct AppState {
    session: Arc<ConversationSession>,
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    phase: TurnPhase,
    loading: bool,
    messages: usize,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(status))
        .route("/v1/messages", get(transcript).post(submit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = match std::env::var("LUMEN_SETTINGS") {
        Ok(path) if !path.is_empty() => Settings::from_path(path)?,
        _ => Settings::default(),
    }
    .apply_env();

    let host: Arc<dyn HostPlatform> = match std::env::var("LUMEN_DATASET") {
        Ok(path) if !path.is_empty() => Arc::new(InMemoryHost::from_path(path)?),
        _ => {
            tracing::warn!("LUMEN_DATASET not set; serving without a data model");
            Arc::new(NullHost)
        }
    };

    let session = Arc::new(ConversationSession::connect(&settings, host).await?);

    let addr: SocketAddr = std::env::var("LUMEN_HTTP_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:7000".into())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "chat widget server listening");
    axum::serve(listener, app(AppState { session })).await?;

    Ok(())
}

async fn submit(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<Message>, (StatusCode, Json<ErrorResponse>)> {
    match state.session.submit(&req.text).await {
        SubmitOutcome::Replied(reply) => Ok(Json(reply)),
        SubmitOutcome::Ignored => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: "empty message" }),
        )),
        SubmitOutcome::Busy => Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse { error: "a reply is still in progress" }),
        )),
    }
}

async fn transcript(State(state): State<AppState>) -> Json<Vec<Message>> {
    Json(state.session.transcript().await)
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        phase: state.session.phase(),
        loading: state.session.is_loading(),
        messages: state.session.transcript().await.len(),
    })
}

async fn healthz() -> &'static str {
    "ok"
}
