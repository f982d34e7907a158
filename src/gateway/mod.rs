//! HTTP gateway: axum router over the session store, chat service and logger.

pub mod api;
pub mod error;

pub use error::ApiError;

use crate::chat::ChatService;
use crate::config::{Config, GatewayConfig};
use crate::prompt::{self, PromptAssembler};
use crate::providers::{self, Provider};
use crate::sessions::{self, SessionLogger, SessionStore};
use anyhow::{Context, Result};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub chat: Arc<ChatService>,
    pub logger: Arc<SessionLogger>,
}

impl AppState {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        chat: Arc<ChatService>,
        logger: Arc<SessionLogger>,
    ) -> Self {
        Self {
            sessions,
            chat,
            logger,
        }
    }

    /// Wire the provider, persona, store and logger described by `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let provider: Arc<dyn Provider> = Arc::from(providers::create_resilient_provider(
            config.provider_name(),
            config.api_key.as_deref(),
            config.api_url.as_deref(),
            &config.reliability,
        )?);

        let persona = prompt::load_persona(config.persona_path().as_deref()).await?;
        let assembler = PromptAssembler::new(persona, config.sessions.prompt_history_window);
        let chat = ChatService::new(
            provider,
            assembler,
            config.model_name(),
            config.default_temperature,
        );

        Ok(Self::new(
            Arc::from(sessions::create_session_store(
                config.sessions.max_history_messages,
            )),
            Arc::new(chat),
            Arc::new(SessionLogger::new(config.log_dir())),
        ))
    }
}

/// Build the router with body limit, timeout and CORS layers applied.
///
/// Errors raised by the layers themselves (408, 413, unknown routes) are
/// rewritten into the same `{"error": ...}` shape the handlers return.
pub fn build_router(state: AppState, config: &GatewayConfig) -> Router {
    let mut router = Router::new()
        .route("/health", get(api::handle_health))
        .route("/api/chat", post(api::handle_chat))
        .route("/api/save_log/{session_id}", post(api::handle_save_log))
        .route("/api/sessions/{session_id}", get(api::handle_session_get))
        .route(
            "/api/sessions/{session_id}/issues",
            post(api::handle_issue_record),
        )
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(middleware::map_response(json_error_bodies));

    if config.allow_any_origin {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

async fn json_error_bodies(response: Response) -> Response {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) || is_json(response.headers()) {
        return response;
    }

    let message = match status {
        StatusCode::REQUEST_TIMEOUT => "Request timed out",
        StatusCode::PAYLOAD_TOO_LARGE => "Request body too large",
        _ => status.canonical_reason().unwrap_or("Request failed"),
    };
    if status == StatusCode::REQUEST_TIMEOUT {
        tracing::warn!("Request exceeded the gateway timeout");
    }

    let (parts, _) = response.into_parts();
    let mut mapped = (status, Json(serde_json::json!({ "error": message }))).into_response();
    for (name, value) in &parts.headers {
        if name != header::CONTENT_TYPE && name != header::CONTENT_LENGTH {
            mapped.headers_mut().insert(name.clone(), value.clone());
        }
    }
    mapped
}

/// Persist every live session. Returns how many were written.
pub async fn save_all_sessions(state: &AppState) -> Result<usize> {
    let mut saved = 0;
    for id in state.sessions.ids().await? {
        let Some(handle) = state.sessions.get(&id).await? else {
            continue;
        };
        let session = handle.lock().await;
        if state.logger.save(&session).await.is_some() {
            saved += 1;
        }
    }
    Ok(saved)
}

/// Run the HTTP gateway until Ctrl-C or SIGTERM.
pub async fn run_gateway(host: &str, port: u16, config: Config) -> Result<()> {
    let listener = TcpListener::bind(format!("{host}:{port}"))
        .await
        .with_context(|| format!("Failed to bind gateway to {host}:{port}"))?;
    let actual_port = listener.local_addr()?.port();

    let state = AppState::from_config(&config).await?;
    state.chat.warmup().await;

    println!("chatdesk gateway listening on http://{host}:{actual_port}");
    println!("  POST /api/chat                     {{\"message\": \"...\", \"session_id\": \"...\"}}");
    println!("  POST /api/save_log/{{session_id}}    persist a session transcript");
    println!("  GET  /api/sessions/{{session_id}}    session snapshot");
    println!("  GET  /health                       health check");
    println!("  Transcripts: {}", state.logger.dir().display());
    println!("  Press Ctrl+C to stop.\n");

    tracing::info!(
        host,
        port = actual_port,
        provider = config.provider_name(),
        model = config.model_name(),
        "Gateway started"
    );

    let app = build_router(state.clone(), &config.gateway);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Gateway server error")?;

    if config.sessions.save_on_shutdown {
        let saved = save_all_sessions(&state).await?;
        tracing::info!(saved, "Saved sessions on shutdown");
    }

    println!("Shut down.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
