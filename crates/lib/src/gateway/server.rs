//! Gateway HTTP server.

use crate::channels::{MessageSender, MessengerChannel};
use crate::config::Settings;
use crate::dispatch::{Dispatcher, VerifyQuery};
use crate::llm::{CompletionBackend, GeminiClient};
use crate::relay::CompletionRelay;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared, read-only state for request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub port: u16,
    pub dispatcher: Arc<Dispatcher>,
}

/// Wire the Gemini client, Messenger channel, relay and dispatcher from validated settings.
pub fn build_state(settings: &Settings) -> Result<GatewayState> {
    let backend: Arc<dyn CompletionBackend> = Arc::new(
        GeminiClient::new(
            settings.gemini_base_url.clone(),
            settings.model.clone(),
            settings.api_key.clone(),
            settings.completion_timeout,
        )
        .context("building Gemini client")?,
    );
    let sender: Arc<dyn MessageSender> = Arc::new(
        MessengerChannel::new(
            settings.graph_api_base.clone(),
            settings.graph_api_version.clone(),
            settings.page_access_token.clone(),
            settings.send_timeout,
        )
        .context("building Messenger client")?,
    );
    let relay = CompletionRelay::new(
        backend,
        sender,
        settings.mode,
        settings.system_instruction.clone(),
        settings.retry,
    );
    Ok(GatewayState {
        port: settings.port,
        dispatcher: Arc::new(Dispatcher::new(
            settings.verify_token.clone(),
            settings.event_policy,
            Arc::new(relay),
        )),
    })
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .with_state(state)
}

/// Run the gateway server; binds to settings.bind:settings.port.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(settings: Settings) -> Result<()> {
    log::info!(
        "completion: model {}, mode {:?}, up to {} attempt(s)",
        settings.model,
        settings.mode,
        settings.retry.max_attempts
    );
    let app = router(build_state(&settings)?);

    let bind_addr = format!("{}:{}", settings.bind, settings.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// In-flight deliveries finish before the server returns.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining in-flight requests");
}

/// GET /webhook — subscription handshake; echoes hub.challenge when hub.verify_token matches.
async fn verify_webhook(
    State(state): State<GatewayState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    match state.dispatcher.verify(&VerifyQuery::from_params(&params)) {
        Ok(challenge) => (StatusCode::OK, challenge),
        Err(_) => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
    }
}

/// POST /webhook — handles the delivery before acknowledging. Always 200 for page payloads.
async fn receive_webhook(
    State(state): State<GatewayState>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    match state.dispatcher.deliver(&body).await {
        Ok(report) => {
            log::debug!("webhook: delivery handled: {:?}", report);
            (StatusCode::OK, "EVENT_RECEIVED")
        }
        Err(e) => {
            log::warn!("webhook: {}", e);
            (StatusCode::NOT_FOUND, "Not Found")
        }
    }
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.port,
    }))
}
