//! HTTP transport — JSON-RPC over `POST /mcp`, plus an unauthenticated `/health`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json as AxumJson, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::protocol::ProtocolHandler;
use crate::types::{JsonRpcMessage, McpError, McpResult, RequestId};

/// HTTP transport for web-based MCP clients.
pub struct SseTransport {
    handler: Arc<ProtocolHandler>,
}

impl SseTransport {
    pub fn new(handler: ProtocolHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Build the router; exposed so it can be served or tested directly.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/mcp", post(handle_request))
            .route("/health", get(handle_health))
            .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
            .with_state(self.handler.clone())
    }

    /// Run the HTTP server on the given address.
    pub async fn run(&self, addr: &str) -> McpResult<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(McpError::Io)?;

        tracing::info!("HTTP transport listening on {addr}");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        Ok(())
    }
}

/// Each HTTP request is handled on its own axum task, so tool calls run concurrently.
async fn handle_request(
    State(handler): State<Arc<ProtocolHandler>>,
    AxumJson(body): AxumJson<serde_json::Value>,
) -> Response {
    let msg: JsonRpcMessage = match serde_json::from_value(body) {
        Ok(msg) => msg,
        Err(e) => {
            let error = McpError::ParseError(e.to_string()).to_json_rpc_error(RequestId::Null);
            return (StatusCode::BAD_REQUEST, AxumJson(error)).into_response();
        }
    };

    match handler.handle_message(msg).await {
        Some(response) => AxumJson(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Health check: reports whether the Ollama backend answers.
async fn handle_health(State(handler): State<Arc<ProtocolHandler>>) -> AxumJson<serde_json::Value> {
    let backend_ok = handler.service().client().check_connection().await;
    AxumJson(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "ollama": if backend_ok { "reachable" } else { "unreachable" },
    }))
}
