//! Main request dispatcher — receives JSON-RPC messages, routes to handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;

use crate::service::VisionService;
use crate::tools::ToolRegistry;
use crate::types::*;

use super::negotiation::NegotiatedCapabilities;
use super::validator::validate_request;

/// The main protocol handler that dispatches incoming JSON-RPC messages.
pub struct ProtocolHandler {
    service: Arc<VisionService>,
    capabilities: Arc<Mutex<NegotiatedCapabilities>>,
    /// Running requests by id, tagged with a spawn sequence number.
    in_flight: Arc<Mutex<HashMap<RequestId, (u64, AbortHandle)>>>,
    next_seq: AtomicU64,
}

impl ProtocolHandler {
    pub fn new(service: Arc<VisionService>) -> Self {
        Self {
            service,
            capabilities: Arc::new(Mutex::new(NegotiatedCapabilities::default())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn service(&self) -> &VisionService {
        &self.service
    }

    /// Handle one message to completion and return the response, if any.
    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<Value> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req).await),
            JsonRpcMessage::Notification(notif) => {
                self.handle_notification(notif).await;
                None
            }
            _ => {
                tracing::warn!("Received unexpected message type from client");
                None
            }
        }
    }

    /// Run a request on its own task; its response goes to `responses`.
    ///
    /// The task stays cancellable through `notifications/cancelled` until it
    /// finishes. A cancelled request produces no response.
    pub async fn spawn_request(
        self: &Arc<Self>,
        request: JsonRpcRequest,
        responses: mpsc::UnboundedSender<Value>,
    ) {
        let id = request.id.clone();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let handler = Arc::clone(self);

        // Held across the spawn so the task cannot untrack itself before it is tracked.
        let mut in_flight = self.in_flight.lock().await;
        let task = tokio::spawn(async move {
            let id = request.id.clone();
            let response = handler.handle_request(request).await;
            {
                // A reused id may now belong to a later request; leave that one tracked.
                let mut in_flight = handler.in_flight.lock().await;
                if in_flight.get(&id).is_some_and(|(tracked, _)| *tracked == seq) {
                    in_flight.remove(&id);
                }
            }
            if responses.send(response).is_err() {
                tracing::debug!("Response for request {id} dropped: writer closed");
            }
        });
        if in_flight
            .insert(id.clone(), (seq, task.abort_handle()))
            .is_some()
        {
            tracing::warn!(
                "Request id {id} reused while still in flight; only the latest can be cancelled"
            );
        }
    }

    /// Number of requests currently running on their own tasks.
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Value {
        if let Err(e) = validate_request(&request) {
            return serde_json::to_value(e.to_json_rpc_error(request.id)).unwrap_or_default();
        }

        let id = request.id.clone();
        let result = self.dispatch_request(&request).await;

        match result {
            Ok(value) => serde_json::to_value(JsonRpcResponse::new(id, value)).unwrap_or_default(),
            Err(e) => serde_json::to_value(e.to_json_rpc_error(id)).unwrap_or_default(),
        }
    }

    async fn dispatch_request(&self, request: &JsonRpcRequest) -> McpResult<Value> {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params.clone()).await,
            "shutdown" => self.handle_shutdown().await,

            "tools/list" => self.handle_tools_list().await,
            "tools/call" => self.handle_tools_call(request.params.clone()).await,

            "ping" => Ok(Value::Object(serde_json::Map::new())),

            _ => Err(McpError::MethodNotFound(request.method.clone())),
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "initialized" | "notifications/initialized" => {
                let mut caps = self.capabilities.lock().await;
                if let Err(e) = caps.mark_initialized() {
                    tracing::error!("Failed to mark initialized: {e}");
                }
            }
            "notifications/cancelled" | "$/cancelRequest" => {
                self.handle_cancel(notification.params).await;
            }
            _ => {
                tracing::debug!("Unknown notification: {}", notification.method);
            }
        }
    }

    async fn handle_cancel(&self, params: Option<Value>) {
        let Some(params) = params
            .and_then(|p| serde_json::from_value::<CancelRequestParams>(p).ok())
        else {
            tracing::warn!("Cancellation notification without a valid requestId");
            return;
        };

        let Some(id) = RequestId::from_value(params.request_id) else {
            tracing::warn!("Cancellation notification with unusable requestId");
            return;
        };

        match self.in_flight.lock().await.remove(&id) {
            Some((_, handle)) => {
                handle.abort();
                tracing::info!(
                    "Cancelled request {id}{}",
                    params
                        .reason
                        .map(|r| format!(" ({r})"))
                        .unwrap_or_default()
                );
            }
            None => tracing::debug!("Cancellation for unknown or finished request {id}"),
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let init_params: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Initialize params required".to_string()))?;

        let mut caps = self.capabilities.lock().await;
        let result = caps.negotiate(init_params)?;

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_shutdown(&self) -> McpResult<Value> {
        tracing::info!("Shutdown requested");
        let in_flight = self.in_flight.lock().await;
        if !in_flight.is_empty() {
            tracing::info!("{} request(s) still in flight at shutdown", in_flight.len());
        }
        Ok(Value::Object(serde_json::Map::new()))
    }

    async fn handle_tools_list(&self) -> McpResult<Value> {
        let result = ToolListResult {
            tools: ToolRegistry::list_tools(),
            next_cursor: None,
        };
        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> McpResult<Value> {
        let call_params: ToolCallParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Tool call params required".to_string()))?;

        let result =
            ToolRegistry::call(&call_params.name, call_params.arguments, &self.service).await;

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }
}
