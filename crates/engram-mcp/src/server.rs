//! Tool server - routes JSON-RPC requests to the tool handlers.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
use crate::tools;

pub struct ToolServer {
    ctx: Arc<AppContext>,
    initialized: bool,
}

impl ToolServer {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            initialized: false,
        }
    }

    /// Handle one request; notifications return `None`.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "handling request");

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!(method = %request.method, "request before initialize");
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(json!({})),
            method => Err(JsonRpcError::method_not_found(method)),
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&mut self, _params: Option<Value>) -> Result<Value, JsonRpcError> {
        self.initialized = true;
        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": "engram",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": {}
            }
        }))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        Ok(json!({ "tools": tools::descriptions() }))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
        let name = params["name"]
            .as_str()
            .ok_or_else(|| JsonRpcError::invalid_params("missing tool name"))?
            .to_string();
        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match tools::dispatch(&self.ctx, &name, args).await {
            Ok(result) => {
                let summary = result["summary"].as_str().unwrap_or_default().to_string();
                Ok(json!({
                    "content": [{ "type": "text", "text": summary }],
                    "structuredContent": result,
                    "isError": false,
                }))
            }
            Err(message) => {
                warn!(tool = %name, error = %message, "tool call failed");
                Ok(json!({
                    "content": [{ "type": "text", "text": message }],
                    "isError": true,
                }))
            }
        }
    }
}
