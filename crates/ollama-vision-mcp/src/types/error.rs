//! Error types and JSON-RPC error codes for the MCP server.

use super::message::{JsonRpcError, JsonRpcErrorObject, RequestId, JSONRPC_VERSION};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// MCP-specific error codes.
pub mod mcp_error_codes {
    pub const TOOL_NOT_FOUND: i32 = -32803;
    pub const VISION_ERROR: i32 = -32852;
}

/// All errors that can occur in the MCP server.
///
/// Tool-level failures (`Validation`, `ToolNotFound`, `Vision`) never leave
/// the server as JSON-RPC errors; the tool registry turns them into
/// `Error: ...` text results.
#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    /// A required tool argument is missing or malformed.
    #[error("{0}")]
    Validation(String),

    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    #[error(transparent)]
    Vision(#[from] ollama_vision::VisionError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        use mcp_error_codes::*;
        match self {
            McpError::ParseError(_) => PARSE_ERROR,
            McpError::InvalidRequest(_) => INVALID_REQUEST,
            McpError::MethodNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) | McpError::Validation(_) => INVALID_PARAMS,
            McpError::InternalError(_) => INTERNAL_ERROR,
            McpError::ToolNotFound(_) => TOOL_NOT_FOUND,
            McpError::Vision(_) => VISION_ERROR,
            McpError::Transport(_) | McpError::Io(_) => INTERNAL_ERROR,
            McpError::Json(_) => PARSE_ERROR,
        }
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JsonRpcErrorObject {
                code: self.code(),
                message: self.to_string(),
                data: None,
            },
        }
    }

    /// The text a tool caller sees for this failure.
    pub fn to_tool_text(&self) -> String {
        format!("Error: {self}")
    }
}

pub type McpResult<T> = Result<T, McpError>;
