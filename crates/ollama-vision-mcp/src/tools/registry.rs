//! Tool registration and dispatch.

use serde_json::Value;

use crate::service::VisionService;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::{analyze_image, describe_image, identify_objects, read_text};

pub struct ToolRegistry;

impl ToolRegistry {
    pub fn list_tools() -> Vec<ToolDefinition> {
        vec![
            analyze_image::definition(),
            describe_image::definition(),
            identify_objects::definition(),
            read_text::definition(),
        ]
    }

    /// Run a tool. Always answers with text: failures become `Error: <message>`.
    pub async fn call(
        name: &str,
        arguments: Option<Value>,
        service: &VisionService,
    ) -> ToolCallResult {
        match Self::dispatch(name, arguments, service).await {
            Ok(text) => ToolCallResult::text(text),
            Err(e) => {
                tracing::error!("Error executing tool {name}: {e}");
                ToolCallResult::text(e.to_tool_text())
            }
        }
    }

    async fn dispatch(
        name: &str,
        arguments: Option<Value>,
        service: &VisionService,
    ) -> McpResult<String> {
        if !Self::list_tools().iter().any(|t| t.name == name) {
            return Err(McpError::ToolNotFound(name.to_string()));
        }

        let args = match arguments {
            Some(Value::Object(map)) if !map.is_empty() => Value::Object(map),
            Some(Value::Object(_)) | Some(Value::Null) | None => {
                return Err(McpError::Validation("No arguments provided".to_string()));
            }
            Some(other) => {
                return Err(McpError::Validation(format!(
                    "Tool arguments must be an object, got {other}"
                )));
            }
        };

        match name {
            "analyze_image" => analyze_image::execute(args, service).await,
            "describe_image" => describe_image::execute(args, service).await,
            "identify_objects" => identify_objects::execute(args, service).await,
            "read_text" => read_text::execute(args, service).await,
            _ => Err(McpError::ToolNotFound(name.to_string())),
        }
    }
}
