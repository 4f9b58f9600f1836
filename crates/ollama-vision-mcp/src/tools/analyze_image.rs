//! Tool: analyze_image — Analyze an image with an optional custom prompt and model.

use serde_json::{json, Value};

use crate::service::VisionService;
use crate::types::{McpResult, ToolDefinition};

use super::params::ImageArgs;

pub const DEFAULT_PROMPT: &str = "Describe this image in detail";

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "analyze_image".to_string(),
        description: Some(
            "Analyze an image and provide detailed description with optional custom prompt"
                .to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {
                    "type": "string",
                    "description": "Path to image file, URL, or base64 image data"
                },
                "prompt": {
                    "type": "string",
                    "description": "Optional custom prompt for analysis"
                },
                "model": {
                    "type": "string",
                    "description": "Optional Ollama model to use"
                }
            },
            "required": ["image_path"]
        }),
    }
}

pub async fn execute(args: Value, service: &VisionService) -> McpResult<String> {
    let args = ImageArgs::parse(args)?;
    let image_path = args.require_image_path()?;
    let prompt = args.prompt.as_deref().unwrap_or(DEFAULT_PROMPT);

    service
        .analyze(image_path, prompt, args.model.as_deref())
        .await
}
