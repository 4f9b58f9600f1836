//! Tool: read_text — Extract visible text from the image.

use serde_json::Value;

use crate::service::VisionService;
use crate::types::{McpResult, ToolDefinition};

use super::params::{image_only_schema, ImageArgs};

pub const PROMPT: &str = "Extract and transcribe all visible text in this image. If no text is visible, say 'No text found'";

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "read_text".to_string(),
        description: Some("Extract visible text from the image".to_string()),
        input_schema: image_only_schema(),
    }
}

pub async fn execute(args: Value, service: &VisionService) -> McpResult<String> {
    let args = ImageArgs::parse(args)?;
    let image_path = args.require_image_path()?;
    service.analyze(image_path, PROMPT, None).await
}
