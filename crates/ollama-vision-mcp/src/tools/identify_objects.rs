//! Tool: identify_objects — List all identifiable objects in the image.

use serde_json::Value;

use crate::service::VisionService;
use crate::types::{McpResult, ToolDefinition};

use super::params::{image_only_schema, ImageArgs};

pub const PROMPT: &str = "List all identifiable objects in this image. Format as a bulleted list";

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "identify_objects".to_string(),
        description: Some("List all identifiable objects in the image".to_string()),
        input_schema: image_only_schema(),
    }
}

pub async fn execute(args: Value, service: &VisionService) -> McpResult<String> {
    let args = ImageArgs::parse(args)?;
    let image_path = args.require_image_path()?;
    service.analyze(image_path, PROMPT, None).await
}
