//! Tool: describe_image — Get a comprehensive description of what's in the image.

use serde_json::Value;

use crate::service::VisionService;
use crate::types::{McpResult, ToolDefinition};

use super::params::{image_only_schema, ImageArgs};

pub const PROMPT: &str = "Provide a comprehensive description of this image, including all visible elements, colors, composition, and any notable details";

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "describe_image".to_string(),
        description: Some("Get a comprehensive description of what's in the image".to_string()),
        input_schema: image_only_schema(),
    }
}

pub async fn execute(args: Value, service: &VisionService) -> McpResult<String> {
    let args = ImageArgs::parse(args)?;
    let image_path = args.require_image_path()?;
    service.analyze(image_path, PROMPT, None).await
}
