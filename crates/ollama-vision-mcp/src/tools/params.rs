//! Argument parsing shared by the image tools.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::types::{McpError, McpResult};

/// Arguments accepted by the image tools. Only `image_path` is required.
#[derive(Debug, Default, Deserialize)]
pub struct ImageArgs {
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl ImageArgs {
    pub fn parse(args: Value) -> McpResult<Self> {
        serde_json::from_value(args).map_err(|e| McpError::Validation(e.to_string()))
    }

    /// The image reference, rejecting a missing or blank value.
    pub fn require_image_path(&self) -> McpResult<&str> {
        self.image_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| McpError::Validation("image_path is required".to_string()))
    }
}

/// Schema for tools that take nothing but an image.
pub fn image_only_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "image_path": {
                "type": "string",
                "description": "Path to image file, URL, or base64 image data"
            }
        },
        "required": ["image_path"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_image_path() {
        let args = ImageArgs::parse(json!({ "image_path": "cat.png" })).unwrap();
        assert_eq!(args.require_image_path().unwrap(), "cat.png");

        let blank = ImageArgs::parse(json!({ "image_path": "  " })).unwrap();
        assert!(matches!(
            blank.require_image_path(),
            Err(McpError::Validation(_))
        ));

        let missing = ImageArgs::parse(json!({ "prompt": "hi" })).unwrap();
        assert!(missing.require_image_path().is_err());
    }

    #[test]
    fn test_wrong_type_is_validation_error() {
        let err = ImageArgs::parse(json!({ "image_path": 42 })).unwrap_err();
        assert!(matches!(err, McpError::Validation(_)));
    }
}
