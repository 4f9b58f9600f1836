//! Layered configuration: environment overrides, JSON config file, built-in defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{VisionError, VisionResult};

/// Prefix for environment variable overrides, e.g. `OLLAMA_VISION_TIMEOUT`.
pub const ENV_PREFIX: &str = "OLLAMA_VISION_";

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llava-phi3";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Largest accepted source image, in bytes (20 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// Longest side, in pixels, of a normalized image.
pub const DEFAULT_MAX_DIMENSION: u32 = 2048;

const DEFAULT_MODEL_PREFERENCES: &[&str] = &["llava-phi3", "llava:7b", "llava:13b", "bakllava"];

/// Process-wide configuration. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    pub ollama_url: String,
    pub default_model: String,
    /// Request timeout in seconds; `0` disables it.
    pub timeout: u64,
    pub log_level: String,
    /// Carried for compatibility; inference results are never cached.
    pub cache_enabled: bool,
    pub cache_ttl: u64,
    pub model_preferences: Vec<String>,
    pub max_image_bytes: u64,
    pub max_dimension: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            cache_enabled: false,
            cache_ttl: DEFAULT_CACHE_TTL_SECS,
            model_preferences: DEFAULT_MODEL_PREFERENCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

impl VisionConfig {
    /// Load from an optional config file, with process environment overrides.
    pub fn load(path: Option<&Path>) -> Self {
        let file = path.map(read_config_file).unwrap_or_default();
        Self::from_sources(&file, |key| std::env::var(key).ok())
    }

    /// Resolve every key as environment > file > default.
    ///
    /// `env` receives the full variable name (`OLLAMA_VISION_<KEY>`).
    pub fn from_sources<F>(file: &Map<String, Value>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let layers = Layers { file, env };

        let max_dimension = layers.integer("max_dimension", u64::from(defaults.max_dimension));

        Self {
            ollama_url: layers.string("ollama_url", &defaults.ollama_url),
            default_model: layers.string("default_model", &defaults.default_model),
            timeout: layers.integer("timeout", defaults.timeout),
            log_level: layers.string("log_level", &defaults.log_level),
            cache_enabled: layers.boolean("cache_enabled", defaults.cache_enabled),
            cache_ttl: layers.integer("cache_ttl", defaults.cache_ttl),
            model_preferences: layers.list("model_preferences", &defaults.model_preferences),
            max_image_bytes: layers.integer("max_image_bytes", defaults.max_image_bytes),
            max_dimension: u32::try_from(max_dimension).unwrap_or(DEFAULT_MAX_DIMENSION),
        }
    }

    /// Per-request timeout, or `None` when `timeout` is `0`.
    pub fn timeout_duration(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    /// Example config document with every recognized key at its default.
    pub fn example_json() -> Value {
        serde_json::to_value(Self::default()).unwrap_or(Value::Null)
    }

    /// Write the example config as pretty JSON.
    pub fn write_example(path: &Path) -> VisionResult<()> {
        let text = serde_json::to_string_pretty(&Self::example_json())
            .map_err(|e| VisionError::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        tracing::info!("Saved example config to: {}", path.display());
        Ok(())
    }
}

/// Read a JSON object from disk. Unreadable or malformed files count as empty.
pub fn read_config_file(path: &Path) -> Map<String, Value> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Failed to load config from {}: {e}", path.display());
            return Map::new();
        }
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::warn!("Config file {} is not a JSON object", path.display());
            Map::new()
        }
        Err(e) => {
            tracing::warn!("Failed to parse config from {}: {e}", path.display());
            Map::new()
        }
    }
}

struct Layers<'a, F> {
    file: &'a Map<String, Value>,
    env: F,
}

impl<F> Layers<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn env_value(&self, key: &str) -> Option<(String, String)> {
        let name = format!("{ENV_PREFIX}{}", key.to_uppercase());
        (self.env)(&name).map(|value| (name, value))
    }

    fn string(&self, key: &str, default: &str) -> String {
        if let Some((_, value)) = self.env_value(key) {
            return value;
        }
        match self.file.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                tracing::warn!("Expected string for config key '{key}', got {other}");
                default.to_string()
            }
            None => default.to_string(),
        }
    }

    fn boolean(&self, key: &str, default: bool) -> bool {
        if let Some((_, value)) = self.env_value(key) {
            return matches!(value.to_lowercase().as_str(), "true" | "1" | "yes");
        }
        match self.file.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                tracing::warn!("Expected boolean for config key '{key}', got {other}");
                default
            }
            None => default,
        }
    }

    fn integer(&self, key: &str, default: u64) -> u64 {
        if let Some((name, value)) = self.env_value(key) {
            return match value.trim().parse::<u64>() {
                Ok(n) => n,
                Err(_) => {
                    tracing::warn!("Invalid integer value for {name}: {value}");
                    default
                }
            };
        }
        match self.file.get(key) {
            Some(v) => v.as_u64().unwrap_or_else(|| {
                tracing::warn!("Expected integer for config key '{key}', got {v}");
                default
            }),
            None => default,
        }
    }

    fn list(&self, key: &str, default: &[String]) -> Vec<String> {
        if let Some((_, value)) = self.env_value(key) {
            return value.split(',').map(|v| v.trim().to_string()).collect();
        }
        match self.file.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(other) => {
                tracing::warn!("Expected list for config key '{key}', got {other}");
                default.to_vec()
            }
            None => default.to_vec(),
        }
    }
}
