//! Ollama API client: model catalog, vision model resolution, and inference.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::VisionConfig;
use crate::types::{CanonicalImage, VisionError, VisionResult};

/// Substrings that mark a catalog entry as vision-capable.
pub const VISION_MARKERS: &[&str] = &["llava", "bakllava", "vision"];

/// Returned when the backend answers without a `response` field.
pub const NO_RESPONSE: &str = "No response from model";

/// Upper bound for a model pull; downloads take far longer than inference.
const PULL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: [&'a str; 1],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    name: &'a str,
}

/// One line of the `/api/pull` progress stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PullStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Whether a model name carries one of the known vision markers.
pub fn is_vision_model(name: &str) -> bool {
    VISION_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Pick the model to run from an already filtered vision catalog.
///
/// The nominal model wins when installed; otherwise the first vision model
/// is substituted. An empty catalog is an error whatever was asked for.
pub fn select_model(vision_models: &[String], nominal: &str) -> VisionResult<String> {
    if vision_models.iter().any(|m| m == nominal) {
        return Ok(nominal.to_string());
    }

    match vision_models.first() {
        Some(fallback) => {
            tracing::warn!("Model {nominal} not found, using {fallback}");
            Ok(fallback.clone())
        }
        None => Err(VisionError::NoModelsAvailable),
    }
}

/// Parse a single progress line. Blank or malformed lines yield `None`.
pub fn parse_pull_line(line: &[u8]) -> Option<PullStatus> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<PullStatus>(trimmed) {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::debug!("Skipping malformed pull progress line: {e}");
            None
        }
    }
}

/// HTTP client for a single Ollama backend.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    default_model: String,
    timeout: Option<Duration>,
}

/// Apply a per-request timeout unless it is disabled.
pub(crate) fn bounded(
    request: reqwest::RequestBuilder,
    timeout: Option<Duration>,
) -> reqwest::RequestBuilder {
    match timeout {
        Some(limit) => request.timeout(limit),
        None => request,
    }
}

impl OllamaClient {
    pub fn new(config: &VisionConfig) -> VisionResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| VisionError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, config))
    }

    /// Share an existing HTTP client.
    pub fn with_client(http: reqwest::Client, config: &VisionConfig) -> Self {
        Self {
            http,
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            default_model: config.default_model.clone(),
            timeout: config.timeout_duration(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn request_error(&self, e: reqwest::Error) -> VisionError {
        if e.is_timeout() {
            VisionError::RequestTimeout(self.timeout.map_or(0, |t| t.as_secs()))
        } else {
            VisionError::Transport(format!("Ollama request to {} failed: {e}", self.base_url))
        }
    }

    /// Check if Ollama is running and answering.
    pub async fn check_connection(&self) -> bool {
        match bounded(self.http.get(self.endpoint("api/tags")), self.timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::error!("Failed to connect to Ollama: {e}");
                false
            }
        }
    }

    /// Every installed model name, in catalog order.
    pub async fn list_models(&self) -> VisionResult<Vec<String>> {
        let response = bounded(self.http.get(self.endpoint("api/tags")), self.timeout)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let tags: TagsResponse = response.json().await.map_err(|e| self.request_error(e))?;
        Ok(tags
            .models
            .into_iter()
            .map(|m| m.name)
            .filter(|name| !name.is_empty())
            .collect())
    }

    /// Installed models whose names carry a vision marker.
    pub async fn list_vision_models(&self) -> VisionResult<Vec<String>> {
        let models = self.list_models().await?;
        Ok(models.into_iter().filter(|m| is_vision_model(m)).collect())
    }

    /// Resolve the model for a request; falls back to the configured default
    /// when nothing was requested.
    pub async fn resolve_model(&self, requested: Option<&str>) -> VisionResult<String> {
        let nominal = requested
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(self.default_model.as_str());
        let vision_models = self.list_vision_models().await?;
        select_model(&vision_models, nominal)
    }

    /// Run one image + instruction through a vision model and return its text.
    pub async fn infer(
        &self,
        image: &CanonicalImage,
        instruction: &str,
        requested_model: Option<&str>,
    ) -> VisionResult<String> {
        let model = self.resolve_model(requested_model).await?;
        tracing::info!("Analyzing image with model {model}");
        self.generate(&model, instruction, image).await
    }

    /// `POST /api/generate` with a single image attachment, streaming disabled.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image: &CanonicalImage,
    ) -> VisionResult<String> {
        let payload = GenerateRequest {
            model,
            prompt,
            images: [image.as_str()],
            stream: false,
        };

        let response = bounded(self.http.post(self.endpoint("api/generate")), self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.map_err(|e| self.request_error(e))?;
            return Err(VisionError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let result: GenerateResponse = response.json().await.map_err(|e| self.request_error(e))?;
        Ok(result.response.unwrap_or_else(|| NO_RESPONSE.to_string()))
    }

    /// Make sure a model is installed, pulling it if needed.
    ///
    /// Best effort: progress lines are logged, malformed lines skipped, and
    /// the return value only says whether the pull call itself succeeded.
    pub async fn ensure_model(&self, model: &str) -> bool {
        match self.list_vision_models().await {
            Ok(models) if models.iter().any(|m| m == model) => return true,
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not read model catalog: {e}"),
        }

        tracing::info!("Model {model} not found, attempting to pull...");
        match self.pull(model).await {
            Ok(pulled) => pulled,
            Err(e) => {
                tracing::error!("Failed to pull model {model}: {e}");
                false
            }
        }
    }

    async fn pull(&self, model: &str) -> VisionResult<bool> {
        let mut response = self
            .http
            .post(self.endpoint("api/pull"))
            .timeout(PULL_TIMEOUT)
            .json(&PullRequest { name: model })
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        if !response.status().is_success() {
            tracing::warn!("Pull of {model} rejected: HTTP {}", response.status().as_u16());
            return Ok(false);
        }

        let mut pending: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.request_error(e))? {
            pending.extend_from_slice(&chunk);
            while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=newline).collect();
                log_pull_progress(&line);
            }
        }
        log_pull_progress(&pending);

        Ok(true)
    }
}

fn log_pull_progress(line: &[u8]) {
    let Some(progress) = parse_pull_line(line) else {
        return;
    };
    if progress.status.is_empty() {
        return;
    }
    match (progress.completed, progress.total) {
        (Some(done), Some(total)) if total > 0 => {
            tracing::info!("Pull status: {} ({done}/{total})", progress.status);
        }
        _ => tracing::info!("Pull status: {}", progress.status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_vision_marker_filter() {
        assert!(is_vision_model("llava-phi3:latest"));
        assert!(is_vision_model("bakllava"));
        assert!(is_vision_model("llama3.2-vision:11b"));
        assert!(!is_vision_model("mistral"));
        assert!(!is_vision_model("llama3"));
    }

    #[test]
    fn test_select_requested_model() {
        let catalog = names(&["llava-phi3", "llava:13b"]);
        assert_eq!(select_model(&catalog, "llava:13b").unwrap(), "llava:13b");
    }

    #[test]
    fn test_select_falls_back_to_first_vision_model() {
        let catalog: Vec<String> = names(&["llava-phi3", "mistral"])
            .into_iter()
            .filter(|m| is_vision_model(m))
            .collect();
        assert_eq!(select_model(&catalog, "llava:13b").unwrap(), "llava-phi3");
    }

    #[test]
    fn test_select_empty_catalog() {
        let err = select_model(&[], "llava-phi3").unwrap_err();
        assert!(matches!(err, VisionError::NoModelsAvailable));
    }

    #[test]
    fn test_parse_pull_lines() {
        let line = br#"{"status":"pulling manifest"}"#;
        assert_eq!(
            parse_pull_line(line).map(|p| p.status),
            Some("pulling manifest".to_string())
        );

        let progress =
            parse_pull_line(br#"{"status":"downloading","completed":10,"total":100}"#).unwrap();
        assert_eq!(progress.completed, Some(10));
        assert_eq!(progress.total, Some(100));

        assert!(parse_pull_line(b"  \n").is_none());
        assert!(parse_pull_line(b"{not json").is_none());
    }
}
