//! Configuration file discovery and loading.

use std::path::{Path, PathBuf};

use ollama_vision::VisionConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "OLLAMA_VISION_CONFIG";

/// Config file name looked up in the working directory.
pub const CWD_CONFIG_FILE: &str = "ollama-vision-config.json";

/// Find the config file. First existing candidate wins:
/// explicit path, `OLLAMA_VISION_CONFIG`, working directory,
/// `~/.ollama-vision-mcp/config.json`, then `config.json` next to the executable.
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    config_candidates(explicit)
        .into_iter()
        .find(|candidate| candidate.is_file())
}

fn config_candidates(explicit: Option<&str>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(path) = explicit {
        candidates.push(PathBuf::from(path));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        candidates.push(PathBuf::from(env_path));
    }

    candidates.push(PathBuf::from(CWD_CONFIG_FILE));
    candidates.push(user_config_path());

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(dir.join("config.json"));
    }

    candidates
}

/// `~/.ollama-vision-mcp/config.json`.
pub fn user_config_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(home).join(".ollama-vision-mcp").join("config.json")
}

/// Discover and load the configuration. Also returns the file it came from.
pub fn load_config(explicit: Option<&str>) -> (VisionConfig, Option<PathBuf>) {
    if let Some(path) = explicit {
        if !Path::new(path).is_file() {
            tracing::warn!("Config file {path} does not exist, searching default locations");
        }
    }

    let path = resolve_config_path(explicit);
    let config = VisionConfig::load(path.as_deref());
    (config, path)
}
