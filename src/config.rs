use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SYSTEM_PROMPT_FILE: &str = "system_prompt.txt";

/// Used when no sidecar prompt file is found.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant embedded in a 3D \
    simulation editor. You know robotics, physics simulation, scene description formats \
    and Python scripting for simulation workflows. Give clear, practical answers, keep \
    them concise, and relate them to simulation work when it helps.";

/// Runtime configuration, read from the environment (and `.env`) at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub default_model: Option<String>,
    pub system_prompt: Option<String>,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            default_model: Some(DEFAULT_MODEL.to_string()),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            port: DEFAULT_PORT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let host = lookup("OLLAMA_API_BASE_URL")
            .map(|h| normalize_host(&h))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let default_model = match lookup("OLLAMA_MODEL") {
            Some(model) if model.trim().is_empty() => None,
            Some(model) => Some(model.trim().to_string()),
            None => Some(DEFAULT_MODEL.to_string()),
        };

        let prompt_path = lookup("SYSTEM_PROMPT_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSTEM_PROMPT_FILE));

        let port = match lookup("PORT") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Ignoring invalid PORT value '{raw}', using {DEFAULT_PORT}");
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        Self {
            host,
            default_model,
            system_prompt: Some(load_system_prompt(&prompt_path)),
            port,
        }
    }
}

/// Reads the sidecar prompt file, falling back to [`DEFAULT_SYSTEM_PROMPT`]
/// when it is missing, unreadable or blank.
pub fn load_system_prompt(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => {
            info!("Loaded system prompt from {}", path.display());
            text.trim().to_string()
        }
        Ok(_) => {
            warn!("System prompt file {} is empty, using built-in prompt", path.display());
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(e) => {
            info!("No system prompt at {} ({e}), using built-in prompt", path.display());
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('/').to_string()
}
