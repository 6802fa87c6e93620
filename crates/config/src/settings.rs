// Server settings
// Loaded from ~/.config/gridchat/settings.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use gridchat_core::MatchMode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Reasoning provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentProvider {
    /// OpenAI API
    #[default]
    #[serde(rename = "openai")]
    OpenAI,
    /// Local OpenAI-compatible server (Ollama, llama.cpp)
    Local,
}

impl AgentProvider {
    pub fn name(&self) -> &'static str {
        match self {
            AgentProvider::OpenAI => "openai",
            AgentProvider::Local => "local",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            AgentProvider::OpenAI => "gpt-4o",
            AgentProvider::Local => "llama3.1:8b",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            AgentProvider::OpenAI => "https://api.openai.com/v1/chat/completions",
            AgentProvider::Local => "http://localhost:11434/v1/chat/completions",
        }
    }

    pub fn needs_api_key(&self) -> bool {
        matches!(self, AgentProvider::OpenAI)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address
    pub bind: String,
    pub max_connections: usize,
    /// Largest accepted JSONL line, in bytes
    pub max_message_size: usize,
    /// Sessions with no attached observers are reaped after this long
    pub idle_session_ttl_secs: u64,
    /// Per-observer push queue depth before the observer is dropped
    pub observer_queue_depth: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7420".to_string(),
            max_connections: 32,
            max_message_size: 10 * 1024 * 1024,
            idle_session_ttl_secs: 300,
            observer_queue_depth: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub provider: AgentProvider,

    /// Model identifier. Empty = provider default.
    pub model: String,

    /// Endpoint override. None = provider default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Agent round trips allowed per chat turn
    pub max_iterations: u32,

    pub temperature: f32,

    /// HTTP timeout for one completion request
    pub timeout_secs: u64,

    /// Rows and columns of the sheet preview in the system prompt
    pub sample_rows: usize,
    pub sample_cols: usize,

    /// Tool results longer than this are cut before going back to the agent
    pub max_tool_result_chars: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            provider: AgentProvider::OpenAI,
            model: String::new(),
            endpoint: None,
            max_iterations: 10,
            temperature: 0.2,
            timeout_secs: 60,
            sample_rows: 10,
            sample_cols: 12,
            max_tool_result_chars: 8_000,
        }
    }
}

impl AgentSettings {
    /// Get the effective model (user-specified or provider default)
    pub fn effective_model(&self) -> &str {
        if self.model.is_empty() {
            self.provider.default_model()
        } else {
            &self.model
        }
    }

    pub fn effective_endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.provider.default_endpoint())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub match_mode: MatchMode,
}

/// Per-connection token bucket. Costs are in tokens per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub burst: u32,
    pub per_sec: u32,
    pub chat_cost: u32,
    pub upload_cost: u32,
    pub snapshot_cost: u32,
    pub ping_cost: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            burst: 200,
            per_sec: 20,
            chat_cost: 20,
            upload_cost: 50,
            snapshot_cost: 10,
            ping_cost: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub agent: AgentSettings,
    pub engine: EngineSettings,
    pub rate_limit: RateLimitSettings,
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gridchat")
            .join("settings.toml")
    }

    /// Load settings from the default path, falling back to defaults.
    ///
    /// A missing file is not an error. A malformed one is logged and ignored.
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{}; using default settings", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io { path: path.to_path_buf(), source };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text).map_err(io_err)
    }
}
