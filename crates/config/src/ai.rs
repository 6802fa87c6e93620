// Reasoning agent configuration and secrets
//
// API keys come from:
// 1. System keychain (with the `keychain` feature)
// 2. Environment variables (GRIDCHAT_OPENAI_KEY, then OPENAI_API_KEY)
//
// Keys are never stored in settings.toml

use std::env;
use std::time::Duration;

use crate::settings::{AgentProvider, AgentSettings};

/// Service name for keychain storage
#[cfg(feature = "keychain")]
const KEYCHAIN_SERVICE: &str = "gridchat";

/// Source of an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Keychain,
    Environment,
    None,
}

impl KeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeySource::Keychain => "keychain",
            KeySource::Environment => "environment",
            KeySource::None => "none",
        }
    }
}

/// Result of key lookup
#[derive(Debug, Clone)]
pub struct KeyLookup {
    pub key: Option<String>,
    pub source: KeySource,
}

/// Environment variables checked for a provider, in order
fn env_var_names(provider: &str) -> Vec<String> {
    vec![
        format!("GRIDCHAT_{}_KEY", provider.to_uppercase()),
        format!("{}_API_KEY", provider.to_uppercase()),
    ]
}

#[cfg(feature = "keychain")]
fn keychain_account(provider: &str) -> String {
    format!("ai/{}", provider.to_lowercase())
}

/// Get an API key for the specified provider
pub fn get_api_key(provider: &str) -> KeyLookup {
    #[cfg(feature = "keychain")]
    {
        if let Ok(entry) = keyring::Entry::new(KEYCHAIN_SERVICE, &keychain_account(provider)) {
            if let Ok(key) = entry.get_password() {
                return KeyLookup {
                    key: Some(key),
                    source: KeySource::Keychain,
                };
            }
        }
    }

    for name in env_var_names(provider) {
        if let Ok(key) = env::var(&name) {
            if !key.trim().is_empty() {
                return KeyLookup {
                    key: Some(key),
                    source: KeySource::Environment,
                };
            }
        }
    }

    KeyLookup {
        key: None,
        source: KeySource::None,
    }
}

/// Store an API key in the system keychain
#[cfg(feature = "keychain")]
pub fn set_api_key(provider: &str, key: &str) -> Result<(), String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, &keychain_account(provider))
        .map_err(|e| format!("Failed to create keychain entry: {}", e))?;

    entry
        .set_password(key)
        .map_err(|e| format!("Failed to store key in keychain: {}", e))
}

#[cfg(not(feature = "keychain"))]
pub fn set_api_key(_provider: &str, _key: &str) -> Result<(), String> {
    Err("Keychain support not enabled. Set GRIDCHAT_<PROVIDER>_KEY instead.".to_string())
}

// ============================================================================
// Resolved agent configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentConfigStatus {
    Ready,
    MissingKey,
}

impl AgentConfigStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::MissingKey => "missing_key",
        }
    }
}

/// The effective agent configuration, resolved from settings and secrets.
#[derive(Debug, Clone)]
pub struct ResolvedAgentConfig {
    pub provider: AgentProvider,
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub key_source: KeySource,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_iterations: u32,
    pub status: AgentConfigStatus,
    /// Human-readable reason if not ready
    pub blocking_reason: Option<String>,
}

impl ResolvedAgentConfig {
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self::resolve(settings, get_api_key(settings.provider.name()))
    }

    /// Resolve with an explicit key lookup (used by tests and `--api-key`).
    pub fn resolve(settings: &AgentSettings, lookup: KeyLookup) -> Self {
        let provider = settings.provider;

        let (api_key, key_source, status, blocking_reason) = match (provider.needs_api_key(), lookup.key) {
            (_, Some(key)) => (Some(key), lookup.source, AgentConfigStatus::Ready, None),
            (false, None) => (None, KeySource::None, AgentConfigStatus::Ready, None),
            (true, None) => (
                None,
                KeySource::None,
                AgentConfigStatus::MissingKey,
                Some(format!(
                    "No API key found. Set {}",
                    env_var_names(provider.name()).join(" or ")
                )),
            ),
        };

        Self {
            provider,
            model: settings.effective_model().to_string(),
            endpoint: settings.effective_endpoint().to_string(),
            api_key,
            key_source,
            temperature: settings.temperature,
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
            max_iterations: settings.max_iterations.max(1),
            status,
            blocking_reason,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == AgentConfigStatus::Ready
    }
}
