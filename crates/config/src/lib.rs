// Configuration loading

pub mod ai;
pub mod settings;

pub use ai::{get_api_key, AgentConfigStatus, KeyLookup, KeySource, ResolvedAgentConfig};
pub use settings::{
    AgentProvider, AgentSettings, ConfigError, EngineSettings, RateLimitSettings, ServerSettings,
    Settings,
};
