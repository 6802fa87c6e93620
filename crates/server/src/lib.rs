//! GridChat session server.
//!
//! Sessions hold one canonical sheet each. Chat turns run through the
//! [`AgentOrchestrator`], which lets a reasoning agent call spreadsheet tools
//! via the [`ToolDispatcher`]; every committed change is pushed to the
//! session's observers in sequence order.

pub mod ai;
pub mod orchestrator;
pub mod rate_limiter;
pub mod server;
pub mod session;
pub mod tools;
pub mod wire;

pub use ai::{AgentError, AgentReply, OpenAiAgent, ReasoningAgent};
pub use orchestrator::{AgentOrchestrator, TurnError, TurnFailure, TurnOutcome, TurnState};
pub use server::{ServerMetrics, SessionServer, SessionServerConfig};
pub use session::{
    Attachment, History, Message, RegistryError, Role, Session, SessionInfo, SessionRegistry,
    SessionSettings, SyncBroadcaster, ToolCall,
};
pub use tools::{tool_schemas, ToolDispatcher, ToolError, ToolRequest, TOOL_NAMES};
