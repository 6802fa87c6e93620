// Reasoning agent
//
// - client: ReasoningAgent trait and the OpenAI-compatible implementation
// - context: system prompt built from the sheet

pub mod client;
pub mod context;

pub use client::{parse_response, AgentError, AgentReply, OpenAiAgent, ReasoningAgent};
pub use context::build_system_prompt;
