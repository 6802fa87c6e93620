// Reasoning agent client
//
// The orchestrator only sees the `ReasoningAgent` trait. The production
// implementation talks to an OpenAI-compatible /v1/chat/completions endpoint
// with function tools. Blocking; runs on the session's turn worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use gridchat_config::ResolvedAgentConfig;
use gridchat_protocol::codes;

use crate::session::history::{Message, Role, ToolCall};

/// One agent response: tool calls to run, or a final reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl AgentReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    #[error("agent not configured: {0}")]
    NotConfigured(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl AgentError {
    /// Every variant is a failure of the reasoning collaborator.
    pub fn code(&self) -> &'static str {
        codes::REASONING_COLLABORATOR_FAILURE
    }
}

pub trait ReasoningAgent: Send + Sync {
    fn complete(&self, history: &[Message], tools: &[Value]) -> Result<AgentReply, AgentError>;
}

// ============================================================================
// OpenAI API types
// ============================================================================

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAIToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: OpenAIFunction,
}

#[derive(Serialize, Deserialize)]
struct OpenAIFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn no_tools(tools: &&[Value]) -> bool {
    tools.is_empty()
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn to_openai(message: &Message) -> OpenAIMessage {
    OpenAIMessage {
        role: role_name(message.role).to_string(),
        content: message.content.clone(),
        tool_calls: message
            .tool_calls
            .iter()
            .map(|call| OpenAIToolCall {
                id: call.id.clone(),
                call_type: function_type(),
                function: OpenAIFunction {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect(),
        tool_call_id: message.tool_call_id.clone(),
    }
}

/// Parse a chat completion body into an [`AgentReply`].
pub fn parse_response(body: &str) -> Result<AgentReply, AgentError> {
    let response: OpenAIResponse =
        serde_json::from_str(body).map_err(|e| AgentError::InvalidResponse(e.to_string()))?;
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| AgentError::InvalidResponse("no choices in response".to_string()))?;

    let tool_calls: Vec<ToolCall> = message
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        })
        .collect();
    let content = message.content.filter(|c| !c.trim().is_empty());

    if content.is_none() && tool_calls.is_empty() {
        return Err(AgentError::InvalidResponse(
            "response has neither content nor tool calls".to_string(),
        ));
    }
    Ok(AgentReply { content, tool_calls })
}

// ============================================================================
// OpenAI-compatible agent
// ============================================================================

pub struct OpenAiAgent {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAiAgent {
    pub fn new(config: &ResolvedAgentConfig) -> Result<Self, AgentError> {
        if !config.is_ready() {
            return Err(AgentError::NotConfigured(
                config
                    .blocking_reason
                    .clone()
                    .unwrap_or_else(|| "agent is not ready".to_string()),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ReasoningAgent for OpenAiAgent {
    fn complete(&self, history: &[Message], tools: &[Value]) -> Result<AgentReply, AgentError> {
        let request = OpenAIRequest {
            model: &self.model,
            messages: history.iter().map(to_openai).collect(),
            tools,
            tool_choice: (!tools.is_empty()).then_some("auto"),
            temperature: self.temperature,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status();
        let body = response.text().map_err(|e| AgentError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<OpenAIError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        parse_response(&body)
    }
}
