//! The tool-calling loop for one chat turn.
//!
//! A turn is a small state machine:
//!
//! ```text
//! AwaitingAgent --tool calls--> ExecutingTools --results--> AwaitingAgent
//!       |                              |
//!       +--final text--> Done          +--cancel--> Failed
//!       +--cap / agent error / cancel--> Failed
//! ```
//!
//! Every agent call counts one iteration against the cap. Cancellation is
//! checked before each agent call and before each tool dispatch. Changes that
//! were already committed stay committed; on failure only the transcript is
//! rolled back, to the user message plus one assistant note.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use gridchat_engine::ChangeDelta;
use gridchat_protocol::codes;

use crate::ai::{AgentError, ReasoningAgent};
use crate::session::history::{History, Message, ToolCall};
use crate::tools::{result_json, tool_schemas, ToolDispatcher};

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_MAX_TOOL_RESULT_CHARS: usize = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingAgent,
    ExecutingTools,
    Done,
    Failed,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Done | TurnState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TurnError {
    #[error("the agent did not finish within {max_iterations} iterations")]
    LoopExceeded { max_iterations: u32 },

    #[error("reasoning agent failed: {0}")]
    Agent(#[from] AgentError),

    #[error("turn cancelled")]
    Cancelled,
}

impl TurnError {
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::LoopExceeded { .. } => codes::AGENT_LOOP_EXCEEDED,
            TurnError::Agent(e) => e.code(),
            TurnError::Cancelled => codes::TURN_CANCELLED,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub reply: String,
    /// Deltas committed during the turn, in sequence order.
    pub deltas: Vec<ChangeDelta>,
    pub iterations: u32,
    pub tool_calls: usize,
}

/// A failed turn. Deltas committed before the failure are still listed.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnFailure {
    pub error: TurnError,
    /// The assistant note left in the transcript.
    pub note: String,
    pub deltas: Vec<ChangeDelta>,
    pub iterations: u32,
}

/// Mutable state threaded through one turn.
struct TurnProgress {
    state: TurnState,
    iterations: u32,
    pending: Vec<ToolCall>,
    deltas: Vec<ChangeDelta>,
    tool_calls: usize,
    reply: Option<String>,
}

pub struct AgentOrchestrator {
    agent: Arc<dyn ReasoningAgent>,
    dispatcher: ToolDispatcher,
    tools: Vec<Value>,
    max_iterations: u32,
    max_tool_result_chars: usize,
}

impl AgentOrchestrator {
    pub fn new(agent: Arc<dyn ReasoningAgent>, dispatcher: ToolDispatcher) -> Self {
        Self {
            agent,
            dispatcher,
            tools: tool_schemas(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tool_result_chars: DEFAULT_MAX_TOOL_RESULT_CHARS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_max_tool_result_chars(mut self, chars: usize) -> Self {
        self.max_tool_result_chars = chars.max(64);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Run one chat turn to completion.
    pub fn run_turn(&self, history: &mut History, text: &str, cancel: &AtomicBool) -> Result<TurnOutcome, TurnFailure> {
        let session_id = self.dispatcher.session_id();
        let mark = history.len();
        history.push(Message::user(text));

        let mut progress = TurnProgress {
            state: TurnState::AwaitingAgent,
            iterations: 0,
            pending: Vec::new(),
            deltas: Vec::new(),
            tool_calls: 0,
            reply: None,
        };

        let mut failure = None;
        while !progress.state.is_terminal() {
            let step = match progress.state {
                TurnState::AwaitingAgent => self.await_agent(history, cancel, &mut progress),
                TurnState::ExecutingTools => self.execute_tools(history, cancel, &mut progress),
                TurnState::Done | TurnState::Failed => break,
            };
            match step {
                Ok(next) => progress.state = next,
                Err(err) => {
                    failure = Some(err);
                    progress.state = TurnState::Failed;
                }
            }
        }

        match (progress.state, failure) {
            (TurnState::Done, None) => {
                log::info!(
                    "session {}: turn done after {} iterations, {} tool calls, {} changes",
                    session_id,
                    progress.iterations,
                    progress.tool_calls,
                    progress.deltas.len()
                );
                Ok(TurnOutcome {
                    reply: progress.reply.unwrap_or_default(),
                    deltas: progress.deltas,
                    iterations: progress.iterations,
                    tool_calls: progress.tool_calls,
                })
            }
            (_, failure) => {
                let error = failure.unwrap_or(TurnError::Cancelled);
                log::warn!("session {}: turn failed: {}", session_id, error);
                let note = failure_note(&error, progress.deltas.len());
                history.truncate(mark + 1);
                history.push(Message::assistant(note.clone()));
                Err(TurnFailure {
                    error,
                    note,
                    deltas: progress.deltas,
                    iterations: progress.iterations,
                })
            }
        }
    }

    fn await_agent(
        &self,
        history: &mut History,
        cancel: &AtomicBool,
        progress: &mut TurnProgress,
    ) -> Result<TurnState, TurnError> {
        if progress.iterations >= self.max_iterations {
            return Err(TurnError::LoopExceeded {
                max_iterations: self.max_iterations,
            });
        }
        if cancel.load(Ordering::SeqCst) {
            return Err(TurnError::Cancelled);
        }
        progress.iterations += 1;

        let reply = self.agent.complete(history.messages(), &self.tools);
        // The origin may have gone away while the agent was thinking
        if cancel.load(Ordering::SeqCst) {
            return Err(TurnError::Cancelled);
        }
        let reply = reply?;

        if reply.tool_calls.is_empty() {
            let text = reply.content.unwrap_or_default();
            history.push(Message::assistant(text.clone()));
            progress.reply = Some(text);
            return Ok(TurnState::Done);
        }

        history.push(Message::assistant_tool_calls(reply.content, reply.tool_calls.clone()));
        progress.pending = reply.tool_calls;
        Ok(TurnState::ExecutingTools)
    }

    /// Run the pending calls in the order the agent gave them.
    fn execute_tools(
        &self,
        history: &mut History,
        cancel: &AtomicBool,
        progress: &mut TurnProgress,
    ) -> Result<TurnState, TurnError> {
        for call in std::mem::take(&mut progress.pending) {
            if cancel.load(Ordering::SeqCst) {
                return Err(TurnError::Cancelled);
            }
            let outcome = self.dispatcher.dispatch(&call.name, &call.arguments);
            progress.tool_calls += 1;
            if let Ok(output) = &outcome {
                if let Some(delta) = &output.delta {
                    progress.deltas.push(delta.clone());
                }
            }
            let body = self.clip_result(result_json(&outcome));
            history.push(Message::tool_result(call.id, body));
        }
        Ok(TurnState::AwaitingAgent)
    }

    /// Oversized results are replaced by a prefix so the agent knows to ask
    /// for a smaller range.
    fn clip_result(&self, body: Value) -> String {
        let text = body.to_string();
        if text.chars().count() <= self.max_tool_result_chars {
            return text;
        }
        let preview: String = text.chars().take(self.max_tool_result_chars).collect();
        json!({
            "ok": body["ok"],
            "truncated": true,
            "note": "result too large; request a smaller range",
            "preview": preview,
        })
        .to_string()
    }
}

fn failure_note(error: &TurnError, committed: usize) -> String {
    let what = match error {
        TurnError::LoopExceeded { max_iterations } => {
            format!("I could not finish this request within {} steps.", max_iterations)
        }
        TurnError::Agent(e) => format!("The assistant service failed: {}.", e),
        TurnError::Cancelled => "This request was cancelled.".to_string(),
    };
    if committed == 0 {
        format!("{} No changes were made.", what)
    } else {
        format!("{} {} change(s) made before the failure were kept.", what, committed)
    }
}
