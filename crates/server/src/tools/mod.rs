//! Tool vocabulary exposed to the reasoning agent.

pub mod dispatcher;
pub mod schema;

pub use dispatcher::{result_json, RangeArg, ToolDispatcher, ToolError, ToolOutput, ToolRequest};
pub use schema::{tool_schemas, TOOL_NAMES};
