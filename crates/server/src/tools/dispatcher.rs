//! Tool dispatch.
//!
//! Agent tool calls arrive as a name plus loosely-typed JSON. They are decoded
//! into a closed [`ToolRequest`] (unknown fields rejected, indices checked)
//! before anything touches the engine, then executed under the session's
//! engine lock. Every committed delta is published while that lock is still
//! held, so observers see deltas in sequence order.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use gridchat_core::{col_to_letters, letters_to_col, CellAddress, CellRange, CellValue, ReferenceError};
use gridchat_engine::{AggregateOp, ChangeDelta, EngineError, SpreadsheetEngine};
use gridchat_protocol::codes;

use crate::session::broadcast::SyncBroadcaster;
use crate::tools::schema;
use crate::wire;

const DEFAULT_FILTER_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArgument { tool: String, message: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => codes::UNKNOWN_TOOL,
            ToolError::InvalidArgument { .. } => codes::INVALID_ARGUMENT,
            ToolError::Engine(e) => e.code(),
        }
    }

    fn invalid(tool: &str, message: impl Into<String>) -> Self {
        ToolError::InvalidArgument {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// A range given either as A1 text or as zero-based coordinates.
///
/// A1 text is normalised (`"C3:A1"` reads as `"A1:C3"`). Coordinates are taken
/// literally and an inverted pair is a range-order error.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RangeArg {
    A1(String),
    Coords(CoordRange),
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordRange {
    pub start_row: i64,
    pub start_col: i64,
    pub end_row: i64,
    pub end_col: i64,
}

impl RangeArg {
    pub fn resolve(&self) -> Result<CellRange, EngineError> {
        match self {
            RangeArg::A1(text) => Ok(CellRange::parse(text)?),
            RangeArg::Coords(c) => {
                let start = CellAddress::new(index("start_row", c.start_row)?, index("start_col", c.start_col)?);
                let end = CellAddress::new(index("end_row", c.end_row)?, index("end_col", c.end_col)?);
                Ok(CellRange::new(start, end)?)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ColumnArg {
    Index(i64),
    Letters(String),
}

impl ColumnArg {
    pub fn resolve(&self) -> Result<usize, EngineError> {
        match self {
            ColumnArg::Index(i) => index("column", *i),
            ColumnArg::Letters(s) => letters_to_col(s.trim())
                .ok_or_else(|| ReferenceError::Invalid(format!("'{}' is not a column name", s)).into()),
        }
    }
}

fn index(field: &str, value: i64) -> Result<usize, EngineError> {
    usize::try_from(value)
        .map_err(|_| EngineError::OutOfBounds(format!("{} must be zero or greater, got {}", field, value)))
}

fn default_count() -> i64 {
    1
}

fn default_limit() -> usize {
    DEFAULT_FILTER_LIMIT
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeArgs {
    pub range: RangeArg,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteRangeArgs {
    pub range: RangeArg,
    pub values: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuralArgs {
    pub at: i64,
    #[serde(default = "default_count")]
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindReplaceArgs {
    pub search: String,
    pub replace: String,
    #[serde(default)]
    pub range: Option<RangeArg>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateArgs {
    pub range: RangeArg,
    pub op: AggregateOp,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnArgs {
    pub column: ColumnArg,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterRowsArgs {
    pub column: ColumnArg,
    pub value: Value,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// The closed set of operations the agent can request.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    DescribeSheet,
    ReadRange(RangeArgs),
    WriteRange(WriteRangeArgs),
    InsertRows(StructuralArgs),
    DeleteRows(StructuralArgs),
    InsertColumns(StructuralArgs),
    DeleteColumns(StructuralArgs),
    FindReplace(FindReplaceArgs),
    Aggregate(AggregateArgs),
    ColumnValues(ColumnArgs),
    FilterRows(FilterRowsArgs),
    LastFilledRow,
}

impl ToolRequest {
    /// Decode a tool call. `arguments` is the raw JSON text from the agent;
    /// blank text and `null` mean no arguments.
    pub fn parse(name: &str, arguments: &str) -> Result<Self, ToolError> {
        if !schema::TOOL_NAMES.contains(&name) {
            return Err(ToolError::UnknownTool(name.to_string()));
        }
        let args = if arguments.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            match serde_json::from_str::<Value>(arguments) {
                Ok(Value::Null) => Value::Object(Map::new()),
                Ok(v) => v,
                Err(e) => return Err(ToolError::invalid(name, format!("arguments are not valid JSON: {}", e))),
            }
        };

        let request = match name {
            schema::DESCRIBE_SHEET => decode::<NoArgs>(name, args).map(|_| ToolRequest::DescribeSheet)?,
            schema::READ_RANGE => ToolRequest::ReadRange(decode(name, args)?),
            schema::WRITE_RANGE => ToolRequest::WriteRange(decode(name, args)?),
            schema::INSERT_ROWS => ToolRequest::InsertRows(decode(name, args)?),
            schema::DELETE_ROWS => ToolRequest::DeleteRows(decode(name, args)?),
            schema::INSERT_COLUMNS => ToolRequest::InsertColumns(decode(name, args)?),
            schema::DELETE_COLUMNS => ToolRequest::DeleteColumns(decode(name, args)?),
            schema::FIND_REPLACE => ToolRequest::FindReplace(decode(name, args)?),
            schema::AGGREGATE => ToolRequest::Aggregate(decode(name, args)?),
            schema::COLUMN_VALUES => ToolRequest::ColumnValues(decode(name, args)?),
            schema::FILTER_ROWS => ToolRequest::FilterRows(decode(name, args)?),
            schema::LAST_FILLED_ROW => decode::<NoArgs>(name, args).map(|_| ToolRequest::LastFilledRow)?,
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };
        Ok(request)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::DescribeSheet => schema::DESCRIBE_SHEET,
            ToolRequest::ReadRange(_) => schema::READ_RANGE,
            ToolRequest::WriteRange(_) => schema::WRITE_RANGE,
            ToolRequest::InsertRows(_) => schema::INSERT_ROWS,
            ToolRequest::DeleteRows(_) => schema::DELETE_ROWS,
            ToolRequest::InsertColumns(_) => schema::INSERT_COLUMNS,
            ToolRequest::DeleteColumns(_) => schema::DELETE_COLUMNS,
            ToolRequest::FindReplace(_) => schema::FIND_REPLACE,
            ToolRequest::Aggregate(_) => schema::AGGREGATE,
            ToolRequest::ColumnValues(_) => schema::COLUMN_VALUES,
            ToolRequest::FilterRows(_) => schema::FILTER_ROWS,
            ToolRequest::LastFilledRow => schema::LAST_FILLED_ROW,
        }
    }
}

fn decode<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::invalid(tool, e.to_string()))
}

/// JSON scalar to cell value. Strings are classified like typed input.
fn cell_value(tool: &str, value: &Value) -> Result<CellValue, ToolError> {
    match value {
        Value::Null => Ok(CellValue::Empty),
        Value::Bool(b) => Ok(CellValue::Boolean(*b)),
        Value::Number(n) => n
            .as_f64()
            .map(CellValue::Number)
            .ok_or_else(|| ToolError::invalid(tool, format!("{} is not a representable number", n))),
        Value::String(s) => Ok(CellValue::from_input(s)),
        Value::Array(_) | Value::Object(_) => {
            Err(ToolError::invalid(tool, "cell values must be strings, numbers, booleans or null"))
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Successful tool execution. `delta` is set when the call committed a change.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub result: Value,
    pub delta: Option<ChangeDelta>,
}

impl ToolOutput {
    fn read(result: Value) -> Self {
        Self { result, delta: None }
    }
}

/// JSON handed back to the agent as the tool result.
pub fn result_json(outcome: &Result<ToolOutput, ToolError>) -> Value {
    match outcome {
        Ok(output) => {
            let mut body = json!({"ok": true, "result": output.result});
            if let Some(delta) = &output.delta {
                body["sequence"] = json!(delta.sequence);
            }
            body
        }
        Err(err) => json!({
            "ok": false,
            "error": {"code": err.code(), "message": err.to_string()}
        }),
    }
}

/// Executes tool calls against one session's engine. A dispatcher only ever
/// holds its own session's engine and broadcaster.
#[derive(Clone)]
pub struct ToolDispatcher {
    session_id: String,
    engine: Arc<Mutex<SpreadsheetEngine>>,
    broadcaster: Arc<SyncBroadcaster>,
    sample_rows: usize,
    sample_cols: usize,
}

impl ToolDispatcher {
    pub fn new(engine: Arc<Mutex<SpreadsheetEngine>>, broadcaster: Arc<SyncBroadcaster>) -> Self {
        let session_id = engine.lock().session_id().to_string();
        Self {
            session_id,
            engine,
            broadcaster,
            sample_rows: 10,
            sample_cols: 12,
        }
    }

    /// Size of the `describe_sheet` sample.
    pub fn with_sample(mut self, rows: usize, cols: usize) -> Self {
        self.sample_rows = rows;
        self.sample_cols = cols;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn dispatch(&self, name: &str, arguments: &str) -> Result<ToolOutput, ToolError> {
        let request = ToolRequest::parse(name, arguments)?;
        self.execute(request)
    }

    pub fn execute(&self, request: ToolRequest) -> Result<ToolOutput, ToolError> {
        let tool = request.name();
        let mut engine = self.engine.lock();

        let output = match request {
            ToolRequest::DescribeSheet => {
                let description = engine.describe(self.sample_rows, self.sample_cols);
                ToolOutput::read(json!(description))
            }
            ToolRequest::ReadRange(args) => {
                let range = args.range.resolve()?;
                let cells = engine.read_range(range)?;
                let values: Vec<Vec<&CellValue>> =
                    cells.iter().map(|row| row.iter().map(|c| &c.value).collect()).collect();
                let mut result = json!({"range": range.to_string(), "values": values});
                if cells.iter().flatten().any(|c| !c.format.is_general()) {
                    let display: Vec<Vec<String>> =
                        cells.iter().map(|row| row.iter().map(|c| c.formatted()).collect()).collect();
                    result["display"] = json!(display);
                }
                ToolOutput::read(result)
            }
            ToolRequest::WriteRange(args) => {
                let range = args.range.resolve()?;
                let values = args
                    .values
                    .iter()
                    .map(|row| row.iter().map(|v| cell_value(tool, v)).collect::<Result<Vec<_>, _>>())
                    .collect::<Result<Vec<_>, _>>()?;
                let delta = engine.write_range(range, values)?;
                let result = json!({
                    "range": range.to_string(),
                    "cells_written": delta.change.cells_written(),
                });
                ToolOutput { result, delta: Some(delta) }
            }
            ToolRequest::InsertRows(args) => {
                let (at, count) = structural(&args)?;
                structural_output(engine.insert_rows(at, count)?)
            }
            ToolRequest::DeleteRows(args) => {
                let (at, count) = structural(&args)?;
                structural_output(engine.delete_rows(at, count)?)
            }
            ToolRequest::InsertColumns(args) => {
                let (at, count) = structural(&args)?;
                structural_output(engine.insert_cols(at, count)?)
            }
            ToolRequest::DeleteColumns(args) => {
                let (at, count) = structural(&args)?;
                structural_output(engine.delete_cols(at, count)?)
            }
            ToolRequest::FindReplace(args) => {
                let scope = args.range.as_ref().map(RangeArg::resolve).transpose()?;
                let outcome = engine.find_replace(&args.search, &args.replace, scope)?;
                ToolOutput {
                    result: json!({"changed": outcome.changed}),
                    delta: outcome.delta,
                }
            }
            ToolRequest::Aggregate(args) => {
                let range = args.range.resolve()?;
                let aggregate = engine.aggregate(range, args.op)?;
                let mut result = json!(aggregate);
                result["range"] = json!(range.to_string());
                ToolOutput::read(result)
            }
            ToolRequest::ColumnValues(args) => {
                let col = args.column.resolve()?;
                let values = engine.column_values(col)?;
                ToolOutput::read(json!({"column": col_to_letters(col), "values": values}))
            }
            ToolRequest::FilterRows(args) => {
                let col = args.column.resolve()?;
                if args.limit == 0 {
                    return Err(ToolError::invalid(tool, "limit must be at least 1"));
                }
                let needle = match &args.value {
                    Value::String(s) => s.clone(),
                    other @ (Value::Number(_) | Value::Bool(_)) => cell_value(tool, other)?.raw_display(),
                    _ => return Err(ToolError::invalid(tool, "value must be a string, number or boolean")),
                };
                let rows = engine.filter_rows(col, &needle, args.limit)?;
                ToolOutput::read(json!({"column": col_to_letters(col), "matches": rows}))
            }
            ToolRequest::LastFilledRow => ToolOutput::read(json!({"last_filled_row": engine.last_filled_row()})),
        };

        if let Some(delta) = &output.delta {
            log::debug!(
                "session {}: {} committed sequence {} ({})",
                self.session_id,
                tool,
                delta.sequence,
                delta.change.kind()
            );
            self.broadcaster.publish(wire::state_delta(delta));
        } else {
            log::debug!("session {}: {} (read)", self.session_id, tool);
        }
        Ok(output)
    }
}

fn structural(args: &StructuralArgs) -> Result<(usize, usize), EngineError> {
    Ok((index("at", args.at)?, index("count", args.count)?))
}

fn structural_output(delta: ChangeDelta) -> ToolOutput {
    let result = json!({"change": delta.change, "extent": delta.extent});
    ToolOutput { result, delta: Some(delta) }
}
