//! Tool schemas in OpenAI function-tool shape.
//!
//! Names here must match the request names accepted by the dispatcher.

use serde_json::{json, Value};

pub const DESCRIBE_SHEET: &str = "describe_sheet";
pub const READ_RANGE: &str = "read_range";
pub const WRITE_RANGE: &str = "write_range";
pub const INSERT_ROWS: &str = "insert_rows";
pub const DELETE_ROWS: &str = "delete_rows";
pub const INSERT_COLUMNS: &str = "insert_columns";
pub const DELETE_COLUMNS: &str = "delete_columns";
pub const FIND_REPLACE: &str = "find_replace";
pub const AGGREGATE: &str = "aggregate";
pub const COLUMN_VALUES: &str = "column_values";
pub const FILTER_ROWS: &str = "filter_rows";
pub const LAST_FILLED_ROW: &str = "last_filled_row";

pub const TOOL_NAMES: &[&str] = &[
    DESCRIBE_SHEET,
    READ_RANGE,
    WRITE_RANGE,
    INSERT_ROWS,
    DELETE_ROWS,
    INSERT_COLUMNS,
    DELETE_COLUMNS,
    FIND_REPLACE,
    AGGREGATE,
    COLUMN_VALUES,
    FILTER_ROWS,
    LAST_FILLED_ROW,
];

fn range_schema(description: &str) -> Value {
    json!({
        "description": description,
        "anyOf": [
            {
                "type": "string",
                "description": "A1 reference such as \"B2:D10\" or a single cell \"C4\""
            },
            {
                "type": "object",
                "description": "Zero-based inclusive coordinates",
                "properties": {
                    "start_row": {"type": "integer", "minimum": 0},
                    "start_col": {"type": "integer", "minimum": 0},
                    "end_row": {"type": "integer", "minimum": 0},
                    "end_col": {"type": "integer", "minimum": 0}
                },
                "required": ["start_row", "start_col", "end_row", "end_col"],
                "additionalProperties": false
            }
        ]
    })
}

fn column_schema() -> Value {
    json!({
        "description": "Column letter (\"C\") or zero-based column index",
        "anyOf": [{"type": "string"}, {"type": "integer", "minimum": 0}]
    })
}

fn structural_params(what: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "at": {
                "type": "integer",
                "minimum": 0,
                "description": format!("Zero-based {} index", what)
            },
            "count": {
                "type": "integer",
                "minimum": 1,
                "default": 1,
                "description": format!("Number of {}s", what)
            }
        },
        "required": ["at"],
        "additionalProperties": false
    })
}

fn no_params() -> Value {
    json!({"type": "object", "properties": {}, "additionalProperties": false})
}

fn tool(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters
        }
    })
}

/// Every tool the agent may call, in a stable order.
pub fn tool_schemas() -> Vec<Value> {
    vec![
        tool(
            DESCRIBE_SHEET,
            "Sheet name, extent, used range, header row and a small sample of values.",
            no_params(),
        ),
        tool(
            READ_RANGE,
            "Read the cells of a rectangular range. The range must lie inside the sheet.",
            json!({
                "type": "object",
                "properties": {"range": range_schema("Range to read")},
                "required": ["range"],
                "additionalProperties": false
            }),
        ),
        tool(
            WRITE_RANGE,
            "Overwrite a rectangular range. `values` must have exactly the range's rows and columns. \
             The sheet grows to fit.",
            json!({
                "type": "object",
                "properties": {
                    "range": range_schema("Range to write"),
                    "values": {
                        "type": "array",
                        "description": "Rows of values; null clears a cell",
                        "items": {
                            "type": "array",
                            "items": {"type": ["string", "number", "boolean", "null"]}
                        }
                    }
                },
                "required": ["range", "values"],
                "additionalProperties": false
            }),
        ),
        tool(
            INSERT_ROWS,
            "Insert empty rows before `at`. Rows at or after `at` shift down. `at` may equal the row count to append.",
            structural_params("row"),
        ),
        tool(
            DELETE_ROWS,
            "Delete rows starting at `at`. Deleting past the last row removes only the rows that exist.",
            structural_params("row"),
        ),
        tool(
            INSERT_COLUMNS,
            "Insert empty columns before `at`. Columns at or after `at` shift right.",
            structural_params("column"),
        ),
        tool(
            DELETE_COLUMNS,
            "Delete columns starting at `at`. Deleting past the last column removes only the columns that exist.",
            structural_params("column"),
        ),
        tool(
            FIND_REPLACE,
            "Replace matching cell values in the whole sheet or in `range`. Returns the number of cells changed.",
            json!({
                "type": "object",
                "properties": {
                    "search": {"type": "string"},
                    "replace": {"type": "string"},
                    "range": range_schema("Optional scope; whole sheet when omitted")
                },
                "required": ["search", "replace"],
                "additionalProperties": false
            }),
        ),
        tool(
            AGGREGATE,
            "Compute sum, average, min, max or count over a range. Non-numeric cells are skipped \
             except by count, which counts every non-empty cell.",
            json!({
                "type": "object",
                "properties": {
                    "range": range_schema("Range to aggregate"),
                    "op": {"type": "string", "enum": ["sum", "average", "min", "max", "count"]}
                },
                "required": ["range", "op"],
                "additionalProperties": false
            }),
        ),
        tool(
            COLUMN_VALUES,
            "Values of one column from the first row through the last filled row.",
            json!({
                "type": "object",
                "properties": {"column": column_schema()},
                "required": ["column"],
                "additionalProperties": false
            }),
        ),
        tool(
            FILTER_ROWS,
            "Rows whose cell in `column` displays exactly as `value`.",
            json!({
                "type": "object",
                "properties": {
                    "column": column_schema(),
                    "value": {"type": ["string", "number", "boolean"]},
                    "limit": {"type": "integer", "minimum": 1, "default": 50}
                },
                "required": ["column", "value"],
                "additionalProperties": false
            }),
        ),
        tool(
            LAST_FILLED_ROW,
            "Zero-based index of the last row holding any value, or null for an empty sheet. \
             Use it before appending totals.",
            no_params(),
        ),
    ]
}
