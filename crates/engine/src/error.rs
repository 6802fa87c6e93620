use gridchat_core::{CellRange, ReferenceError};

use crate::aggregate::AggregateOp;

/// Failures from engine operations. A failed call never changes state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error(
        "shape mismatch: range is {expected_rows}x{expected_cols} but values are {actual_rows}x{actual_cols}"
    )]
    ShapeMismatch {
        expected_rows: usize,
        expected_cols: usize,
        actual_rows: usize,
        actual_cols: usize,
    },

    #[error("no numeric cells in {range} for {op}")]
    EmptyAggregate { op: AggregateOp, range: CellRange },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Reference(e) => e.code(),
            EngineError::OutOfBounds(_) => "out_of_bounds",
            EngineError::ShapeMismatch { .. } => "shape_mismatch",
            EngineError::EmptyAggregate { .. } => "empty_aggregate",
            EngineError::InvalidArgument(_) => "invalid_argument",
        }
    }

    pub(crate) fn out_of_bounds(msg: impl Into<String>) -> Self {
        EngineError::OutOfBounds(msg.into())
    }
}
