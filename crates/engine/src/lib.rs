pub mod aggregate;
pub mod coalesce;
pub mod delta;
pub mod engine;
pub mod error;
pub mod sheet;

pub use aggregate::{AggregateOp, AggregateResult};
pub use delta::{CellChange, ChangeDelta, DeltaChange};
pub use engine::{FilteredRow, FindReplaceOutcome, SheetDescription, Snapshot, SnapshotCell, SpreadsheetEngine, MAX_READ_CELLS};
pub use error::EngineError;
pub use sheet::{Extent, Sheet, MAX_COLS, MAX_ROWS};
