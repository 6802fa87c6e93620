//! Change deltas emitted by committed mutations.
//!
//! Every successful mutation produces exactly one [`ChangeDelta`] carrying the
//! session's next sequence number. Failed calls produce nothing and do not
//! consume a sequence number.

use serde::{Deserialize, Serialize};

use gridchat_core::{CellAddress, CellRange, CellValue};

use crate::sheet::Extent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDelta {
    pub session_id: String,
    /// Strictly increasing within a session, starting at 1.
    pub sequence: u64,
    pub change: DeltaChange,
    /// Sheet extent after the change.
    pub extent: Extent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellChange {
    pub row: usize,
    pub col: usize,
    pub value: CellValue,
}

/// What a committed mutation touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaChange {
    /// A full rectangle was overwritten; `values` matches the range shape.
    Cells {
        range: CellRange,
        values: Vec<Vec<CellValue>>,
    },
    /// Scattered cells changed. `ranges` covers `cells` and may cover more.
    Sparse {
        ranges: Vec<CellRange>,
        cells: Vec<CellChange>,
    },
    RowsInserted { at: usize, count: usize },
    /// `deleted` may be smaller than `requested` when the request ran past
    /// the end of the sheet. Rows `at..at + deleted` were removed.
    RowsDeleted { at: usize, requested: usize, deleted: usize },
    ColumnsInserted { at: usize, count: usize },
    ColumnsDeleted { at: usize, requested: usize, deleted: usize },
}

impl DeltaChange {
    pub fn kind(&self) -> &'static str {
        match self {
            DeltaChange::Cells { .. } => "cells",
            DeltaChange::Sparse { .. } => "sparse",
            DeltaChange::RowsInserted { .. } => "rows_inserted",
            DeltaChange::RowsDeleted { .. } => "rows_deleted",
            DeltaChange::ColumnsInserted { .. } => "columns_inserted",
            DeltaChange::ColumnsDeleted { .. } => "columns_deleted",
        }
    }

    /// True for changes that shift cells rather than overwrite them.
    pub fn is_structural(&self) -> bool {
        !matches!(self, DeltaChange::Cells { .. } | DeltaChange::Sparse { .. })
    }

    /// Number of cells whose value was written.
    pub fn cells_written(&self) -> usize {
        match self {
            DeltaChange::Cells { range, .. } => range.cell_count(),
            DeltaChange::Sparse { cells, .. } => cells.len(),
            _ => 0,
        }
    }

    /// Addresses of written cells, row-major for `Cells`.
    pub fn written_addresses(&self) -> Vec<CellAddress> {
        match self {
            DeltaChange::Cells { range, .. } => range.iter().collect(),
            DeltaChange::Sparse { cells, .. } => {
                cells.iter().map(|c| CellAddress::new(c.row, c.col)).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_json_shape() {
        let delta = ChangeDelta {
            session_id: "s1".into(),
            sequence: 3,
            change: DeltaChange::RowsDeleted { at: 2, requested: 5, deleted: 1 },
            extent: Extent { rows: 2, cols: 4 },
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["change"]["type"], "rows_deleted");
        assert_eq!(json["change"]["requested"], 5);
        assert_eq!(json["change"]["deleted"], 1);
        assert_eq!(json["extent"]["rows"], 2);

        let back: ChangeDelta = serde_json::from_value(json).unwrap();
        assert_eq!(back, delta);
    }

    #[test]
    fn test_written_addresses() {
        let change = DeltaChange::Cells {
            range: CellRange::parse("A1:B2").unwrap(),
            values: vec![vec![CellValue::Number(1.0); 2]; 2],
        };
        assert_eq!(change.cells_written(), 4);
        assert_eq!(change.written_addresses().len(), 4);
        assert!(!change.is_structural());
        assert!(DeltaChange::ColumnsInserted { at: 0, count: 1 }.is_structural());
    }
}
