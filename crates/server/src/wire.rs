//! Engine types to wire types.

use gridchat_core::CellRange;
use gridchat_engine::{ChangeDelta, DeltaChange, Extent, Snapshot};
use gridchat_protocol::{
    self as protocol, CellUpdate, EventPayload, RangeRef, SnapshotCell, SnapshotPayload, WireChange,
};

pub fn range_ref(range: &CellRange) -> RangeRef {
    RangeRef {
        r1: range.start.row,
        c1: range.start.col,
        r2: range.end.row,
        c2: range.end.col,
    }
}

pub fn extent(extent: Extent) -> protocol::Extent {
    protocol::Extent {
        rows: extent.rows,
        cols: extent.cols,
    }
}

pub fn change(change: &DeltaChange) -> WireChange {
    match change {
        DeltaChange::Cells { range, values } => WireChange::Cells {
            range: range_ref(range),
            values: values.clone(),
        },
        DeltaChange::Sparse { ranges, cells } => WireChange::Sparse {
            ranges: ranges.iter().map(range_ref).collect(),
            cells: cells
                .iter()
                .map(|c| CellUpdate {
                    row: c.row,
                    col: c.col,
                    value: c.value.clone(),
                })
                .collect(),
        },
        DeltaChange::RowsInserted { at, count } => WireChange::RowsInserted { at: *at, count: *count },
        DeltaChange::RowsDeleted { at, requested, deleted } => WireChange::RowsDeleted {
            at: *at,
            requested: *requested,
            deleted: *deleted,
        },
        DeltaChange::ColumnsInserted { at, count } => WireChange::ColumnsInserted { at: *at, count: *count },
        DeltaChange::ColumnsDeleted { at, requested, deleted } => WireChange::ColumnsDeleted {
            at: *at,
            requested: *requested,
            deleted: *deleted,
        },
    }
}

pub fn state_delta(delta: &ChangeDelta) -> EventPayload {
    EventPayload::StateDelta {
        sequence: delta.sequence,
        change: change(&delta.change),
        extent: extent(delta.extent),
    }
}

pub fn snapshot(snapshot: Snapshot) -> SnapshotPayload {
    SnapshotPayload {
        session_id: snapshot.session_id,
        name: snapshot.name,
        sequence: snapshot.sequence,
        extent: extent(snapshot.extent),
        cells: snapshot
            .cells
            .into_iter()
            .map(|c| SnapshotCell {
                row: c.row,
                col: c.col,
                value: c.cell.value,
                format: c.cell.format,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridchat_core::{CellAddress, CellValue};
    use gridchat_engine::CellChange;

    #[test]
    fn test_state_delta_uses_inclusive_coordinates() {
        let delta = ChangeDelta {
            session_id: "s".into(),
            sequence: 7,
            change: DeltaChange::Cells {
                range: CellRange::parse("B2:C3").unwrap(),
                values: vec![vec![CellValue::Number(1.0); 2]; 2],
            },
            extent: Extent { rows: 5, cols: 5 },
        };
        match state_delta(&delta) {
            EventPayload::StateDelta { sequence, change: WireChange::Cells { range, .. }, extent } => {
                assert_eq!(sequence, 7);
                assert_eq!(range, RangeRef { r1: 1, c1: 1, r2: 2, c2: 2 });
                assert_eq!(extent.rows, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sparse_change() {
        let change = change(&DeltaChange::Sparse {
            ranges: vec![CellRange::cell(CellAddress::new(4, 0))],
            cells: vec![CellChange { row: 4, col: 0, value: CellValue::Text("x".into()) }],
        });
        assert_eq!(
            change,
            WireChange::Sparse {
                ranges: vec![RangeRef { r1: 4, c1: 0, r2: 4, c2: 0 }],
                cells: vec![CellUpdate { row: 4, col: 0, value: CellValue::Text("x".into()) }],
            }
        );
    }

    #[test]
    fn test_snapshot_keeps_format_hints() {
        let snap = Snapshot {
            session_id: "s".into(),
            name: "t".into(),
            sequence: 3,
            extent: Extent { rows: 10, cols: 4 },
            cells: vec![gridchat_engine::SnapshotCell {
                row: 9,
                col: 3,
                cell: gridchat_core::Cell::with_format(
                    CellValue::Number(0.25),
                    gridchat_core::NumberFormat::Percent { decimals: 0 },
                ),
            }],
        };
        let payload = snapshot(snap);
        assert_eq!(payload.extent.rows, 10);
        assert_eq!(payload.cells.len(), 1);
        assert_eq!((payload.cells[0].row, payload.cells[0].col), (9, 3));
        assert_eq!(payload.cells[0].format, gridchat_core::NumberFormat::Percent { decimals: 0 });
    }
}
