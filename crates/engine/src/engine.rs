//! The canonical grid for one session.
//!
//! All mutation goes through [`SpreadsheetEngine`]. Each operation validates
//! its inputs before touching the sheet, so a failed call leaves state (and
//! the sequence counter) untouched.

use serde::{Deserialize, Serialize};

use gridchat_core::{Cell, CellAddress, CellRange, CellValue, InitialGrid, MatchMode};

use crate::aggregate::{self, AggregateOp, AggregateResult};
use crate::coalesce::coalesce_cells_to_ranges;
use crate::delta::{CellChange, ChangeDelta, DeltaChange};
use crate::error::EngineError;
use crate::sheet::{Extent, Sheet, MAX_COLS, MAX_ROWS};

pub type Result<T> = std::result::Result<T, EngineError>;

/// Largest range `read_range` will materialise in one call.
pub const MAX_READ_CELLS: usize = 100_000;

/// Read-only summary used by `describe_sheet` and the system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetDescription {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    /// A1 text of the bounding box of non-empty cells.
    pub used_range: Option<String>,
    pub last_filled_row: Option<usize>,
    /// Display text of row 0 inside the sample window.
    pub header: Vec<String>,
    pub sample: Vec<Vec<CellValue>>,
    pub sequence: u64,
}

/// One stored cell in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCell {
    pub row: usize,
    pub col: usize,
    pub cell: Cell,
}

/// Full state for late-joining observers. Cells not listed are empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session_id: String,
    pub name: String,
    pub sequence: u64,
    pub extent: Extent,
    /// Row-major.
    pub cells: Vec<SnapshotCell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FindReplaceOutcome {
    pub changed: usize,
    /// `None` when nothing changed.
    pub delta: Option<ChangeDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredRow {
    pub row: usize,
    pub values: Vec<CellValue>,
}

pub struct SpreadsheetEngine {
    session_id: String,
    sheet: Sheet,
    sequence: u64,
    match_mode: MatchMode,
}

impl SpreadsheetEngine {
    pub fn new(session_id: impl Into<String>, grid: InitialGrid, match_mode: MatchMode) -> Self {
        Self {
            session_id: session_id.into(),
            sheet: Sheet::from_grid(grid),
            sequence: 0,
            match_mode,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Sequence number of the last committed mutation (0 before any).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn extent(&self) -> Extent {
        self.sheet.extent()
    }

    pub fn sheet(&self) -> &Sheet {
        &self.sheet
    }

    pub fn match_mode(&self) -> MatchMode {
        self.match_mode
    }

    pub fn set_match_mode(&mut self, mode: MatchMode) {
        self.match_mode = mode;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn read_range(&self, range: CellRange) -> Result<Vec<Vec<Cell>>> {
        self.check_readable(range)?;
        if range.cell_count() > MAX_READ_CELLS {
            return Err(EngineError::InvalidArgument(format!(
                "{} has {} cells; at most {} can be read at once",
                range,
                range.cell_count(),
                MAX_READ_CELLS
            )));
        }
        Ok((range.start.row..=range.end.row)
            .map(|r| (range.start.col..=range.end.col).map(|c| self.sheet.cell(r, c)).collect())
            .collect())
    }

    pub fn aggregate(&self, range: CellRange, op: AggregateOp) -> Result<AggregateResult> {
        self.check_readable(range)?;
        let cells = self.sheet.non_empty_in(range);
        aggregate::compute(op, cells.into_iter().map(|(_, v)| v)).ok_or(EngineError::EmptyAggregate { op, range })
    }

    pub fn describe(&self, sample_rows: usize, sample_cols: usize) -> SheetDescription {
        let rows = self.sheet.rows().min(sample_rows);
        let cols = self.sheet.cols().min(sample_cols);
        let sample: Vec<Vec<CellValue>> = (0..rows)
            .map(|r| (0..cols).map(|c| self.sheet.value(r, c).clone()).collect())
            .collect();
        let header = sample
            .first()
            .map(|row| row.iter().map(|v| v.raw_display()).collect())
            .unwrap_or_default();

        SheetDescription {
            name: self.sheet.name.clone(),
            rows: self.sheet.rows(),
            cols: self.sheet.cols(),
            used_range: self.sheet.used_range().map(|r| r.to_string()),
            last_filled_row: self.last_filled_row(),
            header,
            sample,
            sequence: self.sequence,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            session_id: self.session_id.clone(),
            name: self.sheet.name.clone(),
            sequence: self.sequence,
            extent: self.sheet.extent(),
            cells: self
                .sheet
                .stored_cells()
                .into_iter()
                .map(|(addr, cell)| SnapshotCell { row: addr.row, col: addr.col, cell })
                .collect(),
        }
    }

    /// Zero-based index of the last row holding any non-empty cell.
    pub fn last_filled_row(&self) -> Option<usize> {
        self.sheet.non_empty().map(|(a, _)| a.row).max()
    }

    /// Values of one column from row 0 through the last filled row.
    pub fn column_values(&self, col: usize) -> Result<Vec<CellValue>> {
        if col >= self.sheet.cols() {
            return Err(EngineError::out_of_bounds(format!(
                "column {} is outside the sheet ({} columns)",
                col,
                self.sheet.cols()
            )));
        }
        let end = self.last_filled_row().map(|r| r + 1).unwrap_or(0);
        Ok((0..end).map(|r| self.sheet.value(r, col).clone()).collect())
    }

    /// Rows whose cell in `col` displays exactly as `value`, in row order.
    pub fn filter_rows(&self, col: usize, value: &str, limit: usize) -> Result<Vec<FilteredRow>> {
        if col >= self.sheet.cols() {
            return Err(EngineError::out_of_bounds(format!(
                "column {} is outside the sheet ({} columns)",
                col,
                self.sheet.cols()
            )));
        }
        let needle = value.trim();
        let mut rows: Vec<usize> = self
            .sheet
            .non_empty()
            .filter(|(a, v)| a.col == col && v.raw_display() == needle)
            .map(|(a, _)| a.row)
            .collect();
        rows.sort_unstable();
        rows.truncate(limit);

        Ok(rows
            .into_iter()
            .map(|r| FilteredRow {
                row: r,
                values: (0..self.sheet.cols()).map(|c| self.sheet.value(r, c).clone()).collect(),
            })
            .collect())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Overwrite `range` with `values`, which must match its shape exactly.
    /// The extent grows to cover the range.
    pub fn write_range(&mut self, range: CellRange, values: Vec<Vec<CellValue>>) -> Result<ChangeDelta> {
        let actual_rows = values.len();
        let actual_cols = values.first().map(|r| r.len()).unwrap_or(0);
        let ragged = values.iter().any(|r| r.len() != actual_cols);
        if ragged || actual_rows != range.row_count() || actual_cols != range.col_count() {
            return Err(EngineError::ShapeMismatch {
                expected_rows: range.row_count(),
                expected_cols: range.col_count(),
                actual_rows,
                actual_cols: if ragged { values.iter().map(|r| r.len()).max().unwrap_or(0) } else { actual_cols },
            });
        }
        if range.end.row >= MAX_ROWS || range.end.col >= MAX_COLS {
            return Err(EngineError::out_of_bounds(format!(
                "{} exceeds the maximum sheet size of {} rows x {} columns",
                range, MAX_ROWS, MAX_COLS
            )));
        }

        for (dr, row) in values.iter().enumerate() {
            for (dc, value) in row.iter().enumerate() {
                self.sheet.set_value(range.start.row + dr, range.start.col + dc, value.clone());
            }
        }

        Ok(self.commit(DeltaChange::Cells { range, values }))
    }

    pub fn insert_rows(&mut self, at: usize, count: usize) -> Result<ChangeDelta> {
        self.check_insert(at, count, self.sheet.rows(), MAX_ROWS, "row")?;
        self.sheet.insert_rows(at, count);
        Ok(self.commit(DeltaChange::RowsInserted { at, count }))
    }

    /// Delete up to `count` rows starting at `at`. Requests past the end are
    /// truncated; the delta records both the requested and deleted counts.
    pub fn delete_rows(&mut self, at: usize, count: usize) -> Result<ChangeDelta> {
        Self::check_delete(at, count, self.sheet.rows(), "row")?;
        let deleted = self.sheet.delete_rows(at, count);
        Ok(self.commit(DeltaChange::RowsDeleted { at, requested: count, deleted }))
    }

    pub fn insert_cols(&mut self, at: usize, count: usize) -> Result<ChangeDelta> {
        self.check_insert(at, count, self.sheet.cols(), MAX_COLS, "column")?;
        self.sheet.insert_cols(at, count);
        Ok(self.commit(DeltaChange::ColumnsInserted { at, count }))
    }

    /// Column counterpart of [`SpreadsheetEngine::delete_rows`].
    pub fn delete_cols(&mut self, at: usize, count: usize) -> Result<ChangeDelta> {
        Self::check_delete(at, count, self.sheet.cols(), "column")?;
        let deleted = self.sheet.delete_cols(at, count);
        Ok(self.commit(DeltaChange::ColumnsDeleted { at, requested: count, deleted }))
    }

    /// Replace matching cells inside `scope` (whole sheet when `None`).
    ///
    /// Replacement text is classified with [`CellValue::from_input`]. Cells
    /// whose value would not change are not counted, so repeating a call whose
    /// replacement does not contain the search text changes nothing.
    pub fn find_replace(
        &mut self,
        search: &str,
        replace: &str,
        scope: Option<CellRange>,
    ) -> Result<FindReplaceOutcome> {
        if search.is_empty() {
            return Err(EngineError::InvalidArgument("search value must not be empty".into()));
        }
        if let Some(range) = scope {
            self.check_readable(range)?;
        }

        let mode = self.match_mode;
        let mut changes: Vec<CellChange> = self
            .sheet
            .non_empty()
            .filter(|(addr, _)| scope.map_or(true, |r| r.contains(*addr)))
            .filter_map(|(addr, value)| {
                let replacement = match (mode, value) {
                    (MatchMode::Exact, v) if v.raw_display() == search => CellValue::from_input(replace),
                    (MatchMode::Substring, CellValue::Text(s)) if s.contains(search) => {
                        CellValue::from_input(&s.replace(search, replace))
                    }
                    _ => return None,
                };
                (replacement != *value).then_some(CellChange {
                    row: addr.row,
                    col: addr.col,
                    value: replacement,
                })
            })
            .collect();

        if changes.is_empty() {
            return Ok(FindReplaceOutcome { changed: 0, delta: None });
        }

        changes.sort_by_key(|c| (c.row, c.col));
        for change in &changes {
            self.sheet.set_value(change.row, change.col, change.value.clone());
        }

        let addrs: Vec<CellAddress> = changes.iter().map(|c| CellAddress::new(c.row, c.col)).collect();
        let changed = changes.len();
        let delta = self.commit(DeltaChange::Sparse {
            ranges: coalesce_cells_to_ranges(&addrs),
            cells: changes,
        });
        Ok(FindReplaceOutcome { changed, delta: Some(delta) })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn commit(&mut self, change: DeltaChange) -> ChangeDelta {
        self.sequence += 1;
        ChangeDelta {
            session_id: self.session_id.clone(),
            sequence: self.sequence,
            change,
            extent: self.sheet.extent(),
        }
    }

    fn check_readable(&self, range: CellRange) -> Result<()> {
        if range.fits_within(self.sheet.rows(), self.sheet.cols()) {
            Ok(())
        } else {
            Err(EngineError::out_of_bounds(format!(
                "{} is outside the sheet ({} rows x {} columns)",
                range,
                self.sheet.rows(),
                self.sheet.cols()
            )))
        }
    }

    fn check_insert(&self, at: usize, count: usize, extent: usize, max: usize, what: &str) -> Result<()> {
        if count == 0 {
            return Err(EngineError::out_of_bounds(format!("{} count must be at least 1", what)));
        }
        if at > extent {
            return Err(EngineError::out_of_bounds(format!(
                "cannot insert at {} {}; the sheet has {}",
                what, at, extent
            )));
        }
        if extent.saturating_add(count) > max {
            return Err(EngineError::out_of_bounds(format!(
                "inserting {} {}s would exceed the maximum of {}",
                count, what, max
            )));
        }
        Ok(())
    }

    fn check_delete(at: usize, count: usize, extent: usize, what: &str) -> Result<()> {
        if count == 0 {
            return Err(EngineError::out_of_bounds(format!("{} count must be at least 1", what)));
        }
        if at >= extent {
            return Err(EngineError::out_of_bounds(format!(
                "cannot delete at {} {}; the sheet has {}",
                what, at, extent
            )));
        }
        Ok(())
    }
}
