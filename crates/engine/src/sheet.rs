use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use gridchat_core::{Cell, CellRange, CellValue, CellAddress, InitialGrid};

/// Hard extent limits, matching common desktop spreadsheet limits.
pub const MAX_ROWS: usize = 1_048_576;
pub const MAX_COLS: usize = 16_384;

static EMPTY: CellValue = CellValue::Empty;

/// Declared sheet size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub rows: usize,
    pub cols: usize,
}

/// Sparse cell storage with a declared extent.
///
/// INVARIANT: every stored cell lies inside `rows x cols`.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    cells: FxHashMap<(usize, usize), Cell>,
    rows: usize,
    cols: usize,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: usize, cols: usize) -> Self {
        Self {
            name: name.into(),
            cells: FxHashMap::default(),
            rows: rows.min(MAX_ROWS),
            cols: cols.min(MAX_COLS),
        }
    }

    /// Build from a parsed upload. Data past the hard limits is dropped.
    pub fn from_grid(mut grid: InitialGrid) -> Self {
        grid.normalize_extent();
        let mut sheet = Sheet::new(grid.name, grid.row_count, grid.col_count);
        for (r, row) in grid.rows.into_iter().enumerate().take(MAX_ROWS) {
            for (c, cell) in row.into_iter().enumerate().take(MAX_COLS) {
                if !cell.is_empty() || !cell.format.is_general() {
                    sheet.cells.insert((r, c), cell);
                }
            }
        }
        sheet
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn extent(&self) -> Extent {
        Extent { rows: self.rows, cols: self.cols }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    pub fn value(&self, row: usize, col: usize) -> &CellValue {
        self.cells.get(&(row, col)).map(|c| &c.value).unwrap_or(&EMPTY)
    }

    pub fn cell(&self, row: usize, col: usize) -> Cell {
        self.cells.get(&(row, col)).cloned().unwrap_or_default()
    }

    /// Set a value, keeping any format hint, and grow the extent to cover it.
    ///
    /// Callers are responsible for staying inside [`MAX_ROWS`]/[`MAX_COLS`].
    pub fn set_value(&mut self, row: usize, col: usize, value: CellValue) {
        self.rows = self.rows.max(row + 1);
        self.cols = self.cols.max(col + 1);

        match self.cells.get_mut(&(row, col)) {
            Some(cell) => {
                cell.value = value;
                if cell.is_empty() && cell.format.is_general() {
                    self.cells.remove(&(row, col));
                }
            }
            None if value.is_empty() => {}
            None => {
                self.cells.insert((row, col), Cell::new(value));
            }
        }
    }

    /// Non-empty cells, unordered.
    pub fn non_empty(&self) -> impl Iterator<Item = (CellAddress, &CellValue)> {
        self.cells
            .iter()
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(&(r, c), cell)| (CellAddress::new(r, c), &cell.value))
    }

    /// Bounding box of all non-empty cells.
    pub fn used_range(&self) -> Option<CellRange> {
        let mut iter = self.non_empty().map(|(addr, _)| addr);
        let first = iter.next()?;
        let (mut min_r, mut min_c, mut max_r, mut max_c) = (first.row, first.col, first.row, first.col);
        for addr in iter {
            min_r = min_r.min(addr.row);
            min_c = min_c.min(addr.col);
            max_r = max_r.max(addr.row);
            max_c = max_c.max(addr.col);
        }
        Some(CellRange::normalized(
            CellAddress::new(min_r, min_c),
            CellAddress::new(max_r, max_c),
        ))
    }

    /// Insert rows at the specified position, shifting existing rows down.
    pub fn insert_rows(&mut self, at_row: usize, count: usize) {
        let cells_to_shift: Vec<_> = self
            .cells
            .iter()
            .filter(|((r, _), _)| *r >= at_row)
            .map(|(&(r, c), _)| (r, c))
            .collect();

        let moved: Vec<_> = cells_to_shift
            .into_iter()
            .filter_map(|(r, c)| self.cells.remove(&(r, c)).map(|cell| ((r + count, c), cell)))
            .collect();
        self.cells.extend(moved);
        self.rows += count;
    }

    /// Delete rows at the specified position, shifting remaining rows up.
    ///
    /// Deletes at most the rows that exist; returns how many were removed.
    pub fn delete_rows(&mut self, start_row: usize, count: usize) -> usize {
        let count = count.min(self.rows.saturating_sub(start_row));
        let end = start_row + count;

        self.cells.retain(|&(r, _), _| r < start_row || r >= end);

        let cells_to_shift: Vec<_> = self
            .cells
            .keys()
            .filter(|(r, _)| *r >= end)
            .copied()
            .collect();
        let moved: Vec<_> = cells_to_shift
            .into_iter()
            .filter_map(|(r, c)| self.cells.remove(&(r, c)).map(|cell| ((r - count, c), cell)))
            .collect();
        self.cells.extend(moved);
        self.rows -= count;
        count
    }

    /// Insert columns at the specified position, shifting existing columns right.
    pub fn insert_cols(&mut self, at_col: usize, count: usize) {
        let cells_to_shift: Vec<_> = self
            .cells
            .keys()
            .filter(|(_, c)| *c >= at_col)
            .copied()
            .collect();

        let moved: Vec<_> = cells_to_shift
            .into_iter()
            .filter_map(|(r, c)| self.cells.remove(&(r, c)).map(|cell| ((r, c + count), cell)))
            .collect();
        self.cells.extend(moved);
        self.cols += count;
    }

    /// Delete columns at the specified position, shifting remaining columns left.
    ///
    /// Deletes at most the columns that exist; returns how many were removed.
    pub fn delete_cols(&mut self, start_col: usize, count: usize) -> usize {
        let count = count.min(self.cols.saturating_sub(start_col));
        let end = start_col + count;

        self.cells.retain(|&(_, c), _| c < start_col || c >= end);

        let cells_to_shift: Vec<_> = self
            .cells
            .keys()
            .filter(|(_, c)| *c >= end)
            .copied()
            .collect();
        let moved: Vec<_> = cells_to_shift
            .into_iter()
            .filter_map(|(r, c)| self.cells.remove(&(r, c)).map(|cell| ((r, c - count), cell)))
            .collect();
        self.cells.extend(moved);
        self.cols -= count;
        count
    }

    /// Stored cells (values and format-only cells) in row-major order.
    pub fn stored_cells(&self) -> Vec<(CellAddress, Cell)> {
        let mut cells: Vec<(CellAddress, Cell)> = self
            .cells
            .iter()
            .map(|(&(r, c), cell)| (CellAddress::new(r, c), cell.clone()))
            .collect();
        cells.sort_unstable_by_key(|(addr, _)| (addr.row, addr.col));
        cells
    }

    /// Non-empty cells inside `range`, in row-major order.
    pub fn non_empty_in(&self, range: CellRange) -> Vec<(CellAddress, &CellValue)> {
        let mut cells: Vec<(CellAddress, &CellValue)> =
            self.non_empty().filter(|(addr, _)| range.contains(*addr)).collect();
        cells.sort_unstable_by_key(|(addr, _)| (addr.row, addr.col));
        cells
    }
}
