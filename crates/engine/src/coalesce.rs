//! Cell range coalescing for compact deltas.
//!
//! Converts a set of changed cells into a small set of rectangular ranges:
//! 1. Sort and collapse each row into contiguous column runs
//! 2. Merge runs vertically when they have identical column bounds
//! 3. Fall back to the bounding box past [`MAX_RANGES`]
//!
//! Output ranges always cover every input cell and may cover more. Output is
//! deterministic for a given input set.

use std::collections::BTreeMap;

use gridchat_core::{CellAddress, CellRange};

/// Maximum number of ranges before falling back to a bounding box.
const MAX_RANGES: usize = 2000;

pub fn coalesce_cells_to_ranges(cells: &[CellAddress]) -> Vec<CellRange> {
    let mut coords: Vec<(usize, usize)> = cells.iter().map(|a| (a.row, a.col)).collect();
    coords.sort_unstable();
    coords.dedup();

    let Some(&(first_row, first_col)) = coords.first() else {
        return Vec::new();
    };

    // Step 1: horizontal runs, row -> [(start_col, end_col)]
    let mut row_runs: Vec<(usize, usize, usize)> = Vec::new();
    let (mut current_row, mut run_start, mut run_end) = (first_row, first_col, first_col);
    for &(row, col) in &coords[1..] {
        if row == current_row && col == run_end + 1 {
            run_end = col;
        } else {
            row_runs.push((current_row, run_start, run_end));
            current_row = row;
            run_start = col;
            run_end = col;
        }
    }
    row_runs.push((current_row, run_start, run_end));

    // Step 2: merge vertically, (start_col, end_col) -> [(start_row, end_row)]
    let mut vertical: BTreeMap<(usize, usize), Vec<(usize, usize)>> = BTreeMap::new();
    for (row, c1, c2) in row_runs {
        let spans = vertical.entry((c1, c2)).or_default();
        match spans.last_mut() {
            Some(last) if last.1 + 1 == row => last.1 = row,
            _ => spans.push((row, row)),
        }
    }

    let mut ranges: Vec<CellRange> = vertical
        .into_iter()
        .flat_map(|((c1, c2), spans)| {
            spans.into_iter().map(move |(r1, r2)| {
                CellRange::normalized(CellAddress::new(r1, c1), CellAddress::new(r2, c2))
            })
        })
        .collect();

    // Step 3: cap
    if ranges.len() > MAX_RANGES {
        let r1 = ranges.iter().map(|r| r.start.row).min().unwrap_or(0);
        let c1 = ranges.iter().map(|r| r.start.col).min().unwrap_or(0);
        let r2 = ranges.iter().map(|r| r.end.row).max().unwrap_or(0);
        let c2 = ranges.iter().map(|r| r.end.col).max().unwrap_or(0);
        return vec![CellRange::normalized(CellAddress::new(r1, c1), CellAddress::new(r2, c2))];
    }

    ranges.sort_by_key(|r| (r.start.row, r.start.col, r.end.row, r.end.col));
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(coords: &[(usize, usize)]) -> Vec<CellAddress> {
        coords.iter().map(|&(r, c)| CellAddress::new(r, c)).collect()
    }

    fn names(ranges: &[CellRange]) -> Vec<String> {
        ranges.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(coalesce_cells_to_ranges(&[]).is_empty());
    }

    #[test]
    fn test_single_cell() {
        assert_eq!(names(&coalesce_cells_to_ranges(&cells(&[(4, 1)]))), vec!["B5"]);
    }

    #[test]
    fn test_rectangle_merges() {
        let input = cells(&[(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]);
        assert_eq!(names(&coalesce_cells_to_ranges(&input)), vec!["A1:B3"]);
    }

    #[test]
    fn test_gap_splits_runs() {
        // A1, C1 and A2 -> A1:A2 plus C1
        let input = cells(&[(0, 0), (0, 2), (1, 0)]);
        assert_eq!(names(&coalesce_cells_to_ranges(&input)), vec!["A1:A2", "C1"]);
    }

    #[test]
    fn test_duplicates_and_order_do_not_matter() {
        let a = coalesce_cells_to_ranges(&cells(&[(1, 1), (0, 1), (1, 1), (0, 1)]));
        let b = coalesce_cells_to_ranges(&cells(&[(0, 1), (1, 1)]));
        assert_eq!(a, b);
        assert_eq!(names(&a), vec!["B1:B2"]);
    }

    #[test]
    fn test_checkerboard_falls_back_to_bounding_box() {
        let mut coords = Vec::new();
        for r in 0..100 {
            for c in 0..100 {
                if (r + c) % 2 == 0 {
                    coords.push((r, c));
                }
            }
        }
        let ranges = coalesce_cells_to_ranges(&cells(&coords));
        assert_eq!(names(&ranges), vec!["A1:CV100"]);
    }
}
