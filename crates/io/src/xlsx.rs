// Excel/ODS import (xlsx, xlsm, xls, xlsb, ods)
//
// Only the first worksheet becomes the session grid. Dates arrive as serial
// numbers with a Date/DateTime/Time format hint.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use gridchat_core::{Cell, CellValue, InitialGrid, NumberFormat};

use crate::{LoadError, MAX_CELLS};

pub fn parse(name: &str, bytes: Vec<u8>) -> Result<InitialGrid, LoadError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| LoadError::Workbook(e.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(LoadError::NoSheets)?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| LoadError::Workbook(format!("failed to read sheet '{}': {}", sheet_name, e)))?;

    let (height, width) = range.get_size();
    if height == 0 || width == 0 {
        return Ok(InitialGrid::empty(name, 0, 0));
    }

    // Range start offset (data may not begin at A1)
    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let (start_row, start_col) = (start_row as usize, start_col as usize);

    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); start_row];
    let mut total_cells = 0usize;

    for row in range.rows() {
        total_cells += row.len();
        if total_cells > MAX_CELLS {
            log::warn!("{}: workbook truncated at {} rows ({} cell limit)", name, rows.len(), MAX_CELLS);
            break;
        }
        let mut cells: Vec<Cell> = vec![Cell::default(); start_col];
        cells.extend(row.iter().map(convert_cell));
        while cells.last().is_some_and(|c| c.is_empty() && c.format.is_general()) {
            cells.pop();
        }
        rows.push(cells);
    }

    let mut grid = InitialGrid::new(name, rows);
    // Keep the declared extent of the used range even when edges are blank
    grid.row_count = grid.row_count.max(start_row + height);
    grid.col_count = grid.col_count.max(start_col + width);
    Ok(grid)
}

fn convert_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::default(),
        Data::String(s) => Cell::new(CellValue::from_input(s)),
        Data::Float(n) => Cell::new(CellValue::Number(*n)),
        Data::Int(n) => Cell::new(CellValue::Number(*n as f64)),
        Data::Bool(b) => Cell::new(CellValue::Boolean(*b)),
        // Errors keep their display form as opaque text
        Data::Error(e) => Cell::new(CellValue::Text(format!("#{:?}", e))),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            let has_date = serial.floor() > 0.0;
            let has_time = serial.fract().abs() > 0.0001;
            let format = if has_date && has_time {
                NumberFormat::DateTime
            } else if has_time {
                NumberFormat::Time
            } else {
                NumberFormat::Date
            };
            Cell::with_format(CellValue::Number(serial), format)
        }
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::new(CellValue::Text(s.clone())),
    }
}
