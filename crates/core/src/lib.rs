//! Core types shared by every GridChat crate: A1 references, cell values,
//! and the initial grid handed over by the upload parser.

pub mod address;
pub mod value;

pub use address::{col_to_letters, letters_to_col, CellAddress, CellRange, ReferenceError};
pub use value::{Cell, CellValue, InitialGrid, MatchMode, NumberFormat};
