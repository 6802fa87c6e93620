//! A1-style cell references.
//!
//! Rows and columns are zero-based internally. Column names use the
//! bijective base-26 scheme: 0=A, 25=Z, 26=AA, 51=AZ, 52=BA.
//!
//! Ordering policy: A1 strings are normalized (`"C3:A1"` is `A1:C3`), while
//! ranges built from explicit coordinates via [`CellRange::new`] must already
//! be ordered and fail with [`ReferenceError::RangeOrder`] otherwise.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("invalid cell reference '{0}'")]
    Invalid(String),
    #[error("range start {start} is not above and left of end {end}")]
    RangeOrder { start: CellAddress, end: CellAddress },
}

impl ReferenceError {
    pub fn code(&self) -> &'static str {
        match self {
            ReferenceError::Invalid(_) => "invalid_reference",
            ReferenceError::RangeOrder { .. } => "range_order_error",
        }
    }
}

/// Convert 0-based column index to letter(s): 0=A, 1=B, ..., 25=Z, 26=AA.
pub fn col_to_letters(col: usize) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

/// Inverse of [`col_to_letters`]. Case-insensitive.
///
/// Returns `None` for empty input, non-letters, or names too long to fit
/// in a `usize`.
pub fn letters_to_col(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut acc: usize = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let digit = (ch.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        acc = acc.checked_mul(26)?.checked_add(digit)?;
    }
    Some(acc - 1)
}

/// A single cell position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddress {
    pub row: usize,
    pub col: usize,
}

impl CellAddress {
    #[inline]
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Parse `"B3"`, `"$B$3"` or `"b3"`.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let invalid = || ReferenceError::Invalid(input.to_string());
        let s = input.trim();

        let s = s.strip_prefix('$').unwrap_or(s);
        let split = s
            .find(|c: char| !c.is_ascii_alphabetic())
            .ok_or_else(invalid)?;
        let (letters, rest) = s.split_at(split);
        let digits = rest.strip_prefix('$').unwrap_or(rest);

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let col = letters_to_col(letters).ok_or_else(invalid)?;
        let row_1based: usize = digits.parse().map_err(|_| invalid())?;
        if row_1based == 0 {
            return Err(invalid());
        }
        Ok(Self::new(row_1based - 1, col))
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_to_letters(self.col), self.row + 1)
    }
}

/// Inclusive rectangular range. `start` is always top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRange {
    pub start: CellAddress,
    pub end: CellAddress,
}

impl CellRange {
    /// Build a range from explicit corners. Inverted corners are rejected.
    pub fn new(start: CellAddress, end: CellAddress) -> Result<Self, ReferenceError> {
        if start.row > end.row || start.col > end.col {
            return Err(ReferenceError::RangeOrder { start, end });
        }
        Ok(Self { start, end })
    }

    /// Build a range from any two corners, reordering as needed.
    pub fn normalized(a: CellAddress, b: CellAddress) -> Self {
        Self {
            start: CellAddress::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellAddress::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    pub fn cell(addr: CellAddress) -> Self {
        Self { start: addr, end: addr }
    }

    /// Parse `"A1:C10"` or a single cell `"B3"` (a 1x1 range).
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let s = input.trim();
        match s.split_once(':') {
            Some((a, b)) => {
                let a = CellAddress::parse(a).map_err(|_| ReferenceError::Invalid(input.to_string()))?;
                let b = CellAddress::parse(b).map_err(|_| ReferenceError::Invalid(input.to_string()))?;
                Ok(Self::normalized(a, b))
            }
            None => Ok(Self::cell(CellAddress::parse(s)?)),
        }
    }

    pub fn row_count(&self) -> usize {
        self.end.row - self.start.row + 1
    }

    pub fn col_count(&self) -> usize {
        self.end.col - self.start.col + 1
    }

    pub fn cell_count(&self) -> usize {
        self.row_count() * self.col_count()
    }

    pub fn contains(&self, addr: CellAddress) -> bool {
        addr.row >= self.start.row
            && addr.row <= self.end.row
            && addr.col >= self.start.col
            && addr.col <= self.end.col
    }

    /// True when every cell of the range lies inside a `rows x cols` extent.
    pub fn fits_within(&self, rows: usize, cols: usize) -> bool {
        self.end.row < rows && self.end.col < cols
    }

    /// Cells in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = CellAddress> + '_ {
        (self.start.row..=self.end.row)
            .flat_map(move |r| (self.start.col..=self.end.col).map(move |c| CellAddress::new(r, c)))
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_col_to_letters() {
        assert_eq!(col_to_letters(0), "A");
        assert_eq!(col_to_letters(25), "Z");
        assert_eq!(col_to_letters(26), "AA");
        assert_eq!(col_to_letters(51), "AZ");
        assert_eq!(col_to_letters(52), "BA");
        assert_eq!(col_to_letters(701), "ZZ");
        assert_eq!(col_to_letters(702), "AAA");
    }

    #[test]
    fn test_letters_to_col() {
        assert_eq!(letters_to_col("A"), Some(0));
        assert_eq!(letters_to_col("z"), Some(25));
        assert_eq!(letters_to_col("AA"), Some(26));
        assert_eq!(letters_to_col("BA"), Some(52));
        assert_eq!(letters_to_col(""), None);
        assert_eq!(letters_to_col("A1"), None);
        // Too long for usize
        assert_eq!(letters_to_col(&"Z".repeat(40)), None);
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(CellAddress::parse("A1").unwrap(), CellAddress::new(0, 0));
        assert_eq!(CellAddress::parse("b3").unwrap(), CellAddress::new(2, 1));
        assert_eq!(CellAddress::parse("$AA$10").unwrap(), CellAddress::new(9, 26));
        assert_eq!(CellAddress::parse(" C7 ").unwrap(), CellAddress::new(6, 2));
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        for bad in ["", "A", "1", "A0", "1A", "A-1", "A1B", "A 1", "$$A1", "A1.5"] {
            let err = CellAddress::parse(bad).unwrap_err();
            assert_eq!(err.code(), "invalid_reference", "input {:?}", bad);
        }
    }

    #[test]
    fn test_address_display() {
        assert_eq!(CellAddress::new(0, 0).to_string(), "A1");
        assert_eq!(CellAddress::new(9, 26).to_string(), "AA10");
    }

    #[test]
    fn test_parse_range() {
        let r = CellRange::parse("A1:C10").unwrap();
        assert_eq!(r.start, CellAddress::new(0, 0));
        assert_eq!(r.end, CellAddress::new(9, 2));
        assert_eq!(r.row_count(), 10);
        assert_eq!(r.col_count(), 3);
        assert_eq!(r.to_string(), "A1:C10");
    }

    #[test]
    fn test_parse_single_cell_range() {
        let r = CellRange::parse("B3").unwrap();
        assert_eq!(r.cell_count(), 1);
        assert_eq!(r.to_string(), "B3");
    }

    #[test]
    fn test_a1_range_is_normalized() {
        let r = CellRange::parse("C3:A1").unwrap();
        assert_eq!(r, CellRange::parse("A1:C3").unwrap());

        // Mixed corners (top-right to bottom-left)
        let r = CellRange::parse("C1:A3").unwrap();
        assert_eq!(r.to_string(), "A1:C3");
    }

    #[test]
    fn test_coordinate_range_is_strict() {
        let err = CellRange::new(CellAddress::new(2, 0), CellAddress::new(0, 0)).unwrap_err();
        assert_eq!(err.code(), "range_order_error");

        let err = CellRange::new(CellAddress::new(0, 3), CellAddress::new(0, 1)).unwrap_err();
        assert_eq!(err.code(), "range_order_error");

        assert!(CellRange::new(CellAddress::new(1, 1), CellAddress::new(1, 1)).is_ok());
    }

    #[test]
    fn test_range_iter_row_major() {
        let r = CellRange::parse("A1:B2").unwrap();
        let cells: Vec<String> = r.iter().map(|a| a.to_string()).collect();
        assert_eq!(cells, vec!["A1", "B1", "A2", "B2"]);
    }

    #[test]
    fn test_fits_within() {
        let r = CellRange::parse("A1:C3").unwrap();
        assert!(r.fits_within(3, 3));
        assert!(!r.fits_within(2, 3));
        assert!(!r.fits_within(3, 2));
    }

    proptest! {
        #[test]
        fn prop_column_round_trip(i in 0usize..10_000) {
            let name = col_to_letters(i);
            prop_assert_eq!(letters_to_col(&name), Some(i));
            prop_assert_eq!(col_to_letters(letters_to_col(&name).unwrap()), name);
        }

        #[test]
        fn prop_column_names_grow_monotonically(i in 0usize..10_000) {
            prop_assert!(col_to_letters(i).len() <= col_to_letters(i + 1).len());
        }

        #[test]
        fn prop_address_round_trip(row in 0usize..100_000, col in 0usize..10_000) {
            let addr = CellAddress::new(row, col);
            prop_assert_eq!(CellAddress::parse(&addr.to_string()).unwrap(), addr);
        }
    }

    #[test]
    fn test_length_steps_at_powers_of_26() {
        assert_eq!(col_to_letters(25).len(), 1);
        assert_eq!(col_to_letters(26).len(), 2);
        assert_eq!(col_to_letters(26 + 26 * 26 - 1).len(), 2);
        assert_eq!(col_to_letters(26 + 26 * 26).len(), 3);
    }
}
