//! Cell values and the grid produced by the upload parser.

use serde::{Deserialize, Serialize};

/// Display format hint carried from the source file.
///
/// Mutations never interpret the hint; writing a new value keeps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NumberFormat {
    #[default]
    General,
    Number { decimals: u8 },
    Currency { decimals: u8 },
    Percent { decimals: u8 },
    Date,
    DateTime,
    Time,
}

impl NumberFormat {
    pub fn is_general(&self) -> bool {
        matches!(self, NumberFormat::General)
    }
}

/// A cell's value. Serializes as a bare JSON scalar (`null` when empty).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Classify free-form input the way a user typing into a cell would.
    ///
    /// Formulas (`=SUM(A1:A3)`) are not evaluated and stay text.
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return CellValue::Empty;
        }

        if trimmed.eq_ignore_ascii_case("true") {
            return CellValue::Boolean(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return CellValue::Boolean(false);
        }

        if let Ok(num) = trimmed.parse::<f64>() {
            if num.is_finite() {
                return CellValue::Number(num);
            }
        }

        CellValue::Text(trimmed.to_string())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Unformatted display text, used for matching and previews.
    pub fn raw_display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Boolean(true) => "TRUE".to_string(),
            CellValue::Boolean(false) => "FALSE".to_string(),
            CellValue::Number(n) => format_number(*n),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// How find/replace compares cells against the search string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// The cell's display text equals the search string.
    #[default]
    Exact,
    /// Text cells containing the search string; every occurrence is replaced.
    Substring,
}

impl std::str::FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(MatchMode::Exact),
            "substring" | "contains" => Ok(MatchMode::Substring),
            other => Err(format!("unknown match mode '{}'", other)),
        }
    }
}

/// Value plus format hint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cell {
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "NumberFormat::is_general")]
    pub format: NumberFormat,
}

impl Cell {
    pub fn new(value: CellValue) -> Self {
        Self { value, format: NumberFormat::General }
    }

    pub fn with_format(value: CellValue, format: NumberFormat) -> Self {
        Self { value, format }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Display text with the format hint applied.
    pub fn formatted(&self) -> String {
        let n = match self.value {
            CellValue::Number(n) => n,
            _ => return self.value.raw_display(),
        };
        match self.format {
            NumberFormat::Number { decimals } => format!("{:.*}", decimals as usize, n),
            NumberFormat::Currency { decimals } => {
                if n < 0.0 {
                    format!("-${:.*}", decimals as usize, -n)
                } else {
                    format!("${:.*}", decimals as usize, n)
                }
            }
            NumberFormat::Percent { decimals } => format!("{:.*}%", decimals as usize, n * 100.0),
            _ => format_number(n),
        }
    }
}

/// Parsed upload: rows of typed cells plus a declared extent.
///
/// The extent is always at least as large as the data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InitialGrid {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
    pub row_count: usize,
    pub col_count: usize,
}

impl InitialGrid {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        let row_count = rows.len();
        let col_count = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        Self { name: name.into(), rows, row_count, col_count }
    }

    /// An all-empty grid of the given extent.
    pub fn empty(name: impl Into<String>, row_count: usize, col_count: usize) -> Self {
        Self { name: name.into(), rows: Vec::new(), row_count, col_count }
    }

    /// Grid from plain text rows, each cell classified with [`CellValue::from_input`].
    pub fn from_text_rows<R, C>(name: impl Into<String>, rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let rows = rows
            .into_iter()
            .map(|r| r.into_iter().map(|s| Cell::new(CellValue::from_input(s.as_ref()))).collect())
            .collect();
        Self::new(name, rows)
    }

    /// Widen the declared extent if the data does not fit.
    pub fn normalize_extent(&mut self) {
        self.row_count = self.row_count.max(self.rows.len());
        let data_cols = self.rows.iter().map(|r| r.len()).max().unwrap_or(0);
        self.col_count = self.col_count.max(data_cols);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_input_classification() {
        assert_eq!(CellValue::from_input(""), CellValue::Empty);
        assert_eq!(CellValue::from_input("   "), CellValue::Empty);
        assert_eq!(CellValue::from_input("42"), CellValue::Number(42.0));
        assert_eq!(CellValue::from_input(" -1.5 "), CellValue::Number(-1.5));
        assert_eq!(CellValue::from_input("TRUE"), CellValue::Boolean(true));
        assert_eq!(CellValue::from_input("false"), CellValue::Boolean(false));
        assert_eq!(CellValue::from_input("hello"), CellValue::Text("hello".into()));
        // Formulas are opaque
        assert_eq!(CellValue::from_input("=SUM(A1:A3)"), CellValue::Text("=SUM(A1:A3)".into()));
        // Non-finite parses are text
        assert_eq!(CellValue::from_input("inf"), CellValue::Text("inf".into()));
        assert_eq!(CellValue::from_input("NaN"), CellValue::Text("NaN".into()));
    }

    #[test]
    fn test_raw_display() {
        assert_eq!(CellValue::Number(3.0).raw_display(), "3");
        assert_eq!(CellValue::Number(2.5).raw_display(), "2.5");
        assert_eq!(CellValue::Boolean(true).raw_display(), "TRUE");
        assert_eq!(CellValue::Empty.raw_display(), "");
    }

    #[test]
    fn test_value_serializes_as_scalar() {
        let values = vec![
            CellValue::Empty,
            CellValue::Number(1.5),
            CellValue::Text("x".into()),
            CellValue::Boolean(false),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[null,1.5,"x",false]"#);

        let back: Vec<CellValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_format_hint_rendering() {
        let c = Cell::with_format(CellValue::Number(1234.5), NumberFormat::Currency { decimals: 2 });
        assert_eq!(c.formatted(), "$1234.50");

        let p = Cell::with_format(CellValue::Number(0.25), NumberFormat::Percent { decimals: 0 });
        assert_eq!(p.formatted(), "25%");

        // Hint is ignored for text
        let t = Cell::with_format(CellValue::Text("n/a".into()), NumberFormat::Percent { decimals: 1 });
        assert_eq!(t.formatted(), "n/a");
    }

    #[test]
    fn test_cell_json_omits_general_format() {
        let json = serde_json::to_value(Cell::new(CellValue::Number(1.0))).unwrap();
        assert_eq!(json, serde_json::json!({"value": 1.0}));

        let json = serde_json::to_value(Cell::with_format(
            CellValue::Number(1.0),
            NumberFormat::Percent { decimals: 2 },
        ))
        .unwrap();
        assert_eq!(json["format"]["kind"], "percent");
    }

    #[test]
    fn test_initial_grid_extent() {
        let grid = InitialGrid::from_text_rows("t", vec![vec!["a", "b"], vec!["1"]]);
        assert_eq!(grid.row_count, 2);
        assert_eq!(grid.col_count, 2);

        let mut empty = InitialGrid::empty("e", 3, 3);
        assert!(empty.rows.is_empty());
        empty.rows.push(vec![Cell::default(); 5]);
        empty.normalize_extent();
        assert_eq!(empty.col_count, 5);
        assert_eq!(empty.row_count, 3);
    }
}
