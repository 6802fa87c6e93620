//! Range aggregates.
//!
//! `sum`, `average`, `min` and `max` only look at numeric cells. `count`
//! counts every non-empty cell (numbers, text and booleans alike).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use gridchat_core::CellValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Sum,
    #[serde(alias = "avg", alias = "mean")]
    Average,
    Min,
    Max,
    Count,
}

impl AggregateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Average => "average",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Count => "count",
        }
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(AggregateOp::Sum),
            "average" | "avg" | "mean" => Ok(AggregateOp::Average),
            "min" => Ok(AggregateOp::Min),
            "max" => Ok(AggregateOp::Max),
            "count" => Ok(AggregateOp::Count),
            other => Err(format!("unknown aggregate '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub op: AggregateOp,
    pub value: f64,
    pub numeric_cells: usize,
    pub non_empty_cells: usize,
}

/// Compute `op` over `values`.
///
/// Returns `None` when a numeric op sees no numbers; `count` always succeeds.
pub fn compute<'a, I>(op: AggregateOp, values: I) -> Option<AggregateResult>
where
    I: IntoIterator<Item = &'a CellValue>,
{
    let mut numeric_cells = 0usize;
    let mut non_empty_cells = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for value in values {
        if value.is_empty() {
            continue;
        }
        non_empty_cells += 1;
        if let Some(n) = value.as_number() {
            numeric_cells += 1;
            sum += n;
            min = min.min(n);
            max = max.max(n);
        }
    }

    let value = match op {
        AggregateOp::Count => non_empty_cells as f64,
        _ if numeric_cells == 0 => return None,
        AggregateOp::Sum => sum,
        AggregateOp::Average => sum / numeric_cells as f64,
        AggregateOp::Min => min,
        AggregateOp::Max => max,
    };

    Some(AggregateResult { op, value, numeric_cells, non_empty_cells })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed() -> Vec<CellValue> {
        ["1", "2", "3", "x", ""].iter().map(|s| CellValue::from_input(s)).collect()
    }

    #[test]
    fn test_sum_skips_text_and_empty() {
        let r = compute(AggregateOp::Sum, &mixed()).unwrap();
        assert_eq!(r.value, 6.0);
        assert_eq!(r.numeric_cells, 3);
    }

    #[test]
    fn test_count_is_non_empty() {
        // {1,2,3,"x",""}: the empty cell is not counted, the text cell is
        let r = compute(AggregateOp::Count, &mixed()).unwrap();
        assert_eq!(r.value, 4.0);
        assert_eq!(r.non_empty_cells, 4);
    }

    #[test]
    fn test_average_min_max() {
        let values = mixed();
        assert_eq!(compute(AggregateOp::Average, &values).unwrap().value, 2.0);
        assert_eq!(compute(AggregateOp::Min, &values).unwrap().value, 1.0);
        assert_eq!(compute(AggregateOp::Max, &values).unwrap().value, 3.0);
    }

    #[test]
    fn test_numeric_ops_need_numbers() {
        let values = vec![CellValue::Text("a".into()), CellValue::Boolean(true), CellValue::Empty];
        for op in [AggregateOp::Sum, AggregateOp::Average, AggregateOp::Min, AggregateOp::Max] {
            assert!(compute(op, &values).is_none(), "{} should fail", op);
        }
        // Count still works
        assert_eq!(compute(AggregateOp::Count, &values).unwrap().value, 2.0);
        assert_eq!(compute(AggregateOp::Count, &Vec::<CellValue>::new()).unwrap().value, 0.0);
    }

    #[test]
    fn test_parse_op_aliases() {
        assert_eq!("avg".parse::<AggregateOp>().unwrap(), AggregateOp::Average);
        assert_eq!("SUM".parse::<AggregateOp>().unwrap(), AggregateOp::Sum);
        assert!("median".parse::<AggregateOp>().is_err());

        let op: AggregateOp = serde_json::from_str("\"avg\"").unwrap();
        assert_eq!(op, AggregateOp::Average);
    }
}
