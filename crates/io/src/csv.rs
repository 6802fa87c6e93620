// CSV/TSV import

use gridchat_core::{Cell, CellValue, InitialGrid};

use crate::{LoadError, MAX_CELLS};

/// Parse delimited text. `delimiter = None` sniffs it from the first lines.
pub fn parse(name: &str, bytes: &[u8], delimiter: Option<u8>) -> Result<InitialGrid, LoadError> {
    let content = decode_utf8(bytes);
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
    let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(content));

    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut total_cells = 0usize;
    for result in reader.records() {
        let record = result?;
        total_cells += record.len();
        if total_cells > MAX_CELLS {
            log::warn!("{}: upload truncated at {} rows ({} cell limit)", name, rows.len(), MAX_CELLS);
            break;
        }
        rows.push(
            record
                .iter()
                .map(|field| Cell::new(CellValue::from_input(field)))
                .collect(),
        );
    }

    // Trailing blank lines do not count toward the extent
    while rows.last().is_some_and(|r| r.iter().all(Cell::is_empty)) {
        rows.pop();
    }

    Ok(InitialGrid::new(name, rows))
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line. The delimiter
/// that produces the most consistent field count (>1 field) wins.
pub fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                ::csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        // Must produce >1 field on the first line to be viable
        if counts.first().copied().unwrap_or(0) <= 1 {
            continue;
        }

        // Score: lines agreeing with line 1, weighted by field count
        let target = counts[0];
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// UTF-8 if valid, otherwise Windows-1252 (common for Excel-exported CSVs).
pub fn decode_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(grid: &InitialGrid) -> Vec<Vec<CellValue>> {
        grid.rows
            .iter()
            .map(|r| r.iter().map(|c| c.value.clone()).collect())
            .collect()
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3\n"), b',');
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3\n"), b';');
        assert_eq!(sniff_delimiter("a\tb\n1\t2\n"), b'\t');
        assert_eq!(sniff_delimiter("a|b|c|d\n1|2|3|4\n"), b'|');
        // Single column falls back to comma
        assert_eq!(sniff_delimiter("only\nvalues\n"), b',');
        assert_eq!(sniff_delimiter(""), b',');
    }

    #[test]
    fn test_semicolon_with_decimal_commas_in_quotes() {
        assert_eq!(sniff_delimiter("name;amount\n\"a,b\";1\n\"c,d\";2\n"), b';');
    }

    #[test]
    fn test_parse_typed_values() {
        let grid = parse("t", b"name,qty,active\nbolt,4,true\nnut,,false\n", None).unwrap();
        assert_eq!(grid.row_count, 3);
        assert_eq!(grid.col_count, 3);
        let v = values(&grid);
        assert_eq!(v[0][0], CellValue::Text("name".into()));
        assert_eq!(v[1][1], CellValue::Number(4.0));
        assert_eq!(v[1][2], CellValue::Boolean(true));
        assert_eq!(v[2][1], CellValue::Empty);
    }

    #[test]
    fn test_ragged_rows_and_trailing_blank_lines() {
        let grid = parse("t", b"a,b,c\n1\n\n,,\n", None).unwrap();
        // ",," is an all-empty row and is trimmed along with the blank line
        assert_eq!(grid.row_count, 2);
        assert_eq!(grid.col_count, 3);
        assert_eq!(grid.rows[1].len(), 1);
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let grid = parse("t", "\u{feff}h1,h2\n1,2\n".as_bytes(), None).unwrap();
        assert_eq!(values(&grid)[0][0], CellValue::Text("h1".into()));
    }

    #[test]
    fn test_windows_1252_fallback() {
        let grid = parse("t", b"name,price\ncaf\xe9,1\n", None).unwrap();
        assert_eq!(values(&grid)[1][0], CellValue::Text("café".into()));
    }

    #[test]
    fn test_explicit_tab_delimiter() {
        let grid = parse("t", b"a,b\tc\n", Some(b'\t')).unwrap();
        assert_eq!(values(&grid)[0], vec![CellValue::Text("a,b".into()), CellValue::Text("c".into())]);
    }
}
