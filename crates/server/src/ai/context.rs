// System prompt for a session
//
// Built once when the session is created, from the sheet as uploaded. The
// preview is capped so a wide or long sheet cannot blow up the prompt.

use gridchat_engine::SheetDescription;

/// Cells longer than this are cut in the preview.
const MAX_PREVIEW_CELL_CHARS: usize = 40;

/// Hard cap on the whole preview block.
const MAX_PREVIEW_CHARS: usize = 4_000;

const INSTRUCTIONS: &str = "You are a spreadsheet assistant working on one sheet through tools. \
Always use the tools to read or change the sheet; never guess at cell contents.
Rows and columns in tool arguments are zero-based; A1 references are also accepted.
After inserting or deleting rows or columns, re-read the affected area before writing to it.
Make sure an index exists before writing to it.
When adding a total row, find the last filled row with the last_filled_row tool. Never hardcode the index.
If a tool returns an error, read the error code and message, then correct the call.";

pub fn build_system_prompt(description: &SheetDescription) -> String {
    let mut prompt = String::from(INSTRUCTIONS);
    prompt.push_str("\n\n");
    prompt.push_str(&format!("Sheet: {}\n", description.name));
    prompt.push_str(&format!(
        "Size: {} rows x {} columns\n",
        description.rows, description.cols
    ));
    match &description.used_range {
        Some(range) => prompt.push_str(&format!("Data range: {}\n", range)),
        None => prompt.push_str("The sheet is empty.\n"),
    }
    if let Some(row) = description.last_filled_row {
        prompt.push_str(&format!("Last filled row (zero-based): {}\n", row));
    }

    if !description.sample.is_empty() {
        prompt.push_str(&format!(
            "\nPreview of the first {} rows (the first row may be a header; infer it from the data):\n",
            description.sample.len()
        ));
        prompt.push_str(&preview(description));
    }
    prompt
}

fn preview(description: &SheetDescription) -> String {
    let mut out = String::new();
    for (r, row) in description.sample.iter().enumerate() {
        let cells: Vec<String> = row.iter().map(|v| clip(&v.raw_display())).collect();
        let line = format!("{}\t{}\n", r, cells.join("\t"));
        if out.len() + line.len() > MAX_PREVIEW_CHARS {
            out.push_str("...\n");
            break;
        }
        out.push_str(&line);
    }
    out
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_PREVIEW_CELL_CHARS {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(MAX_PREVIEW_CELL_CHARS).collect();
        cut.push('…');
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridchat_core::{InitialGrid, MatchMode};
    use gridchat_engine::SpreadsheetEngine;

    #[test]
    fn test_prompt_includes_range_and_preview() {
        let engine = SpreadsheetEngine::new(
            "s",
            InitialGrid::from_text_rows("sales", vec![vec!["region", "total"], vec!["north", "12.5"]]),
            MatchMode::Exact,
        );
        let prompt = build_system_prompt(&engine.describe(5, 5));
        assert!(prompt.contains("Sheet: sales"));
        assert!(prompt.contains("Data range: A1:B2"));
        assert!(prompt.contains("0\tregion\ttotal"));
        assert!(prompt.contains("1\tnorth\t12.5"));
        assert!(prompt.contains("last_filled_row"));
    }

    #[test]
    fn test_empty_sheet() {
        let engine = SpreadsheetEngine::new("s", InitialGrid::empty("blank", 3, 3), MatchMode::Exact);
        let prompt = build_system_prompt(&engine.describe(5, 5));
        assert!(prompt.contains("The sheet is empty."));
        assert!(prompt.contains("Size: 3 rows x 3 columns"));
    }

    #[test]
    fn test_long_cells_are_clipped() {
        let long = "x".repeat(200);
        assert_eq!(clip(&long).chars().count(), MAX_PREVIEW_CELL_CHARS + 1);
        assert_eq!(clip("short"), "short");
    }
}
