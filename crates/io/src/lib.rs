// Upload parsing: spreadsheet files -> InitialGrid

pub mod csv;
pub mod xlsx;

use std::path::Path;

use gridchat_core::InitialGrid;

/// Uploads larger than this many cells are truncated.
pub const MAX_CELLS: usize = 5_000_000;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported file type '{0}' (expected csv, tsv, xlsx, xlsm, xls, xlsb or ods)")]
    UnsupportedFormat(String),
    #[error("malformed CSV: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("failed to open workbook: {0}")]
    Workbook(String),
    #[error("workbook contains no sheets")]
    NoSheets,
}

/// File kinds recognised by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Tsv,
    Workbook,
}

impl FileKind {
    pub fn from_filename(filename: &str) -> Option<FileKind> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())?;
        match ext.as_str() {
            "csv" | "txt" => Some(FileKind::Csv),
            "tsv" | "tab" => Some(FileKind::Tsv),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Some(FileKind::Workbook),
            _ => None,
        }
    }
}

/// Parse an uploaded file's bytes. `filename` selects the parser and names the grid.
pub fn parse_bytes(filename: &str, bytes: Vec<u8>) -> Result<InitialGrid, LoadError> {
    let kind = FileKind::from_filename(filename)
        .ok_or_else(|| LoadError::UnsupportedFormat(filename.to_string()))?;
    let name = grid_name(filename);
    match kind {
        FileKind::Csv => csv::parse(&name, &bytes, None),
        FileKind::Tsv => csv::parse(&name, &bytes, Some(b'\t')),
        FileKind::Workbook => xlsx::parse(&name, bytes),
    }
}

/// Load a spreadsheet file from disk.
pub fn load_grid(path: &Path) -> Result<InitialGrid, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_bytes(&filename, bytes)
}

/// File stem without directories, used as the sheet name.
fn grid_name(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Sheet1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind() {
        assert_eq!(FileKind::from_filename("data.CSV"), Some(FileKind::Csv));
        assert_eq!(FileKind::from_filename("x/y/report.xlsx"), Some(FileKind::Workbook));
        assert_eq!(FileKind::from_filename("a.tsv"), Some(FileKind::Tsv));
        assert_eq!(FileKind::from_filename("notes.docx"), None);
        assert_eq!(FileKind::from_filename("noext"), None);
    }

    #[test]
    fn test_unsupported_upload() {
        let err = parse_bytes("deck.pptx", vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_grid_name() {
        assert_eq!(grid_name("reports/q3 sales.csv"), "q3 sales");
        assert_eq!(grid_name(".csv"), ".csv");
    }

    #[test]
    fn test_load_grid_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.csv");
        std::fs::write(&path, "item,qty\nbolt,4\n").unwrap();

        let grid = load_grid(&path).unwrap();
        assert_eq!(grid.name, "inventory");
        assert_eq!((grid.row_count, grid.col_count), (2, 2));

        let missing = load_grid(&dir.path().join("gone.csv")).unwrap_err();
        assert!(matches!(missing, LoadError::Io { .. }));
    }
}
