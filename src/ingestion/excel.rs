use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{Data, Range, Reader, Sheets, open_workbook_auto};
use rayon::prelude::*;

use crate::error::PipelineResult;
use crate::types::SheetFrame;

use super::sanitize::{clean_cell, header_names};

/// An open spreadsheet (`.xlsx`, `.xls`, `.ods`, ...).
///
/// The underlying file handle is released when the value is dropped.
pub struct Workbook {
    path: PathBuf,
    sheets: Sheets<BufReader<File>>,
}

impl Workbook {
    /// Open a workbook, detecting the format from the extension.
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let sheets = open_workbook_auto(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            sheets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sheet names in workbook order.
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.sheet_names().to_vec()
    }

    /// Read one sheet into a [`SheetFrame`].
    pub fn read_sheet(&mut self, name: &str) -> PipelineResult<SheetFrame> {
        let range = self.sheets.worksheet_range(name)?;
        Ok(frame_from_range(name, &range))
    }
}

/// Convert a sheet range into a text-only frame.
///
/// Behavior:
/// - the first non-empty row is the header row (see [`header_names`])
/// - every following row is coerced to text and cleaned with [`clean_cell`]
/// - rows are padded/truncated to the header width; fully blank rows are dropped
/// - a sheet with no non-empty row yields a frame with no columns
pub fn frame_from_range(sheet: &str, range: &Range<Data>) -> SheetFrame {
    let rows: Vec<&[Data]> = range.rows().collect();

    let Some(header_idx) = rows
        .iter()
        .position(|row| row.iter().any(|c| !matches!(c, Data::Empty)))
    else {
        return SheetFrame::new(sheet, Vec::new(), Vec::new());
    };

    let raw_header: Vec<String> = rows[header_idx].iter().map(cell_to_text).collect();
    let columns = header_names(&raw_header);
    let width = columns.len();

    let body: Vec<Vec<String>> = rows[header_idx + 1..]
        .par_iter()
        .filter_map(|row| {
            let cells: Vec<String> = (0..width)
                .map(|i| clean_cell(&row.get(i).map(cell_to_text).unwrap_or_default()))
                .collect();
            if cells.iter().all(|c| c.is_empty()) {
                None
            } else {
                Some(cells)
            }
        })
        .collect();

    SheetFrame::new(sheet, columns, body)
}

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Coerce any cell into text. Whole floats print without a fraction (`3.0` -> `3`); date cells
/// print as `YYYY-MM-DD HH:MM:SS`, durations keep their raw serial value.
pub fn cell_to_text(c: &Data) -> String {
    match c {
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) if !dt.is_duration() => match dt.as_datetime() {
            Some(ts) => ts.format(DATETIME_FORMAT).to_string(),
            None => dt.to_string(),
        },
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
        Data::Empty => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use calamine::{ExcelDateTime, ExcelDateTimeType};

    use super::*;

    fn range_of(cells: Vec<Vec<Data>>) -> Range<Data> {
        let height = cells.len() as u32;
        let width = cells.iter().map(|r| r.len()).max().unwrap_or(0) as u32;
        let mut range = Range::new((0, 0), (height - 1, width - 1));
        for (r, row) in cells.into_iter().enumerate() {
            for (c, v) in row.into_iter().enumerate() {
                range.set_value((r as u32, c as u32), v);
            }
        }
        range
    }

    #[test]
    fn header_is_first_non_empty_row() {
        let range = range_of(vec![
            vec![Data::Empty, Data::Empty],
            vec![Data::String("Item".into()), Data::String("UEV".into())],
            vec![Data::String(" Sun ".into()), Data::Float(1.0)],
            vec![Data::Empty, Data::Empty],
            vec![Data::String("Rain".into()), Data::Float(30500.25)],
        ]);
        let frame = frame_from_range("UEV Library", &range);
        assert_eq!(frame.columns, vec!["Item", "UEV"]);
        assert_eq!(
            frame.rows,
            vec![
                vec!["Sun".to_string(), "1".to_string()],
                vec!["Rain".to_string(), "30500.25".to_string()],
            ]
        );
    }

    #[test]
    fn blank_sheet_has_no_columns() {
        let range = range_of(vec![vec![Data::Empty]]);
        let frame = frame_from_range("Empty", &range);
        assert!(frame.is_empty());
        assert!(frame.columns.is_empty());
    }

    #[test]
    fn cells_are_coerced_to_text() {
        assert_eq!(cell_to_text(&Data::Int(7)), "7");
        assert_eq!(cell_to_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_to_text(&Data::Float(-4.0)), "-4");
        assert_eq!(cell_to_text(&Data::Bool(true)), "true");
        assert_eq!(cell_to_text(&Data::Empty), "");
    }

    #[test]
    fn date_cells_print_as_timestamps() {
        let midnight = ExcelDateTime::new(45292.0, ExcelDateTimeType::DateTime, false);
        assert_eq!(cell_to_text(&Data::DateTime(midnight)), "2024-01-01 00:00:00");
        let noon = ExcelDateTime::new(45292.5, ExcelDateTimeType::DateTime, false);
        assert_eq!(cell_to_text(&Data::DateTime(noon)), "2024-01-01 12:00:00");
    }

    #[test]
    fn durations_keep_their_serial_value() {
        let span = ExcelDateTime::new(1.5, ExcelDateTimeType::TimeDelta, false);
        assert_eq!(cell_to_text(&Data::DateTime(span)), "1.5");
    }
}
