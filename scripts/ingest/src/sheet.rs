use crate::error::{IngestError, Result};
use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::{Workbook, XlsxError};
use serde_json::Value;
use std::path::Path;

pub const REQUIRED_COLUMNS: [&str; 5] = ["monk_id", "album_id", "title", "sort_order", "file_path"];
const STATUS_COLUMN: &str = "status";
const ERROR_COLUMN: &str = "error_message";
const LOG_SHEET_NAME: &str = "Upload Log";

// ---------------------------------------------------------------------------
// Cells and rows
// ---------------------------------------------------------------------------

/// A cell as it was read, so the log can reproduce it faithfully.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    pub fn text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }

    /// Value sent as `sort_order`. Whole numbers (including integer-looking
    /// text) become integers, blanks become null, anything else goes out as read.
    fn sort_value(&self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Number(n) if n.is_finite() && n.fract() == 0.0 => Value::from(*n as i64),
            Self::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Self::Text(s) if s.trim().is_empty() => Value::Null,
            Self::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_or_else(|_| Value::String(s.clone()), Value::from),
            Self::Bool(b) => Value::Bool(*b),
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Pending,
    Success,
    Error,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// One song to ingest. Only `status` and `error_message` change after load.
#[derive(Debug, Clone)]
pub struct SongRow {
    /// 1-based line in the source sheet (the header is line 1).
    pub line: usize,
    pub monk_id: String,
    pub album_id: String,
    pub title: String,
    pub sort_order: Value,
    pub file_path: String,
    pub status: RowStatus,
    pub error_message: String,
    cells: Vec<Cell>,
}

impl SongRow {
    pub fn succeed(&mut self) {
        self.status = RowStatus::Success;
        self.error_message.clear();
    }

    pub fn fail(&mut self, message: &str) {
        self.status = RowStatus::Error;
        self.error_message = if message.trim().is_empty() {
            "unknown error".to_string()
        } else {
            message.to_string()
        };
    }
}

// ---------------------------------------------------------------------------
// Sheet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SongSheet {
    /// Input columns in input order, without any previous status columns.
    pub columns: Vec<String>,
    pub rows: Vec<SongRow>,
}

impl SongSheet {
    /// Reads the first worksheet of a workbook, or a `.csv` file.
    pub fn read(path: &Path) -> Result<Self> {
        let (headers, records) = if is_csv(path) {
            read_csv(path)?
        } else {
            read_workbook(path)?
        };
        Ok(Self::from_records(headers, records))
    }

    pub fn from_records(headers: Vec<String>, records: Vec<Vec<Cell>>) -> Self {
        let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();

        // Drop the status columns of a previous log so they are not duplicated.
        let kept: Vec<usize> = (0..headers.len())
            .filter(|&i| headers[i] != STATUS_COLUMN && headers[i] != ERROR_COLUMN)
            .collect();
        let columns: Vec<String> = kept.iter().map(|&i| headers[i].clone()).collect();

        let position = |name: &str| columns.iter().position(|c| c == name);
        let monk_col = position("monk_id");
        let album_col = position("album_id");
        let title_col = position("title");
        let sort_col = position("sort_order");
        let file_col = position("file_path");

        let rows = records
            .into_iter()
            .enumerate()
            .filter(|(_, record)| !record.iter().all(Cell::is_blank))
            .map(|(idx, record)| {
                let cells: Vec<Cell> = kept
                    .iter()
                    .map(|&i| record.get(i).cloned().unwrap_or(Cell::Empty))
                    .collect();
                let text = |col: Option<usize>| col.map(|c| cells[c].text()).unwrap_or_default();

                SongRow {
                    line: idx + 2,
                    monk_id: text(monk_col),
                    album_id: text(album_col),
                    title: text(title_col),
                    sort_order: sort_col.map_or(Value::Null, |c| cells[c].sort_value()),
                    file_path: text(file_col),
                    status: RowStatus::Pending,
                    error_message: String::new(),
                    cells,
                }
            })
            .collect();

        Self { columns, rows }
    }

    pub fn missing_columns(&self) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|name| !self.columns.iter().any(|c| c == name))
            .collect()
    }

    pub fn output_header(&self) -> Vec<String> {
        let mut header = self.columns.clone();
        header.push(STATUS_COLUMN.to_string());
        header.push(ERROR_COLUMN.to_string());
        header
    }

    pub fn output_records(&self) -> impl Iterator<Item = Vec<Cell>> + '_ {
        self.rows.iter().map(|row| {
            let mut record = row.cells.clone();
            record.push(Cell::Text(row.status.as_str().to_string()));
            record.push(Cell::Text(row.error_message.clone()));
            record
        })
    }

    /// Writes the status log: `.csv` for csv paths, `.xlsx` otherwise.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        if is_csv(path) {
            write_csv(self, path)
        } else {
            write_workbook(self, path).map_err(|e| IngestError::Sheet(format!("{}: {}", path.display(), e)))
        }
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Bool(b) => Cell::Bool(*b),
        other => Cell::Text(other.to_string()),
    }
}

fn read_workbook(path: &Path) -> Result<(Vec<String>, Vec<Vec<Cell>>)> {
    let sheet_err = |e: calamine::Error| IngestError::Sheet(format!("{}: {}", path.display(), e));

    let mut workbook = open_workbook_auto(path).map_err(sheet_err)?;
    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| IngestError::Sheet(format!("{}: workbook has no sheets", path.display())))?;
    let range = workbook.worksheet_range(&first).map_err(sheet_err)?;

    let mut rows = range.rows();
    let headers = match rows.next() {
        Some(header) => header.iter().map(|d| cell_from_data(d).text()).collect(),
        None => return Ok((Vec::new(), Vec::new())),
    };
    let records = rows
        .map(|row| row.iter().map(cell_from_data).collect())
        .collect();

    Ok((headers, records))
}

fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<Cell>>)> {
    let csv_err = |e: csv::Error| IngestError::Sheet(format!("{}: {}", path.display(), e));

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let headers = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        records.push(
            record
                .iter()
                .map(|v| if v.is_empty() { Cell::Empty } else { Cell::Text(v.to_string()) })
                .collect(),
        );
    }

    Ok((headers, records))
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

fn write_workbook(sheet: &SongSheet, path: &Path) -> std::result::Result<(), XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(LOG_SHEET_NAME)?;

    for (col, name) in sheet.output_header().iter().enumerate() {
        worksheet.write_string(0, col as u16, name)?;
    }

    for (idx, record) in sheet.output_records().enumerate() {
        let row = (idx + 1) as u32;
        for (col, cell) in record.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Empty => {}
                Cell::Text(s) if s.is_empty() => {}
                Cell::Text(s) => {
                    worksheet.write_string(row, col, s)?;
                }
                Cell::Number(n) => {
                    worksheet.write_number(row, col, *n)?;
                }
                Cell::Bool(b) => {
                    worksheet.write_boolean(row, col, *b)?;
                }
            }
        }
    }

    workbook.save(path)
}

fn write_csv(sheet: &SongSheet, path: &Path) -> Result<()> {
    let csv_err = |e: csv::Error| IngestError::Sheet(format!("{}: {}", path.display(), e));

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(sheet.output_header()).map_err(csv_err)?;
    for record in sheet.output_records() {
        writer
            .write_record(record.iter().map(Cell::text))
            .map_err(csv_err)?;
    }
    writer.flush()?;
    Ok(())
}
