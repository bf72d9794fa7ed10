use std::collections::HashMap;
use std::fs;
use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use encoding_rs::{GBK, WINDOWS_1252};
use rust_xlsxwriter::Workbook;
use tracing::debug;

use crate::error::MinerError;
use crate::fs_util::write_bytes_atomic;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len().max(row.len()), String::new());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header.trim() == name)
    }

    pub fn require_column(&self, name: &str, source_name: &str) -> Result<usize, MinerError> {
        self.index_of(name).ok_or_else(|| MinerError::MissingColumn {
            column: name.to_string(),
            source_name: source_name.to_string(),
        })
    }

    pub fn column(&self, name: &str, source_name: &str) -> Result<Vec<String>, MinerError> {
        let index = self.require_column(name, source_name)?;
        Ok(self
            .rows
            .iter()
            .map(|row| row.get(index).cloned().unwrap_or_default())
            .collect())
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(index) = self.index_of(from) {
            self.headers[index] = to.to_string();
        }
    }

    pub fn append(&mut self, other: &Table) {
        let mapping = other
            .headers
            .iter()
            .map(|header| match self.index_of(header) {
                Some(index) => index,
                None => {
                    self.headers.push(header.clone());
                    for row in &mut self.rows {
                        row.push(String::new());
                    }
                    self.headers.len() - 1
                }
            })
            .collect::<Vec<_>>();
        for source in &other.rows {
            let mut row = vec![String::new(); self.headers.len()];
            for (position, value) in source.iter().enumerate() {
                if let Some(&target) = mapping.get(position) {
                    row[target] = value.clone();
                }
            }
            self.rows.push(row);
        }
    }
}

/// Rows of `left` paired with every `right` row whose key cell is equal.
/// Same-named keys are kept once. Other clashing names get `_x`/`_y`.
pub fn inner_join(
    left: &Table,
    right: &Table,
    (left_key, right_key): (&str, &str),
    (left_name, right_name): (&str, &str),
) -> Result<Table, MinerError> {
    let left_index = left.require_column(left_key, left_name)?;
    let right_index = right.require_column(right_key, right_name)?;
    let shared_key = left_key == right_key;

    let right_columns = (0..right.headers.len())
        .filter(|&column| !(shared_key && column == right_index))
        .collect::<Vec<_>>();
    let clashes = |name: &str, other: &Table| {
        !(shared_key && name == left_key) && other.index_of(name).is_some()
    };
    let mut headers = left
        .headers
        .iter()
        .map(|header| {
            if clashes(header, right) {
                format!("{header}_x")
            } else {
                header.clone()
            }
        })
        .collect::<Vec<_>>();
    headers.extend(right_columns.iter().map(|&column| {
        let header = &right.headers[column];
        if clashes(header, left) {
            format!("{header}_y")
        } else {
            header.clone()
        }
    }));

    let mut by_key = HashMap::<&str, Vec<usize>>::new();
    for row in 0..right.len() {
        by_key.entry(right.cell(row, right_index)).or_default().push(row);
    }

    let mut joined = Table::new(headers);
    for row in 0..left.len() {
        let Some(matches) = by_key.get(left.cell(row, left_index)) else {
            continue;
        };
        for &other in matches {
            let mut cells = (0..left.headers.len())
                .map(|column| left.cell(row, column).to_string())
                .collect::<Vec<_>>();
            cells.extend(
                right_columns
                    .iter()
                    .map(|&column| right.cell(other, column).to_string()),
            );
            joined.push(cells);
        }
    }
    Ok(joined)
}

/// Decodes input text trying UTF-8, then Windows-1252, then GBK.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    let (text, _, had_errors) = WINDOWS_1252.decode(bytes);
    if !had_errors {
        debug!("decoded input as windows-1252");
        return text.into_owned();
    }
    let (text, _, had_errors) = GBK.decode(bytes);
    if !had_errors {
        debug!("decoded input as GBK");
        return text.into_owned();
    }
    WINDOWS_1252.decode(bytes).0.into_owned()
}

pub fn read_csv_table(path: &Path) -> Result<Table, MinerError> {
    if !path.exists() {
        return Err(MinerError::MissingInput(path.to_path_buf()));
    }
    let bytes = fs::read(path).map_err(|err| MinerError::Filesystem(err.to_string()))?;
    parse_csv(&decode_text(&bytes))
}

pub fn parse_csv(text: &str) -> Result<Table, MinerError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| MinerError::Csv(err.to_string()))?
        .iter()
        .map(|header| header.trim().to_string())
        .collect::<Vec<_>>();
    let mut table = Table::new(headers);
    for record in reader.records() {
        let record = record.map_err(|err| MinerError::Csv(err.to_string()))?;
        table.push(record.iter().map(str::to_string).collect());
    }
    Ok(table)
}

pub fn write_csv_table(path: &Path, table: &Table) -> Result<(), MinerError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&table.headers)
        .map_err(|err| MinerError::Csv(err.to_string()))?;
    for row in &table.rows {
        writer
            .write_record(row)
            .map_err(|err| MinerError::Csv(err.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| MinerError::Csv(err.to_string()))?;
    write_bytes_atomic(path, &bytes)
}

pub fn write_xlsx_table(path: &Path, table: &Table) -> Result<(), MinerError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    for (column, header) in table.headers.iter().enumerate() {
        worksheet
            .write_string(0, column as u16, header)
            .map_err(|err| MinerError::Spreadsheet(err.to_string()))?;
    }
    for (index, row) in table.rows.iter().enumerate() {
        for (column, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            worksheet
                .write_string(index as u32 + 1, column as u16, value)
                .map_err(|err| MinerError::Spreadsheet(err.to_string()))?;
        }
    }
    let bytes = workbook
        .save_to_buffer()
        .map_err(|err| MinerError::Spreadsheet(err.to_string()))?;
    write_bytes_atomic(path, &bytes)
}

pub fn read_xlsx_table(path: &Path) -> Result<Table, MinerError> {
    if !path.exists() {
        return Err(MinerError::MissingInput(path.to_path_buf()));
    }
    let mut workbook = open_workbook_auto(path)
        .map_err(|err| MinerError::Spreadsheet(format!("{}: {err}", path.display())))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| MinerError::Spreadsheet(format!("{}: no worksheets", path.display())))?
        .map_err(|err| MinerError::Spreadsheet(format!("{}: {err}", path.display())))?;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(Table::default());
    };
    let mut table = Table::new(header_row.iter().map(cell_text));
    for row in rows {
        table.push(row.iter().map(cell_text).collect());
    }
    Ok(table)
}

pub fn read_table(path: &Path) -> Result<Table, MinerError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xls") => {
            read_xlsx_table(path)
        }
        _ => read_csv_table(path),
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        Data::Float(value) => value.to_string(),
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        other => other.to_string(),
    }
}
