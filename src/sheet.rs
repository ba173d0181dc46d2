use anyhow::Context;
use calamine::{open_workbook, Data, Reader, Xlsx};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// One decoded cell. Missing cells and blank text collapse into the same
/// state as far as the import rules are concerned, see [`CellValue::is_blank`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Empty,
}

/// Why a numeric cell failed to parse. Blank and malformed cells produce
/// different operator-facing messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumberError {
    Blank,
    Invalid,
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(n) => n.is_nan(),
        }
    }

    /// Cell rendered for error snapshots and free-text fields. Missing and
    /// NaN cells render as the empty string.
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
        }
    }

    /// Decimal price. A comma decimal separator is accepted and normalized.
    pub fn parse_price(&self) -> Result<Decimal, NumberError> {
        match self {
            CellValue::Empty => Err(NumberError::Blank),
            CellValue::Number(n) => {
                if n.is_nan() {
                    return Err(NumberError::Blank);
                }
                Decimal::from_f64_retain(*n).ok_or(NumberError::Invalid)
            }
            CellValue::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return Err(NumberError::Blank);
                }
                Decimal::from_str(&s.replace(',', ".")).map_err(|_| NumberError::Invalid)
            }
        }
    }

    /// Integer stock count, parsed float-then-truncate so `"5.0"` is a valid 5.
    pub fn parse_stock(&self) -> Result<i64, NumberError> {
        let n = match self {
            CellValue::Empty => return Err(NumberError::Blank),
            CellValue::Number(n) => {
                if n.is_nan() {
                    return Err(NumberError::Blank);
                }
                *n
            }
            CellValue::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return Err(NumberError::Blank);
                }
                s.replace(',', ".")
                    .parse::<f64>()
                    .ok()
                    .filter(|n| !n.is_nan())
                    .ok_or(NumberError::Invalid)?
            }
        };
        if !n.is_finite() {
            return Err(NumberError::Invalid);
        }
        Ok(n.trunc() as i64)
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        return String::new();
    }
    if n.fract() == 0.0 && n.abs() < 9e15 {
        return format!("{}", n as i64);
    }
    n.to_string()
}

/// One data row, keyed by lower-cased trimmed column name. Key normalization
/// happens once at decode time; lookups afterwards are exact.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    cells: Vec<(String, CellValue)>,
}

const MISSING: CellValue = CellValue::Empty;

impl RawRow {
    pub fn new(cells: Vec<(String, CellValue)>) -> Self {
        Self { cells }
    }

    /// Field by normalized column name. A column absent from the sheet reads
    /// the same as an empty cell.
    pub fn field(&self, name: &str) -> &CellValue {
        self.cells
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
            .unwrap_or(&MISSING)
    }

    /// Display-string snapshot of the whole row, for error reports.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.cells
            .iter()
            .map(|(key, value)| (key.clone(), value.display()))
            .collect()
    }
}

/// Fully decoded sheet: original headers for reporting plus data rows in
/// sheet order.
#[derive(Clone, Debug, Default)]
pub struct SheetData {
    pub columns_display: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Reads the first worksheet of an xlsx file. The first row is the header;
/// every following row becomes a [`RawRow`] keyed by the normalized headers.
pub fn read_sheet(path: &Path) -> Result<SheetData, anyhow::Error> {
    let mut workbook: Xlsx<_> = open_workbook(path)
        .with_context(|| format!("Unable to open workbook {}", path.display()))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .context("Workbook has no sheets")?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .with_context(|| format!("Unable to read sheet {sheet_name}"))?;

    let mut rows = range.rows();
    let header = match rows.next() {
        Some(header) => header,
        None => return Ok(SheetData::default()),
    };
    let columns_display: Vec<String> = header.iter().map(cell_to_value).map(|c| c.display()).collect();
    let keys: Vec<String> = columns_display
        .iter()
        .map(|c| c.trim().to_lowercase())
        .collect();

    let rows = rows
        .map(|row| {
            RawRow::new(
                keys.iter()
                    .cloned()
                    .zip(row.iter().map(cell_to_value).chain(std::iter::repeat(CellValue::Empty)))
                    .collect(),
            )
        })
        .collect();

    Ok(SheetData {
        columns_display,
        rows,
    })
}

fn cell_to_value(data: &Data) -> CellValue {
    match data {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Text(b.to_string()),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}
