//! Dataset loading: raw code-change rows and human-coded ground truth.
//!
//! Both inputs are read into a header + string-record [`Table`] first, from
//! CSV (`csv`) or a spreadsheet (`calamine`, chosen by file extension), so the
//! row and label logic below never deals with file formats.

use calamine::{open_workbook_auto, Data, Reader};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::codebook::Codebook;
use crate::error::CodelabelError;
use crate::models::{Row, RowId};

/// A header row plus string cells.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub source: String,
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Result<usize, CodelabelError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| CodelabelError::MissingColumn {
                path: self.source.clone(),
                column: name.to_string(),
                available: self.headers.clone(),
            })
    }

    fn cell<'a>(&'a self, record: &'a [String], idx: usize) -> &'a str {
        record.get(idx).map(String::as_str).unwrap_or("")
    }
}

fn is_spreadsheet(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("xlsx" | "xlsm" | "xlsb" | "xls" | "ods")
    )
}

/// Read a CSV or spreadsheet file. `sheet` selects a worksheet by name
/// (spreadsheets only); the first sheet is used otherwise.
pub fn read_table(path: &Path, sheet: Option<&str>) -> Result<Table, CodelabelError> {
    if is_spreadsheet(path) {
        read_spreadsheet(path, sheet)
    } else {
        read_csv(path)
    }
}

fn read_csv(path: &Path) -> Result<Table, CodelabelError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut records = Vec::new();
    for result in rdr.records() {
        let record = result?;
        records.push(record.iter().map(str::to_string).collect());
    }

    Ok(Table {
        source: path.display().to_string(),
        headers,
        records,
    })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn read_spreadsheet(path: &Path, sheet: Option<&str>) -> Result<Table, CodelabelError> {
    let mut workbook = open_workbook_auto(path)?;

    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook.sheet_names().first().cloned().ok_or_else(|| {
            CodelabelError::Dataset(format!("{} contains no worksheets", path.display()))
        })?,
    };

    let range = workbook.worksheet_range(&sheet_name)?;
    let mut rows = range.rows();

    let headers = match rows.next() {
        Some(header) => header
            .iter()
            .map(|c| cell_to_string(c).trim().to_string())
            .collect(),
        None => Vec::new(),
    };
    let records = rows
        .map(|r| r.iter().map(cell_to_string).collect())
        .collect();

    Ok(Table {
        source: format!("{} [{}]", path.display(), sheet_name),
        headers,
        records,
    })
}

/// Extract rows from the raw dataset. Blank ids are skipped, and for
/// duplicate ids the first occurrence wins; both are logged.
pub fn load_rows(table: &Table, id_col: &str, text_col: &str) -> Result<Vec<Row>, CodelabelError> {
    let id_idx = table.column(id_col)?;
    let text_idx = table.column(text_col)?;

    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(table.records.len());

    for (line, record) in table.records.iter().enumerate() {
        let Some(id) = RowId::normalize(table.cell(record, id_idx)) else {
            tracing::warn!(source = %table.source, record = line + 1, "Skipping raw row with blank id");
            continue;
        };
        if !seen.insert(id.clone()) {
            tracing::warn!(source = %table.source, row_id = %id, "Skipping duplicate raw row id");
            continue;
        }
        rows.push(Row {
            id,
            text: table.cell(record, text_idx).to_string(),
        });
    }

    if rows.is_empty() {
        return Err(CodelabelError::Dataset(format!(
            "{} has no usable rows",
            table.source
        )));
    }

    Ok(rows)
}

/// Parse a human-coded cell into 0/1. Blank or non-binary values are missing.
pub fn parse_binary(cell: &str) -> Option<u8> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" => Some(1),
        "0" | "0.0" | "false" => Some(0),
        _ => None,
    }
}

/// Human-coded labels keyed by construct, then row.
#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    labels: BTreeMap<String, BTreeMap<RowId, u8>>,
}

impl GroundTruth {
    pub fn insert(&mut self, construct: &str, row_id: RowId, value: u8) {
        self.labels
            .entry(construct.to_string())
            .or_default()
            .insert(row_id, value);
    }

    pub fn for_construct(&self, construct: &str) -> Option<&BTreeMap<RowId, u8>> {
        self.labels.get(construct)
    }

    pub fn get(&self, row_id: &RowId, construct: &str) -> Option<u8> {
        self.labels.get(construct)?.get(row_id).copied()
    }

    /// Constructs with at least one coded value.
    pub fn constructs(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Melt a wide coded table (id column + one column per construct) into
/// [`GroundTruth`]. Columns are matched to codebook constructs by canonical
/// name; unmatched columns are ignored with a warning.
pub fn load_ground_truth(
    table: &Table,
    id_col: &str,
    codebook: &Codebook,
) -> Result<GroundTruth, CodelabelError> {
    let id_idx = table.column(id_col)?;

    let mut columns = Vec::new();
    let mut matched = HashSet::new();
    for (idx, header) in table.headers.iter().enumerate() {
        if idx == id_idx {
            continue;
        }
        match codebook.resolve(header) {
            Some(construct) => {
                if !matched.insert(construct.name.clone()) {
                    return Err(CodelabelError::Dataset(format!(
                        "{}: more than one column maps to construct '{}'",
                        table.source, construct.name
                    )));
                }
                columns.push((idx, construct.name.clone()));
            }
            None => {
                tracing::warn!(source = %table.source, column = %header, "Ignoring coded column with no matching construct");
            }
        }
    }

    for construct in codebook.iter().filter(|c| !matched.contains(&c.name)) {
        tracing::warn!(source = %table.source, construct = %construct.name, "No coded column for construct");
    }

    let mut truth = GroundTruth::default();
    for record in &table.records {
        let Some(row_id) = RowId::normalize(table.cell(record, id_idx)) else {
            continue;
        };
        for (idx, construct) in &columns {
            let cell = table.cell(record, *idx);
            match parse_binary(cell) {
                Some(value) => truth.insert(construct, row_id.clone(), value),
                None => {
                    tracing::debug!(row_id = %row_id, construct = %construct, value = %cell, "Missing or non-binary coded value");
                }
            }
        }
    }

    Ok(truth)
}
