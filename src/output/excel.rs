//! Excel Workbook Sink
//!
//! One worksheet per inventory sheet. Every record of a successful call
//! becomes a row prefixed with the account and region it came from;
//! columns are the union of record fields in first-seen order. Nested
//! values are written as compact JSON.

use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::scan::types::{CallOutcome, ScanReport};

const ACCOUNT_COLUMN: &str = "account_id";
const REGION_COLUMN: &str = "region";

/// Worksheet names are limited to 31 characters
const MAX_SHEET_NAME: usize = 31;
/// Characters a cell can hold
const MAX_CELL_CHARS: usize = 32_767;
/// Data rows below the header row
const MAX_ROWS: usize = 1_048_575;
const MAX_COLUMNS: usize = 16_384;

/// Rows of one worksheet
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    index: HashMap<String, usize>,
}

impl SheetTable {
    fn new(name: &str) -> Self {
        let mut table = Self {
            name: name.to_string(),
            columns: Vec::new(),
            rows: Vec::new(),
            index: HashMap::new(),
        };
        table.column(ACCOUNT_COLUMN);
        table.column(REGION_COLUMN);
        table
    }

    fn column(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        self.columns.push(name.to_string());
        self.index.insert(name.to_string(), self.columns.len() - 1);
        self.columns.len() - 1
    }

    fn push(&mut self, outcome: &CallOutcome, record: Map<String, Value>) {
        let mut row = vec![
            Value::String(outcome.target.account_id.clone()),
            Value::String(outcome.target.region.clone()),
        ];
        for (key, value) in record {
            let i = self.column(&key);
            if row.len() <= i {
                row.resize(i + 1, Value::Null);
            }
            row[i] = value;
        }
        self.rows.push(row);
    }
}

/// Split a call result into records: list items, a lone object or a scalar
fn records(result: &Value) -> Vec<Map<String, Value>> {
    let single = |value: &Value| match value {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("Value".to_string(), other.clone());
            map
        }
    };
    match result {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(single).collect(),
        other => vec![single(other)],
    }
}

/// Group the successful outcomes of a report by sheet name, rows ordered
/// by account and region
pub fn tables(report: &ScanReport) -> Vec<SheetTable> {
    let mut outcomes: Vec<&CallOutcome> = report.result.outcomes().collect();
    outcomes.sort_by(|a, b| {
        (&a.target.account_id, &a.target.region).cmp(&(&b.target.account_id, &b.target.region))
    });

    let mut tables: BTreeMap<String, SheetTable> = BTreeMap::new();
    for outcome in outcomes {
        let table = tables
            .entry(outcome.target.sheet_name.clone())
            .or_insert_with(|| SheetTable::new(&outcome.target.sheet_name));
        let Some(result) = outcome.raw_result.as_ref().filter(|_| outcome.success) else {
            continue;
        };
        for record in records(result) {
            table.push(outcome, record);
        }
    }
    tables.into_values().collect()
}

/// A valid, unique worksheet name for a sheet
fn worksheet_name(name: &str, used: &mut HashSet<String>) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\') { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches('\'');
    let base: String = if cleaned.is_empty() {
        "Sheet".to_string()
    } else {
        cleaned.chars().take(MAX_SHEET_NAME).collect()
    };

    let mut candidate = base.clone();
    let mut n = 2;
    while used.contains(&candidate.to_lowercase()) {
        let suffix = format!("~{}", n);
        let stem: String = base.chars().take(MAX_SHEET_NAME - suffix.len()).collect();
        candidate = format!("{}{}", stem, suffix);
        n += 1;
    }
    used.insert(candidate.to_lowercase());
    candidate
}

fn write_cell(worksheet: &mut Worksheet, row: u32, col: u16, value: &Value) -> Result<(), XlsxError> {
    let text = |s: &str| -> String {
        if s.chars().count() > MAX_CELL_CHARS {
            s.chars().take(MAX_CELL_CHARS).collect()
        } else {
            s.to_string()
        }
    };
    match value {
        Value::Null => {}
        Value::Bool(b) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) => {
                worksheet.write_number(row, col, f)?;
            }
            None => {
                worksheet.write_string(row, col, n.to_string())?;
            }
        },
        Value::String(s) => {
            worksheet.write_string(row, col, text(s))?;
        }
        nested => {
            worksheet.write_string(row, col, text(&nested.to_string()))?;
        }
    }
    Ok(())
}

fn save(path: &Path, tables: &[SheetTable]) -> Result<(), XlsxError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let mut used = HashSet::new();

    for table in tables {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(worksheet_name(&table.name, &mut used))?;

        for (col, name) in table.columns.iter().take(MAX_COLUMNS).enumerate() {
            worksheet.write_string_with_format(0, col as u16, name, &header)?;
        }
        if table.rows.len() > MAX_ROWS {
            warn!(sheet = %table.name, rows = table.rows.len(), "Worksheet truncated to {} rows", MAX_ROWS);
        }
        for (r, row) in table.rows.iter().take(MAX_ROWS).enumerate() {
            for (col, value) in row.iter().take(MAX_COLUMNS).enumerate() {
                write_cell(worksheet, r as u32 + 1, col as u16, value)?;
            }
        }

        worksheet.set_freeze_panes(1, 0)?;
        worksheet.autofit();
    }

    workbook.save(path)
}

/// Write the workbook of a report, returning the number of worksheets
pub async fn write_workbook(path: PathBuf, report: &ScanReport) -> Result<usize> {
    let tables = tables(report);
    let count = tables.len();
    tokio::task::spawn_blocking(move || {
        save(&path, &tables).with_context(|| format!("Failed to write workbook {}", path.display()))
    })
    .await
    .context("Workbook writer stopped")??;
    Ok(count)
}
