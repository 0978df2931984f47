//! Tabular training corpus stored as CSV

use crate::error::{Result, SchemaError, ServiceError};
use crate::feature_schema::{required_columns, FEATURE_COUNT};
use crate::staging::StagedFile;
use crate::types::LabeledExample;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Width of one row: the features followed by `price`.
pub const ROW_WIDTH: usize = FEATURE_COUNT + 1;

/// Complete rows in `required_columns()` order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    rows: Vec<[f64; ROW_WIDTH]>,
}

impl Table {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding `examples` in order.
    pub fn from_examples(examples: &[LabeledExample]) -> Self {
        let mut table = Self::new();
        for example in examples {
            table.push(example);
        }
        table
    }

    /// Append one example as a row.
    pub fn push(&mut self, example: &LabeledExample) {
        self.rows.push(example_row(example));
    }

    /// Number of complete rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Raw rows, features followed by `price`.
    pub fn rows(&self) -> &[[f64; ROW_WIDTH]] {
        &self.rows
    }

    /// Feature matrix, row-major.
    pub fn features(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r[..FEATURE_COUNT].to_vec()).collect()
    }

    /// The `price` column.
    pub fn targets(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r[FEATURE_COUNT]).collect()
    }

    /// Row-wise concatenation, in order.
    pub fn concat(tables: Vec<Table>) -> Table {
        let rows = tables.into_iter().flat_map(|t| t.rows).collect();
        Table { rows }
    }
}

/// One example laid out in `required_columns()` order.
pub(crate) fn example_row(example: &LabeledExample) -> [f64; ROW_WIDTH] {
    let mut row = [0.0; ROW_WIDTH];
    row[..FEATURE_COUNT].copy_from_slice(&example.features.to_row());
    row[FEATURE_COUNT] = example.price;
    row
}

/// Load a dataset file.
///
/// Every required column must be present; other columns are dropped. Rows
/// with an empty or `NaN` cell are skipped. Any other non-numeric cell fails
/// the whole load.
pub fn load_table<P: AsRef<Path>>(path: P) -> Result<Table> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| ServiceError::io(path, e))?;
    let table = read_table(file, path)?;

    info!(path = %path.display(), rows = table.len(), "Dataset loaded");
    Ok(table)
}

/// Parse CSV from any reader; `origin` names the source in errors.
pub fn read_table<R: Read>(reader: R, origin: &Path) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| ServiceError::csv(origin, e))?
        .clone();

    let mut positions = [0usize; ROW_WIDTH];
    let mut missing = SchemaError::in_origin(origin.display().to_string());
    for (idx, column) in required_columns().into_iter().enumerate() {
        match headers.iter().position(|h| h == column) {
            Some(pos) => positions[idx] = pos,
            None => missing.push(column, "missing required column"),
        }
    }
    if !missing.is_empty() {
        return Err(missing.into());
    }

    let columns = required_columns();
    let mut table = Table::new();
    let mut dropped = 0usize;

    'records: for record in reader.records() {
        let record = record.map_err(|e| ServiceError::csv(origin, e))?;
        let line = record.position().map_or(0, |p| p.line());

        let mut row = [0.0; ROW_WIDTH];
        for (idx, &pos) in positions.iter().enumerate() {
            let cell = record.get(pos).unwrap_or("");
            match parse_cell(cell) {
                Cell::Value(v) => row[idx] = v,
                Cell::Missing => {
                    dropped += 1;
                    continue 'records;
                }
                Cell::Invalid => {
                    return Err(SchemaError::in_origin(origin.display().to_string())
                        .with(
                            columns[idx],
                            format!("line {}: '{}' is not a number", line, cell),
                        )
                        .into());
                }
            }
        }
        table.rows.push(row);
    }

    if dropped > 0 {
        debug!(origin = %origin.display(), dropped = dropped, "Dropped rows with missing values");
    }
    Ok(table)
}

enum Cell {
    Value(f64),
    Missing,
    Invalid,
}

fn parse_cell(cell: &str) -> Cell {
    match cell {
        "" | "NaN" | "nan" => Cell::Missing,
        "True" | "true" => Cell::Value(1.0),
        "False" | "false" => Cell::Value(0.0),
        _ => match cell.parse::<f64>() {
            Ok(v) if v.is_nan() => Cell::Missing,
            Ok(v) => Cell::Value(v),
            Err(_) => Cell::Invalid,
        },
    }
}

/// CSV writer shared by every dataset file. Header records are written explicitly.
pub(crate) fn row_writer<W: Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().has_headers(false).from_writer(inner)
}

/// Write the `required_columns()` header record.
pub(crate) fn write_header<W: Write>(writer: &mut csv::Writer<W>) -> csv::Result<()> {
    writer.write_record(required_columns())
}

/// Write one row in `required_columns()` order.
pub(crate) fn write_row<W: Write>(
    writer: &mut csv::Writer<W>,
    row: &[f64; ROW_WIDTH],
) -> csv::Result<()> {
    writer.write_record(row.iter().map(|v| v.to_string()))
}

/// Serialize the table with a header row into `<path>.tmp` without touching `path`.
pub fn stage_table<P: AsRef<Path>>(path: P, table: &Table) -> Result<StagedFile> {
    let path = path.as_ref();
    let mut writer = row_writer(Vec::new());
    write_header(&mut writer).map_err(|e| ServiceError::csv(path, e))?;
    for row in &table.rows {
        write_row(&mut writer, row).map_err(|e| ServiceError::csv(path, e))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ServiceError::io(path, e.into_error()))?;

    StagedFile::write(path, &bytes)
}

/// Write the table with a header row, replacing `path` atomically.
pub fn write_table<P: AsRef<Path>>(path: P, table: &Table) -> Result<()> {
    let path = path.as_ref();
    stage_table(path, table)?.commit()?;
    info!(path = %path.display(), rows = table.len(), "Dataset written");
    Ok(())
}
