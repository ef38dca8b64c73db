//! Tabular dataset model: typed cells, CSV load/save, schema description.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{AnalystError, Result};

/// Timestamp layouts tried in order when a text cell is read as a date.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%d/%m/%Y"];

const NULL_MARKERS: &[&str] = &["", "na", "n/a", "nan", "null", "none"];

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

/// A single typed value in a [`Dataset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Infer a typed cell from raw CSV text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if NULL_MARKERS.contains(&trimmed.to_ascii_lowercase().as_str()) {
            return Cell::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Cell::Int(i);
        }
        if trimmed.bytes().any(|b| b.is_ascii_digit()) {
            if let Ok(f) = trimmed.parse::<f64>() {
                return Cell::Float(f);
            }
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Cell::Bool(true),
            "false" => Cell::Bool(false),
            _ => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Numeric view of the cell; booleans and text are not numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) if f.is_finite() => Some(*f),
            _ => None,
        }
    }

    /// Interpret the cell as a point in time.
    ///
    /// Numbers are read as unix seconds; text is tried against the common
    /// layouts, RFC 3339 and bare dates (midnight).
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::Int(secs) => DateTime::from_timestamp(*secs, 0).map(|d| d.naive_utc()),
            Cell::Float(secs) if secs.is_finite() => {
                DateTime::from_timestamp(secs.trunc() as i64, 0).map(|d| d.naive_utc())
            }
            Cell::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    /// Field text for CSV output (nulls become empty fields).
    pub fn to_csv_field(&self) -> String {
        match self {
            Cell::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Total order used for sorting: numbers, then booleans, then text, nulls last.
    pub fn total_cmp(&self, other: &Cell) -> Ordering {
        fn rank(cell: &Cell) -> u8 {
            match cell {
                Cell::Int(_) | Cell::Float(_) => 0,
                Cell::Bool(_) => 1,
                Cell::Text(_) => 2,
                Cell::Null => 3,
            }
        }
        match (self, other) {
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            (a, b) if rank(a) == 0 && rank(b) == 0 => {
                let x = a.as_f64().unwrap_or(f64::NAN);
                let y = b.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "null"),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(x) => write!(f, "{x}"),
            Cell::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<i64> for Cell {
    fn from(i: i64) -> Self {
        Cell::Int(i)
    }
}

impl From<f64> for Cell {
    fn from(f: f64) -> Self {
        Cell::Float(f)
    }
}

/// Parse a timestamp string using the layouts the loader understands.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// ColumnType
// ---------------------------------------------------------------------------

/// Inferred type of a whole column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Empty,
    Bool,
    Int,
    Float,
    Text,
    Mixed,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Int | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Empty => "empty",
            ColumnType::Bool => "bool",
            ColumnType::Int => "int64",
            ColumnType::Float => "float64",
            ColumnType::Text => "text",
            ColumnType::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Row-major table of typed cells with named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a dataset, rejecting rows whose width differs from the header.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let mut ds = Self::new(columns);
        for row in rows {
            ds.push_row(row)?;
        }
        Ok(ds)
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(AnalystError::Other(format!(
                "Row has {} cells but dataset has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Iterate the cells of one column.
    pub fn column_values<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Cell> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |r| &r[idx]))
    }

    /// Cloned cells of one column.
    pub fn column(&self, name: &str) -> Option<Vec<Cell>> {
        self.column_values(name).map(|it| it.cloned().collect())
    }

    /// Non-null numeric values of a column.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<f64>> {
        self.column_values(name)
            .map(|it| it.filter_map(Cell::as_f64).collect())
    }

    pub fn null_count(&self, name: &str) -> Option<usize> {
        self.column_values(name).map(|it| it.filter(|c| c.is_null()).count())
    }

    pub fn unique_count(&self, name: &str) -> Option<usize> {
        self.column_values(name).map(|it| {
            it.filter(|c| !c.is_null())
                .map(|c| c.to_string())
                .collect::<HashSet<_>>()
                .len()
        })
    }

    /// Infer the column type from its non-null cells.
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        let mut ty = ColumnType::Empty;
        for cell in self.column_values(name)? {
            let cell_ty = match cell {
                Cell::Null => continue,
                Cell::Bool(_) => ColumnType::Bool,
                Cell::Int(_) => ColumnType::Int,
                Cell::Float(_) => ColumnType::Float,
                Cell::Text(_) => ColumnType::Text,
            };
            ty = match (ty, cell_ty) {
                (ColumnType::Empty, t) => t,
                (a, b) if a == b => a,
                (ColumnType::Int, ColumnType::Float) | (ColumnType::Float, ColumnType::Int) => {
                    ColumnType::Float
                }
                _ => ColumnType::Mixed,
            };
        }
        Some(ty)
    }

    /// Fraction of non-null cells in the column that parse as timestamps.
    pub fn timestamp_ratio(&self, name: &str) -> Option<f64> {
        let mut total = 0usize;
        let mut parsed = 0usize;
        for cell in self.column_values(name)? {
            if let Cell::Text(_) = cell {
                total += 1;
                if cell.as_datetime().is_some() {
                    parsed += 1;
                }
            } else if !cell.is_null() {
                total += 1;
            }
        }
        Some(if total == 0 {
            0.0
        } else {
            parsed as f64 / total as f64
        })
    }

    pub fn head(&self, n: usize) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Rows for which the predicate holds, as a new dataset.
    pub fn filter_rows(&self, pred: impl Fn(&[Cell]) -> bool) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| pred(r)).cloned().collect(),
        }
    }

    /// Keep only rows for which the predicate holds; returns how many were removed.
    pub fn retain_rows(&mut self, pred: impl Fn(&[Cell]) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| pred(r));
        before - self.rows.len()
    }

    /// Remove exact duplicate rows, keeping the first occurrence.
    pub fn drop_duplicates(&mut self) -> usize {
        let mut seen = HashSet::new();
        let before = self.rows.len();
        self.rows.retain(|row| {
            let key: Vec<String> = row
                .iter()
                .map(|c| match c {
                    Cell::Text(s) => format!("t:{s}"),
                    other => format!("v:{other}"),
                })
                .collect();
            seen.insert(key)
        });
        before - self.rows.len()
    }

    /// Replace nulls in a column; returns the number of cells filled.
    pub fn fill_nulls(&mut self, name: &str, value: &Cell) -> usize {
        let Some(idx) = self.column_index(name) else {
            return 0;
        };
        let mut filled = 0;
        for row in &mut self.rows {
            if row[idx].is_null() {
                row[idx] = value.clone();
                filled += 1;
            }
        }
        filled
    }

    /// A copy sorted by one column; `None` if the column does not exist.
    pub fn sorted_by(&self, name: &str, ascending: bool) -> Option<Dataset> {
        let idx = self.column_index(name)?;
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            let ord = a[idx].total_cmp(&b[idx]);
            if ascending || a[idx].is_null() || b[idx].is_null() {
                ord
            } else {
                ord.reverse()
            }
        });
        Some(Dataset {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Concise description used as context for code generation.
    pub fn schema_description(&self) -> String {
        let mut lines = vec![format!(
            "DataFrame: {} rows, {} columns",
            self.height(),
            self.width()
        )];
        let shown: Vec<&str> = self.columns.iter().take(15).map(String::as_str).collect();
        lines.push(format!(
            "Columns: {}{}",
            shown.join(", "),
            if self.width() > 15 { "..." } else { "" }
        ));
        lines.push("Data types:".to_string());
        for name in self.columns.iter().take(10) {
            let ty = self.column_type(name).unwrap_or(ColumnType::Empty);
            let sample = self
                .column_values(name)
                .and_then(|mut it| it.find(|c| !c.is_null()))
                .map(|c| c.to_string())
                .unwrap_or_else(|| "N/A".to_string());
            let sample = if sample.chars().count() > 30 {
                format!("{}...", sample.chars().take(27).collect::<String>())
            } else {
                sample
            };
            lines.push(format!("  - {name}: {ty} (example: {sample})"));
        }
        if self.width() > 10 {
            lines.push(format!("  ... and {} more columns", self.width() - 10));
        }
        lines.join("\n")
    }

    /// Plain-text table of the first `max_rows` rows.
    pub fn render(&self, max_rows: usize) -> String {
        let shown: Vec<&Vec<Cell>> = self.rows.iter().take(max_rows).collect();
        let index_width = shown.len().saturating_sub(1).to_string().len();
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &shown {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.to_string().chars().count());
            }
        }

        let mut out = String::new();
        out.push_str(&" ".repeat(index_width));
        for (name, w) in self.columns.iter().zip(&widths) {
            out.push_str(&format!("  {name:>w$}", w = *w));
        }
        for (i, row) in shown.iter().enumerate() {
            out.push('\n');
            out.push_str(&format!("{i:<index_width$}"));
            for (cell, w) in row.iter().zip(&widths) {
                out.push_str(&format!("  {:>w$}", cell.to_string(), w = *w));
            }
        }
        out
    }

    // -- CSV ---------------------------------------------------------------

    /// Load a CSV file, sniffing the delimiter and falling back to Latin-1
    /// when the bytes are not valid UTF-8.
    pub fn load_csv(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| AnalystError::DatasetLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let text = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %path.display(), "File is not UTF-8, decoding as Latin-1");
                e.into_bytes().iter().map(|&b| b as char).collect()
            }
        };
        let ds = Self::from_csv_str(&text).map_err(|e| AnalystError::DatasetLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        tracing::info!(
            path = %path.display(),
            rows = ds.height(),
            columns = ds.width(),
            "Dataset loaded"
        );
        Ok(ds)
    }

    /// Parse CSV text with a header row.
    pub fn from_csv_str(text: &str) -> Result<Self> {
        let text = text.trim_start_matches('\u{feff}');
        let first_line = text.lines().next().unwrap_or_default();
        if first_line.trim().is_empty() {
            return Err(AnalystError::Other("CSV input has no header row".into()));
        }
        let delimiter = sniff_delimiter(first_line);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| AnalystError::Other(format!("CSV header error: {e}")))?
            .clone();
        let columns = dedupe_headers(headers.iter());
        let width = columns.len();

        let mut ds = Dataset::new(columns);
        for (line, record) in reader.records().enumerate() {
            let record =
                record.map_err(|e| AnalystError::Other(format!("CSV row {}: {e}", line + 2)))?;
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            let mut row: Vec<Cell> = record.iter().take(width).map(Cell::parse).collect();
            row.resize(width, Cell::Null);
            ds.rows.push(row);
        }
        Ok(ds)
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let io_err = |e: csv::Error| AnalystError::Other(format!("CSV write error: {e}"));
        writer.write_record(&self.columns).map_err(io_err)?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(Cell::to_csv_field))
                .map_err(io_err)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| AnalystError::Other(format!("CSV write error: {e}")))?;
        String::from_utf8(bytes).map_err(|e| AnalystError::Other(e.to_string()))
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_csv_string()?)?;
        Ok(())
    }
}

fn sniff_delimiter(header: &str) -> u8 {
    let mut best = (b',', 0usize);
    for delim in [b',', b';', b'\t', b'|'] {
        let count = header.bytes().filter(|&b| b == delim).count();
        if count > best.1 {
            best = (delim, count);
        }
    }
    best.0
}

fn dedupe_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (i, name) in raw.enumerate() {
        let base = match name.trim() {
            "" => format!("column_{i}"),
            s => s.to_string(),
        };
        let mut candidate = base.clone();
        let mut n = 1;
        while !seen.insert(candidate.clone()) {
            candidate = format!("{base}.{n}");
            n += 1;
        }
        out.push(candidate);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
