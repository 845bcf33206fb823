// src/table.rs

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::{
    fmt,
    hash::{Hash, Hasher},
    path::Path,
};

/// A single cell, typed the way SQLite stores it.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

// Reals compare by bit pattern so that rows can live in a HashSet.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Integer(i) => i.hash(state),
            Value::Real(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Storage class of a relation column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    /// Map a declared SQLite column type onto its affinity.
    pub fn from_decl(decl: &str) -> Self {
        let d = decl.to_ascii_uppercase();
        if d.contains("INT") {
            ColumnType::Integer
        } else if d.contains("REAL") || d.contains("FLOA") || d.contains("DOUB") {
            ColumnType::Real
        } else {
            ColumnType::Text
        }
    }

    /// Parse one raw CSV cell. Empty and NaN cells are NULL; cells that do not
    /// fit the column type are kept as text, the same way SQLite would store
    /// them.
    pub fn parse(self, raw: &str) -> Value {
        let trimmed = raw.trim();
        if is_missing(trimmed) {
            return Value::Null;
        }
        match self {
            ColumnType::Integer => {
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Value::Integer(i);
                }
                match trimmed.parse::<f64>() {
                    Ok(f) if f.fract() == 0.0 && (I64_LOW..I64_HIGH).contains(&f) => {
                        Value::Integer(f as i64)
                    }
                    Ok(f) => real(f),
                    Err(_) => Value::Text(raw.to_string()),
                }
            }
            ColumnType::Real => match trimmed.parse::<f64>() {
                Ok(f) => real(f),
                Err(_) => Value::Text(raw.to_string()),
            },
            ColumnType::Text => Value::Text(raw.to_string()),
        }
    }
}

// Floats in [I64_LOW, I64_HIGH) convert to i64 exactly.
const I64_LOW: f64 = i64::MIN as f64;
const I64_HIGH: f64 = i64::MAX as f64;

/// Cells read as NULL: blank, or any spelling of NaN (SQLite stores NaN as NULL).
fn is_missing(trimmed: &str) -> bool {
    trimmed.is_empty() || trimmed.parse::<f64>().map_or(false, f64::is_nan)
}

/// SQLite does not keep the sign of zero.
fn real(f: f64) -> Value {
    if f == 0.0 {
        Value::Real(0.0)
    } else {
        Value::Real(f)
    }
}

/// An ordered set of named columns plus rows, in row order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Tab-separated preview of the first `limit` rows.
    pub fn render(&self, limit: usize) -> String {
        let mut out = self.columns.join("\t");
        for row in self.rows.iter().take(limit) {
            out.push('\n');
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            out.push_str(&cells.join("\t"));
        }
        out
    }
}

/// Untyped CSV content: header plus string records.
#[derive(Debug, Clone)]
pub struct RawCsv {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl RawCsv {
    /// Infer one storage class per column from the non-empty cells.
    pub fn infer_types(&self) -> Vec<ColumnType> {
        (0..self.headers.len())
            .map(|i| {
                let mut cells = self
                    .records
                    .iter()
                    .filter_map(|r| r.get(i))
                    .map(|s| s.trim())
                    .filter(|s| !is_missing(s))
                    .peekable();
                if cells.peek().is_none() {
                    return ColumnType::Text;
                }
                let cells: Vec<&str> = cells.collect();
                if cells.iter().all(|s| s.parse::<i64>().is_ok()) {
                    ColumnType::Integer
                } else if cells.iter().all(|s| s.parse::<f64>().is_ok()) {
                    ColumnType::Real
                } else {
                    ColumnType::Text
                }
            })
            .collect()
    }

    /// Convert every record using the given per-column types.
    pub fn typed_rows(&self, types: &[ColumnType]) -> Vec<Vec<Value>> {
        self.records
            .iter()
            .map(|rec| {
                types
                    .iter()
                    .enumerate()
                    .map(|(i, ty)| rec.get(i).map(|s| ty.parse(s)).unwrap_or(Value::Null))
                    .collect()
            })
            .collect()
    }
}

/// Read a headed CSV file into memory.
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<RawCsv> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening CSV {}", path.display()))?;

    let headers: Vec<String> = rdr
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record =
            result.with_context(|| format!("CSV parse error in {} at record {}", path.display(), idx))?;
        records.push(record.iter().map(|s| s.to_string()).collect());
    }

    Ok(RawCsv { headers, records })
}
