// src/store.rs

use anyhow::{Context, Result};
use rusqlite::{
    params, params_from_iter,
    types::{FromSql, FromSqlResult, ToSqlOutput, Value as SqlValue, ValueRef},
    Connection, ToSql,
};
use std::{fs, path::Path};
use tracing::debug;

use crate::table::{ColumnType, Table, Value};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                Value::Text(String::from_utf8_lossy(t).into_owned())
            }
        })
    }
}

/// Quote an identifier for SQLite.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The local relational file: one relation per source CSV.
/// Relations are append-only; nothing here updates or deletes rows.
pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    /// Open (or create) the store file, creating its parent directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening local store {}", path.display()))?;
        // sqlite opens lazily; touch the schema so a bad file fails here
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |r| r.get::<_, i64>(0))
            .with_context(|| format!("reading local store {}", path.display()))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// User tables, in creation order.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY rowid",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        let mut rows = stmt.query(params![name])?;
        Ok(rows.next()?.is_some())
    }

    /// Column names and affinities, in declaration order.
    pub fn columns(&self, name: &str) -> Result<Vec<(String, ColumnType)>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(name));
        let mut stmt = self.conn.prepare(&sql)?;
        let cols = stmt
            .query_map([], |row| {
                let col: String = row.get(1)?;
                let decl: Option<String> = row.get(2)?;
                Ok((col, ColumnType::from_decl(decl.as_deref().unwrap_or(""))))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cols)
    }

    /// Create `name` and bulk-load `rows` in a single transaction.
    pub fn create_and_load(
        &mut self,
        name: &str,
        columns: &[(String, ColumnType)],
        rows: &[Vec<Value>],
    ) -> Result<usize> {
        let defs: Vec<String> = columns
            .iter()
            .map(|(c, ty)| format!("{} {}", quote_ident(c), ty.sql_name()))
            .collect();
        let ddl = format!("CREATE TABLE {} ({})", quote_ident(name), defs.join(", "));
        let names: Vec<String> = columns.iter().map(|(c, _)| c.clone()).collect();

        let tx = self.conn.transaction()?;
        tx.execute(&ddl, [])
            .with_context(|| format!("creating relation {}", name))?;
        let n = insert_rows(&tx, name, &names, rows)?;
        tx.commit()?;
        Ok(n)
    }

    /// Append `rows` (aligned with `columns`) to an existing relation.
    pub fn append_rows(&mut self, name: &str, columns: &[String], rows: &[Vec<Value>]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let n = insert_rows(&tx, name, columns, rows)?;
        tx.commit()?;
        Ok(n)
    }

    /// Every row of `name`, in insertion order.
    pub fn read_table(&self, name: &str) -> Result<Table> {
        let sql = format!("SELECT * FROM {} ORDER BY rowid", quote_ident(name));
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("reading relation {}", name))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("reading rows of {}", name))?;
        debug!(relation = name, rows = rows.len(), "read relation");
        Ok(Table { columns, rows })
    }
}

fn insert_rows(conn: &Connection, name: &str, columns: &[String], rows: &[Vec<Value>]) -> Result<usize> {
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(name),
        cols.join(", "),
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    for row in rows {
        stmt.execute(params_from_iter(row.iter()))
            .with_context(|| format!("inserting into {}", name))?;
    }
    Ok(rows.len())
}
