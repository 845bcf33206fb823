// src/reshape/mod.rs

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use crate::outcome::{Outcome, StageReport};
use crate::store::LocalStore;
use crate::table::{Table, Value};

pub mod coerce;
pub mod format;

pub use format::format_label;

pub const STAGE: &str = "reshape";

/// Output schema, in order.
pub const CANONICAL_COLUMNS: [&str; 12] = [
    "Data",
    "Nome Completo",
    "Atualmente Sou",
    "Minha Equipe",
    "Reuniões do Time",
    "Colaboração Entre Membros",
    "Ambiente de Aprendizagem",
    "Comunicação Entre Membros",
    "Satisfação Geral Comunidade",
    "Feedbacks",
    "Horas Semanais Dedicadas",
    "Comentário Adicional",
];

const DATE_LABEL: &str = "Data";
const HOURS_LABEL: &str = "Horas Semanais Dedicadas";
const COMMENT_LABELS: [&str; 2] = ["Comentario Adicional", "Comentário Adicional"];

fn is_label(label: &str, target: &str) -> bool {
    label.to_lowercase() == target.to_lowercase()
}

fn is_comment(label: &str) -> bool {
    COMMENT_LABELS.iter().any(|c| is_label(label, c))
}

/// Per-relation cleanup: formatted labels, date and hours coercion, and
/// formatting of every text cell outside the comment column.
///
/// Values that cannot be coerced become NULL; their count per column is
/// returned alongside the table.
pub fn reshape_relation(relation: &str, table: Table) -> (Table, Vec<(String, usize)>) {
    let columns: Vec<String> = table.columns.iter().map(|c| format_label(c)).collect();
    let date_idx = columns.iter().position(|c| is_label(c, DATE_LABEL));
    let hours_idx = columns.iter().position(|c| is_label(c, HOURS_LABEL));
    let mut misses = vec![0usize; columns.len()];

    let rows = table
        .rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(i, v)| {
                    let coerced = if Some(i) == date_idx {
                        Some(coerce::to_date_string(&v))
                    } else if Some(i) == hours_idx {
                        Some(coerce::to_integer(&v))
                    } else {
                        None
                    };
                    match (coerced, v) {
                        (Some(Some(c)), _) => c,
                        (Some(None), v) => {
                            if !v.is_null() {
                                misses[i] += 1;
                            }
                            Value::Null
                        }
                        (None, Value::Text(s)) if !is_comment(&columns[i]) => {
                            Value::Text(format_label(&s))
                        }
                        (None, v) => v,
                    }
                })
                .collect()
        })
        .collect();

    let misses: Vec<(String, usize)> = columns
        .iter()
        .zip(misses)
        .filter(|(_, n)| *n > 0)
        .map(|(c, n)| (c.clone(), n))
        .collect();
    for (col, n) in &misses {
        warn!(relation, column = %col, values = n, "values could not be coerced; set to NULL");
    }

    (Table { columns, rows }, misses)
}

/// Stack tables row-wise. Columns are matched by label; the result carries
/// the union of labels in order of first appearance, and cells a table does
/// not have are NULL.
pub fn concat(tables: Vec<Table>) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for (i, t) in tables.iter().enumerate() {
        if i > 0 && t.columns != tables[0].columns {
            warn!(columns = ?t.columns, "column set differs from first relation");
        }
        for c in &t.columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
    }

    let mut out = Table::new(columns);
    for t in tables {
        let map: Vec<Option<usize>> = out.columns.iter().map(|c| t.column_index(c)).collect();
        for mut row in t.rows {
            let aligned = map
                .iter()
                .map(|idx| match idx {
                    Some(i) => std::mem::replace(&mut row[*i], Value::Null),
                    None => Value::Null,
                })
                .collect();
            out.rows.push(aligned);
        }
    }
    out
}

/// Relabel columns by position with the canonical schema. Columns past the
/// twelfth keep their own label.
pub fn rename_canonical(table: &mut Table) {
    if table.columns.len() != CANONICAL_COLUMNS.len() {
        warn!(
            columns = table.columns.len(),
            expected = CANONICAL_COLUMNS.len(),
            "column count differs from canonical schema; labels may be misaligned"
        );
    }
    for (col, canonical) in table.columns.iter_mut().zip(CANONICAL_COLUMNS) {
        *col = canonical.to_string();
    }
}

/// Read every relation, reshape each, concatenate, and apply the canonical
/// labels. Any unreadable relation aborts the whole reshape.
#[instrument(level = "info", skip_all)]
pub fn reshape_store(store: &LocalStore) -> Result<(Table, StageReport)> {
    let relations = store.list_tables()?;
    if relations.is_empty() {
        anyhow::bail!("no relations in local store");
    }

    let mut report = StageReport::new(STAGE);
    let mut tables = Vec::with_capacity(relations.len());
    for name in relations {
        let raw = store
            .read_table(&name)
            .with_context(|| format!("reading relation {}", name))?;
        debug!(relation = %name, rows = raw.len(), "reshaping");
        let (table, misses) = reshape_relation(&name, raw);
        for (col, n) in misses {
            report.record(Outcome::skipped(
                format!("{}.{}", name, col),
                format!("{} values not coercible", n),
            ));
        }
        report.record(Outcome::Done);
        tables.push(table);
    }

    let mut unified = concat(tables);
    rename_canonical(&mut unified);
    report.rows = unified.len();
    info!(rows = unified.len(), columns = unified.columns.len(), "unified table built");
    Ok((unified, report))
}

/// Open the store at `path` and reshape it.
pub fn reshape_path(path: &Path) -> Result<(Table, StageReport)> {
    let store = LocalStore::open(path)?;
    reshape_store(&store)
}
