// src/merge.rs

use anyhow::{Context, Result};
use glob::{glob, Pattern};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

use crate::outcome::{Outcome, StageReport};
use crate::store::LocalStore;
use crate::table::{read_csv, ColumnType, RawCsv, Value};

pub const STAGE: &str = "merge";

/// What happened to one CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub relation: String,
    pub created: bool,
    pub appended: usize,
}

/// Relation name for a CSV path: the file name without its extension.
pub fn relation_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Rows of `incoming` whose full value tuple is not among `existing`.
/// Incoming order is preserved.
pub fn new_rows(existing: &[Vec<Value>], incoming: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let seen: HashSet<&[Value]> = existing.iter().map(Vec::as_slice).collect();
    incoming
        .into_iter()
        .filter(|row| !seen.contains(row.as_slice()))
        .collect()
}

/// Bind CSV records to an existing relation's columns by header name,
/// parsing each cell with the relation's column type.
fn align_to_relation(raw: &RawCsv, relation: &str, columns: &[(String, ColumnType)]) -> Vec<Vec<Value>> {
    for h in &raw.headers {
        if !columns.iter().any(|(c, _)| c == h) {
            warn!(relation, column = %h, "csv column not in relation; dropped");
        }
    }
    let sources: Vec<Option<usize>> = columns
        .iter()
        .map(|(c, _)| {
            let idx = raw.headers.iter().position(|h| h == c);
            if idx.is_none() {
                warn!(relation, column = %c, "relation column missing from csv; filled with NULL");
            }
            idx
        })
        .collect();

    raw.records
        .iter()
        .map(|rec| {
            columns
                .iter()
                .zip(&sources)
                .map(|((_, ty), src)| {
                    src.and_then(|i| rec.get(i))
                        .map(|s| ty.parse(s))
                        .unwrap_or(Value::Null)
                })
                .collect()
        })
        .collect()
}

/// Reconcile one CSV with its relation.
#[instrument(level = "debug", skip(store), fields(path = %path.display()))]
pub fn merge_file(store: &mut LocalStore, path: &Path) -> Result<MergeResult> {
    let relation = relation_name(path)
        .with_context(|| format!("no relation name for {}", path.display()))?;
    let raw = read_csv(path)?;

    if !store.table_exists(&relation)? {
        let types = raw.infer_types();
        let columns: Vec<(String, ColumnType)> =
            raw.headers.iter().cloned().zip(types.iter().copied()).collect();
        let rows = raw.typed_rows(&types);
        let n = store.create_and_load(&relation, &columns, &rows)?;
        info!(relation = %relation, rows = n, "created relation and inserted all records");
        return Ok(MergeResult {
            relation,
            created: true,
            appended: n,
        });
    }

    let columns = store.columns(&relation)?;
    let incoming = align_to_relation(&raw, &relation, &columns);
    let existing = store.read_table(&relation)?;
    let fresh = new_rows(&existing.rows, incoming);

    let names: Vec<String> = columns.into_iter().map(|(c, _)| c).collect();
    let n = store.append_rows(&relation, &names, &fresh)?;
    if n > 0 {
        info!(relation = %relation, rows = n, "appended new records");
    } else {
        info!(relation = %relation, "no new records");
    }
    Ok(MergeResult {
        relation,
        created: false,
        appended: n,
    })
}

/// Every `*.csv` directly under `dir`, sorted by name.
pub fn local_csvs(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*.csv", Pattern::escape(&dir.to_string_lossy()));
    let mut paths: Vec<PathBuf> = glob(&pattern)
        .context("invalid glob pattern for csv scan")?
        .filter_map(|entry| match entry {
            Ok(p) if p.is_file() => Some(p),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "cannot read directory entry");
                None
            }
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Merge every local CSV into the store at `store_path`.
///
/// Failing to open the store is fatal; a file that cannot be read or loaded
/// is skipped.
#[instrument(level = "info", skip_all, fields(store = %store_path.display()))]
pub fn merge_dir(store_path: &Path, data_dir: &Path) -> Result<StageReport> {
    let mut store = LocalStore::open(store_path)?;
    let mut report = StageReport::new(STAGE);

    for path in local_csvs(data_dir)? {
        let item = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let outcome = match merge_file(&mut store, &path) {
            Ok(res) => {
                report.rows += res.appended;
                Outcome::Done
            }
            Err(e) => Outcome::skipped(item, format!("{:#}", e)),
        };
        report.record(outcome);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn row(nome: &str, horas: i64) -> Vec<Value> {
        vec![Value::Text(nome.into()), Value::Integer(horas)]
    }

    #[test]
    fn creates_then_appends_only_new_rows() -> Result<()> {
        let dir = tempdir()?;
        let csv = dir.path().join("pesquisa1.csv");
        let mut store = LocalStore::open(dir.path().join("data.db"))?;

        fs::write(&csv, "nome,horas_dedicadas\nana,10\n")?;
        let first = merge_file(&mut store, &csv)?;
        assert_eq!(
            first,
            MergeResult {
                relation: "pesquisa1".into(),
                created: true,
                appended: 1
            }
        );

        fs::write(&csv, "nome,horas_dedicadas\nana,10\nbruno,5\n")?;
        let second = merge_file(&mut store, &csv)?;
        assert!(!second.created);
        assert_eq!(second.appended, 1);

        let t = store.read_table("pesquisa1")?;
        assert_eq!(t.rows, vec![row("ana", 10), row("bruno", 5)]);
        Ok(())
    }

    #[test]
    fn merging_twice_is_idempotent() -> Result<()> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir_all(&data)?;
        fs::write(data.join("a.csv"), "nome,horas\nana,10\nbruno,5\n")?;
        let db = dir.path().join("data.db");

        merge_dir(&db, &data)?;
        let once = LocalStore::open(&db)?.read_table("a")?;
        let report = merge_dir(&db, &data)?;
        let twice = LocalStore::open(&db)?.read_table("a")?;

        assert_eq!(once, twice);
        assert_eq!(report.rows, 0);
        Ok(())
    }

    #[test]
    fn nan_and_negative_zero_cells_merge_idempotently() -> Result<()> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir_all(&data)?;
        fs::write(data.join("horas.csv"), "nome,horas\nana,10\nbruno,NaN\n")?;
        fs::write(data.join("notas.csv"), "nome,nota\nana,-0.0\nbruno,1.5\n")?;
        let db = dir.path().join("data.db");

        let first = merge_dir(&db, &data)?;
        assert_eq!(first.rows, 4);
        for _ in 0..2 {
            let again = merge_dir(&db, &data)?;
            assert_eq!(again.rows, 0);
        }

        let store = LocalStore::open(&db)?;
        let horas = store.read_table("horas")?;
        assert_eq!(horas.rows, vec![row("ana", 10), vec![Value::Text("bruno".into()), Value::Null]]);
        assert_eq!(store.read_table("notas")?.rows[0][1], Value::Real(0.0));
        Ok(())
    }

    #[test]
    fn difference_is_full_row_and_keeps_existing() {
        let existing = vec![row("ana", 10), row("bruno", 5)];
        let incoming = vec![row("ana", 10), row("ana", 11), row("carla", 5), row("bruno", 5)];

        let fresh = new_rows(&existing, incoming.clone());
        assert_eq!(fresh, vec![row("ana", 11), row("carla", 5)]);

        let mut merged = existing.clone();
        merged.extend(fresh.clone());
        for r in &existing {
            assert!(merged.contains(r));
        }
        let expected: Vec<_> = incoming.into_iter().filter(|r| !existing.contains(r)).collect();
        assert_eq!(fresh, expected);
    }

    #[test]
    fn identical_submission_is_dropped() -> Result<()> {
        let dir = tempdir()?;
        let csv = dir.path().join("p.csv");
        let mut store = LocalStore::open_in_memory()?;

        fs::write(&csv, "nome,horas\nana,10\n")?;
        merge_file(&mut store, &csv)?;
        // a second, genuinely separate submission with identical values
        fs::write(&csv, "nome,horas\nana,10\nana,10\n")?;
        let res = merge_file(&mut store, &csv)?;
        assert_eq!(res.appended, 0);
        assert_eq!(store.read_table("p")?.len(), 1);
        Ok(())
    }

    #[test]
    fn reordered_header_binds_by_name() -> Result<()> {
        let dir = tempdir()?;
        let csv = dir.path().join("p.csv");
        let mut store = LocalStore::open_in_memory()?;

        fs::write(&csv, "nome,horas\nana,10\n")?;
        merge_file(&mut store, &csv)?;
        fs::write(&csv, "horas,nome,extra\n10,ana,x\n7,dora,y\n")?;
        let res = merge_file(&mut store, &csv)?;

        assert_eq!(res.appended, 1);
        let t = store.read_table("p")?;
        assert_eq!(t.columns, vec!["nome", "horas"]);
        assert_eq!(t.rows[1], row("dora", 7));
        Ok(())
    }

    #[test]
    fn unreadable_file_is_skipped_not_fatal() -> Result<()> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir_all(&data)?;
        fs::write(data.join("bad.csv"), "a,b\n1,2,3\n")?;
        fs::write(data.join("good.csv"), "a,b\n1,2\n")?;
        fs::write(data.join("notes.txt"), "ignored")?;

        let report = merge_dir(&dir.path().join("data.db"), &data)?;
        assert_eq!(report.done, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "bad.csv");
        Ok(())
    }

    #[test]
    fn store_that_cannot_open_is_fatal() -> Result<()> {
        let dir = tempdir()?;
        // a directory where the database file should be
        let db = dir.path().join("data.db");
        fs::create_dir_all(&db)?;
        assert!(merge_dir(&db, dir.path()).is_err());
        Ok(())
    }
}
