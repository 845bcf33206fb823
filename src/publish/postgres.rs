// src/publish/postgres.rs

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, NaiveTime};
use tokio_postgres::{error::SqlState, types::ToSql, Client, Config, NoTls};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{secret_from_env, PostgresConfig};
use crate::outcome::{Outcome, StageReport};
use crate::reshape::{coerce, CANONICAL_COLUMNS};
use crate::table::{Table, Value};

pub const STAGE: &str = "publish_postgres";

/// Canonical label -> storage column, in canonical order.
pub const STORAGE_COLUMNS: [(&str, &str); 12] = [
    ("Data", "data"),
    ("Nome Completo", "nome_completo"),
    ("Atualmente Sou", "atualmente_sou"),
    ("Minha Equipe", "minha_equipe"),
    ("Reuniões do Time", "reunioes_do_time"),
    ("Colaboração Entre Membros", "colaboracao_entre_membros"),
    ("Ambiente de Aprendizagem", "ambiente_de_aprendizagem"),
    ("Comunicação Entre Membros", "comunicacao_entre_membros"),
    ("Satisfação Geral Comunidade", "satisfacao_geral_comunidade"),
    ("Feedbacks", "feedbacks"),
    ("Horas Semanais Dedicadas", "horas_semanais_dedicadas"),
    ("Comentário Adicional", "comentario_adicional"),
];

pub const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS survey";

pub const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS survey.survey_records (
    id SERIAL PRIMARY KEY,
    data TIMESTAMP WITHOUT TIME ZONE,
    nome_completo VARCHAR,
    atualmente_sou VARCHAR,
    minha_equipe VARCHAR,
    reunioes_do_time VARCHAR,
    colaboracao_entre_membros VARCHAR,
    ambiente_de_aprendizagem VARCHAR,
    comunicacao_entre_membros VARCHAR,
    satisfacao_geral_comunidade VARCHAR,
    feedbacks VARCHAR,
    horas_semanais_dedicadas INTEGER,
    comentario_adicional VARCHAR,
    UNIQUE (data, nome_completo)
)"#;

pub const INSERT_RECORD: &str = r#"
INSERT INTO survey.survey_records (
    data, nome_completo, atualmente_sou, minha_equipe, reunioes_do_time,
    colaboracao_entre_membros, ambiente_de_aprendizagem, comunicacao_entre_membros,
    satisfacao_geral_comunidade, feedbacks, horas_semanais_dedicadas, comentario_adicional
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
ON CONFLICT (data, nome_completo) DO NOTHING"#;

/// One unified record in its storage shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyRecord {
    pub data: Option<NaiveDateTime>,
    /// `nome_completo` through `feedbacks`, in column order.
    pub answers: [Option<String>; 9],
    pub horas_semanais_dedicadas: Option<i32>,
    pub comentario_adicional: Option<String>,
}

impl SurveyRecord {
    pub fn nome_completo(&self) -> Option<&str> {
        self.answers[0].as_deref()
    }

    fn params(&self) -> [&(dyn ToSql + Sync); 12] {
        let a = &self.answers;
        [
            &self.data,
            &a[0],
            &a[1],
            &a[2],
            &a[3],
            &a[4],
            &a[5],
            &a[6],
            &a[7],
            &a[8],
            &self.horas_semanais_dedicadas,
            &self.comentario_adicional,
        ]
    }
}

static NULL_VALUE: Value = Value::Null;

fn as_string(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn as_timestamp(v: &Value) -> Option<NaiveDateTime> {
    v.as_text()
        .and_then(coerce::parse_date)
        .map(|d| d.and_time(NaiveTime::MIN))
}

fn as_i32(v: &Value) -> Option<i32> {
    match coerce::to_integer(v) {
        Some(Value::Integer(i)) => i32::try_from(i).ok(),
        _ => None,
    }
}

/// Rename canonical columns to storage columns and coerce each row.
/// Canonical columns missing from `table` are stored as NULL.
pub fn storage_records(table: &Table) -> Vec<SurveyRecord> {
    let idx: Vec<Option<usize>> = CANONICAL_COLUMNS
        .iter()
        .map(|c| table.column_index(c))
        .collect();
    if let Some(missing) = STORAGE_COLUMNS
        .iter()
        .zip(&idx)
        .find(|(_, i)| i.is_none())
        .map(|((c, _), _)| c)
    {
        warn!(column = missing, "canonical column missing; stored as NULL");
    }

    table
        .rows
        .iter()
        .map(|row| {
            let get = |k: usize| idx[k].and_then(|i| row.get(i)).unwrap_or(&NULL_VALUE);
            SurveyRecord {
                data: as_timestamp(get(0)),
                answers: std::array::from_fn(|k| as_string(get(k + 1))),
                horas_semanais_dedicadas: as_i32(get(10)),
                comentario_adicional: as_string(get(11)),
            }
        })
        .collect()
}

/// Keep records with both key parts present, tagged with their row number.
/// Postgres treats NULLs as distinct under `UNIQUE (data, nome_completo)`, so
/// a record missing either part would be inserted again on every run; those
/// are recorded as skipped.
pub fn split_unkeyed(records: Vec<SurveyRecord>, report: &mut StageReport) -> Vec<(usize, SurveyRecord)> {
    records
        .into_iter()
        .enumerate()
        .filter(|(i, rec)| {
            if rec.data.is_some() && rec.nome_completo().is_some() {
                return true;
            }
            report.record(Outcome::skipped(
                format!("row {}", i),
                "missing data or nome_completo; not covered by the unique key",
            ));
            false
        })
        .collect()
}

/// Quote an identifier for Postgres.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

async fn connect(cfg: &Config) -> Result<Client> {
    let (client, connection) = cfg.connect(NoTls).await.context("connecting to postgres")?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "postgres connection error");
        }
    });
    Ok(client)
}

/// Create `database` unless it already exists. Only the connection is fatal.
async fn ensure_database(admin: &Config, database: &str) -> Result<()> {
    let client = connect(admin).await?;
    info!("connected to maintenance database");

    let exists = match client
        .query_opt(
            "SELECT 1 FROM pg_catalog.pg_database WHERE datname = $1",
            &[&database],
        )
        .await
    {
        Ok(row) => row.is_some(),
        Err(e) => {
            warn!(error = %e, "could not check for database");
            false
        }
    };
    if exists {
        info!(database, "database already exists");
        return Ok(());
    }

    match client
        .batch_execute(&format!("CREATE DATABASE {}", quote_ident(database)))
        .await
    {
        Ok(()) => info!(database, "database created"),
        Err(e) if e.code() == Some(&SqlState::DUPLICATE_DATABASE) => {
            info!(database, "database already exists")
        }
        Err(e) => warn!(database, error = %e, "could not create database"),
    }
    Ok(())
}

async fn ensure_schema_and_table(client: &Client) {
    match client.batch_execute(CREATE_SCHEMA).await {
        Ok(()) => info!("schema survey ready"),
        Err(e) => warn!(error = %e, "could not create schema survey"),
    }
    match client.batch_execute(CREATE_TABLE).await {
        Ok(()) => info!("table survey.survey_records ready"),
        Err(e) => warn!(error = %e, "could not create table survey.survey_records"),
    }
}

/// Insert every record inside one transaction, each in its own savepoint so
/// that a failing row is rolled back alone. Conflicts on
/// `(data, nome_completo)` are silent no-ops.
async fn insert_records(
    client: &mut Client,
    records: &[(usize, SurveyRecord)],
    mut report: StageReport,
) -> Result<StageReport> {
    let mut tx = client.transaction().await.context("opening transaction")?;
    let stmt = tx.prepare(INSERT_RECORD).await.context("preparing insert")?;

    for (i, rec) in records {
        let sp = tx.transaction().await.context("opening savepoint")?;
        match sp.execute(&stmt, &rec.params()).await {
            Ok(n) => {
                sp.commit().await.context("releasing savepoint")?;
                if n == 0 {
                    debug!(row = i, nome = ?rec.nome_completo(), "already present");
                }
                report.rows += n as usize;
                report.record(Outcome::Done);
            }
            Err(e) => {
                sp.rollback().await.context("rolling back savepoint")?;
                report.record(Outcome::skipped(format!("row {}", i), e));
            }
        }
    }

    tx.commit().await.context("committing inserts")?;
    Ok(report)
}

/// Publish `table` into `survey.survey_records` of the configured database,
/// creating database, schema and table on first use.
#[instrument(level = "info", skip_all, fields(database = %cfg.database))]
pub async fn publish_postgres(cfg: &PostgresConfig, table: &Table) -> Result<StageReport> {
    let url = secret_from_env(&cfg.url_env)?;
    let admin: Config = url.parse().context("parsing postgres URL")?;
    ensure_database(&admin, &cfg.database).await?;

    let mut target = admin.clone();
    target.dbname(&cfg.database);
    let mut client = connect(&target).await?;
    info!("connected to target database");

    ensure_schema_and_table(&client).await;

    let mut report = StageReport::new(STAGE);
    let records = split_unkeyed(storage_records(table), &mut report);
    let report = insert_records(&mut client, &records, report).await?;
    info!(inserted = report.rows, total = table.len(), "records published");
    Ok(report)
}
