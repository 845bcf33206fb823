// src/pipeline.rs

use anyhow::{Context, Result};
use tracing::{info, info_span, Instrument};

use crate::config::PipelineConfig;
use crate::outcome::{RunSummary, StageReport};
use crate::table::Table;
use crate::{fetch, merge, publish, reshape};

/// Pipeline stages, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Fetch,
    Merge,
    Reshape,
    Publish,
}

/// Which sinks the publish stage writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Targets {
    pub sheets: bool,
    pub postgres: bool,
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            sheets: true,
            postgres: true,
        }
    }
}

pub async fn run_fetch(cfg: &PipelineConfig) -> Result<StageReport> {
    let client = fetch::build_client()?;
    fetch::fetch_all(&client, &cfg.source, &cfg.local.data_dir).await
}

pub async fn run_merge(cfg: &PipelineConfig) -> Result<StageReport> {
    let store_path = cfg.local.store_path.clone();
    let data_dir = cfg.local.data_dir.clone();
    tokio::task::spawn_blocking(move || merge::merge_dir(&store_path, &data_dir))
        .await
        .context("merge task panicked")?
}

pub async fn run_reshape(cfg: &PipelineConfig) -> Result<(Table, StageReport)> {
    let store_path = cfg.local.store_path.clone();
    tokio::task::spawn_blocking(move || reshape::reshape_path(&store_path))
        .await
        .context("reshape task panicked")?
}

/// Run both publishers concurrently; each records its own status.
pub async fn run_publishers(
    cfg: &PipelineConfig,
    table: &Table,
    targets: Targets,
    summary: &mut RunSummary,
) {
    let sheets = async {
        if targets.sheets {
            Some(
                publish::publish_sheets(&cfg.sheets, table)
                    .instrument(info_span!("sheets"))
                    .await,
            )
        } else {
            None
        }
    };
    let postgres = async {
        if targets.postgres {
            Some(
                publish::publish_postgres(&cfg.postgres, table)
                    .instrument(info_span!("postgres"))
                    .await,
            )
        } else {
            None
        }
    };
    let (sheets, postgres) = tokio::join!(sheets, postgres);

    for (stage, res) in [
        (publish::sheets::STAGE, sheets),
        (publish::postgres::STAGE, postgres),
    ] {
        match res {
            Some(Ok(report)) => summary.push_ok(report),
            Some(Err(e)) => summary.push_fatal(stage, &e),
            None => summary.push_not_run(stage),
        }
    }
}

/// Run stages `first..=last`. A fatal stage stops the run; the stages after
/// it are reported as not run. Returns the unified table when the reshape
/// stage ran.
pub async fn run(
    cfg: &PipelineConfig,
    first: Stage,
    last: Stage,
    targets: Targets,
) -> (RunSummary, Option<Table>) {
    let mut summary = RunSummary::default();
    let wants = |s: Stage| first <= s && s <= last;

    // ─── 1) fetch ────────────────────────────────────────────────────
    if wants(Stage::Fetch) {
        info!("fetching remote csv files");
        match run_fetch(cfg).await {
            Ok(r) => summary.push_ok(r),
            Err(e) => {
                summary.push_fatal(fetch::STAGE, &e);
                skip_after(&mut summary, Stage::Fetch, last);
                return (summary, None);
            }
        }
    }

    // ─── 2) merge into local store ───────────────────────────────────
    if wants(Stage::Merge) {
        info!("merging local csv files");
        match run_merge(cfg).await {
            Ok(r) => summary.push_ok(r),
            Err(e) => {
                summary.push_fatal(merge::STAGE, &e);
                skip_after(&mut summary, Stage::Merge, last);
                return (summary, None);
            }
        }
    }

    // ─── 3) reshape ──────────────────────────────────────────────────
    if !wants(Stage::Reshape) {
        return (summary, None);
    }
    info!("reshaping local store");
    let table = match run_reshape(cfg).await {
        Ok((table, r)) => {
            summary.push_ok(r);
            table
        }
        Err(e) => {
            summary.push_fatal(reshape::STAGE, &e);
            skip_after(&mut summary, Stage::Reshape, last);
            return (summary, None);
        }
    };

    // ─── 4) publish ──────────────────────────────────────────────────
    if wants(Stage::Publish) {
        info!(rows = table.len(), "publishing unified table");
        run_publishers(cfg, &table, targets, &mut summary).await;
    }

    (summary, Some(table))
}

fn skip_after(summary: &mut RunSummary, failed: Stage, last: Stage) {
    let rest = [
        (Stage::Merge, merge::STAGE),
        (Stage::Reshape, reshape::STAGE),
        (Stage::Publish, publish::sheets::STAGE),
        (Stage::Publish, publish::postgres::STAGE),
    ];
    for (stage, name) in rest {
        if stage > failed && stage <= last {
            summary.push_not_run(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::StageStatus;
    use std::fs;
    use tempfile::tempdir;

    fn local_cfg(root: &std::path::Path) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.local.data_dir = root.join("data");
        cfg.local.store_path = root.join("data").join("data.db");
        cfg.source.api_base = "http://127.0.0.1:9".into();
        cfg
    }

    #[tokio::test]
    async fn fatal_fetch_stops_the_run() -> Result<()> {
        let dir = tempdir()?;
        let cfg = local_cfg(dir.path());
        let (summary, table) = run(&cfg, Stage::Fetch, Stage::Publish, Targets::default()).await;

        assert!(table.is_none());
        assert!(summary.has_fatal());
        assert!(matches!(summary.stages[0], StageStatus::Fatal { stage: "fetch", .. }));
        assert_eq!(summary.stages.len(), 5);
        assert!(summary.stages[1..]
            .iter()
            .all(|s| matches!(s, StageStatus::NotRun { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn merge_and_reshape_from_local_files() -> Result<()> {
        let dir = tempdir()?;
        let cfg = local_cfg(dir.path());
        fs::create_dir_all(&cfg.local.data_dir)?;
        fs::write(
            cfg.local.data_dir.join("pesquisa1.csv"),
            "data,nome_completo\n2024-07-30 09:00:00,ana souza\n",
        )?;

        let targets = Targets {
            sheets: false,
            postgres: false,
        };
        let (summary, table) = run(&cfg, Stage::Merge, Stage::Publish, targets).await;

        assert!(!summary.has_fatal());
        assert_eq!(summary.report(merge::STAGE).map(|r| r.rows), Some(1));
        let table = table.expect("reshape ran");
        assert_eq!(table.columns, vec!["Data", "Nome Completo"]);
        assert_eq!(table.rows[0][1].as_text(), Some("Ana Souza"));
        assert!(summary
            .stages
            .iter()
            .any(|s| matches!(s, StageStatus::NotRun { stage: "publish_sheets" })));
        Ok(())
    }

    #[tokio::test]
    async fn missing_secret_fails_only_that_publisher() -> Result<()> {
        let dir = tempdir()?;
        let mut cfg = local_cfg(dir.path());
        cfg.sheets.token_env = "SURVEYETL_TEST_NO_TOKEN".into();
        cfg.postgres.url_env = "SURVEYETL_TEST_NO_URL".into();
        let table = Table::new(vec!["Data".into()]);

        let mut summary = RunSummary::default();
        run_publishers(&cfg, &table, Targets::default(), &mut summary).await;
        assert_eq!(summary.stages.len(), 2);
        assert!(summary
            .stages
            .iter()
            .all(|s| matches!(s, StageStatus::Fatal { .. })));
        Ok(())
    }
}
