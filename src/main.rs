// src/main.rs

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use surveyetl::{
    config::PipelineConfig,
    pipeline::{self, Stage, Targets},
    store::LocalStore,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Survey responses: fetch, merge, reshape and publish")]
struct Cli {
    /// YAML config; defaults apply when the file is absent.
    #[arg(short, long, default_value = "surveyetl.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download the remote CSV files into the data directory
    Fetch,
    /// Merge local CSV files into the local store
    Merge,
    /// Build the unified table and print it
    Reshape {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Build the unified table and publish it
    Publish(SinkArgs),
    /// Full pipeline
    Run(SinkArgs),
    /// List local relations, or print the first rows of one
    Inspect {
        #[arg(long)]
        table: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Args)]
struct SinkArgs {
    #[arg(long)]
    skip_sheets: bool,
    #[arg(long)]
    skip_postgres: bool,
}

impl SinkArgs {
    fn targets(&self) -> Targets {
        Targets {
            sheets: !self.skip_sheets,
            postgres: !self.skip_postgres,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,surveyetl=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    // ─── 2) config ───────────────────────────────────────────────────
    let cli = Cli::parse();
    let cfg = PipelineConfig::load(&cli.config)?;
    info!(config = %cli.config.display(), "startup");

    // ─── 3) dispatch ─────────────────────────────────────────────────
    let (first, last, targets, print_limit) = match &cli.command {
        Command::Fetch => (Stage::Fetch, Stage::Fetch, Targets::default(), None),
        Command::Merge => (Stage::Merge, Stage::Merge, Targets::default(), None),
        Command::Reshape { limit } => (Stage::Reshape, Stage::Reshape, Targets::default(), Some(*limit)),
        Command::Publish(sinks) => (Stage::Reshape, Stage::Publish, sinks.targets(), None),
        Command::Run(sinks) => (Stage::Fetch, Stage::Publish, sinks.targets(), None),
        Command::Inspect { table, limit } => {
            let store_path = cfg.local.store_path.clone();
            let table = table.clone();
            let limit = *limit;
            let out = tokio::task::spawn_blocking(move || inspect(&store_path, table.as_deref(), limit))
                .await
                .context("inspect task panicked")??;
            println!("{}", out);
            return Ok(());
        }
    };

    let (summary, table) = pipeline::run(&cfg, first, last, targets).await;
    if let (Some(limit), Some(table)) = (print_limit, table.as_ref()) {
        println!("{}", table.render(limit));
    }
    println!("run summary:\n{}", summary);

    if summary.has_fatal() {
        anyhow::bail!("pipeline finished with a failed stage");
    }
    info!("done");
    Ok(())
}

fn inspect(store_path: &Path, table: Option<&str>, limit: usize) -> Result<String> {
    let store = LocalStore::open(store_path)?;
    match table {
        Some(name) => {
            if !store.table_exists(name)? {
                anyhow::bail!("no relation named {} in {}", name, store_path.display());
            }
            let t = store.read_table(name)?;
            Ok(format!("{} ({} rows)\n{}", name, t.len(), t.render(limit)))
        }
        None => {
            let mut lines = Vec::new();
            for name in store.list_tables()? {
                let t = store.read_table(&name)?;
                lines.push(format!("{}\t{} rows\t{} columns", name, t.len(), t.columns.len()));
            }
            if lines.is_empty() {
                lines.push(format!("no relations in {}", store_path.display()));
            }
            Ok(lines.join("\n"))
        }
    }
}
