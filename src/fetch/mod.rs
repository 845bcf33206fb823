// src/fetch/mod.rs

use anyhow::{Context, Result};
use reqwest::Client;
use std::path::Path;
use std::time::Instant;
use tokio::fs;
use tracing::{info, instrument};

use crate::config::SourceConfig;
use crate::outcome::{Outcome, StageReport};

pub mod files;
pub mod listing;

pub const STAGE: &str = "fetch";

/// HTTP client used for both listing and downloads.
/// GitHub rejects requests without a User-Agent.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("surveyetl/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")
}

/// List the remote folder and download every CSV into `data_dir`.
///
/// A failed listing aborts the stage before anything is downloaded. A failed
/// download is recorded as skipped and the loop carries on.
#[instrument(level = "info", skip(client, src), fields(owner = %src.owner, repo = %src.repo))]
pub async fn fetch_all(client: &Client, src: &SourceConfig, data_dir: &Path) -> Result<StageReport> {
    fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("creating {}", data_dir.display()))?;

    let entries = listing::list_folder(client, src)
        .await
        .context("failed to retrieve file list")?;
    let csvs = listing::csv_entries(entries);
    info!(count = csvs.len(), "csv files listed");

    let mut report = StageReport::new(STAGE);
    for entry in csvs {
        let start = Instant::now();
        let outcome = match download_one(client, src, &entry.name, data_dir).await {
            Ok(bytes) => {
                info!(file = %entry.name, bytes, elapsed = ?start.elapsed(), "downloaded");
                Outcome::Done
            }
            Err(e) => Outcome::skipped(&entry.name, format!("{:#}", e)),
        };
        report.record(outcome);
    }
    Ok(report)
}

async fn download_one(
    client: &Client,
    src: &SourceConfig,
    name: &str,
    data_dir: &Path,
) -> Result<u64> {
    let url = files::raw_url(src, name)?;
    files::download_file(client, &url, data_dir.join(name)).await
}
