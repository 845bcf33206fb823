// src/fetch/listing.rs

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, trace};
use url::Url;

use super::files::url_with_segments;
use crate::config::SourceConfig;

/// One entry of a remote folder listing.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RemoteEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl RemoteEntry {
    pub fn is_csv_file(&self) -> bool {
        self.kind == "file" && self.name.ends_with(".csv")
    }
}

/// `{api_base}/repos/{owner}/{repo}/contents/{path}`
pub fn listing_url(src: &SourceConfig) -> Result<Url> {
    let head = ["repos", src.owner.as_str(), src.repo.as_str(), "contents"];
    url_with_segments(&src.api_base, head.into_iter().chain(src.path.split('/')))
}

/// Fetch the folder listing. Any transport or status failure is an error.
pub async fn list_folder(client: &Client, src: &SourceConfig) -> Result<Vec<RemoteEntry>> {
    let url = listing_url(src)?;
    debug!(%url, "listing remote folder");
    let entries: Vec<RemoteEntry> = client
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "application/vnd.github+json")
        .send()
        .await
        .with_context(|| format!("GET {} failed", url))?
        .error_for_status()
        .with_context(|| format!("Non-success status {}", url))?
        .json()
        .await
        .with_context(|| format!("decoding listing from {}", url))?;
    trace!(count = entries.len(), "listing entries");
    Ok(entries)
}

/// Keep only plain files whose name ends in `.csv`.
pub fn csv_entries(entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
    entries.into_iter().filter(RemoteEntry::is_csv_file).collect()
}
