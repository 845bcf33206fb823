// src/fetch/files.rs

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use std::path::Path;
use tokio::fs;
use url::Url;

use crate::config::SourceConfig;

/// Append `segments` to the path of `base`, percent-encoding each one.
pub(crate) fn url_with_segments<'a>(
    base: &str,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("parsing base URL {}", base))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("base URL {} cannot take a path", base))?
        .pop_if_empty()
        .extend(segments.into_iter().filter(|s| !s.is_empty()));
    Ok(url)
}

/// `{raw_base}/{owner}/{repo}/{branch}/{path}/{file}`
pub fn raw_url(src: &SourceConfig, file_name: &str) -> Result<Url> {
    let head = [src.owner.as_str(), src.repo.as_str(), src.branch.as_str()];
    url_with_segments(
        &src.raw_base,
        head.into_iter()
            .chain(src.path.split('/'))
            .chain(std::iter::once(file_name)),
    )
}

/// Download `url` and write the bytes to `dest`, replacing any existing file.
/// Returns the number of bytes written.
pub async fn download_file(client: &Client, url: &Url, dest: impl AsRef<Path>) -> Result<u64> {
    let resp = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("GET {} failed", url))?
        .error_for_status()?;
    let bytes = resp
        .bytes()
        .await
        .with_context(|| format!("reading body from {}", url))?;
    fs::write(dest.as_ref(), &bytes)
        .await
        .with_context(|| format!("writing {}", dest.as_ref().display()))?;
    Ok(bytes.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_raw_url_on_branch() -> Result<()> {
        let src = SourceConfig::default();
        assert_eq!(
            raw_url(&src, "pesquisa1.csv")?.as_str(),
            "https://raw.githubusercontent.com/68vinicius/TrilhaFinalDadosJR/main/Data/pesquisa1.csv"
        );
        Ok(())
    }

    #[test]
    fn file_names_are_escaped_as_one_segment() -> Result<()> {
        let src = SourceConfig {
            raw_base: "https://raw.githubusercontent.com/".into(),
            path: "Data/2024".into(),
            ..SourceConfig::default()
        };
        let url = raw_url(&src, "a#b?c%.csv")?;
        assert_eq!(
            url.as_str(),
            "https://raw.githubusercontent.com/68vinicius/TrilhaFinalDadosJR/main/Data/2024/a%23b%3Fc%25.csv"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
        Ok(())
    }
}
