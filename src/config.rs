// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Everything a run needs, passed explicitly into each stage.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub local: LocalConfig,
    pub sheets: SheetsConfig,
    pub postgres: PostgresConfig,
}

/// Remote folder holding the survey CSVs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub owner: String,
    pub repo: String,
    pub path: String,
    pub branch: String,
    pub api_base: String,
    pub raw_base: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            owner: "68vinicius".into(),
            repo: "TrilhaFinalDadosJR".into(),
            path: "Data".into(),
            branch: "main".into(),
            api_base: "https://api.github.com".into(),
            raw_base: "https://raw.githubusercontent.com".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalConfig {
    /// Where downloaded CSVs land.
    pub data_dir: PathBuf,
    /// SQLite file holding one relation per CSV.
    pub store_path: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            store_path: PathBuf::from("data/data.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    /// A1 range whose start cell receives the header row, e.g. `Sheet1!A1`.
    pub range: String,
    pub api_base: String,
    /// Environment variable carrying an OAuth bearer token.
    pub token_env: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: "1PsGzXlkodOKpFEFm0O7kREv3wGP4pEU8q63LMCgjMI8".into(),
            range: "Sheet1!A1".into(),
            api_base: "https://sheets.googleapis.com/v4".into(),
            token_env: "GOOGLE_SHEETS_TOKEN".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PostgresConfig {
    /// Environment variable carrying a connection URL to a maintenance
    /// database (usually `postgres`).
    pub url_env: String,
    /// Target database, created on first use.
    pub database: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url_env: "PSQL_URL".into(),
            database: "Records".into(),
        }
    }
}

impl PipelineConfig {
    /// Load from a YAML file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Look up a secret the orchestrator placed in the environment.
pub fn secret_from_env(var: &str) -> Result<String> {
    let value = env::var(var).with_context(|| format!("environment variable {} is not set", var))?;
    if value.trim().is_empty() {
        anyhow::bail!("environment variable {} is empty", var);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_yaml_keeps_defaults() -> Result<()> {
        let cfg = PipelineConfig::from_yaml(
            r#"
source:
  owner: someone
local:
  store_path: /tmp/x.db
"#,
        )?;
        assert_eq!(cfg.source.owner, "someone");
        assert_eq!(cfg.source.repo, "TrilhaFinalDadosJR");
        assert_eq!(cfg.local.store_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.local.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.postgres.database, "Records");
        Ok(())
    }

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let dir = tempdir()?;
        let cfg = PipelineConfig::load(dir.path().join("nope.yaml"))?;
        assert_eq!(cfg, PipelineConfig::default());
        Ok(())
    }

    #[test]
    fn empty_secret_is_rejected() {
        env::set_var("SURVEYETL_TEST_EMPTY_SECRET", " ");
        assert!(secret_from_env("SURVEYETL_TEST_EMPTY_SECRET").is_err());
        assert!(secret_from_env("SURVEYETL_TEST_UNSET_SECRET").is_err());
    }
}
