// src/publish/sheets.rs

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument};
use url::Url;

use crate::config::{secret_from_env, SheetsConfig};
use crate::outcome::{Outcome, StageReport};
use crate::table::{Table, Value};

pub const STAGE: &str = "publish_sheets";

/// Sheet part of an A1 range: `Sheet1!A1` -> `Sheet1`.
pub fn sheet_name(range: &str) -> &str {
    range.split_once('!').map(|(s, _)| s).unwrap_or(range)
}

fn cell(v: &Value) -> JsonValue {
    match v {
        Value::Null => json!(""),
        Value::Integer(i) => json!(i),
        Value::Real(f) if f.is_finite() => json!(f),
        Value::Real(f) => json!(f.to_string()),
        Value::Text(s) => json!(s),
    }
}

/// Header row followed by every data row.
pub fn table_values(table: &Table) -> Vec<Vec<JsonValue>> {
    let mut values = Vec::with_capacity(table.len() + 1);
    values.push(table.columns.iter().map(|c| json!(c)).collect());
    values.extend(table.rows.iter().map(|r| r.iter().map(cell).collect()));
    values
}

fn values_url(base: &str, spreadsheet_id: &str, last: &str) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("parsing sheets base {}", base))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("sheets base {} cannot take a path", base))?
        .pop_if_empty()
        .extend(["spreadsheets", spreadsheet_id, "values", last]);
    Ok(url)
}

/// `.../values/{sheet}:clear`
pub fn clear_url(cfg: &SheetsConfig) -> Result<Url> {
    values_url(
        &cfg.api_base,
        &cfg.spreadsheet_id,
        &format!("{}:clear", sheet_name(&cfg.range)),
    )
}

/// `.../values/{range}?valueInputOption=RAW`
pub fn update_url(cfg: &SheetsConfig) -> Result<Url> {
    let mut url = values_url(&cfg.api_base, &cfg.spreadsheet_id, &cfg.range)?;
    url.query_pairs_mut().append_pair("valueInputOption", "RAW");
    Ok(url)
}

/// Spreadsheet session holding an authorised HTTP client.
pub struct SheetsPublisher {
    client: Client,
    cfg: SheetsConfig,
    token: String,
}

impl SheetsPublisher {
    pub fn new(client: Client, cfg: SheetsConfig, token: String) -> Self {
        Self { client, cfg, token }
    }

    /// Clear the sheet, then write header + rows in one request.
    /// The write is only attempted after the clear succeeded; a failed write
    /// is not rolled back.
    #[instrument(level = "info", skip_all, fields(spreadsheet = %self.cfg.spreadsheet_id))]
    pub async fn publish(&self, table: &Table) -> Result<StageReport> {
        let clear = clear_url(&self.cfg)?;
        self.client
            .post(clear.clone())
            .bearer_auth(&self.token)
            .json(&json!({}))
            .send()
            .await
            .with_context(|| format!("POST {} failed", clear))?
            .error_for_status()
            .context("clearing sheet")?;
        info!(sheet = sheet_name(&self.cfg.range), "sheet cleared");

        let update = update_url(&self.cfg)?;
        let body = json!({
            "range": self.cfg.range,
            "majorDimension": "ROWS",
            "values": table_values(table),
        });
        self.client
            .put(update.clone())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("PUT {} failed", update))?
            .error_for_status()
            .context("writing sheet values")?;
        info!(rows = table.len(), "sheet written");

        let mut report = StageReport::new(STAGE);
        report.record(Outcome::Done);
        report.rows = table.len();
        Ok(report)
    }
}

/// Publish `table` to the configured spreadsheet, reading the token from the
/// environment.
pub async fn publish_sheets(cfg: &SheetsConfig, table: &Table) -> Result<StageReport> {
    let token = secret_from_env(&cfg.token_env)?;
    let client = Client::builder()
        .user_agent(concat!("surveyetl/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;
    SheetsPublisher::new(client, cfg.clone(), token)
        .publish(table)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_start_with_header_and_map_nulls_to_blank() {
        let mut t = Table::new(vec!["Data".into(), "Horas Semanais Dedicadas".into()]);
        t.rows.push(vec![Value::Text("2024-07-30".into()), Value::Integer(10)]);
        t.rows.push(vec![Value::Null, Value::Real(1.5)]);

        let v = table_values(&t);
        assert_eq!(v.len(), 3);
        assert_eq!(v[0], vec![json!("Data"), json!("Horas Semanais Dedicadas")]);
        assert_eq!(v[1], vec![json!("2024-07-30"), json!(10)]);
        assert_eq!(v[2], vec![json!(""), json!(1.5)]);
    }

    #[test]
    fn urls_target_sheet_and_range() -> Result<()> {
        let cfg = SheetsConfig {
            spreadsheet_id: "abc".into(),
            range: "Respostas 2024!A1".into(),
            ..SheetsConfig::default()
        };
        assert_eq!(sheet_name(&cfg.range), "Respostas 2024");
        assert_eq!(sheet_name("Sheet1"), "Sheet1");
        assert_eq!(
            clear_url(&cfg)?.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/Respostas%202024:clear"
        );
        assert_eq!(
            update_url(&cfg)?.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/Respostas%202024!A1?valueInputOption=RAW"
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_token_fails_before_any_request() {
        let cfg = SheetsConfig {
            token_env: "SURVEYETL_TEST_NO_SUCH_TOKEN".into(),
            ..SheetsConfig::default()
        };
        let t = Table::new(vec!["Data".into()]);
        assert!(publish_sheets(&cfg, &t).await.is_err());
    }

    fn publisher(base: &str) -> Result<SheetsPublisher> {
        let cfg = SheetsConfig {
            spreadsheet_id: "abc".into(),
            api_base: base.to_string(),
            ..SheetsConfig::default()
        };
        Ok(SheetsPublisher::new(Client::builder().build()?, cfg, "token".into()))
    }

    fn one_row_table() -> Table {
        let mut t = Table::new(vec!["Data".into()]);
        t.rows.push(vec![Value::Text("2024-07-30".into())]);
        t
    }

    #[tokio::test]
    async fn failed_clear_skips_the_write() -> Result<()> {
        let server = crate::test_http::serve(|_, _| (500, "{}".to_string())).await?;
        let res = publisher(&server.base)?.publish(&one_row_table()).await;

        assert!(res.is_err());
        let requests = server.requests();
        assert_eq!(requests, vec!["POST /spreadsheets/abc/values/Sheet1:clear"]);
        Ok(())
    }

    #[tokio::test]
    async fn clear_then_single_write() -> Result<()> {
        let server = crate::test_http::serve(|_, _| (200, "{}".to_string())).await?;
        let report = publisher(&server.base)?.publish(&one_row_table()).await?;

        assert_eq!(report.rows, 1);
        assert_eq!(
            server.requests(),
            vec![
                "POST /spreadsheets/abc/values/Sheet1:clear",
                "PUT /spreadsheets/abc/values/Sheet1!A1?valueInputOption=RAW",
            ]
        );
        Ok(())
    }
}
