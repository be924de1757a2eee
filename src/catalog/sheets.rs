//! Google Sheets v4 backend for the catalog.
//!
//! The worksheet has two columns, `Channel` and `URL`, with row 1 reserved
//! for the header. Reads fetch the whole `A:B` range; appends are one
//! `values:append` call per row.

use super::auth::{ServiceAccountKey, TokenSource};
use super::{CatalogRow, CatalogStore, HEADER};
use crate::config::SheetTarget;
use crate::error::CatalogError;
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

const NEW_SHEET_ROWS: u32 = 100;
const NEW_SHEET_COLUMNS: u32 = 2;

/// Handle to one worksheet inside a spreadsheet.
pub struct SheetsCatalog {
    agent: ureq::Agent,
    tokens: TokenSource,
    api_base: String,
    sheet_id: String,
    sheet_name: String,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

impl SheetsCatalog {
    /// Opens the configured worksheet, creating it with a header row when it
    /// does not exist yet.
    pub fn open_or_create(target: &SheetTarget<'_>) -> Result<Self> {
        let key = ServiceAccountKey::from_file(target.service_account_file)?;
        Self::open_or_create_with(
            ureq::Agent::new(),
            SHEETS_API_BASE,
            target.sheet_id,
            target.sheet_name,
            key,
        )
    }

    pub fn open_or_create_with(
        agent: ureq::Agent,
        api_base: &str,
        sheet_id: &str,
        sheet_name: &str,
        key: ServiceAccountKey,
    ) -> Result<Self> {
        let tokens = TokenSource::new(agent.clone(), key)?;
        let catalog = Self {
            agent,
            tokens,
            api_base: api_base.trim_end_matches('/').to_string(),
            sheet_id: sheet_id.to_string(),
            sheet_name: sheet_name.to_string(),
        };

        // Anything failing this early means the credentials or identifiers
        // are wrong, which is a configuration problem rather than a transient one.
        let titles = catalog.worksheet_titles().map_err(|err| {
            CatalogError::config(format!("cannot open spreadsheet {sheet_id}: {err:#}"))
        })?;
        if !titles.iter().any(|title| title == sheet_name) {
            info!("worksheet {sheet_name} not found; creating it");
            catalog.add_worksheet().map_err(|err| {
                CatalogError::config(format!("cannot create worksheet {sheet_name}: {err:#}"))
            })?;
            catalog.append_values(&HEADER).map_err(|err| {
                CatalogError::config(format!(
                    "cannot write header to worksheet {sheet_name}: {err:#}"
                ))
            })?;
        }

        Ok(catalog)
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    fn spreadsheet_url(&self) -> String {
        format!("{}/{}", self.api_base, urlencoding::encode(&self.sheet_id))
    }

    /// `'<name>'!A:B`, quoted so names with spaces or apostrophes work.
    fn range(&self) -> String {
        let quoted = format!("'{}'!A:B", self.sheet_name.replace('\'', "''"));
        urlencoding::encode(&quoted).into_owned()
    }

    fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.tokens.access_token()?))
    }

    fn worksheet_titles(&self) -> Result<Vec<String>> {
        let meta: SpreadsheetMeta = self
            .agent
            .get(&self.spreadsheet_url())
            .set("Authorization", &self.bearer()?)
            .query("fields", "sheets.properties.title")
            .call()
            .map_err(describe)?
            .into_json()
            .context("decoding spreadsheet metadata")?;
        Ok(meta
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties.title)
            .collect())
    }

    fn add_worksheet(&self) -> Result<()> {
        let body = json!({
            "requests": [{
                "addSheet": {
                    "properties": {
                        "title": self.sheet_name,
                        "gridProperties": {
                            "rowCount": NEW_SHEET_ROWS,
                            "columnCount": NEW_SHEET_COLUMNS,
                        }
                    }
                }
            }]
        });
        self.agent
            .post(&format!("{}:batchUpdate", self.spreadsheet_url()))
            .set("Authorization", &self.bearer()?)
            .send_json(body)
            .map_err(describe)?;
        Ok(())
    }

    fn append_values(&self, cells: &[&str]) -> Result<()> {
        let url = format!("{}/values/{}:append", self.spreadsheet_url(), self.range());
        self.agent
            .post(&url)
            .set("Authorization", &self.bearer()?)
            .query("valueInputOption", "RAW")
            .query("insertDataOption", "INSERT_ROWS")
            .send_json(json!({ "values": [cells] }))
            .map_err(describe)
            .with_context(|| format!("appending to worksheet {}", self.sheet_name))?;
        Ok(())
    }
}

impl CatalogStore for SheetsCatalog {
    fn list_rows(&self) -> Result<Vec<CatalogRow>> {
        let url = format!("{}/values/{}", self.spreadsheet_url(), self.range());
        let range: ValueRange = self
            .agent
            .get(&url)
            .set("Authorization", &self.bearer()?)
            .query("majorDimension", "ROWS")
            .call()
            .map_err(describe)
            .with_context(|| format!("reading worksheet {}", self.sheet_name))?
            .into_json()
            .context("decoding worksheet values")?;

        let rows = rows_from_values(range.values);
        debug!("loaded {} catalog rows", rows.len());
        Ok(rows)
    }

    fn append_row(&self, row: &CatalogRow) -> Result<()> {
        self.append_values(&[row.channel_label.as_str(), row.url.as_str()])
    }
}

/// Drops the header row and blank rows; short rows are padded with empty cells.
fn rows_from_values(values: Vec<Vec<String>>) -> Vec<CatalogRow> {
    values
        .into_iter()
        .skip(1)
        .filter_map(|cells| {
            let mut cells = cells.into_iter();
            let channel_label = cells.next().unwrap_or_default();
            let url = cells.next().unwrap_or_default();
            if channel_label.trim().is_empty() && url.trim().is_empty() {
                None
            } else {
                Some(CatalogRow { channel_label, url })
            }
        })
        .collect()
}

fn describe(err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            anyhow!("Sheets API returned HTTP {code}: {}", body.trim())
        }
        other => anyhow!(other),
    }
}
