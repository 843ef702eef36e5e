use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, error, info};
use serde::Deserialize;
use serde_json::json;
use yup_oauth2::authenticator::DefaultAuthenticator;

use crate::config::{ConfigError, Credentials};
use crate::format::OutputTable;

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// How formatted rows land in the target tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Clear the tab, then write header and rows.
    Overwrite,
    /// Add data rows beneath whatever is there; never writes a header.
    Append,
    /// Append, including the header only when the tab is currently empty.
    AppendWithHeader,
}

impl FromStr for WriteMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overwrite" => Ok(WriteMode::Overwrite),
            "append" => Ok(WriteMode::Append),
            "append-with-header" => Ok(WriteMode::AppendWithHeader),
            other => Err(ConfigError::Invalid {
                field: "sheets.write_mode",
                value: other.to_string(),
                allowed: "overwrite, append or append-with-header",
            }),
        }
    }
}

/// Destination of one run's output.
#[derive(Debug, Clone)]
pub struct SheetTarget {
    pub spreadsheet_id: String,
    pub tab: String,
    pub mode: WriteMode,
}

/// Narrow seam over the spreadsheet service. The real implementation talks
/// to the Sheets REST API; tests use an in-memory store.
#[async_trait]
pub trait SheetStore {
    async fn tab_exists(&self, spreadsheet_id: &str, tab: &str) -> Result<bool>;
    async fn create_tab(&self, spreadsheet_id: &str, tab: &str) -> Result<()>;
    async fn clear_tab(&self, spreadsheet_id: &str, tab: &str) -> Result<()>;
    async fn row_count(&self, spreadsheet_id: &str, tab: &str) -> Result<usize>;
    async fn append_rows(&self, spreadsheet_id: &str, tab: &str, rows: &[Vec<String>])
        -> Result<()>;
}

/// Write a formatted table according to the target's mode, creating the tab
/// first when it is missing. Header and data rows always go to the store in
/// one append call, so a failed write leaves no partial row set behind.
/// Returns the number of data rows written.
pub async fn write_table(
    store: &dyn SheetStore,
    target: &SheetTarget,
    table: &OutputTable,
) -> Result<usize> {
    let id = target.spreadsheet_id.as_str();
    let tab = target.tab.as_str();

    if !store.tab_exists(id, tab).await? {
        info!("tab '{}' does not exist, creating it", tab);
        store.create_tab(id, tab).await?;
    }

    let with_header = || {
        let mut rows = Vec::with_capacity(table.rows.len() + 1);
        rows.push(table.header.clone());
        rows.extend(table.rows.iter().cloned());
        rows
    };

    match target.mode {
        WriteMode::Overwrite => {
            store.clear_tab(id, tab).await?;
            store.append_rows(id, tab, &with_header()).await?;
        }
        WriteMode::Append => {
            store.append_rows(id, tab, &table.rows).await?;
        }
        WriteMode::AppendWithHeader => {
            if store.row_count(id, tab).await? == 0 {
                store.append_rows(id, tab, &with_header()).await?;
            } else {
                store.append_rows(id, tab, &table.rows).await?;
            }
        }
    }

    Ok(table.rows.len())
}

/// Google Sheets REST v4 client authenticated with a service account.
pub struct SheetsClient {
    client: reqwest::Client,
    auth: DefaultAuthenticator,
}

impl SheetsClient {
    pub async fn connect(credentials: &Credentials) -> Result<Self> {
        let key = match credentials {
            Credentials::KeyFile(path) => yup_oauth2::read_service_account_key(path)
                .await
                .with_context(|| {
                    format!("Failed to read service account key {}", path.display())
                })?,
            Credentials::Inline(raw) => yup_oauth2::parse_service_account_key(raw)
                .context("Failed to parse inline service account key")?,
        };
        let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .context("Failed to build service account authenticator")?;
        Ok(Self {
            client: reqwest::Client::new(),
            auth,
        })
    }

    async fn bearer_token(&self) -> Result<String> {
        let token = self
            .auth
            .token(&[SHEETS_SCOPE])
            .await
            .context("Failed to obtain Sheets access token")?;
        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Token response contained no access token"))
    }

    /// Shared request helper. Destination failures are fatal here: a 4xx
    /// means missing permissions or a bad identifier, and the run cannot
    /// continue.
    async fn api_request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let token = self.bearer_token().await?;
        let mut req = self.client.request(method.clone(), url).bearer_auth(token);
        if let Some(json_body) = body {
            req = req.json(&json_body);
        }

        debug!("sheets request: {} {}", method, url);
        let response = req
            .send()
            .await
            .with_context(|| format!("Sheets request failed ({})", url))?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .with_context(|| format!("Failed to parse Sheets response ({})", url))
        } else {
            let err_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no response body>".to_string());
            error!(
                "Sheets API error: HTTP {} {} - {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status"),
                err_text
            );
            Err(anyhow!(
                "Sheets API error ({}): HTTP {} - {}",
                url,
                status.as_u16(),
                err_text
            ))
        }
    }

    /// A1-notation range covering the whole tab, percent-encoded for a URL
    /// path segment. Single quotes inside tab names double per A1 rules.
    fn tab_range(tab: &str) -> String {
        let quoted = format!("'{}'", tab.replace('\'', "''"));
        urlencoding::encode(&quoted).into_owned()
    }
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<serde_json::Value>,
}

#[async_trait]
impl SheetStore for SheetsClient {
    async fn tab_exists(&self, spreadsheet_id: &str, tab: &str) -> Result<bool> {
        let url = format!(
            "{}/{}?fields=sheets.properties.title",
            SHEETS_BASE_URL, spreadsheet_id
        );
        let meta: SpreadsheetMeta = self.api_request(reqwest::Method::GET, &url, None).await?;
        Ok(meta.sheets.iter().any(|s| s.properties.title == tab))
    }

    async fn create_tab(&self, spreadsheet_id: &str, tab: &str) -> Result<()> {
        let url = format!("{}/{}:batchUpdate", SHEETS_BASE_URL, spreadsheet_id);
        let body = json!({
            "requests": [{"addSheet": {"properties": {"title": tab}}}]
        });
        let _: serde_json::Value = self
            .api_request(reqwest::Method::POST, &url, Some(body))
            .await?;
        Ok(())
    }

    async fn clear_tab(&self, spreadsheet_id: &str, tab: &str) -> Result<()> {
        let url = format!(
            "{}/{}/values/{}:clear",
            SHEETS_BASE_URL,
            spreadsheet_id,
            Self::tab_range(tab)
        );
        let _: serde_json::Value = self
            .api_request(reqwest::Method::POST, &url, Some(json!({})))
            .await?;
        Ok(())
    }

    async fn row_count(&self, spreadsheet_id: &str, tab: &str) -> Result<usize> {
        let url = format!(
            "{}/{}/values/{}",
            SHEETS_BASE_URL,
            spreadsheet_id,
            Self::tab_range(tab)
        );
        let range: ValueRange = self.api_request(reqwest::Method::GET, &url, None).await?;
        Ok(range.values.len())
    }

    async fn append_rows(
        &self,
        spreadsheet_id: &str,
        tab: &str,
        rows: &[Vec<String>],
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = format!(
            "{}/{}/values/{}:append?valueInputOption=RAW&insertDataOption=INSERT_ROWS",
            SHEETS_BASE_URL,
            spreadsheet_id,
            Self::tab_range(tab)
        );
        let body = json!({ "values": rows });
        let _: serde_json::Value = self
            .api_request(reqwest::Method::POST, &url, Some(body))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        tabs: Mutex<HashMap<String, Vec<Vec<String>>>>,
    }

    impl FakeStore {
        fn rows(&self, tab: &str) -> Vec<Vec<String>> {
            self.tabs.lock().unwrap().get(tab).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl SheetStore for FakeStore {
        async fn tab_exists(&self, _spreadsheet_id: &str, tab: &str) -> Result<bool> {
            Ok(self.tabs.lock().unwrap().contains_key(tab))
        }

        async fn create_tab(&self, _spreadsheet_id: &str, tab: &str) -> Result<()> {
            self.tabs.lock().unwrap().insert(tab.to_string(), Vec::new());
            Ok(())
        }

        async fn clear_tab(&self, _spreadsheet_id: &str, tab: &str) -> Result<()> {
            if let Some(rows) = self.tabs.lock().unwrap().get_mut(tab) {
                rows.clear();
            }
            Ok(())
        }

        async fn row_count(&self, _spreadsheet_id: &str, tab: &str) -> Result<usize> {
            Ok(self.tabs.lock().unwrap().get(tab).map_or(0, |rows| rows.len()))
        }

        async fn append_rows(
            &self,
            _spreadsheet_id: &str,
            tab: &str,
            rows: &[Vec<String>],
        ) -> Result<()> {
            self.tabs
                .lock()
                .unwrap()
                .entry(tab.to_string())
                .or_default()
                .extend(rows.iter().cloned());
            Ok(())
        }
    }

    fn table() -> OutputTable {
        OutputTable {
            header: vec!["date".to_string(), "alpha".to_string()],
            rows: vec![
                vec!["2024-08-01".to_string(), "42".to_string()],
                vec!["2024-08-02".to_string(), "17".to_string()],
            ],
        }
    }

    fn target(mode: WriteMode) -> SheetTarget {
        SheetTarget {
            spreadsheet_id: "sheet-1".to_string(),
            tab: "Trends".to_string(),
            mode,
        }
    }

    #[test]
    fn write_mode_parsing() {
        assert_eq!("overwrite".parse::<WriteMode>().unwrap(), WriteMode::Overwrite);
        assert_eq!("append".parse::<WriteMode>().unwrap(), WriteMode::Append);
        assert_eq!(
            "append-with-header".parse::<WriteMode>().unwrap(),
            WriteMode::AppendWithHeader
        );
        assert!("upsert".parse::<WriteMode>().is_err());
    }

    #[tokio::test]
    async fn missing_tab_is_created() {
        let store = FakeStore::default();
        let written = write_table(&store, &target(WriteMode::Append), &table())
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert!(store.tab_exists("sheet-1", "Trends").await.unwrap());
    }

    #[tokio::test]
    async fn overwrite_twice_equals_single_run() {
        let store = FakeStore::default();
        let target = target(WriteMode::Overwrite);

        write_table(&store, &target, &table()).await.unwrap();
        let first = store.rows("Trends");
        write_table(&store, &target, &table()).await.unwrap();
        let second = store.rows("Trends");

        assert_eq!(first, second);
        assert_eq!(second.len(), 3); // header + 2 data rows
        assert_eq!(second[0], table().header);
    }

    #[tokio::test]
    async fn append_twice_duplicates_rows() {
        // documented behavior: append mode is not idempotent
        let store = FakeStore::default();
        let target = target(WriteMode::Append);

        write_table(&store, &target, &table()).await.unwrap();
        write_table(&store, &target, &table()).await.unwrap();

        let rows = store.rows("Trends");
        assert_eq!(rows.len(), 4);
        // no header row in plain append mode
        assert!(rows.iter().all(|r| r[0] != "date"));
    }

    #[tokio::test]
    async fn conditional_header_lands_exactly_once() {
        let store = FakeStore::default();
        let target = target(WriteMode::AppendWithHeader);

        for _ in 0..3 {
            write_table(&store, &target, &table()).await.unwrap();
        }

        let rows = store.rows("Trends");
        assert_eq!(rows.len(), 7); // 1 header + 3 * 2 data rows
        let headers = rows.iter().filter(|r| r[0] == "date").count();
        assert_eq!(headers, 1);
        assert_eq!(rows[0], table().header);
    }
}
