use std::env;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sheets::WriteMode;
use crate::trends::{FetchMode, Gprop};

/// Default keyword set, matching the original seven-brand monthly report.
const DEFAULT_KEYWORDS: &str = "메디큐브,코스알엑스,아누아,조선미녀,K-SECRET,ARENCIA,MIXSOON";

const DEFAULT_TAB: &str = "Trends";

/// Configuration problems, reported before any network call is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: '{value}' (expected {allowed})")]
    Invalid {
        field: &'static str,
        value: String,
        allowed: &'static str,
    },
}

/// Application-wide configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Query settings for one run
    pub run: RunConfig,

    /// Trends provider client settings
    pub trends: TrendsConfig,

    /// Destination spreadsheet settings
    pub sheets: SheetsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Keywords to query, partitioned into provider-sized groups
    pub keywords: Vec<String>,

    /// Provider region filter
    pub geo: String,

    /// Content-property filter; empty string means web search
    pub property: String,

    /// "series" (one row per date) or "aggregate" (one row per keyword)
    pub mode: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            keywords: split_keywords(DEFAULT_KEYWORDS),
            geo: "US".to_string(),
            property: String::new(),
            mode: "series".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendsConfig {
    /// Provider locale
    pub hl: String,

    /// Timezone offset in minutes, passed through to the provider
    pub tz: i32,

    /// Retry count for transient provider failures
    pub retries: u32,

    /// Linear backoff base between retries, in seconds
    pub backoff_secs: u64,
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            hl: "en-US".to_string(),
            tz: 360,
            retries: 3,
            backoff_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetsConfig {
    /// Target spreadsheet identifier
    pub spreadsheet_id: String,

    /// Target tab; when unset, "Trends" or a computed month label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,

    /// Compute the tab name from the period ("YYYY-MM") when no tab is set
    pub monthly_tab: bool,

    /// "overwrite", "append" or "append-with-header"
    pub write_mode: String,

    /// Path to a service-account key file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_key: Option<PathBuf>,

    /// Inline key JSON from the GCP_SERVICE_ACCOUNT environment variable
    #[serde(skip)]
    pub inline_credentials: Option<String>,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            tab: None,
            monthly_tab: false,
            write_mode: "append-with-header".to_string(),
            service_account_key: None,
            inline_credentials: None,
        }
    }
}

/// Service-account key material, inline JSON or a key file on disk.
#[derive(Debug, Clone)]
pub enum Credentials {
    KeyFile(PathBuf),
    Inline(String),
}

impl SheetsConfig {
    /// Inline credentials from the environment win over a configured key
    /// file, matching the original env-driven tool.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        if let Some(raw) = &self.inline_credentials {
            return Ok(Credentials::Inline(raw.clone()));
        }
        if let Some(path) = &self.service_account_key {
            return Ok(Credentials::KeyFile(path.clone()));
        }
        Err(ConfigError::Missing(
            "sheets.service_account_key (or GCP_SERVICE_ACCOUNT)",
        ))
    }

    /// Explicit tab name, or the period's month label, or the fixed default.
    pub fn resolve_tab(&self, month_label: &str) -> String {
        match (&self.tab, self.monthly_tab) {
            (Some(tab), _) => tab.clone(),
            (None, true) => month_label.to_string(),
            (None, false) => DEFAULT_TAB.to_string(),
        }
    }
}

impl AppConfig {
    /// Fail-fast validation, run before any network call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sheets.spreadsheet_id.is_empty() {
            return Err(ConfigError::Missing("sheets.spreadsheet_id (or SHEET_ID)"));
        }
        if self.run.keywords.is_empty() {
            return Err(ConfigError::Missing("run.keywords (or KEYWORDS)"));
        }
        self.run.property.parse::<Gprop>()?;
        self.run.mode.parse::<FetchMode>()?;
        self.sheets.write_mode.parse::<WriteMode>()?;
        self.sheets.credentials()?;
        Ok(())
    }
}

/// Load configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let config_str = read_to_string(path.as_ref()).with_context(|| {
        format!("Failed to read config file {}", path.as_ref().display())
    })?;

    let config: AppConfig =
        toml::from_str(&config_str).context("Failed to parse config file")?;

    Ok(config)
}

/// XDG fallback location, used when the --config path does not exist.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("trendsheet").join("config.toml"))
}

/// Environment overrides keep parity with the original env-driven tool.
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(value) = env::var("SHEET_ID") {
        config.sheets.spreadsheet_id = value;
    }
    if let Ok(value) = env::var("SHEET_TAB") {
        config.sheets.tab = Some(value);
    }
    if let Ok(value) = env::var("GEO") {
        config.run.geo = value;
    }
    if let Ok(value) = env::var("KEYWORDS") {
        config.run.keywords = split_keywords(&value);
    }
    if let Ok(value) = env::var("GCP_SERVICE_ACCOUNT") {
        config.sheets.inline_credentials = Some(value);
    }
}

/// Split a comma-separated keyword list, trimming and dropping empties.
pub fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Create a config with placeholder values for required settings.
pub fn create_default_config() -> AppConfig {
    AppConfig {
        sheets: SheetsConfig {
            spreadsheet_id: "your_spreadsheet_id".to_string(),
            service_account_key: Some(PathBuf::from("service-account.json")),
            ..SheetsConfig::default()
        },
        ..AppConfig::default()
    }
}

/// Write a sample config file for the user to fill in.
pub fn generate_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let config = create_default_config();
    let toml_str = toml::to_string_pretty(&config).context("Failed to serialize config")?;

    std::fs::write(path, toml_str).context("Failed to write sample config file")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.sheets.spreadsheet_id = "sheet-1".to_string();
        config.sheets.service_account_key = Some(PathBuf::from("key.json"));
        config
    }

    #[test]
    fn defaults_are_valid_except_required_settings() {
        let config = AppConfig::default();
        assert_eq!(config.run.geo, "US");
        assert_eq!(config.run.keywords.len(), 7);
        assert_eq!(config.sheets.write_mode, "append-with-header");

        match config.validate() {
            Err(ConfigError::Missing(field)) => assert!(field.contains("spreadsheet_id")),
            other => panic!("expected missing spreadsheet id, got {:?}", other),
        }
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn invalid_property_is_rejected_before_any_fetch() {
        let mut config = valid_config();
        config.run.property = "shopping".to_string();
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "run.property"),
            other => panic!("expected invalid property, got {:?}", other),
        }
    }

    #[test]
    fn invalid_write_mode_is_rejected() {
        let mut config = valid_config();
        config.sheets.write_mode = "upsert".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let mut config = valid_config();
        config.sheets.service_account_key = None;
        match config.validate() {
            Err(ConfigError::Missing(field)) => assert!(field.contains("service_account")),
            other => panic!("expected missing credentials, got {:?}", other),
        }
    }

    #[test]
    fn inline_credentials_win_over_key_file() {
        let mut config = valid_config();
        config.sheets.inline_credentials = Some("{}".to_string());
        match config.sheets.credentials().unwrap() {
            Credentials::Inline(raw) => assert_eq!(raw, "{}"),
            other => panic!("expected inline credentials, got {:?}", other),
        }
    }

    #[test]
    fn keyword_splitting_trims_and_drops_empties() {
        assert_eq!(
            split_keywords(" a, b ,,c "),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_keywords(" , ,").is_empty());
    }

    #[test]
    fn tab_resolution() {
        let mut sheets = SheetsConfig::default();
        assert_eq!(sheets.resolve_tab("2024-08"), "Trends");

        sheets.monthly_tab = true;
        assert_eq!(sheets.resolve_tab("2024-08"), "2024-08");

        sheets.tab = Some("Report".to_string());
        assert_eq!(sheets.resolve_tab("2024-08"), "Report");
    }

    #[test]
    fn env_overrides_replace_file_settings() {
        // the only test that touches these variables, so no cross-test races
        env::set_var("SHEET_ID", "env-sheet");
        env::set_var("KEYWORDS", "one, two");

        let mut config = AppConfig::default();
        apply_env_overrides(&mut config);

        env::remove_var("SHEET_ID");
        env::remove_var("KEYWORDS");

        assert_eq!(config.sheets.spreadsheet_id, "env-sheet");
        assert_eq!(config.run.keywords, vec!["one", "two"]);
    }

    #[test]
    fn toml_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[run]
keywords = ["alpha", "beta"]
geo = "KR"
mode = "aggregate"

[trends]
retries = 1

[sheets]
spreadsheet_id = "sheet-1"
monthly_tab = true
write_mode = "overwrite"
service_account_key = "key.json"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.run.keywords, vec!["alpha", "beta"]);
        assert_eq!(config.run.geo, "KR");
        assert_eq!(config.run.mode, "aggregate");
        assert_eq!(config.trends.retries, 1);
        assert_eq!(config.trends.hl, "en-US");
        assert!(config.sheets.monthly_tab);
        config.validate().unwrap();
    }

    #[test]
    fn sample_config_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        generate_sample_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.sheets.spreadsheet_id, "your_spreadsheet_id");
        config.validate().unwrap();
    }
}
