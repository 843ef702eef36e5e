use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::Parser;
use log::info;
use std::io::Write;
use std::path::{Path, PathBuf};

use trendsheet::config::{self, AppConfig};
use trendsheet::run;
use trendsheet::sheets::SheetsClient;
use trendsheet::trends::TrendsClient;

/// Monthly Google Trends interest reporting into Google Sheets
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// Path to config file
    #[clap(short, long, value_parser, default_value = "config.toml")]
    config: PathBuf,

    /// Write a sample config file and exit
    #[clap(long)]
    init_config: bool,

    /// Override the fetch mode (series or aggregate)
    #[clap(long)]
    mode: Option<String>,

    /// Fetch and format, but skip the spreadsheet write
    #[clap(long)]
    dry_run: bool,
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}

/// Load the CLI-supplied config, fall back to the XDG location, and finally
/// to built-in defaults so env-only runs keep working.
fn load_config_with_fallback(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        return config::load_config(path);
    }
    if let Some(fallback) = config::default_config_path() {
        if fallback.exists() {
            info!("using config at {}", fallback.display());
            return config::load_config(&fallback);
        }
    }
    info!("no config file found, using defaults and environment variables");
    Ok(AppConfig::default())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();

    if args.init_config {
        config::generate_sample_config(&args.config)?;
        println!("Wrote sample config to {}", args.config.display());
        return Ok(());
    }

    let mut cfg = load_config_with_fallback(&args.config)
        .context("Failed to load configuration")?;
    config::apply_env_overrides(&mut cfg);
    if let Some(mode) = &args.mode {
        cfg.run.mode = mode.clone();
    }
    cfg.validate().context("Invalid configuration")?;

    info!("Starting trendsheet v{}", env!("CARGO_PKG_VERSION"));

    let trends = TrendsClient::new(&cfg.trends)?;
    let reference = Utc::now().date_naive();

    if args.dry_run {
        let (table, range, tab) = run::prepare(&cfg, &trends, reference).await?;
        info!(
            "dry run: {} data rows for timeframe {} (target tab '{}')",
            table.rows.len(),
            range.timeframe(),
            tab
        );
        println!("{}", table.header.join("\t"));
        for row in &table.rows {
            println!("{}", row.join("\t"));
        }
        return Ok(());
    }

    let credentials = cfg.sheets.credentials()?;
    let sheets = SheetsClient::connect(&credentials)
        .await
        .context("Failed to authenticate with Google Sheets")?;

    let summary = run::run(&cfg, &trends, &sheets, reference).await?;
    println!("Done. {}", summary);

    Ok(())
}
