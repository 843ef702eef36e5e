use std::fmt;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use log::info;

use crate::config::AppConfig;
use crate::format::{aggregate_table, series_table, OutputTable, RunMeta};
use crate::period::{previous_month_range, TimeRange};
use crate::sheets::{write_table, SheetStore, SheetTarget, WriteMode};
use crate::trends::{fetch_aggregates, fetch_series, FetchMode, Gprop, TrendsProvider};

/// What a completed run did, for the closing summary line.
#[derive(Debug)]
pub struct RunSummary {
    pub rows_written: usize,
    pub timeframe: String,
    pub geo: String,
    pub tab: String,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Wrote {} rows for timeframe {} to tab '{}' (geo={}).",
            self.rows_written, self.timeframe, self.tab, self.geo
        )
    }
}

/// Fetch and format one run's table without writing it; the dry-run path.
pub async fn prepare(
    config: &AppConfig,
    trends: &dyn TrendsProvider,
    reference: NaiveDate,
) -> Result<(OutputTable, TimeRange, String)> {
    let range = previous_month_range(reference);
    info!("resolved period {}", range.timeframe());

    let property: Gprop = config.run.property.parse()?;
    let mode: FetchMode = config.run.mode.parse()?;
    let meta = RunMeta {
        geo: config.run.geo.clone(),
        property_label: property.label(),
        range: range.clone(),
        run_at: Utc::now(),
    };

    let table = match mode {
        FetchMode::Series => {
            let series = fetch_series(
                trends,
                &config.run.keywords,
                &range,
                &config.run.geo,
                property,
            )
            .await
            .context("Failed to fetch interest series")?;
            series_table(&series, &meta)
        }
        FetchMode::Aggregate => {
            let aggregates = fetch_aggregates(
                trends,
                &config.run.keywords,
                &range,
                &config.run.geo,
                property,
            )
            .await
            .context("Failed to fetch keyword aggregates")?;
            aggregate_table(&aggregates, &meta)
        }
    };

    let tab = config.sheets.resolve_tab(&range.month_label());
    Ok((table, range, tab))
}

/// One full run: resolve range, fetch, format, write, summarize.
pub async fn run(
    config: &AppConfig,
    trends: &dyn TrendsProvider,
    sheets: &dyn SheetStore,
    reference: NaiveDate,
) -> Result<RunSummary> {
    let (table, range, tab) = prepare(config, trends, reference).await?;

    let mode: WriteMode = config.sheets.write_mode.parse()?;
    let target = SheetTarget {
        spreadsheet_id: config.sheets.spreadsheet_id.clone(),
        tab: tab.clone(),
        mode,
    };
    let rows_written = write_table(sheets, &target, &table)
        .await
        .context("Failed to write to spreadsheet")?;

    Ok(RunSummary {
        rows_written,
        timeframe: range.timeframe(),
        geo: config.run.geo.clone(),
        tab,
    })
}
