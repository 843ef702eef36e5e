use chrono::{DateTime, Utc};

use crate::period::TimeRange;
use crate::trends::InterestSeries;

/// Marker written when a fetch produced no data for the whole period.
pub const NO_DATA_MARKER: &str = "no data";

const DATE_COLUMN: &str = "date";
const META_COLUMNS: [&str; 5] = ["geo", "property", "period_start", "period_end", "run_at_utc"];

/// Run-level metadata attached to every output row.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub geo: String,
    pub property_label: &'static str,
    pub range: TimeRange,
    pub run_at: DateTime<Utc>,
}

impl RunMeta {
    fn cells(&self) -> Vec<String> {
        vec![
            self.geo.clone(),
            self.property_label.to_string(),
            self.range.start.to_string(),
            self.range.end.to_string(),
            self.run_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
        ]
    }
}

/// Header row plus data rows, ready for a tabular write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn render_value(value: Option<f64>) -> String {
    match value {
        None => String::new(),
        Some(v) if v.fract() == 0.0 => format!("{}", v as i64),
        Some(v) => format!("{}", v),
    }
}

/// The single deterministic row written when the fetch came back empty, so
/// downstream writers always have something to persist.
fn placeholder_table(header: Vec<String>, value_width: usize, meta: &RunMeta) -> OutputTable {
    let mut row = vec![NO_DATA_MARKER.to_string()];
    row.extend(std::iter::repeat(String::new()).take(value_width.saturating_sub(1)));
    row.extend(meta.cells());
    OutputTable {
        header,
        rows: vec![row],
    }
}

/// Series mode: one row per date, one column per keyword, metadata columns
/// last. The provider's partial-data flag is discarded here.
pub fn series_table(series: &InterestSeries, meta: &RunMeta) -> OutputTable {
    let mut header = vec![DATE_COLUMN.to_string()];
    header.extend(series.keywords.iter().cloned());
    header.extend(META_COLUMNS.iter().map(|c| c.to_string()));

    if series.is_empty() {
        return placeholder_table(header, 1 + series.keywords.len(), meta);
    }

    let rows = series
        .points
        .iter()
        .map(|(date, row)| {
            let mut cells = vec![date.to_string()];
            cells.extend(row.values.iter().map(|v| render_value(*v)));
            cells.extend(meta.cells());
            cells
        })
        .collect();
    OutputTable { header, rows }
}

/// Aggregate mode: one row per keyword with its mean interest over the period.
pub fn aggregate_table(aggregates: &[(String, Option<f64>)], meta: &RunMeta) -> OutputTable {
    let mut header = vec!["keyword".to_string(), "avg_interest".to_string()];
    header.extend(META_COLUMNS.iter().map(|c| c.to_string()));

    if aggregates.is_empty() || aggregates.iter().all(|(_, mean)| mean.is_none()) {
        return placeholder_table(header, 2, meta);
    }

    let rows = aggregates
        .iter()
        .map(|(keyword, mean)| {
            let mut cells = vec![keyword.clone(), render_value(*mean)];
            cells.extend(meta.cells());
            cells
        })
        .collect();
    OutputTable { header, rows }
}
