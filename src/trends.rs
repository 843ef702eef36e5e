use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, error, warn};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use url::Url;

use crate::config::{ConfigError, TrendsConfig};
use crate::period::TimeRange;

/// Provider limit on keywords per interest-over-time query.
pub const MAX_KEYWORDS_PER_QUERY: usize = 5;

const TRENDS_BASE_URL: &str = "https://trends.google.com/";
const EXPLORE_URL: &str = "https://trends.google.com/trends/api/explore";
const MULTILINE_URL: &str = "https://trends.google.com/trends/api/widgetdata/multiline";

// The API serves a consent interstitial to clients it does not recognize.
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Search vertical restriction for a trends query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gprop {
    Web,
    Images,
    News,
    Youtube,
    Froogle,
}

impl Gprop {
    /// Value sent to the provider; web search is the empty string.
    pub fn as_query(self) -> &'static str {
        match self {
            Gprop::Web => "",
            Gprop::Images => "images",
            Gprop::News => "news",
            Gprop::Youtube => "youtube",
            Gprop::Froogle => "froogle",
        }
    }

    /// Label used in output metadata; the empty filter displays as "web".
    pub fn label(self) -> &'static str {
        match self {
            Gprop::Web => "web",
            Gprop::Images => "images",
            Gprop::News => "news",
            Gprop::Youtube => "youtube",
            Gprop::Froogle => "froogle",
        }
    }
}

impl FromStr for Gprop {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "web" => Ok(Gprop::Web),
            "images" => Ok(Gprop::Images),
            "news" => Ok(Gprop::News),
            "youtube" => Ok(Gprop::Youtube),
            "froogle" => Ok(Gprop::Froogle),
            other => Err(ConfigError::Invalid {
                field: "run.property",
                value: other.to_string(),
                allowed: "\"\", images, news, youtube or froogle",
            }),
        }
    }
}

/// Whether a run produces the raw date series or one monthly mean per keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Series,
    Aggregate,
}

impl FromStr for FetchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "series" => Ok(FetchMode::Series),
            "aggregate" => Ok(FetchMode::Aggregate),
            other => Err(ConfigError::Invalid {
                field: "run.mode",
                value: other.to_string(),
                allowed: "series or aggregate",
            }),
        }
    }
}

/// One date's interest values, parallel to the series keyword list.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub values: Vec<Option<f64>>,
    /// Set when the provider marks the row as an incomplete bucket.
    /// Dropped by the formatter.
    pub partial: bool,
}

/// Date-indexed interest table, one column per keyword.
#[derive(Debug, Clone, Default)]
pub struct InterestSeries {
    pub keywords: Vec<String>,
    pub points: BTreeMap<NaiveDate, SeriesRow>,
}

impl InterestSeries {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Attach one group's result as new columns. Groups partition the keyword
    /// list, so columns never collide; dates present on only one side are
    /// padded with absent values.
    fn merge_group(&mut self, keywords: &[String], points: BTreeMap<NaiveDate, SeriesRow>) {
        let offset = self.keywords.len();
        self.keywords.extend_from_slice(keywords);
        let width = self.keywords.len();

        for (date, row) in points {
            let entry = self.points.entry(date).or_insert_with(|| SeriesRow {
                values: Vec::new(),
                partial: false,
            });
            entry.values.resize(offset, None);
            entry.values.extend(row.values);
            entry.partial |= row.partial;
        }
        for row in self.points.values_mut() {
            row.values.resize(width, None);
        }
    }
}

/// Split a keyword list into provider-sized groups, preserving input order.
pub fn chunk_keywords(keywords: &[String]) -> Vec<Vec<String>> {
    keywords
        .chunks(MAX_KEYWORDS_PER_QUERY)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Narrow seam over the interest-over-time provider, so the pipeline can run
/// against a substitute in tests.
#[async_trait]
pub trait TrendsProvider {
    /// Fetch one group's date-indexed table. Row values are parallel to
    /// `keywords`; an empty map means the provider had no data for the group.
    async fn interest_over_time(
        &self,
        keywords: &[String],
        range: &TimeRange,
        geo: &str,
        property: Gprop,
    ) -> Result<BTreeMap<NaiveDate, SeriesRow>>;
}

/// Series mode: one query per keyword group, merged into a single table.
/// A group with no data contributes nothing; this is not an error.
pub async fn fetch_series(
    provider: &dyn TrendsProvider,
    keywords: &[String],
    range: &TimeRange,
    geo: &str,
    property: Gprop,
) -> Result<InterestSeries> {
    let mut series = InterestSeries::default();
    for group in chunk_keywords(keywords) {
        let points = provider
            .interest_over_time(&group, range, geo, property)
            .await?;
        if points.is_empty() {
            warn!(
                "no interest data for group {:?} in {}",
                group,
                range.timeframe()
            );
        }
        series.merge_group(&group, points);
    }
    Ok(series)
}

/// Aggregate mode: one single-keyword query per keyword, reduced to the mean
/// interest over the period. A keyword with no data keeps an absent mean.
pub async fn fetch_aggregates(
    provider: &dyn TrendsProvider,
    keywords: &[String],
    range: &TimeRange,
    geo: &str,
    property: Gprop,
) -> Result<Vec<(String, Option<f64>)>> {
    let mut aggregates = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        let group = [keyword.clone()];
        let points = provider
            .interest_over_time(&group, range, geo, property)
            .await?;
        let values: Vec<f64> = points
            .values()
            .filter_map(|row| row.values.first().copied().flatten())
            .collect();
        let mean = if values.is_empty() {
            warn!("no interest data for '{}' in {}", keyword, range.timeframe());
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        };
        aggregates.push((keyword.clone(), mean));
    }
    Ok(aggregates)
}

/// HTTP client for the Google Trends API.
///
/// The protocol is two-step: an `explore` call registers the query and hands
/// back a token for the TIMESERIES widget, then `widgetdata/multiline`
/// returns the actual date-indexed values.
pub struct TrendsClient {
    client: reqwest::Client,
    hl: String,
    tz: i32,
    retries: u32,
    backoff_secs: u64,
    session: OnceCell<()>,
}

impl TrendsClient {
    pub fn new(config: &TrendsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build trends HTTP client")?;
        Ok(Self {
            client,
            hl: config.hl.clone(),
            tz: config.tz,
            retries: config.retries,
            backoff_secs: config.backoff_secs,
            session: OnceCell::new(),
        })
    }

    /// The API rejects cookie-less requests; one front-page load seeds the jar.
    async fn ensure_session(&self, geo: &str) -> Result<()> {
        self.session
            .get_or_try_init(|| async {
                let url = Url::parse_with_params(TRENDS_BASE_URL, &[("geo", geo)])
                    .context("Failed to build trends session URL")?;
                debug!("warming trends session: {}", url);
                self.client
                    .get(url.clone())
                    .send()
                    .await
                    .with_context(|| format!("Failed to open trends session ({})", url))?;
                Ok::<(), anyhow::Error>(())
            })
            .await?;
        Ok(())
    }

    /// GET a trends endpoint, strip the anti-JSON prefix, parse the payload.
    /// Transport errors, 429 and 5xx are retried with a linear backoff taken
    /// from configuration; anything else fails the run.
    async fn api_get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let mut last_err = anyhow!("trends request was never attempted");
        for attempt in 0..=self.retries {
            if attempt > 0 {
                let wait = Duration::from_secs(self.backoff_secs * attempt as u64);
                debug!(
                    "retrying trends request in {:?} (attempt {}/{})",
                    wait, attempt, self.retries
                );
                tokio::time::sleep(wait).await;
            }

            let response = match self.client.get(url.clone()).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    error!("Trends request failed ({}): {}", url, e);
                    last_err = anyhow!("Trends request failed: {}", e);
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let body = response
                    .text()
                    .await
                    .context("Failed to read trends response body")?;
                return parse_prefixed_json(&body);
            }

            let retryable = status.as_u16() == 429 || status.is_server_error();
            let err_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no response body>".to_string());
            error!(
                "Trends API error: HTTP {} {} - {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status"),
                err_text
            );
            let err = anyhow!(
                "Trends API error ({}): HTTP {} {}",
                url,
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status")
            );
            if !retryable {
                return Err(err);
            }
            last_err = err;
        }
        Err(last_err.context("Trends retries exhausted"))
    }
}

/// Trends responses carry a `)]}'` prefix ahead of the JSON document.
fn parse_prefixed_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let start = body
        .find('{')
        .ok_or_else(|| anyhow!("Trends response contains no JSON document"))?;
    serde_json::from_str(&body[start..]).context("Failed to parse trends response JSON")
}

#[derive(Debug, Deserialize)]
struct ExploreResponse {
    #[serde(default)]
    widgets: Vec<Widget>,
}

#[derive(Debug, Deserialize)]
struct Widget {
    id: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MultilineResponse {
    #[serde(rename = "default")]
    data: Timeline,
}

#[derive(Debug, Deserialize)]
struct Timeline {
    #[serde(rename = "timelineData", default)]
    timeline_data: Vec<TimelinePoint>,
}

#[derive(Debug, Deserialize)]
struct TimelinePoint {
    /// Epoch seconds, as a string.
    time: String,
    #[serde(default)]
    value: Vec<f64>,
    #[serde(rename = "isPartial", default)]
    is_partial: bool,
}

fn epoch_to_date(epoch: &str) -> Option<NaiveDate> {
    let secs = epoch.parse::<i64>().ok()?;
    Some(chrono::DateTime::from_timestamp(secs, 0)?.date_naive())
}

#[async_trait]
impl TrendsProvider for TrendsClient {
    async fn interest_over_time(
        &self,
        keywords: &[String],
        range: &TimeRange,
        geo: &str,
        property: Gprop,
    ) -> Result<BTreeMap<NaiveDate, SeriesRow>> {
        self.ensure_session(geo).await?;

        let req = json!({
            "comparisonItem": keywords
                .iter()
                .map(|k| json!({
                    "keyword": k,
                    "geo": geo,
                    "time": range.timeframe(),
                }))
                .collect::<Vec<_>>(),
            "category": 0,
            "property": property.as_query(),
        });
        let tz = self.tz.to_string();
        let url = Url::parse_with_params(
            EXPLORE_URL,
            &[
                ("hl", self.hl.as_str()),
                ("tz", tz.as_str()),
                ("req", req.to_string().as_str()),
            ],
        )
        .context("Failed to build explore URL")?;
        debug!("explore request for {:?} ({})", keywords, range.timeframe());
        let explore: ExploreResponse = self.api_get(url).await?;

        let widget = match explore.widgets.into_iter().find(|w| w.id == "TIMESERIES") {
            Some(widget) => widget,
            None => {
                warn!("no TIMESERIES widget returned for {:?}", keywords);
                return Ok(BTreeMap::new());
            }
        };
        let (token, request) = match (widget.token, widget.request) {
            (Some(token), Some(request)) => (token, request),
            _ => {
                warn!("TIMESERIES widget for {:?} carries no token", keywords);
                return Ok(BTreeMap::new());
            }
        };

        let url = Url::parse_with_params(
            MULTILINE_URL,
            &[
                ("hl", self.hl.as_str()),
                ("tz", tz.as_str()),
                ("req", request.to_string().as_str()),
                ("token", token.as_str()),
            ],
        )
        .context("Failed to build widgetdata URL")?;
        let multiline: MultilineResponse = self.api_get(url).await?;

        let mut points = BTreeMap::new();
        for entry in multiline.data.timeline_data {
            let date = match epoch_to_date(&entry.time) {
                Some(date) => date,
                None => {
                    warn!("skipping unparseable timeline timestamp {:?}", entry.time);
                    continue;
                }
            };
            let mut values: Vec<Option<f64>> = entry.value.into_iter().map(Some).collect();
            values.resize(keywords.len(), None);
            points.insert(
                date,
                SeriesRow {
                    values,
                    partial: entry.is_partial,
                },
            );
        }
        Ok(points)
    }
}
