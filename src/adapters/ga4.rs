//! GA4 Data API adapter for the `query_ga4` tool.

use super::{arg_str, arg_u64, numeric_or_string, send_json};
use crate::error::Fault;
use crate::resilience::Dependency;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

const SERVICE: &str = "GA4";
const MAX_LIMIT: u64 = 10_000;
/// Furthest back an `NdaysAgo` expression may reach.
const MAX_DAYS_AGO: i64 = 36_500;

/// Dimensions the adapter accepts.
pub const KNOWN_DIMENSIONS: &[&str] = &[
    "date",
    "dateHour",
    "dayOfWeek",
    "week",
    "month",
    "year",
    "pagePath",
    "pageTitle",
    "pageLocation",
    "pageReferrer",
    "landingPage",
    "hostName",
    "sessionSource",
    "sessionMedium",
    "sessionSourceMedium",
    "sessionCampaignName",
    "sessionDefaultChannelGroup",
    "firstUserSource",
    "firstUserMedium",
    "country",
    "region",
    "city",
    "language",
    "deviceCategory",
    "operatingSystem",
    "browser",
    "eventName",
    "newVsReturning",
];

/// Metrics the adapter accepts.
pub const KNOWN_METRICS: &[&str] = &[
    "sessions",
    "totalUsers",
    "newUsers",
    "activeUsers",
    "screenPageViews",
    "screenPageViewsPerSession",
    "engagedSessions",
    "engagementRate",
    "bounceRate",
    "averageSessionDuration",
    "userEngagementDuration",
    "sessionsPerUser",
    "eventCount",
    "eventsPerSession",
    "conversions",
    "keyEvents",
    "totalRevenue",
];

/// A validated report request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub property_id: String,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    /// Field to sort by, descending.
    pub order_by: Option<String>,
    pub limit: u64,
}

/// Raw report as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTable {
    #[serde(default)]
    pub dimension_headers: Vec<Header>,
    #[serde(default)]
    pub metric_headers: Vec<Header>,
    #[serde(default)]
    pub rows: Vec<ReportRow>,
    #[serde(default)]
    pub row_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Header {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    #[serde(default)]
    pub dimension_values: Vec<CellValue>,
    #[serde(default)]
    pub metric_values: Vec<CellValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CellValue {
    #[serde(default)]
    pub value: String,
}

/// Something that can run a GA4 report.
#[async_trait]
pub trait AnalyticsBackend: Send + Sync {
    async fn run_report(&self, request: &ReportRequest) -> Result<ReportTable, Fault>;
}

/// `properties/{id}:runReport` over HTTPS.
pub struct Ga4HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl Ga4HttpBackend {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReportBody<'a> {
    date_ranges: Vec<DateRangeBody<'a>>,
    dimensions: Vec<NameBody<'a>>,
    metrics: Vec<NameBody<'a>>,
    limit: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    order_bys: Vec<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DateRangeBody<'a> {
    start_date: &'a str,
    end_date: &'a str,
}

#[derive(Serialize)]
struct NameBody<'a> {
    name: &'a str,
}

#[async_trait]
impl AnalyticsBackend for Ga4HttpBackend {
    async fn run_report(&self, request: &ReportRequest) -> Result<ReportTable, Fault> {
        let url = format!(
            "{}/properties/{}:runReport",
            self.endpoint, request.property_id
        );

        let order_bys = match request.order_by.as_deref() {
            Some(field) if request.metrics.iter().any(|m| m == field) => {
                vec![json!({"metric": {"metricName": field}, "desc": true})]
            }
            Some(field) => vec![json!({"dimension": {"dimensionName": field}, "desc": true})],
            None => Vec::new(),
        };

        let body = RunReportBody {
            date_ranges: vec![DateRangeBody {
                start_date: request.start_date.as_str(),
                end_date: request.end_date.as_str(),
            }],
            dimensions: request
                .dimensions
                .iter()
                .map(|d| NameBody { name: d.as_str() })
                .collect(),
            metrics: request
                .metrics
                .iter()
                .map(|m| NameBody { name: m.as_str() })
                .collect(),
            limit: request.limit.to_string(),
            order_bys,
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }

        debug!(property = %request.property_id, "Issuing GA4 runReport");
        send_json(SERVICE, builder).await
    }
}

/// Validates `query_ga4` arguments and runs them against a backend.
pub struct Ga4Adapter {
    backend: Arc<dyn AnalyticsBackend>,
    guard: Arc<Dependency>,
    default_limit: u64,
}

impl Ga4Adapter {
    pub fn new(backend: Arc<dyn AnalyticsBackend>, guard: Arc<Dependency>, default_limit: u32) -> Self {
        Self {
            backend,
            guard,
            default_limit: u64::from(default_limit.max(1)),
        }
    }

    /// Run a `query_ga4` call. Argument problems are reported before any
    /// network I/O.
    pub async fn execute(&self, args: &Value, property_id: &str, deadline: Instant) -> Result<Value, Fault> {
        let today = Utc::now().date_naive();
        let request = self.parse_request(args, property_id, today)?;

        let backend = self.backend.clone();
        let table = self
            .guard
            .call(deadline, || {
                let backend = backend.clone();
                let request = request.clone();
                async move { backend.run_report(&request).await }
            })
            .await?;

        Ok(normalize_report(&request, table))
    }

    pub fn parse_request(&self, args: &Value, property_id: &str, today: NaiveDate) -> Result<ReportRequest, Fault> {
        let dimensions = string_list(args, "dimensions")?;
        let metrics = string_list(args, "metrics")?;

        if metrics.is_empty() {
            return Err(Fault::invalid_argument("at least one metric is required"));
        }

        let unknown: Vec<&str> = dimensions
            .iter()
            .filter(|d| !KNOWN_DIMENSIONS.contains(&d.as_str()))
            .chain(metrics.iter().filter(|m| !KNOWN_METRICS.contains(&m.as_str())))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(Fault::invalid_argument(format!(
                "unknown dimension or metric: {}",
                unknown.join(", ")
            )));
        }

        let start_date = arg_str(args, &["startDate", "start_date"])
            .ok_or_else(|| Fault::invalid_range("startDate is required"))?;
        let end_date = arg_str(args, &["endDate", "end_date"])
            .ok_or_else(|| Fault::invalid_range("endDate is required"))?;
        validate_range(start_date, end_date, today)?;

        let property_id = match arg_str(args, &["propertyId", "property_id"]) {
            Some(id) => normalize_property_id(id)?,
            None => normalize_property_id(property_id)?,
        };

        let order_by = arg_str(args, &["orderBy", "order_by"]).map(str::to_string);
        if let Some(ref field) = order_by {
            if !metrics.contains(field) && !dimensions.contains(field) {
                return Err(Fault::invalid_argument(format!(
                    "orderBy '{}' must be one of the requested dimensions or metrics",
                    field
                )));
            }
        }

        let limit = arg_u64(args, &["limit"])?
            .unwrap_or(self.default_limit)
            .clamp(1, MAX_LIMIT);

        Ok(ReportRequest {
            property_id,
            dimensions,
            metrics,
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
            order_by,
            limit,
        })
    }
}

/// Accepts `123456` or `properties/123456`.
pub fn normalize_property_id(raw: &str) -> Result<String, Fault> {
    let id = raw.trim().trim_start_matches("properties/");
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(Fault::invalid_argument(format!(
            "'{}' is not a GA4 property id",
            raw
        )));
    }
    Ok(id.to_string())
}

fn string_list(args: &Value, key: &str) -> Result<Vec<String>, Fault> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| Fault::invalid_argument(format!("'{}' must contain names", key)))
            })
            .collect(),
        // Models sometimes send a comma-separated string.
        Some(Value::String(s)) => Ok(s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()),
        Some(_) => Err(Fault::invalid_argument(format!("'{}' must be a list", key))),
    }
}

/// Resolve a GA4 date expression against `today`.
fn resolve_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    match raw {
        "today" => Some(today),
        "yesterday" => today.checked_sub_signed(ChronoDuration::days(1)),
        _ => {
            if let Some(days) = raw.strip_suffix("daysAgo") {
                let days: i64 = days.parse().ok()?;
                if !(0..=MAX_DAYS_AGO).contains(&days) {
                    return None;
                }
                return today.checked_sub_signed(ChronoDuration::try_days(days)?);
            }
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
        }
    }
}

fn validate_range(start: &str, end: &str, today: NaiveDate) -> Result<(), Fault> {
    let start_date = resolve_date(start, today)
        .ok_or_else(|| Fault::invalid_range(format!("unrecognized startDate '{}'", start)))?;
    let end_date = resolve_date(end, today)
        .ok_or_else(|| Fault::invalid_range(format!("unrecognized endDate '{}'", end)))?;

    if start_date > end_date {
        return Err(Fault::invalid_range(format!(
            "startDate {} is after endDate {}",
            start, end
        )));
    }
    Ok(())
}

/// Flatten a report into `{header: value}` rows, sorted by `order_by`
/// descending and cut to `limit`.
fn normalize_report(request: &ReportRequest, table: ReportTable) -> Value {
    let dimension_names: Vec<String> = if table.dimension_headers.is_empty() {
        request.dimensions.clone()
    } else {
        table.dimension_headers.iter().map(|h| h.name.clone()).collect()
    };
    let metric_names: Vec<String> = if table.metric_headers.is_empty() {
        request.metrics.clone()
    } else {
        table.metric_headers.iter().map(|h| h.name.clone()).collect()
    };

    let mut rows: Vec<Map<String, Value>> = table
        .rows
        .iter()
        .map(|row| {
            let mut object = Map::new();
            for (name, cell) in dimension_names.iter().zip(&row.dimension_values) {
                object.insert(name.clone(), Value::from(cell.value.clone()));
            }
            for (name, cell) in metric_names.iter().zip(&row.metric_values) {
                object.insert(name.clone(), numeric_or_string(&cell.value));
            }
            object
        })
        .collect();

    if let Some(ref field) = request.order_by {
        rows.sort_by(|a, b| compare_desc(a.get(field), b.get(field)));
    }
    rows.truncate(request.limit as usize);

    json!({
        "propertyId": request.property_id,
        "dateRange": {"startDate": request.start_date, "endDate": request.end_date},
        "rowCount": table.row_count.unwrap_or(rows.len() as u64),
        "rows": rows,
    })
}

fn compare_desc(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.and_then(Value::as_f64), b.and_then(Value::as_f64)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        _ => {
            let x = a.and_then(Value::as_str).unwrap_or("");
            let y = b.and_then(Value::as_str).unwrap_or("");
            y.cmp(x)
        }
    }
}
