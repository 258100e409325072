//! Sheets adapter for the `query_seo_sheet` tool.
//!
//! The SEO dataset lives in a spreadsheet whose first row is a header. The
//! adapter reads a range, applies the model's filters and returns one page
//! of matching rows with a cursor for the next page.

use super::{arg_str, arg_u64, numeric_or_string, send_json};
use crate::error::Fault;
use crate::resilience::Dependency;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

const SERVICE: &str = "Sheets";
const MAX_PAGE_SIZE: u64 = 500;

/// Something that can read a rectangular range of cell values.
#[async_trait]
pub trait SheetsBackend: Send + Sync {
    async fn read_values(&self, sheet_id: &str, range: &str) -> Result<Vec<Vec<String>>, Fault>;
}

/// `spreadsheets.values.get` over HTTPS.
pub struct SheetsHttpBackend {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl SheetsHttpBackend {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[async_trait]
impl SheetsBackend for SheetsHttpBackend {
    async fn read_values(&self, sheet_id: &str, range: &str) -> Result<Vec<Vec<String>>, Fault> {
        let mut url = reqwest::Url::parse(&self.endpoint)
            .map_err(|_| Fault::unavailable("Sheets endpoint is not a valid URL"))?;
        url.path_segments_mut()
            .map_err(|_| Fault::unavailable("Sheets endpoint is not a valid URL"))?
            .extend(["spreadsheets", sheet_id, "values", range]);

        let mut builder = self.client.get(url);
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }

        debug!(sheet = %sheet_id, range = %range, "Reading sheet values");
        let body: ValueRange = send_json(SERVICE, builder).await?;

        Ok(body
            .values
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| match cell {
                        Value::String(s) => s,
                        Value::Null => String::new(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "eq" | "=" | "==" => Some(FilterOp::Eq),
            "ne" | "!=" => Some(FilterOp::Ne),
            "contains" => Some(FilterOp::Contains),
            "gt" | ">" => Some(FilterOp::Gt),
            "gte" | ">=" => Some(FilterOp::Gte),
            "lt" | "<" => Some(FilterOp::Lt),
            "lte" | "<=" => Some(FilterOp::Lte),
            _ => None,
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    fn matches(&self, cell: &str) -> bool {
        if self.op.is_numeric() {
            let (Some(left), Some(right)) = (parse_number(cell), parse_number(&self.value)) else {
                return false;
            };
            return match self.op {
                FilterOp::Gt => left > right,
                FilterOp::Gte => left >= right,
                FilterOp::Lt => left < right,
                FilterOp::Lte => left <= right,
                _ => false,
            };
        }

        match self.op {
            FilterOp::Eq => cell.trim().eq_ignore_ascii_case(self.value.trim()),
            FilterOp::Ne => !cell.trim().eq_ignore_ascii_case(self.value.trim()),
            FilterOp::Contains => cell
                .to_lowercase()
                .contains(&self.value.trim().to_lowercase()),
            _ => false,
        }
    }
}

/// Parses `1,234`, `12.5` and `8%` style cells.
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// A validated sheet read.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetQuery {
    pub range: String,
    pub filters: Vec<Filter>,
    pub offset: usize,
    pub page_size: usize,
}

/// Validates `query_seo_sheet` arguments and runs them against a backend.
pub struct SheetsAdapter {
    backend: Arc<dyn SheetsBackend>,
    guard: Arc<Dependency>,
    page_size: usize,
}

impl SheetsAdapter {
    pub fn new(backend: Arc<dyn SheetsBackend>, guard: Arc<Dependency>, page_size: usize) -> Self {
        Self {
            backend,
            guard,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE as usize),
        }
    }

    pub async fn execute(&self, args: &Value, sheet_id: &str, deadline: Instant) -> Result<Value, Fault> {
        let query = self.parse_request(args)?;

        let backend = self.backend.clone();
        let values = self
            .guard
            .call(deadline, || {
                let backend = backend.clone();
                let sheet_id = sheet_id.to_string();
                let range = query.range.clone();
                async move { backend.read_values(&sheet_id, &range).await }
            })
            .await?;

        paginate(sheet_id, &query, values)
    }

    pub fn parse_request(&self, args: &Value) -> Result<SheetQuery, Fault> {
        let range = match (arg_str(args, &["tab"]), arg_str(args, &["range"])) {
            (Some(tab), Some(range)) => format!("{}!{}", tab, range),
            (Some(tab), None) => tab.to_string(),
            (None, Some(range)) => range.to_string(),
            (None, None) => {
                return Err(Fault::invalid_argument("either 'range' or 'tab' is required"));
            }
        };

        let filters = parse_filters(args.get("filters"))?;

        let offset = match arg_str(args, &["cursor"]) {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| Fault::invalid_argument(format!("invalid cursor '{}'", cursor)))?,
            None => 0,
        };

        let page_size = arg_u64(args, &["pageSize", "page_size"])?
            .map(|n| n.clamp(1, MAX_PAGE_SIZE) as usize)
            .unwrap_or(self.page_size);

        Ok(SheetQuery {
            range,
            filters,
            offset,
            page_size,
        })
    }
}

fn parse_filters(raw: Option<&Value>) -> Result<Vec<Filter>, Fault> {
    let items = match raw {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(Fault::invalid_argument("'filters' must be a list")),
    };

    items
        .iter()
        .map(|item| {
            let column = arg_str(item, &["column"])
                .ok_or_else(|| Fault::invalid_argument("filter is missing 'column'"))?;
            let op_raw = arg_str(item, &["op"]).unwrap_or("eq");
            let op = FilterOp::parse(op_raw)
                .ok_or_else(|| Fault::invalid_argument(format!("unknown filter op '{}'", op_raw)))?;
            let value = match item.get("value") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                _ => return Err(Fault::invalid_argument("filter is missing 'value'")),
            };
            Ok(Filter {
                column: column.to_string(),
                op,
                value,
            })
        })
        .collect()
}

/// Apply filters to the data rows and cut one page.
fn paginate(sheet_id: &str, query: &SheetQuery, values: Vec<Vec<String>>) -> Result<Value, Fault> {
    let mut rows = values.into_iter();
    let columns: Vec<String> = match rows.next() {
        Some(header) => header.into_iter().map(|h| h.trim().to_string()).collect(),
        None => Vec::new(),
    };

    let mut column_filters = Vec::with_capacity(query.filters.len());
    for filter in &query.filters {
        let index = columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(&filter.column))
            .ok_or_else(|| {
                Fault::invalid_argument(format!(
                    "unknown column '{}' (available: {})",
                    filter.column,
                    columns.join(", ")
                ))
            })?;
        column_filters.push((index, filter));
    }

    let matching: Vec<Vec<String>> = rows
        .filter(|row| {
            column_filters.iter().all(|(index, filter)| {
                filter.matches(row.get(*index).map(String::as_str).unwrap_or(""))
            })
        })
        .collect();

    let total = matching.len();
    let page: Vec<Map<String, Value>> = matching
        .iter()
        .skip(query.offset)
        .take(query.page_size)
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let cell = row.get(i).map(String::as_str).unwrap_or("");
                    (name.clone(), numeric_or_string(cell))
                })
                .collect()
        })
        .collect();

    let end = query.offset.saturating_add(query.page_size);
    let next_cursor = if end < total {
        Value::from(end.to_string())
    } else {
        Value::Null
    };

    Ok(json!({
        "sheetId": sheet_id,
        "range": query.range,
        "columns": columns,
        "totalRows": total,
        "rows": page,
        "nextCursor": next_cursor,
    }))
}
