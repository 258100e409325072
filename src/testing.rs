//! In-memory backends and a scripted model for tests.

use crate::adapters::ga4::{CellValue, Header, ReportRequest, ReportRow, ReportTable};
use crate::adapters::{AnalyticsBackend, SheetsBackend};
use crate::agent::model::{ChatModel, ModelReply, ModelRequest, ToolCallFunction};
use crate::config::Config;
use crate::context::AppContext;
use crate::error::{Fault, FaultCode};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Config with ids set and short backoff.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.ga4.property_id = Some("42".to_string());
    config.sheets.sheet_id = Some("seo-sheet".to_string());
    config.resilience.base_delay_ms = 10;
    config.resilience.max_delay_ms = 40;
    config
}

pub fn context_with(
    config: Config,
    model: Arc<dyn ChatModel>,
    analytics: Arc<dyn AnalyticsBackend>,
    sheets: Arc<dyn SheetsBackend>,
) -> Arc<AppContext> {
    Arc::new(AppContext::new(config, model, analytics, sheets))
}

pub fn test_context() -> Arc<AppContext> {
    context_with(
        test_config(),
        ScriptedModel::new(|_| Ok(ModelReply::text("ok"))),
        Arc::new(FakeAnalytics::default()),
        Arc::new(FakeSheets::default()),
    )
}

pub fn tool_call(name: &str, arguments: Value) -> ToolCallFunction {
    ToolCallFunction {
        name: name.to_string(),
        arguments,
    }
}

/// The parsed content of the request's last message, if it is a tool result.
pub fn last_tool_output(request: &ModelRequest) -> Option<Value> {
    let last = request.messages.last()?;
    if last.role != "tool" {
        return None;
    }
    serde_json::from_str(&last.content).ok()
}

type Script = dyn Fn(&ModelRequest) -> Result<ModelReply, Fault> + Send + Sync;

/// A model whose every turn is computed from the request it receives.
pub struct ScriptedModel {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&ModelRequest) -> Result<ModelReply, Fault> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, Fault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(request)
    }
}

/// GA4 backend serving `pagePath`/`sessions` rows.
pub struct FakeAnalytics {
    rows: Vec<(String, i64)>,
    failure: Option<FaultCode>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl Default for FakeAnalytics {
    fn default() -> Self {
        Self::with_rows(Vec::new())
    }
}

impl FakeAnalytics {
    pub fn with_rows(rows: Vec<(&str, i64)>) -> Self {
        Self {
            rows: rows
                .into_iter()
                .map(|(path, sessions)| (path.to_string(), sessions))
                .collect(),
            failure: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(code: FaultCode) -> Self {
        Self {
            failure: Some(code),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyticsBackend for FakeAnalytics {
    async fn run_report(&self, _request: &ReportRequest) -> Result<ReportTable, Fault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(code) = self.failure {
            return Err(Fault::new(code, format!("fake GA4 failure ({})", code)));
        }

        Ok(ReportTable {
            dimension_headers: vec![Header {
                name: "pagePath".to_string(),
            }],
            metric_headers: vec![Header {
                name: "sessions".to_string(),
            }],
            rows: self
                .rows
                .iter()
                .map(|(path, sessions)| ReportRow {
                    dimension_values: vec![CellValue {
                        value: path.clone(),
                    }],
                    metric_values: vec![CellValue {
                        value: sessions.to_string(),
                    }],
                })
                .collect(),
            row_count: Some(self.rows.len() as u64),
        })
    }
}

/// Sheets backend serving a fixed grid.
pub struct FakeSheets {
    values: Vec<Vec<String>>,
    failure: Option<FaultCode>,
    calls: AtomicUsize,
}

impl Default for FakeSheets {
    fn default() -> Self {
        Self::with_values(Vec::new())
    }
}

impl FakeSheets {
    pub fn with_values(values: Vec<Vec<String>>) -> Self {
        Self {
            values,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(code: FaultCode) -> Self {
        Self {
            failure: Some(code),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SheetsBackend for FakeSheets {
    async fn read_values(&self, _sheet_id: &str, _range: &str) -> Result<Vec<Vec<String>>, Fault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = self.failure {
            return Err(Fault::new(code, format!("fake Sheets failure ({})", code)));
        }
        Ok(self.values.clone())
    }
}
