//! Shared application context.
//!
//! Built once at startup and shared read-only by every request. The only
//! mutable state it holds lives inside the per-dependency guards.

use crate::adapters::{
    AnalyticsBackend, Ga4Adapter, Ga4HttpBackend, SheetsAdapter, SheetsBackend, SheetsHttpBackend,
};
use crate::agent::{ChatModel, OllamaClient, ToolRegistry};
use crate::config::Config;
use crate::resilience::{CircuitState, Dependency};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const MODEL_DEPENDENCY: &str = "model";
pub const GA4_DEPENDENCY: &str = "ga4";
pub const SHEETS_DEPENDENCY: &str = "sheets";

pub struct AppContext {
    pub config: Config,
    pub model: Arc<dyn ChatModel>,
    pub model_guard: Arc<Dependency>,
    pub tools: ToolRegistry,
    dependencies: Vec<Arc<Dependency>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub dependencies: BTreeMap<String, CircuitState>,
}

impl AppContext {
    /// Wire the context from explicit backends.
    pub fn new(
        config: Config,
        model: Arc<dyn ChatModel>,
        analytics: Arc<dyn AnalyticsBackend>,
        sheets: Arc<dyn SheetsBackend>,
    ) -> Self {
        let model_guard = Arc::new(Dependency::new(MODEL_DEPENDENCY, &config.resilience));
        let ga4_guard = Arc::new(Dependency::new(GA4_DEPENDENCY, &config.resilience));
        let sheets_guard = Arc::new(Dependency::new(SHEETS_DEPENDENCY, &config.resilience));

        let ga4 = Arc::new(Ga4Adapter::new(
            analytics,
            ga4_guard.clone(),
            config.ga4.default_limit,
        ));
        let sheets = Arc::new(SheetsAdapter::new(
            sheets,
            sheets_guard.clone(),
            config.sheets.page_size,
        ));

        Self {
            dependencies: vec![model_guard.clone(), ga4_guard, sheets_guard],
            tools: ToolRegistry::new(ga4, sheets),
            model,
            model_guard,
            config,
        }
    }

    /// Wire the context against the real HTTP services.
    pub fn from_config(config: Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.resilience.call_timeout_seconds.max(1) + 5);
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let token = config.google_token()?;
        if token.is_none() {
            warn!(
                "No Google API token found in {} or a token file; GA4 and Sheets calls will be rejected",
                config.credentials.token_env
            );
        }

        let model = Arc::new(OllamaClient::new(
            http_client.clone(),
            config.model.base_url.clone(),
            config.model.name.clone(),
            config.model.temperature,
            config.model_api_key(),
        ));
        let analytics = Arc::new(Ga4HttpBackend::new(
            http_client.clone(),
            config.ga4.endpoint.clone(),
            token.clone(),
        ));
        let sheets = Arc::new(SheetsHttpBackend::new(
            http_client,
            config.sheets.endpoint.clone(),
            token,
        ));

        info!(
            model = %config.model.name,
            model_url = %config.model.base_url,
            "Application context ready"
        );

        Ok(Self::new(config, model, analytics, sheets))
    }

    /// Breaker state of every dependency. Degraded when any is not closed.
    pub fn health(&self) -> HealthReport {
        let dependencies: BTreeMap<String, CircuitState> = self
            .dependencies
            .iter()
            .map(|d| (d.name().to_string(), d.state()))
            .collect();

        let status = if dependencies.values().all(|s| *s == CircuitState::Closed) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        HealthReport {
            status,
            dependencies,
        }
    }
}
