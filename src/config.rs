//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.sitepulse.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".sitepulse.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Agent runtime limits.
    #[serde(default)]
    pub agent: AgentLimits,

    /// GA4 Data API settings.
    #[serde(default)]
    pub ga4: Ga4Config,

    /// Sheets API settings.
    #[serde(default)]
    pub sheets: SheetsConfig,

    /// Google API credentials.
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Timeout, retry and circuit breaker settings.
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            verbose: false,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Base URL of the Ollama-compatible chat API.
    #[serde(default = "default_model_url")]
    pub base_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Environment variable holding an optional bearer token for the model API.
    #[serde(default = "default_model_key_env")]
    pub api_key_env: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            base_url: default_model_url(),
            temperature: default_temperature(),
            api_key_env: default_model_key_env(),
        }
    }
}

fn default_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_model_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_model_key_env() -> String {
    "SITEPULSE_MODEL_API_KEY".to_string()
}

/// Limits applied to every agent runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLimits {
    /// Maximum model turns per agent.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Max conversation messages kept after the prompt (sliding window).
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,

    /// Total time budget for one query, in seconds.
    #[serde(default = "default_deadline")]
    pub query_deadline_seconds: u64,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_context_messages: default_max_context_messages(),
            query_deadline_seconds: default_deadline(),
        }
    }
}

impl AgentLimits {
    pub fn query_deadline(&self) -> Duration {
        Duration::from_secs(self.query_deadline_seconds)
    }
}

fn default_max_iterations() -> usize {
    6
}

fn default_max_context_messages() -> usize {
    12
}

fn default_deadline() -> u64 {
    60
}

/// GA4 Data API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ga4Config {
    /// Default GA4 property id used when a query does not supply one.
    #[serde(default)]
    pub property_id: Option<String>,

    /// Data API endpoint.
    #[serde(default = "default_ga4_endpoint")]
    pub endpoint: String,

    /// Row limit when the model does not ask for one.
    #[serde(default = "default_ga4_limit")]
    pub default_limit: u32,
}

impl Default for Ga4Config {
    fn default() -> Self {
        Self {
            property_id: None,
            endpoint: default_ga4_endpoint(),
            default_limit: default_ga4_limit(),
        }
    }
}

fn default_ga4_endpoint() -> String {
    "https://analyticsdata.googleapis.com/v1beta".to_string()
}

fn default_ga4_limit() -> u32 {
    10
}

/// Sheets API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    /// Default spreadsheet id holding the SEO dataset.
    #[serde(default)]
    pub sheet_id: Option<String>,

    /// Sheets API endpoint.
    #[serde(default = "default_sheets_endpoint")]
    pub endpoint: String,

    /// Rows returned per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            sheet_id: None,
            endpoint: default_sheets_endpoint(),
            page_size: default_page_size(),
        }
    }
}

fn default_sheets_endpoint() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}

fn default_page_size() -> usize {
    100
}

/// Where the Google API bearer token comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// File containing a bearer token. Takes precedence over `token_env`.
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// Environment variable holding a bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            token_file: None,
            token_env: default_token_env(),
        }
    }
}

fn default_token_env() -> String {
    "GOOGLE_OAUTH_TOKEN".to_string()
}

/// Timeout, retry and circuit breaker settings shared by all dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Consecutive failures before a circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,

    /// Concurrent calls allowed per dependency.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_calls: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            call_timeout_seconds: default_call_timeout(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            failure_threshold: default_failure_threshold(),
            cooldown_seconds: default_cooldown(),
            max_concurrent_calls: default_max_concurrent(),
        }
    }
}

fn default_call_timeout() -> u64 {
    20
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    250
}

fn default_max_delay() -> u64 {
    4000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    8
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were explicitly provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.model_url {
            self.model.base_url = url.clone();
        }
        if let Some(ref bind) = args.bind {
            self.general.bind = bind.clone();
        }
        if let Some(ref property_id) = args.property_id {
            self.ga4.property_id = Some(property_id.clone());
        }
        if let Some(ref sheet_id) = args.sheet_id {
            self.sheets.sheet_id = Some(sheet_id.clone());
        }
        if let Some(max_iterations) = args.max_iterations {
            self.agent.max_iterations = max_iterations;
        }
        if let Some(deadline) = args.deadline {
            self.agent.query_deadline_seconds = deadline;
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Resolve the Google API bearer token, if one is configured.
    pub fn google_token(&self) -> Result<Option<String>> {
        if let Some(ref path) = self.credentials.token_file {
            let token = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read token file: {}", path.display()))?;
            let token = token.trim();
            if token.is_empty() {
                anyhow::bail!("Token file is empty: {}", path.display());
            }
            return Ok(Some(token.to_string()));
        }

        Ok(std::env::var(&self.credentials.token_env)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    /// Resolve the optional model API key from its environment variable.
    pub fn model_api_key(&self) -> Option<String> {
        std::env::var(&self.model.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
