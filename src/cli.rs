//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// SitePulse - ask questions about your GA4 analytics and SEO data
///
/// Routes each question to a GA4 agent, an SEO agent, or both, lets them
/// query their data sources through an LLM tool-calling loop, and merges
/// the answers.
///
/// Examples:
///   sitepulse --query "What are my top 5 pages this week?"
///   sitepulse --query "Which keywords lost rankings?" --sheet-id 1AbC --format json
///   sitepulse --serve --bind 0.0.0.0:8080
///   sitepulse --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Question to answer once and exit
    #[arg(short = 'Q', long, value_name = "TEXT", conflicts_with = "serve")]
    pub query: Option<String>,

    /// Run the HTTP server (POST /query, GET /health)
    #[arg(long)]
    pub serve: bool,

    /// Address for the HTTP server
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// GA4 property id (overrides the config default)
    #[arg(long, value_name = "ID", env = "GA4_PROPERTY_ID")]
    pub property_id: Option<String>,

    /// Spreadsheet id holding the SEO dataset (overrides the config default)
    #[arg(long, value_name = "ID", env = "SEO_SHEET_ID")]
    pub sheet_id: Option<String>,

    /// Model to drive the agents
    #[arg(short, long, env = "SITEPULSE_MODEL")]
    pub model: Option<String>,

    /// Ollama-compatible chat API base URL
    #[arg(long, value_name = "URL", env = "SITEPULSE_MODEL_URL")]
    pub model_url: Option<String>,

    /// Maximum model turns per agent
    #[arg(long, value_name = "COUNT")]
    pub max_iterations: Option<usize>,

    /// Query deadline in seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .sitepulse.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the answer to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format for --query (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .sitepulse.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for one-shot answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.query.is_none() && !self.serve {
            return Err("Either --query or --serve is required".to_string());
        }

        if let Some(ref query) = self.query {
            if query.trim().is_empty() {
                return Err("Query must not be empty".to_string());
            }
        }

        if let Some(ref url) = self.model_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Model URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref bind) = self.bind {
            if bind.parse::<SocketAddr>().is_err() {
                return Err(format!("Invalid bind address: {}", bind));
            }
        }

        if self.max_iterations == Some(0) {
            return Err("Max iterations must be at least 1".to_string());
        }

        if self.deadline == Some(0) {
            return Err("Deadline must be at least 1 second".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings. `--quiet` wins
    /// over a config file that turns verbose logging on.
    pub fn log_level(&self, verbose_by_default: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || verbose_by_default {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            query: Some("What are my top pages?".to_string()),
            serve: false,
            bind: None,
            property_id: None,
            sheet_id: None,
            model: None,
            model_url: None,
            max_iterations: None,
            deadline: None,
            config: None,
            output: None,
            format: OutputFormat::Markdown,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_validation_ok() {
        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_validation_requires_mode() {
        let mut args = make_args();
        args.query = None;
        assert!(args.validate().is_err());

        args.serve = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_model_url() {
        let mut args = make_args();
        args.model_url = Some("localhost:11434".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_bind() {
        let mut args = make_args();
        args.bind = Some("not-an-address".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_limits() {
        let mut args = make_args();
        args.max_iterations = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.deadline = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(false), tracing::Level::INFO);
        assert_eq!(args.log_level(true), tracing::Level::DEBUG);

        args.verbose = true;
        assert_eq!(args.log_level(false), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(true), tracing::Level::ERROR);
    }
}
