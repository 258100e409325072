//! SitePulse - answers questions about GA4 analytics and SEO data
//!
//! Routes each question to a GA4 agent, an SEO agent or both. Each agent
//! runs an Ollama tool-calling loop against its data source, and the
//! answers are merged into one result.
//!
//! Exit codes:
//!   0 - Success (at least one agent answered, or the server shut down cleanly)
//!   1 - Runtime or validation error
//!   2 - Every agent failed

mod adapters;
mod agent;
mod analysis;
mod cli;
mod config;
mod context;
mod error;
mod models;
mod orchestrator;
mod report;
mod resilience;
mod router;
mod server;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use context::AppContext;
use error::CoreError;
use models::Query;
use orchestrator::Orchestrator;
use report::ReportMetadata;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(&args, &config);

    info!("SitePulse v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("SitePulse failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default config file.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Set ga4.property_id and sheets.sheet_id, then point credentials at a Google token.");
    Ok(())
}

/// Initialize logging. `RUST_LOG` wins over the verbosity flags and
/// `general.verbose`.
fn init_logging(args: &Args, config: &Config) {
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact();

    match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            let subscriber = builder.with_env_filter(filter).finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("Failed to set tracing subscriber");
        }
        Err(_) => {
            let subscriber = builder.with_max_level(args.log_level(config.general.verbose)).finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("Failed to set tracing subscriber");
        }
    }
}

/// Load configuration from file or use defaults. Runs before logging is
/// set up, so problems go straight to stderr.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Failed to load {}: {:#}", CONFIG_FILE, e);
            Ok(Config::default())
        }
    }
}

/// Run in the selected mode. Returns the exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    debug!(bind = %config.general.bind, model = %config.model.name, "Configuration loaded");

    let model_name = config.model.name.clone();
    let bind = config.general.bind.clone();

    let ctx = Arc::new(AppContext::from_config(config)?);
    let orchestrator = Arc::new(Orchestrator::new(ctx));

    if args.serve {
        let addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", bind))?;
        println!("🌐 Serving on http://{}", addr);
        server::serve(orchestrator, addr).await?;
        return Ok(0);
    }

    let text = args.query.clone().unwrap_or_default();
    run_query(&orchestrator, &args, text, model_name).await
}

/// One-shot mode: answer a single question and print or save the report.
async fn run_query(
    orchestrator: &Orchestrator,
    args: &Args,
    text: String,
    model_name: String,
) -> Result<i32> {
    let start_time = Instant::now();

    println!("🔎 {}", text);

    let result = match orchestrator.handle(Query::new(text.clone())).await {
        Ok(result) => result,
        Err(CoreError::Validation(message)) => {
            eprintln!("❌ Invalid query: {}", message);
            return Ok(1);
        }
    };

    let duration = start_time.elapsed().as_secs_f64();

    let content = match args.format {
        OutputFormat::Markdown => {
            let metadata = ReportMetadata {
                query: text,
                generated_at: Utc::now(),
                model_used: model_name,
                duration_seconds: duration,
            };
            report::generate_markdown_report(&result, &metadata)
        }
        OutputFormat::Json => report::generate_json_report(&result)?,
    };

    match args.output {
        Some(ref path) => {
            report::write_report(&content, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!("📝 Report written to {}", path.display());
        }
        None => println!("\n{}", content),
    }

    println!(
        "✅ {} of {} agents answered in {:.1}s ({} rows, {} errors)",
        result.completed_count(),
        result.responses.len(),
        duration,
        result.total_rows(),
        result.errors.len()
    );

    if result.all_failed() {
        eprintln!("❌ Every agent failed");
        return Ok(2);
    }

    Ok(0)
}
