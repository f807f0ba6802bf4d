//! Taskmart Server
//!
//! Runs the request and payment reconciliation loops against the configured
//! ledger and external collaborators until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings
//! taskmart-server
//!
//! # Everything in-process, no external ledger or LLM
//! taskmart-server --memory --llm-provider deterministic
//!
//! # One tick of each loop, then exit
//! taskmart-server --once
//!
//! # Environment overrides
//! TASKMART__ORCHESTRATOR__BATCH_SIZE=10 taskmart-server
//! ```

mod config;

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use taskmart_db::{Database, Ledger, MemoryLedger};
use taskmart_escrow::{EscrowOrchestrator, HttpChainClient};
use taskmart_llm::{classifier_from_config, ClassifierDefaults, ProviderKind};
use taskmart_orchestrator::{
    Collaborators, HttpAgentExecutor, HttpPaymentProvider, Orchestrator, TickOutcome,
};
use taskmart_types::SKILL_GENERAL;

use crate::config::{DatabaseSettings, LedgerBackend, LoggingConfig, ServerConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Taskmart Server - marketplace orchestration loops
#[derive(Parser, Debug)]
#[command(name = "taskmart-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "TASKMART_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TASKMART_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "TASKMART_LOG_FORMAT")]
    log_format: Option<String>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Use the in-memory ledger instead of PostgreSQL
    #[arg(long)]
    memory: bool,

    /// Classifier provider (ollama, openai_compat, deterministic)
    #[arg(long, env = "TASKMART_LLM_PROVIDER")]
    llm_provider: Option<ProviderKind>,

    /// Run one tick of each loop and exit
    #[arg(long)]
    once: bool,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(url) = self.database_url {
            config.database.postgres_url = url;
        }
        if self.memory {
            config.database.backend = LedgerBackend::Memory;
        }
        if let Some(provider) = self.llm_provider {
            config.llm.provider = provider;
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let once = args.once;

    let mut server_config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut server_config);

    init_logging(&server_config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Taskmart Server"
    );

    let ledger = init_ledger(&server_config.database).await?;
    let orchestrator = build_orchestrator(&server_config, ledger)?;

    if once {
        let (requests, payments) = orchestrator.run_once().await;
        report_once("requests", &requests);
        report_once("payments", &payments);
        return Ok(());
    }

    orchestrator.start().await?;
    shutdown_signal().await;
    orchestrator.stop().await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize tracing/logging
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .try_init()?;
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true))
                .try_init()?;
        }
    }

    Ok(())
}

/// Connect the ledger and fail fast if it is unreachable
async fn init_ledger(config: &DatabaseSettings) -> anyhow::Result<Arc<dyn Ledger>> {
    let ledger: Arc<dyn Ledger> = match config.backend {
        LedgerBackend::Memory => {
            tracing::warn!("Using in-memory ledger; state is lost on exit");
            Arc::new(MemoryLedger::new())
        }
        LedgerBackend::Postgres => {
            let db = Database::connect(&config.pool_config()).await?;
            if config.run_migrations {
                db.migrate().await?;
            }
            let health = db.health_check().await;
            tracing::info!(postgres = health.postgres, "Database health check");
            Arc::new(db)
        }
    };

    ledger.ping().await?;
    tracing::info!(backend = ?config.backend, "Ledger ready");
    Ok(ledger)
}

/// Wire the external collaborators into the orchestrator
fn build_orchestrator(
    config: &ServerConfig,
    ledger: Arc<dyn Ledger>,
) -> anyhow::Result<Orchestrator> {
    let classifier = classifier_from_config(
        &config.llm,
        ClassifierDefaults {
            min_budget: config.orchestrator.min_budget,
            default_skill: SKILL_GENERAL.to_string(),
        },
    )?;
    tracing::info!(provider = %config.llm.provider, "Intent classifier ready");

    let chain = Arc::new(HttpChainClient::new(config.chain.clone())?);
    let escrow = Arc::new(EscrowOrchestrator::new(
        chain,
        ledger.clone(),
        config.chain.timeout(),
    ));

    let collaborators = Collaborators {
        ledger,
        classifier,
        payments: Arc::new(HttpPaymentProvider::new(config.payment.clone())?),
        escrow,
        agent: Arc::new(HttpAgentExecutor::new(config.agent.clone())?),
        escalation: None,
    };

    Ok(Orchestrator::new(config.orchestrator.clone(), collaborators)?)
}

fn report_once(name: &str, outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Completed(report) => tracing::info!(
            poller = name,
            examined = report.examined,
            progressed = report.progressed,
            unchanged = report.unchanged,
            failed = report.failed,
            escalated = report.escalated,
            "Single tick finished"
        ),
        TickOutcome::Skipped => tracing::info!(poller = name, "Single tick skipped"),
        TickOutcome::Failed(error) => tracing::error!(poller = name, %error, "Single tick failed"),
    }
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping loops...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, stopping loops...");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
