//! Taskmart Job Ledger
//!
//! Persistence for requests, jobs, workers, escrow records and deliveries.
//!
//! # Backends
//!
//! - **PostgreSQL** ([`Database`]): the production store, one repository per
//!   table behind the [`Ledger`] trait
//! - **Memory** ([`MemoryLedger`]): same semantics in-process, for local runs
//!   and tests
//!
//! Every status write is a compare-and-set: the caller states the status it
//! observed and the write only lands if the row still has it.

pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod repos;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use ledger::{Ledger, MemoryLedger};
pub use models::*;
pub use repos::*;

/// PostgreSQL connection pool
#[derive(Clone)]
pub struct Database {
    pub pg: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.postgres_url_masked());

        let pg = PgPoolOptions::new()
            .max_connections(config.pg_max_connections)
            .min_connections(config.pg_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.pg_acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");
        Ok(Self { pg })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DbResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pg)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    pub async fn health_check(&self) -> HealthStatus {
        let postgres = sqlx::query("SELECT 1").fetch_one(&self.pg).await.is_ok();
        HealthStatus { postgres }
    }

    pub fn job_repo(&self) -> JobRepo {
        JobRepo::new(self.pg.clone())
    }

    pub fn request_repo(&self) -> RequestRepo {
        RequestRepo::new(self.pg.clone())
    }

    pub fn worker_repo(&self) -> WorkerRepo {
        WorkerRepo::new(self.pg.clone())
    }

    pub fn wallet_repo(&self) -> WalletRepo {
        WalletRepo::new(self.pg.clone())
    }

    pub fn escrow_repo(&self) -> EscrowRepo {
        EscrowRepo::new(self.pg.clone())
    }

    pub fn delivery_repo(&self) -> DeliveryRepo {
        DeliveryRepo::new(self.pg.clone())
    }

    pub fn escalation_repo(&self) -> EscalationRepo {
        EscalationRepo::new(self.pg.clone())
    }
}

/// Health status of the database connection
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub postgres: bool,
}
