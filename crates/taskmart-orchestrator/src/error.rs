//! Orchestrator errors and their retry classification

use taskmart_db::DbError;
use taskmart_escrow::EscrowError;
use taskmart_llm::ClassifyError;
use taskmart_types::MarketError;
use thiserror::Error;

use crate::clients::{AgentError, PaymentError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// State conflicts, invalid transitions, authorization
    #[error(transparent)]
    Market(#[from] MarketError),

    #[error("Ledger error: {0}")]
    Ledger(DbError),

    #[error("Classification failed: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Escrow error: {0}")]
    Escrow(#[from] EscrowError),

    #[error("Payment provider error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Agent executor error: {0}")]
    Agent(#[from] AgentError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0} poller is already running")]
    AlreadyRunning(&'static str),

    #[error("{0} poller is not running")]
    NotRunning(&'static str),
}

impl From<DbError> for OrchestratorError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Market(m) => Self::Market(m),
            other => Self::Ledger(other),
        }
    }
}

impl OrchestratorError {
    /// Precondition mismatch: someone else moved the record. Never retried.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Market(e) => e.is_conflict(),
            Self::Escrow(EscrowError::Ledger(e)) => e.is_conflict(),
            _ => false,
        }
    }

    /// External system hiccup; the record is left alone for the next tick
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_transient(),
            Self::Escrow(e) => e.is_transient(),
            Self::Payment(e) => e.is_transient(),
            Self::Agent(_) => true,
            Self::Classify(ClassifyError::Timeout { .. } | ClassifyError::Provider(_)) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
