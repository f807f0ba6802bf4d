//! Escrow error types

use rust_decimal::Decimal;
use taskmart_db::DbError;
use thiserror::Error;

use crate::chain::ChainError;

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("Insufficient funds: {message}")]
    InsufficientFunds { message: String },

    #[error("Invalid address: {address}")]
    InvalidAddress { address: String },

    #[error("Invalid escrow amount: {amount}")]
    InvalidAmount { amount: Decimal },

    #[error("Chain client timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("No escrow for reference {reference_key}")]
    NotFound { reference_key: String },

    #[error("Escrow for reference {reference_key} already {outcome}")]
    AlreadySettled {
        reference_key: String,
        outcome: &'static str,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] DbError),
}

impl EscrowError {
    /// Worth retrying on a later tick
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Chain(_) => true,
            Self::Ledger(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<ChainError> for EscrowError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::InsufficientFunds(message) => Self::InsufficientFunds { message },
            ChainError::InvalidAddress(address) => Self::InvalidAddress { address },
            ChainError::Rejected(msg) | ChainError::Transport(msg) | ChainError::InvalidConfig(msg) => {
                Self::Chain(msg)
            }
        }
    }
}

pub type EscrowResult<T> = Result<T, EscrowError>;
