//! Escrow bookkeeping mirrored from the chain
//!
//! One record per job reference key. The record is what makes escrow
//! creation idempotent: a second create for the same key returns it instead
//! of locking funds again.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::JobId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub reference_key: String,
    pub job_id: JobId,
    /// On-chain escrow object reference
    pub escrow_object_id: String,
    pub create_tx: String,
    pub release_tx: Option<String>,
    pub refund_tx: Option<String>,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl EscrowRecord {
    pub fn new(
        reference_key: impl Into<String>,
        job_id: JobId,
        escrow_object_id: impl Into<String>,
        create_tx: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            reference_key: reference_key.into(),
            job_id,
            escrow_object_id: escrow_object_id.into(),
            create_tx: create_tx.into(),
            release_tx: None,
            refund_tx: None,
            amount,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    /// Funds left the escrow, either to the worker or back to the buyer
    pub fn is_settled(&self) -> bool {
        self.release_tx.is_some() || self.refund_tx.is_some()
    }
}
