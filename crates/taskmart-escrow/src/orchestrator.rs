//! Escrow orchestration with per-reference-key idempotency
//!
//! Two layers keep a job to one escrow. In-process, calls for the same
//! reference key are serialised through a per-key lock. Across processes and
//! crashes, the ledger's escrow record and the chain's own by-reference
//! lookup are consulted before anything is submitted.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use taskmart_db::{DbError, Ledger};
use taskmart_types::{EscrowRecord, JobId};

use crate::chain::{is_valid_address, ChainClient, ChainError, EscrowCreate};
use crate::error::{EscrowError, EscrowResult};

/// Result of [`EscrowOrchestrator::create_escrow`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowCreated {
    pub escrow_object_id: String,
    pub create_tx: String,
    /// The escrow already existed; nothing was submitted
    pub reused: bool,
}

/// Result of a release or refund
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowSettled {
    pub tx_digest: String,
    pub reused: bool,
}

pub struct EscrowOrchestrator {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<dyn Ledger>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl EscrowOrchestrator {
    pub fn new(chain: Arc<dyn ChainClient>, ledger: Arc<dyn Ledger>, timeout: Duration) -> Self {
        Self {
            chain,
            ledger,
            inflight: DashMap::new(),
            timeout,
        }
    }

    /// Lock the job's funds, or return the escrow already locked for its
    /// reference key.
    pub async fn create_escrow(
        &self,
        job_id: JobId,
        request: &EscrowCreate,
    ) -> EscrowResult<EscrowCreated> {
        let key = request.reference_key.as_str();
        let lock = self.key_lock(key);
        let guard = lock.lock().await;
        let result = self.create_locked(job_id, request).await;
        drop(guard);
        self.release_key_lock(key);
        result
    }

    async fn create_locked(
        &self,
        job_id: JobId,
        request: &EscrowCreate,
    ) -> EscrowResult<EscrowCreated> {
        let key = &request.reference_key;

        if let Some(record) = self.ledger.find_escrow(key).await? {
            info!(reference_key = %key, escrow = %record.escrow_object_id, "Escrow already recorded");
            return Ok(EscrowCreated {
                escrow_object_id: record.escrow_object_id,
                create_tx: record.create_tx,
                reused: true,
            });
        }

        // Submitted before but never recorded (crash or timeout after submit)
        if let Some(lock) = self.with_timeout(self.chain.find_escrow_by_reference(key)).await? {
            warn!(reference_key = %key, escrow = %lock.object_id, "Recovering unrecorded on-chain escrow");
            self.record(job_id, request, &lock.object_id, &lock.tx_digest).await?;
            return Ok(EscrowCreated {
                escrow_object_id: lock.object_id,
                create_tx: lock.tx_digest,
                reused: true,
            });
        }

        for address in [&request.buyer_address, &request.worker_address] {
            if !is_valid_address(address) {
                return Err(EscrowError::InvalidAddress {
                    address: address.clone(),
                });
            }
        }
        if request.amount <= Decimal::ZERO {
            return Err(EscrowError::InvalidAmount {
                amount: request.amount,
            });
        }

        let lock = self.with_timeout(self.chain.submit_escrow_create(request)).await?;
        info!(
            reference_key = %key,
            escrow = %lock.object_id,
            tx = %lock.tx_digest,
            amount = %request.amount,
            "Escrow created"
        );

        self.record(job_id, request, &lock.object_id, &lock.tx_digest).await?;
        Ok(EscrowCreated {
            escrow_object_id: lock.object_id,
            create_tx: lock.tx_digest,
            reused: false,
        })
    }

    async fn record(
        &self,
        job_id: JobId,
        request: &EscrowCreate,
        object_id: &str,
        tx: &str,
    ) -> EscrowResult<()> {
        let record = EscrowRecord::new(&request.reference_key, job_id, object_id, tx, request.amount);
        match self.ledger.insert_escrow(&record).await {
            Ok(()) | Err(DbError::Duplicate(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Pay the escrow for `reference_key` out to the worker
    pub async fn release_escrow(&self, reference_key: &str) -> EscrowResult<EscrowSettled> {
        let lock = self.key_lock(reference_key);
        let guard = lock.lock().await;
        let result = self.settle_locked(reference_key, Settlement::Release).await;
        drop(guard);
        self.release_key_lock(reference_key);
        result
    }

    /// Return the escrow for `reference_key` to the buyer
    pub async fn refund_escrow(&self, reference_key: &str) -> EscrowResult<EscrowSettled> {
        let lock = self.key_lock(reference_key);
        let guard = lock.lock().await;
        let result = self.settle_locked(reference_key, Settlement::Refund).await;
        drop(guard);
        self.release_key_lock(reference_key);
        result
    }

    async fn settle_locked(
        &self,
        reference_key: &str,
        settlement: Settlement,
    ) -> EscrowResult<EscrowSettled> {
        let record = self
            .ledger
            .find_escrow(reference_key)
            .await?
            .ok_or_else(|| EscrowError::NotFound {
                reference_key: reference_key.to_string(),
            })?;

        let (same, other) = match settlement {
            Settlement::Release => (&record.release_tx, &record.refund_tx),
            Settlement::Refund => (&record.refund_tx, &record.release_tx),
        };
        if let Some(tx) = same {
            return Ok(EscrowSettled {
                tx_digest: tx.clone(),
                reused: true,
            });
        }
        if other.is_some() {
            return Err(EscrowError::AlreadySettled {
                reference_key: reference_key.to_string(),
                outcome: settlement.other_outcome(),
            });
        }

        let object_id = record.escrow_object_id.as_str();
        let tx = match settlement {
            Settlement::Release => self.with_timeout(self.chain.submit_escrow_release(object_id)).await?,
            Settlement::Refund => self.with_timeout(self.chain.submit_escrow_refund(object_id)).await?,
        };
        info!(reference_key, escrow = object_id, tx = %tx, "Escrow {}", settlement.outcome());

        match settlement {
            Settlement::Release => self.ledger.record_escrow_release(reference_key, &tx).await?,
            Settlement::Refund => self.ledger.record_escrow_refund(reference_key, &tx).await?,
        }
        Ok(EscrowSettled {
            tx_digest: tx,
            reused: false,
        })
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ChainError>>,
    ) -> EscrowResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(EscrowError::from),
            Err(_) => Err(EscrowError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the key's lock once no other caller holds or waits on it
    fn release_key_lock(&self, key: &str) {
        self.inflight
            .remove_if(key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Release,
    Refund,
}

impl Settlement {
    fn outcome(self) -> &'static str {
        match self {
            Self::Release => "released",
            Self::Refund => "refunded",
        }
    }

    fn other_outcome(self) -> &'static str {
        match self {
            Self::Release => "refunded",
            Self::Refund => "released",
        }
    }
}
