//! Job records and the job status state machine
//!
//! The transition table is closed: any `(from, to)` pair not listed in
//! [`JobStatus::can_transition_to`] is rejected.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{new_reference_key, JobId, MarketError, RequestId, UserId, WorkerId};

/// Status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, waiting for the buyer's payment
    Unpaid,
    /// Payment confirmed, funds locked on-chain
    Escrowed,
    /// Dispatched to the assigned worker
    Working,
    /// Worker produced a delivery, awaiting buyer approval
    Delivered,
    /// Buyer approved the delivery
    Completed,
    /// Escrow released to the worker
    PaidOut,
    /// Cancelled before work started
    Cancelled,
    /// Buyer disputed the work
    Disputed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        Self::Unpaid,
        Self::Escrowed,
        Self::Working,
        Self::Delivered,
        Self::Completed,
        Self::PaidOut,
        Self::Cancelled,
        Self::Disputed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Escrowed => "escrowed",
            Self::Working => "working",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::PaidOut => "paid_out",
            Self::Cancelled => "cancelled",
            Self::Disputed => "disputed",
        }
    }

    /// Terminal states have no outgoing transitions and end the escrow's life
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PaidOut | Self::Cancelled)
    }

    /// Check the transition table
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Unpaid, Escrowed)
                | (Escrowed, Working)
                | (Working, Delivered)
                | (Delivered, Completed)
                | (Completed, PaidOut)
                | (Unpaid, Cancelled)
                | (Escrowed, Cancelled)
                | (Working, Disputed)
                | (Delivered, Disputed)
        )
    }

    /// Whether funds were locked at some point on the way to this status
    ///
    /// `Cancelled` is ambiguous (it is reachable from `unpaid` and from
    /// `escrowed`) and returns `false`; check the job's escrow fields instead.
    pub fn has_reached_escrow(&self) -> bool {
        matches!(
            self,
            Self::Escrowed
                | Self::Working
                | Self::Delivered
                | Self::Completed
                | Self::PaidOut
                | Self::Disputed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| MarketError::Validation {
                reason: format!("unknown job status '{}'", s),
            })
    }
}

/// A single state machine step together with the data it records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobTransition {
    /// `unpaid → escrowed`, recording the on-chain escrow references
    Escrow {
        escrow_object_id: String,
        create_tx: String,
    },
    /// `escrowed → working`
    StartWork,
    /// `working → delivered`
    Deliver,
    /// `delivered → completed`
    Complete,
    /// `completed → paid_out`, recording the release transaction
    PayOut { release_tx: String },
    /// `unpaid | escrowed → cancelled`
    Cancel,
    /// `working | delivered → disputed`
    Dispute,
}

impl JobTransition {
    /// Status the job holds after this transition
    pub fn target(&self) -> JobStatus {
        match self {
            Self::Escrow { .. } => JobStatus::Escrowed,
            Self::StartWork => JobStatus::Working,
            Self::Deliver => JobStatus::Delivered,
            Self::Complete => JobStatus::Completed,
            Self::PayOut { .. } => JobStatus::PaidOut,
            Self::Cancel => JobStatus::Cancelled,
            Self::Dispute => JobStatus::Disputed,
        }
    }

    /// Validate this transition against the table, starting from `from`
    pub fn check(&self, from: JobStatus) -> crate::Result<JobStatus> {
        let to = self.target();
        if from.can_transition_to(to) {
            Ok(to)
        } else {
            Err(MarketError::InvalidTransition { from, to })
        }
    }
}

/// Flagged for manual review after repeated reconciliation failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub job_id: JobId,
    pub attempts: u32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A job in the marketplace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub requirements: String,
    pub buyer_id: UserId,
    /// Assigned worker; `None` until matched
    pub worker_id: Option<WorkerId>,
    pub amount: Decimal,
    /// Primary skill the work was classified under
    pub task_type: String,
    pub status: JobStatus,
    /// Payment-provider invoice reference
    pub invoice_id: Option<String>,
    /// Globally unique idempotency token for payment and escrow matching
    pub reference_key: String,
    /// Request this job was derived from, if any
    pub request_id: Option<RequestId>,
    pub escrow_object_id: Option<String>,
    pub escrow_create_tx: Option<String>,
    pub escrow_release_tx: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paid_out_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new `unpaid` job with a fresh reference key
    pub fn new(
        title: impl Into<String>,
        requirements: impl Into<String>,
        buyer_id: UserId,
        amount: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            title: title.into(),
            requirements: requirements.into(),
            buyer_id,
            worker_id: None,
            amount,
            task_type: crate::SKILL_GENERAL.to_string(),
            status: JobStatus::Unpaid,
            invoice_id: None,
            reference_key: new_reference_key(),
            request_id: None,
            escrow_object_id: None,
            escrow_create_tx: None,
            escrow_release_tx: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            started_at: None,
            delivered_at: None,
            completed_at: None,
            paid_out_at: None,
        }
    }

    pub fn with_worker(mut self, worker_id: Option<WorkerId>) -> Self {
        self.worker_id = worker_id;
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    pub fn with_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Apply a transition to this in-memory record.
    ///
    /// `expected` is the status the caller based its decision on. The write
    /// is refused with `StateConflict` when the record has moved on, and with
    /// `InvalidTransition` when the table does not allow the step.
    pub fn apply(
        &mut self,
        expected: JobStatus,
        transition: &JobTransition,
        at: DateTime<Utc>,
    ) -> crate::Result<()> {
        let to = transition.check(expected)?;
        if self.status != expected {
            return Err(MarketError::StateConflict {
                job_id: self.id,
                expected,
                actual: self.status,
            });
        }

        match transition {
            JobTransition::Escrow {
                escrow_object_id,
                create_tx,
            } => {
                self.escrow_object_id = Some(escrow_object_id.clone());
                self.escrow_create_tx = Some(create_tx.clone());
                self.paid_at = Some(at);
            }
            JobTransition::StartWork => self.started_at = Some(at),
            JobTransition::Deliver => self.delivered_at = Some(at),
            JobTransition::Complete => self.completed_at = Some(at),
            JobTransition::PayOut { release_tx } => {
                self.escrow_release_tx = Some(release_tx.clone());
                self.paid_out_at = Some(at);
            }
            JobTransition::Cancel | JobTransition::Dispute => {}
        }

        self.status = to;
        self.updated_at = at;
        Ok(())
    }

    /// Escrow references are present iff the job went through `escrowed`,
    /// and the release reference iff it reached `paid_out`.
    pub fn escrow_refs_consistent(&self) -> bool {
        let has_escrow = self.escrow_object_id.is_some() && self.escrow_create_tx.is_some();
        let escrow_ok = match self.status {
            JobStatus::Unpaid => self.escrow_object_id.is_none() && self.escrow_create_tx.is_none(),
            // Both branches into `cancelled` are legal
            JobStatus::Cancelled => has_escrow || self.escrow_object_id.is_none(),
            status => status.has_reached_escrow() == has_escrow,
        };
        let release_ok = (self.status == JobStatus::PaidOut) == self.escrow_release_tx.is_some();
        escrow_ok && release_ok
    }
}
