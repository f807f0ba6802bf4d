//! Taskmart Orchestrator - the background loops that move jobs along
//!
//! Two pollers run side by side with no coordination between them:
//!
//! - **requests**: pending user requests are classified, matched to a worker
//!   and turned into `unpaid` jobs
//! - **payments**: invoiced `unpaid` jobs are checked against the payment
//!   provider; paid ones get an on-chain escrow and, with auto-dispatch, go
//!   straight to the agent executor
//!
//! Each poller runs at most one tick at a time. Correctness across pollers,
//! buyer actions and outside writers rests on the ledger's compare-and-set
//! status writes; a loser sees a conflict and leaves the record alone.
//!
//! ```text
//! UserRequest ──requests──▶ Job(unpaid) ──hire──▶ invoice
//!                                │
//!                     payments   ▼
//!            escrowed ──▶ working ──▶ delivered ──approve──▶ completed ──▶ paid_out
//! ```

pub mod actions;
pub mod clients;
pub mod config;
pub mod error;
pub mod escalation;
pub mod guard;
pub mod matching;
pub mod poller;
pub mod reconcile;
pub mod state_machine;

pub use actions::BuyerActions;
pub use clients::*;
pub use config::{OrchestratorConfig, MAX_BATCH_SIZE};
pub use error::{OrchestratorError, Result};
pub use escalation::{EscalationPolicy, LedgerEscalation, RetryTracker};
pub use guard::{FlightGuard, SingleFlight};
pub use matching::select_worker;
pub use poller::{Poller, Reconciler, TickOutcome, TickReport};
pub use reconcile::{PaymentReconciler, RequestReconciler};
pub use state_machine::JobStateMachine;

use std::sync::Arc;

use tracing::info;

use taskmart_db::Ledger;
use taskmart_escrow::EscrowOrchestrator;
use taskmart_llm::IntentClassifier;

/// External collaborators the orchestrator is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn Ledger>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub payments: Arc<dyn PaymentProvider>,
    pub escrow: Arc<EscrowOrchestrator>,
    pub agent: Arc<dyn AgentExecutor>,
    /// Defaults to [`LedgerEscalation`]
    pub escalation: Option<Arc<dyn EscalationPolicy>>,
}

/// Both pollers plus the buyer-facing actions, built from one config
pub struct Orchestrator {
    config: OrchestratorConfig,
    requests: Poller,
    payments: Poller,
    actions: BuyerActions,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let Collaborators {
            ledger,
            classifier,
            payments,
            escrow,
            agent,
            escalation,
        } = collaborators;
        let escalation: Arc<dyn EscalationPolicy> = match escalation {
            Some(policy) => policy,
            None => Arc::new(LedgerEscalation::new(ledger.clone())),
        };

        let request_loop = RequestReconciler::new(ledger.clone(), classifier, &config);
        let payment_loop = PaymentReconciler::new(
            ledger.clone(),
            payments.clone(),
            escrow.clone(),
            agent,
            escalation,
            &config,
        );

        Ok(Self {
            requests: Poller::new(Arc::new(request_loop), config.request_poll_interval()),
            payments: Poller::new(Arc::new(payment_loop), config.payment_poll_interval()),
            actions: BuyerActions::new(ledger, payments, escrow),
            config,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn request_poller(&self) -> &Poller {
        &self.requests
    }

    pub fn payment_poller(&self) -> &Poller {
        &self.payments
    }

    pub fn actions(&self) -> &BuyerActions {
        &self.actions
    }

    pub async fn start(&self) -> Result<()> {
        info!(
            batch_size = self.config.effective_batch_size(),
            auto_trigger_agent = self.config.auto_trigger_agent,
            max_retries = self.config.max_retries,
            escrow_timeout_hours = self.config.escrow_timeout_hours,
            "Starting orchestrator"
        );
        self.requests.start().await?;
        if let Err(e) = self.payments.start().await {
            let _ = self.requests.stop().await;
            return Err(e);
        }
        Ok(())
    }

    /// Stop both pollers, letting in-flight ticks finish
    pub async fn stop(&self) -> Result<()> {
        let requests = self.requests.stop().await;
        let payments = self.payments.stop().await;
        info!("Orchestrator stopped");
        requests.and(payments)
    }

    /// One tick of each loop, requests first
    pub async fn run_once(&self) -> (TickOutcome, TickOutcome) {
        let requests = self.requests.run_once().await;
        let payments = self.payments.run_once().await;
        (requests, payments)
    }
}
