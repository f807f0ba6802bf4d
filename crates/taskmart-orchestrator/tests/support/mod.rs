//! Shared fakes for the orchestrator integration tests
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use taskmart_db::{Ledger, MemoryLedger};
use taskmart_escrow::{ChainClient, ChainError, EscrowCreate, EscrowLock, EscrowOrchestrator};
use taskmart_llm::{ClassifierDefaults, ClassifyError, IntentClassifier, KeywordClassifier};
use taskmart_orchestrator::{
    AgentError, AgentExecutor, AgentTask, Collaborators, ExecutionOutcome, Invoice, InvoiceStatus,
    OrchestratorConfig, PaymentError, PaymentProvider,
};
use taskmart_types::{Classification, Job, JobId, JobStatus, JobTransition, UserId, Worker};

// ============================================================================
// Payment provider
// ============================================================================

#[derive(Default)]
pub struct FakePayments {
    statuses: Mutex<HashMap<String, InvoiceStatus>>,
    failing: Mutex<HashSet<String>>,
    pub invoices_created: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl FakePayments {
    pub fn set_status(&self, invoice_id: &str, status: InvoiceStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(invoice_id.to_string(), status);
    }

    /// Make status lookups for `invoice_id` fail until cleared
    pub fn set_failing(&self, invoice_id: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(invoice_id.to_string());
        } else {
            set.remove(invoice_id);
        }
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for FakePayments {
    async fn create_invoice(
        &self,
        reference_key: &str,
        _amount: Decimal,
        _memo: &str,
    ) -> Result<Invoice, PaymentError> {
        self.invoices_created.fetch_add(1, Ordering::SeqCst);
        let invoice_id = format!("inv_{}", reference_key);
        self.set_status(&invoice_id, InvoiceStatus::Pending);
        Ok(Invoice {
            invoice_id,
            payment_request: None,
        })
    }

    async fn invoice_status(&self, invoice_id: &str) -> Result<InvoiceStatus, PaymentError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(invoice_id) {
            return Err(PaymentError::Transport("connection reset".to_string()));
        }
        self.statuses
            .lock()
            .unwrap()
            .get(invoice_id)
            .copied()
            .ok_or_else(|| PaymentError::NotFound(invoice_id.to_string()))
    }
}

// ============================================================================
// Chain
// ============================================================================

/// A competing ledger write the fake chain makes while a submit is in
/// flight, the way a buyer action or the other loop would
#[derive(Debug, Clone, Copy)]
pub enum Interleave {
    Cancel { job_id: JobId, from: JobStatus },
    StartWork { job_id: JobId },
}

pub struct FakeChain {
    ledger: Arc<MemoryLedger>,
    pub creates: AtomicUsize,
    pub releases: AtomicUsize,
    pub refunds: AtomicUsize,
    pub fail_release: AtomicBool,
    pub fail_refund: AtomicBool,
    on_create: Mutex<Option<Interleave>>,
    on_refund: Mutex<Option<Interleave>>,
    /// Whether each interleaved write won its compare-and-set
    interleaved: Mutex<Vec<bool>>,
}

impl FakeChain {
    pub fn new(ledger: Arc<MemoryLedger>) -> Self {
        Self {
            ledger,
            creates: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            refunds: AtomicUsize::new(0),
            fail_release: AtomicBool::new(false),
            fail_refund: AtomicBool::new(false),
            on_create: Mutex::new(None),
            on_refund: Mutex::new(None),
            interleaved: Mutex::new(Vec::new()),
        }
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn refunds(&self) -> usize {
        self.refunds.load(Ordering::SeqCst)
    }

    /// Run `step` during the next escrow create submit
    pub fn interleave_create(&self, step: Interleave) {
        *self.on_create.lock().unwrap() = Some(step);
    }

    /// Run `step` during the next escrow refund submit
    pub fn interleave_refund(&self, step: Interleave) {
        *self.on_refund.lock().unwrap() = Some(step);
    }

    pub fn interleaved(&self) -> Vec<bool> {
        self.interleaved.lock().unwrap().clone()
    }

    async fn run(&self, slot: &Mutex<Option<Interleave>>) {
        let step = slot.lock().unwrap().take();
        let Some(step) = step else {
            return;
        };
        let (job_id, from, transition) = match step {
            Interleave::Cancel { job_id, from } => (job_id, from, JobTransition::Cancel),
            Interleave::StartWork { job_id } => {
                (job_id, JobStatus::Escrowed, JobTransition::StartWork)
            }
        };
        let won = self
            .ledger
            .transition_job(&job_id, from, &transition)
            .await
            .is_ok();
        self.interleaved.lock().unwrap().push(won);
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn submit_escrow_create(&self, request: &EscrowCreate) -> Result<EscrowLock, ChainError> {
        self.run(&self.on_create).await;
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(EscrowLock {
            object_id: format!("0xescrow_{}", request.reference_key),
            tx_digest: format!("0xcreate_{}", n),
        })
    }

    async fn submit_escrow_release(&self, object_id: &str) -> Result<String, ChainError> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("gateway unavailable".to_string()));
        }
        let n = self.releases.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("0xrelease_{}_{}", object_id, n))
    }

    async fn submit_escrow_refund(&self, object_id: &str) -> Result<String, ChainError> {
        self.run(&self.on_refund).await;
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("gateway unavailable".to_string()));
        }
        let n = self.refunds.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("0xrefund_{}_{}", object_id, n))
    }

    async fn find_escrow_by_reference(
        &self,
        _reference_key: &str,
    ) -> Result<Option<EscrowLock>, ChainError> {
        Ok(None)
    }
}

// ============================================================================
// Agent executor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Deliver,
    Fail,
    Hang,
}

pub struct FakeAgent {
    mode: Mutex<AgentMode>,
    tasks: Mutex<Vec<AgentTask>>,
}

impl FakeAgent {
    pub fn new(mode: AgentMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: AgentMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn tasks(&self) -> Vec<AgentTask> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentExecutor for FakeAgent {
    async fn execute(&self, task: &AgentTask) -> Result<ExecutionOutcome, AgentError> {
        self.tasks.lock().unwrap().push(task.clone());
        let mode = *self.mode.lock().unwrap();
        match mode {
            AgentMode::Deliver => Ok(ExecutionOutcome::Delivered {
                content: format!("done: {}", task.title),
            }),
            AgentMode::Fail => Ok(ExecutionOutcome::Failed {
                reason: "model refused".to_string(),
            }),
            AgentMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(AgentError::Transport("never answered".to_string()))
            }
        }
    }
}

// ============================================================================
// Classifiers
// ============================================================================

pub fn keyword_classifier() -> Arc<dyn IntentClassifier> {
    Arc::new(KeywordClassifier::new(ClassifierDefaults::default()).unwrap())
}

/// Fails on any text containing "boom", otherwise defers to keywords
pub struct ExplodingClassifier {
    inner: Arc<dyn IntentClassifier>,
}

impl ExplodingClassifier {
    pub fn new() -> Self {
        Self {
            inner: keyword_classifier(),
        }
    }
}

#[async_trait]
impl IntentClassifier for ExplodingClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifyError> {
        if text.contains("boom") {
            return Err(ClassifyError::Malformed {
                reason: "no JSON object in output".to_string(),
            });
        }
        self.inner.classify(text).await
    }
}

/// Keyword classifier that takes `delay` per call and counts calls
pub struct SlowClassifier {
    inner: Arc<dyn IntentClassifier>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowClassifier {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: keyword_classifier(),
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IntentClassifier for SlowClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.classify(text).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub payments: Arc<FakePayments>,
    pub chain: Arc<FakeChain>,
    pub agent: Arc<FakeAgent>,
    pub escrow: Arc<EscrowOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_agent(AgentMode::Deliver)
    }

    pub fn with_agent(mode: AgentMode) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let chain = Arc::new(FakeChain::new(ledger.clone()));
        let escrow = Arc::new(EscrowOrchestrator::new(
            chain.clone(),
            ledger.clone(),
            Duration::from_secs(5),
        ));
        Self {
            ledger,
            payments: Arc::new(FakePayments::default()),
            chain,
            agent: Arc::new(FakeAgent::new(mode)),
            escrow,
        }
    }

    pub fn collaborators(&self, classifier: Arc<dyn IntentClassifier>) -> Collaborators {
        Collaborators {
            ledger: self.ledger.clone(),
            classifier,
            payments: self.payments.clone(),
            escrow: self.escrow.clone(),
            agent: self.agent.clone(),
            escalation: None,
        }
    }

    /// Available worker with a wallet
    pub async fn worker(&self, name: &str, skills: &[&str], rating: f64) -> Worker {
        let worker = Worker::new(name, skills.iter().map(|s| s.to_string()).collect())
            .with_rating(rating);
        self.ledger.upsert_worker(&worker).await.unwrap();
        self.ledger
            .set_wallet_address(&worker.id.0, "0xa11ce")
            .await
            .unwrap();
        worker
    }

    /// Buyer with a wallet
    pub async fn buyer(&self) -> UserId {
        let buyer = UserId::new();
        self.ledger
            .set_wallet_address(&buyer.0, "0xb0b")
            .await
            .unwrap();
        buyer
    }

    /// Unpaid job assigned to `worker` with an invoice attached; the
    /// invoice starts out `pending`.
    pub async fn invoiced_job(&self, worker: Option<&Worker>) -> Job {
        let buyer = self.buyer().await;
        let job = Job::new("Landing page", "Build a landing page", buyer, Decimal::from(200))
            .with_worker(worker.map(|w| w.id))
            .with_task_type("development");
        self.ledger.insert_job(&job).await.unwrap();

        let invoice_id = format!("inv_{}", job.reference_key);
        self.payments.set_status(&invoice_id, InvoiceStatus::Pending);
        self.ledger.attach_invoice(&job.id, &invoice_id).await.unwrap()
    }

    pub fn invoice_of(job: &Job) -> String {
        job.invoice_id.clone().unwrap()
    }

    pub async fn reload(&self, job: &Job) -> Job {
        self.ledger.get_job(&job.id).await.unwrap().unwrap()
    }
}

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        payment_poll_interval_ms: 100,
        request_poll_interval_ms: 100,
        ..OrchestratorConfig::default()
    }
}
