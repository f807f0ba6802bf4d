//! External collaborators the loops call out to

mod agent;
mod payment;

pub use agent::{AgentConfig, AgentError, AgentExecutor, AgentTask, ExecutionOutcome, HttpAgentExecutor};
pub use payment::{HttpPaymentProvider, Invoice, InvoiceStatus, PaymentConfig, PaymentError, PaymentProvider};
