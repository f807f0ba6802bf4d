//! Taskmart Escrow - funds locked on-chain per job
//!
//! Buyer funds never move straight to the worker. On payment they are locked
//! in an escrow object keyed by the job's reference key; approval releases
//! them to the worker and cancellation refunds the buyer.
//!
//! Create, release and refund are idempotent per reference key: repeating
//! any of them returns the first result instead of submitting again.

pub mod chain;
pub mod error;
pub mod orchestrator;

pub use chain::{is_valid_address, ChainClient, ChainConfig, ChainError, EscrowCreate, EscrowLock, HttpChainClient};
pub use error::{EscrowError, EscrowResult};
pub use orchestrator::{EscrowCreated, EscrowOrchestrator, EscrowSettled};
