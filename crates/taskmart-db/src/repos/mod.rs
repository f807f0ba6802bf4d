//! Repository implementations

mod job;
mod request;
mod worker;
mod wallet;
mod escrow;
mod delivery;
mod escalation;

pub use job::JobRepo;
pub use request::RequestRepo;
pub use worker::WorkerRepo;
pub use wallet::WalletRepo;
pub use escrow::EscrowRepo;
pub use delivery::DeliveryRepo;
pub use escalation::EscalationRepo;
