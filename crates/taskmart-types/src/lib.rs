//! Taskmart Types - Canonical domain types for the task marketplace
//!
//! This crate contains the foundational types shared by every Taskmart crate
//! and has zero dependencies on other taskmart crates. It defines:
//!
//! - Identity types (JobId, RequestId, WorkerId, UserId, ...)
//! - The `Job` record and its status state machine
//! - Raw user requests, workers, deliveries and escrow records
//! - Intent classification results
//!
//! # Job lifecycle
//!
//! ```text
//! unpaid → escrowed → working → delivered → completed → paid_out
//!   │         │          │          │
//!   └─────────┴→ cancelled          └──────┴→ disputed
//! ```
//!
//! A job's `status` only changes through [`Job::apply`] (in memory) or the
//! ledger's compare-and-set equivalent. Both consult the same transition
//! table in [`job`].

pub mod identity;
pub mod job;
pub mod request;
pub mod worker;
pub mod delivery;
pub mod escrow;
pub mod classification;
pub mod error;

pub use identity::*;
pub use job::*;
pub use request::*;
pub use worker::*;
pub use delivery::*;
pub use escrow::*;
pub use classification::*;
pub use error::*;

/// Version of the Taskmart types schema
pub const TYPES_VERSION: &str = "0.1.0";
