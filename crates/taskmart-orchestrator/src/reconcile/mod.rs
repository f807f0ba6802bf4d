//! The two reconciliation loops
//!
//! Both act on disjoint status subsets: the request loop on `pending`
//! requests, the payment loop on `unpaid` invoiced jobs (and, with
//! auto-dispatch, `escrowed` jobs). Neither holds state about a record
//! between ticks beyond retry counts.

mod payments;
mod requests;

pub use payments::PaymentReconciler;
pub use requests::RequestReconciler;
