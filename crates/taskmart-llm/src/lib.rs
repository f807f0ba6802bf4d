//! Taskmart LLM - provider abstraction and intent classification
//!
//! Turns a free-text request into a [`Classification`]: a summary, an
//! estimated budget and a ranked skill list.
//!
//! ## Providers
//! - Ollama (default): `http://localhost:11434`
//! - OpenAI-compatible: vLLM, llama.cpp, hosted gateways
//! - Deterministic: keyword rules, no network
//!
//! LLM output is never trusted as-is. Missing fields fall back to the
//! `general` skill and the platform minimum budget; output that is not JSON
//! at all is a classification failure.
//!
//! [`Classification`]: taskmart_types::Classification

pub mod classifier;
pub mod keywords;
pub mod providers;
pub mod router;
pub mod types;

pub use classifier::*;
pub use keywords::KeywordClassifier;
pub use providers::*;
pub use router::*;
pub use types::*;
