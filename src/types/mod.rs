//! Core value types.
//!
//! - [`confidence`] - Confidence-interval strategies
//! - [`adapter`] - Crowdsourcing adapter credentials and worker log settings
//! - [`outcome`] - Classified task outcomes
//! - [`protocol`] - Backend wire payloads

pub mod adapter;
pub mod confidence;
pub mod outcome;
pub mod protocol;

pub use adapter::{AdapterCredentials, AdapterType, WorkerLogLevel, WorkerLogging};
pub use confidence::ConfidenceInterval;
pub use outcome::{Answer, EstimateAnswer, Outcome, OutcomeType, RadioAnswer};
pub use protocol::{AutomanTask, ReturnCode, ServerStatus, TaskResponse};
