//! Async Rust client for an AutoMan crowdsourcing backend.
//!
//! AutoMan posts questions to human workers on a crowdsourcing platform and
//! keeps spending budget until the answers reach a requested statistical
//! confidence. This crate talks to a locally hosted AutoMan backend: it
//! starts the backend process if needed, registers adapter credentials,
//! submits estimate and radio tasks, and resolves their outcomes.
//!
//! # Overview
//!
//! ```text
//! EstimateBuilder / RadioBuilder ──build()──> TaskDescriptor
//!                                                  │ Client::submit
//!                                                  v
//!                         Channel (JSON-RPC) ──> OutcomeHandle ──resolve()──> Outcome
//!                                                  │
//!                                                  └── Batch (as_completed, wait_all_done)
//! ```
//!
//! Submissions never block; waiting happens only when a handle is
//! resolved. A resolved handle caches its result, so asking again never
//! contacts the backend.
//!
//! # Module Organization
//!
//! - [`client`] - Session, submission, handles, batches
//! - [`task`] - Task builders and descriptors
//! - [`types`] - Outcomes, credentials, confidence intervals, wire payloads
//! - [`server`] - Backend process supervision
//! - [`shared`] - JSON-RPC channel
//! - [`config`] - Session configuration
//! - `testing` - In-process mock backend and launcher (feature `testing`)
//! - [`error`] - Error type

pub mod client;
pub mod config;
pub mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod server;
pub mod shared;
pub mod task;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use client::{Batch, Client, OutcomeHandle};
pub use config::ClientConfig;
pub use error::{BackendErrorCode, Error, Result};
pub use server::{OutputPolicy, ServerSupervisor, SupervisorState};
pub use shared::{Channel, Endpoint};
pub use task::{EstimateBuilder, RadioBuilder, RadioOption, TaskDescriptor, TaskKind};
pub use types::{
    AdapterCredentials, Answer, ConfidenceInterval, EstimateAnswer, Outcome, OutcomeType,
    RadioAnswer, WorkerLogLevel, WorkerLogging,
};
