//! Backend process management.
//!
//! - [`process`] - Launching and killing the backend executable
//! - [`supervisor`] - Probing, starting and stopping the backend for a session

pub mod process;
pub mod supervisor;

pub use process::{BackendLauncher, BackendProcess, CommandLauncher, OutputPolicy};
pub use supervisor::{ChannelProbe, ServerSupervisor, StatusProbe, SupervisorState};
