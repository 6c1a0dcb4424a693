//! Sortwatch - edge agents for a waste-sorting deployment
//!
//! This crate implements a resilient, dual-cadence acquisition-and-dispatch
//! agent: local readings (and optionally camera capture + inference) are
//! produced on a short cadence, and the latest results are forwarded to a
//! remote collector on an independent, typically much longer, cadence.
//! Hardware, model, peripheral, and network failures are isolated from each
//! other and never terminate the loop.
//!
//! # Architecture
//!
//! - **Acquirer** ([`source`]): pluggable sensor sources, failure-isolated
//! - **Predictor** ([`predict`]): optional frame classification with
//!   fine-to-coarse category mapping
//! - **Dispatcher** ([`dispatch`]): interchangeable HTTP / datastore
//!   transports with bounded timeout and in-cycle retry policy
//! - **Broadcaster** ([`broadcast`]): best-effort peripheral side channel
//! - **Scheduler** ([`agent`]): the dual-cadence control loop
//! - **Lifecycle** ([`lifecycle`]): deterministic resource acquisition and
//!   release
//!
//! # Example
//!
//! ```rust,ignore
//! use sortwatch::{config::AgentConfig, lifecycle, lifecycle::Collaborators};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::default();
//!     let shutdown = CancellationToken::new();
//!     let totals = lifecycle::run(&config, Collaborators::default(), shutdown).await?;
//!     println!("cycles: {}", totals.cycles);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod broadcast;
pub mod capture;
pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod predict;
pub mod source;
pub mod types;

pub use agent::{Agent, AgentState, CadenceState, RunTotals};
pub use config::{AgentConfig, ConfigError, Profile, TransportKind};
pub use dispatch::{
    DispatchOutcome, DispatchStatus, Dispatcher, RetryPolicy, Transport, TransportError,
};
pub use lifecycle::{Collaborators, StartupError};
pub use predict::{CategoryMap, Prediction, Predictor};
pub use source::{Acquirer, SensorSource};
pub use types::{Reading, Sample, ThrottleFlag, UploadRecord};
