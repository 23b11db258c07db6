//! Insert-then-update sweep driver for key-value stores.
//!
//! Cycles a fixed keyspace through one create-only sweep and then endless
//! read-then-update sweeps, keeping at most a fixed number of key tasks in
//! flight. See [`coordinator::Coordinator`] for the loop itself.

pub mod accountant;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod mem_server;
pub mod payload;
pub mod resp;
pub mod store;
pub mod tally;
pub mod task;

pub use accountant::{Phase, PhaseSummary};
pub use config::{ConfigError, RetryPolicy, SweepConfig, Verbosity};
pub use coordinator::{Coordinator, StepReport};
pub use error::SweepError;
pub use resp::{RespConnection, RespConnector};
