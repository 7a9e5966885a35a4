//! Canopy flow: concurrent execution of independent work units and the
//! bounded poll loop every wait in the orchestrator is built on.

#![forbid(unsafe_code)]

pub mod combinator;
pub mod poll;
pub mod retry;

pub use combinator::{run_all, run_until_first_error, unit, Unit};
pub use poll::{poll_until, Probe};
pub use retry::{retry_transient, retry_unavailable, RetryConfig};
pub use tokio_util::sync::CancellationToken;
