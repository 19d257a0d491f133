//! Background loops that reconcile runners and commits.
//!
//! Both loops share the server's [`Dispatcher`](crate::scheduler::Dispatcher)
//! and exit when the shutdown token is cancelled:
//!
//! - [`LivenessMonitor`]: pings every runner each interval; runners that fail
//!   are evicted and their commits go back to pending
//! - [`Redistributor`]: retries placement of everything still pending, which
//!   is how commits queued with no runner available, or requeued by an
//!   eviction, eventually land on a runner

pub mod liveness;
pub mod redistribute;

pub use liveness::{LivenessMonitor, ProbeReport};
pub use redistribute::Redistributor;
