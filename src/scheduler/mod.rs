pub mod commit;
pub mod dispatch;
pub mod ledger;
pub mod registry;
pub mod runner;

pub use commit::{CommitId, CommitStatus, TestResult};
pub use dispatch::{Dispatcher, Placement};
pub use ledger::CommitLedger;
pub use registry::RunnerRegistry;
pub use runner::{Liveness, RunnerId, RunnerState};
