//! A nested, async test orchestrator.
//!
//! Cases are registered inside groups, groups nest, and everything runs
//! cooperatively on a single thread. Groups can bound the concurrency of
//! their children, impose time limits, be skipped and run cleanup hooks.
//! Cases can retry, be skipped at runtime and compare values against a
//! snapshot file shared by the whole run.
//!
//! The entry point is [`Orchestrator`], which hands the root [`Group`] to a
//! body and returns a [`RunReport`] once everything settled.

pub mod case;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod formatter;
pub mod handle;
pub mod limiter;
pub mod outcome;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod scope;
pub mod snapshot;
pub mod suite;

pub use case::{BodyResult, CaseApi, CaseOptions};
pub use config::Config;
pub use context::{Group, GroupOptions};
pub use error::{CancelReason, CaseFailure, CaseSkipped, UsageError};
pub use handle::{CaseHandle, GroupHandle};
pub use limiter::Parallel;
pub use orchestrator::Orchestrator;
pub use outcome::CaseOutcome;
pub use report::RunReport;
pub use scope::CancelScope;
pub use snapshot::SnapshotStore;
pub use suite::{SuiteModule, TestSuite};

#[cfg(test)]
mod test_support;
