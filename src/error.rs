//! Error types for nestrun.
//!
//! Errors fall into three families:
//! - [`CancelReason`]: why a [`CancelScope`](crate::scope::CancelScope) fired
//! - [`UsageError`]: the API was used in a way that can never succeed, these always fail the run
//! - [`CaseFailure`]: a case body failed, isolated to that case and subject to retries
//!
//! Hook failures reuse [`CaseFailure`] and are tagged with a [`HookStage`].

use std::{any::Any, borrow::Cow, fmt, path::PathBuf, time::Duration};

use thiserror::Error;

/// The reason a cancellation scope fired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CancelReason {
    /// A time limit expired.
    #[error("Timeout: {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The owner of the scope settled normally.
    #[error("scope settled")]
    Settled,

    /// The scope was fired by hand.
    #[error("aborted: {0}")]
    Aborted(Cow<'static, str>),
}

impl CancelReason {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CancelReason::Timeout(_))
    }
}

/// Misuse of the orchestrator API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum UsageError {
    #[error("skip() must be called before any tests")]
    SkipAfterStart,

    #[error(
        "Duplicate test title detected: \"{0}\". Test titles must be unique across all files when using global snapshots."
    )]
    DuplicateTitle(String),

    #[error("Duplicate snapshot key: \"{0}\". Test names must be unique across all test files.")]
    DuplicateSnapshotKey(String),

    #[error("Snapshot mismatch for \"{key}\"\nExpected:\n{expected}\n\nReceived:\n{received}")]
    SnapshotMismatch {
        key: String,
        expected: String,
        received: String,
    },

    #[error("snapshot value for \"{key}\" cannot be serialized: {message}")]
    Unserializable { key: String, message: String },

    #[error(
        "configure() must be called before any snapshot tests are run. Snapshots have already been loaded from {}.",
        .0.display()
    )]
    ConfigureAfterLoad(PathBuf),

    #[error("expectSnapshot() must be called within a test()")]
    SnapshotOutsideCase,

    #[error("test suite module is wrapped more than {0} levels deep")]
    ModuleNestedTooDeep(usize),
}

/// Why a case attempt (or a hook, or a group body) failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CaseFailure {
    Error(String),
    Panicked(String),
    TimedOut(Duration),
    Cancelled(CancelReason),
    Usage(UsageError),
}

impl CaseFailure {
    /// Classify an error returned by a body.
    pub fn from_error(err: anyhow::Error) -> Self {
        if let Some(reason) = err.downcast_ref::<CancelReason>() {
            return CaseFailure::from(reason.clone());
        }

        match err.downcast::<UsageError>() {
            Ok(usage) => CaseFailure::Usage(usage),
            Err(err) => CaseFailure::Error(format!("{err:#}")),
        }
    }

    /// Classify the payload of a caught panic.
    pub fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
        let msg = payload
            .downcast::<&'static str>()
            .map(|s| s.to_string())
            .or_else(|payload| payload.downcast::<String>().map(|s| *s))
            .unwrap_or_else(|_| String::from("non-string panic payload"));
        CaseFailure::Panicked(msg)
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, CaseFailure::TimedOut(_))
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, CaseFailure::Usage(_))
    }
}

impl From<CancelReason> for CaseFailure {
    fn from(reason: CancelReason) -> Self {
        match reason {
            CancelReason::Timeout(limit) => CaseFailure::TimedOut(limit),
            other => CaseFailure::Cancelled(other),
        }
    }
}

impl From<UsageError> for CaseFailure {
    fn from(err: UsageError) -> Self {
        CaseFailure::Usage(err)
    }
}

impl fmt::Display for CaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseFailure::Error(msg) => write!(f, "Error: {msg}"),
            CaseFailure::Panicked(msg) => write!(f, "panicked: {msg}"),
            CaseFailure::TimedOut(limit) => write!(f, "{}", CancelReason::Timeout(*limit)),
            CaseFailure::Cancelled(reason) => write!(f, "Error: {reason}"),
            CaseFailure::Usage(err) => write!(f, "Error: {err}"),
        }
    }
}

/// Marker error returned by [`CaseApi::skip`](crate::case::CaseApi::skip).
///
/// The runner tracks the skip request itself, so swallowing this error does
/// not turn a skipped case back into a passing one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("case skipped")]
pub struct CaseSkipped;

/// The hook a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    OnTestFail,
    OnTestFinish,
    OnFinish,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookStage::OnTestFail => "onTestFail",
            HookStage::OnTestFinish => "onTestFinish",
            HookStage::OnFinish => "onFinish",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_duration() {
        let reason = CancelReason::Timeout(Duration::from_millis(100));
        assert_eq!(reason.to_string(), "Timeout: 100ms");
        assert_eq!(CaseFailure::from(reason).to_string(), "Timeout: 100ms");
    }

    #[test]
    fn classify_body_errors() {
        let timeout = anyhow::Error::new(CancelReason::Timeout(Duration::from_millis(5)));
        assert!(CaseFailure::from_error(timeout).timed_out());

        let usage = anyhow::Error::new(UsageError::SkipAfterStart);
        assert_eq!(
            CaseFailure::from_error(usage),
            CaseFailure::Usage(UsageError::SkipAfterStart)
        );

        let settled = anyhow::Error::new(CancelReason::Settled);
        assert_eq!(
            CaseFailure::from_error(settled),
            CaseFailure::Cancelled(CancelReason::Settled)
        );

        let plain = anyhow::anyhow!("hello");
        assert_eq!(
            CaseFailure::from_error(plain),
            CaseFailure::Error("hello".into())
        );
    }

    fn panic_payload(f: impl FnOnce() + std::panic::UnwindSafe) -> Box<dyn Any + Send> {
        std::panic::catch_unwind(f).unwrap_err()
    }

    #[test]
    fn panic_payloads() {
        assert_eq!(
            CaseFailure::from_panic(panic_payload(|| panic!("static"))),
            CaseFailure::Panicked("static".into())
        );
        assert_eq!(
            CaseFailure::from_panic(panic_payload(|| panic!("formatted {}", 1))).to_string(),
            "panicked: formatted 1"
        );
        assert_eq!(
            CaseFailure::from_panic(panic_payload(|| std::panic::panic_any(7u8))),
            CaseFailure::Panicked("non-string panic payload".into())
        );
    }

    #[test]
    fn context_chain_is_kept() {
        let err = anyhow::anyhow!("inner").context("outer");
        assert_eq!(CaseFailure::from_error(err).to_string(), "Error: outer: inner");
    }
}
