use std::{borrow::Cow, time::Duration};

use tokio::time::Instant;

use crate::error::CaseFailure;

/// The terminal (or not yet terminal) state of a case.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum CaseOutcome {
    #[default]
    Unfinished,
    Passed,
    Failed(CaseFailure),
    Skipped {
        reason: Option<Cow<'static, str>>,
    },
}

impl CaseOutcome {
    pub fn is_good(&self) -> bool {
        matches!(self, CaseOutcome::Passed | CaseOutcome::Skipped { .. })
    }

    pub fn is_bad(&self) -> bool {
        matches!(self, CaseOutcome::Failed(_))
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CaseOutcome::Unfinished)
    }
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, CaseOutcome::Passed)
    }

    pub fn failed(&self) -> bool {
        matches!(self, CaseOutcome::Failed(_))
    }

    pub fn skipped(&self) -> bool {
        matches!(self, CaseOutcome::Skipped { .. })
    }

    pub fn unfinished(&self) -> bool {
        matches!(self, CaseOutcome::Unfinished)
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, CaseOutcome::Failed(failure) if failure.timed_out())
    }

    pub fn failure(&self) -> Option<&CaseFailure> {
        match self {
            CaseOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// One execution of a case body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub duration: Duration,
    pub failure: Option<CaseFailure>,
}

/// Everything the aggregator knows about one registered case.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CaseRecord {
    pub title: String,
    pub retries: u32,
    pub timeout: Option<Duration>,
    pub attempts: Vec<AttemptRecord>,
    pub started: Option<Instant>,
    pub ended: Option<Instant>,
    pub outcome: CaseOutcome,
}

impl CaseRecord {
    pub(crate) fn new(title: String, retries: u32, timeout: Option<Duration>) -> Self {
        Self {
            title,
            retries,
            timeout,
            attempts: Vec::new(),
            started: None,
            ended: None,
            outcome: CaseOutcome::Unfinished,
        }
    }

    /// Time from first start to settle, or to `now` while still running.
    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.started {
            Some(started) => self.ended.unwrap_or(now).saturating_duration_since(started),
            None => Duration::ZERO,
        }
    }
}
