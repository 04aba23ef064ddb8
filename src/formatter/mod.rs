//! Output formatting for nestrun.
//!
//! The orchestrator does not print anything itself. Every user facing line
//! (case results, hook failures, group errors and the end of run summary) is
//! handed to a [`RunFormatter`] as a small data object, and the formatter
//! decides what to do with it.
//!
//! Formatter calls happen synchronously between suspension points, so a
//! formatter never sees interleaved events from two cases.
//!
//! A formatter that fails to write does not affect the outcome of the run.
//! The failing call is recorded as a [`FormatError`] in the
//! [`RunReport`](crate::report::RunReport) together with the io error.

use std::{io, time::Duration};

use crate::{
    error::{CaseFailure, HookStage},
    report::RunSummary,
    snapshot::SnapshotSummary,
};

pub mod common;
pub mod no;
pub mod pretty;

/// The formatter call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatError {
    RunStart,
    CaseOutcome,
    HookError,
    GroupError,
    ProcessTimeout,
    RunOutcomes,
}

#[derive(Debug, Clone, Copy)]
pub struct FmtRunStart<'a> {
    /// The active title filter, if any.
    pub filter: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub enum FmtStatus<'a> {
    Passed,
    Failed(&'a CaseFailure),
    Skipped { reason: Option<&'a str> },
}

/// One settled attempt of a case.
#[derive(Debug, Clone, Copy)]
pub struct FmtCaseOutcome<'a> {
    pub title: &'a str,
    pub status: FmtStatus<'a>,
    pub duration: Duration,
    pub timeout: Option<Duration>,
    pub attempt: u32,
    pub retries: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FmtHookError<'a> {
    pub title: &'a str,
    pub stage: HookStage,
    pub failure: &'a CaseFailure,
}

/// A group body failed, timed out or one of its finish hooks failed.
#[derive(Debug, Clone, Copy)]
pub struct FmtGroupError<'a> {
    /// Qualified title of the group, empty for the root.
    pub title: &'a str,
    pub failure: &'a CaseFailure,
}

#[derive(Debug, Clone, Copy)]
pub struct FmtProcessTimeout {
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct FmtRunOutcomes<'a> {
    pub summary: &'a RunSummary,
    pub snapshots: SnapshotSummary,
}

/// Receives the events of a run.
///
/// Only the case outcome and the run outcome are required; the remaining
/// events default to doing nothing.
pub trait RunFormatter {
    fn fmt_run_start(&mut self, data: FmtRunStart<'_>) -> io::Result<()> {
        let _ = data;
        Ok(())
    }

    fn fmt_case_outcome(&mut self, data: FmtCaseOutcome<'_>) -> io::Result<()>;

    fn fmt_hook_error(&mut self, data: FmtHookError<'_>) -> io::Result<()> {
        let _ = data;
        Ok(())
    }

    fn fmt_group_error(&mut self, data: FmtGroupError<'_>) -> io::Result<()> {
        let _ = data;
        Ok(())
    }

    fn fmt_process_timeout(&mut self, data: FmtProcessTimeout) -> io::Result<()> {
        let _ = data;
        Ok(())
    }

    fn fmt_run_outcomes(&mut self, data: FmtRunOutcomes<'_>) -> io::Result<()>;
}

impl<F: RunFormatter + ?Sized> RunFormatter for Box<F> {
    fn fmt_run_start(&mut self, data: FmtRunStart<'_>) -> io::Result<()> {
        (**self).fmt_run_start(data)
    }

    fn fmt_case_outcome(&mut self, data: FmtCaseOutcome<'_>) -> io::Result<()> {
        (**self).fmt_case_outcome(data)
    }

    fn fmt_hook_error(&mut self, data: FmtHookError<'_>) -> io::Result<()> {
        (**self).fmt_hook_error(data)
    }

    fn fmt_group_error(&mut self, data: FmtGroupError<'_>) -> io::Result<()> {
        (**self).fmt_group_error(data)
    }

    fn fmt_process_timeout(&mut self, data: FmtProcessTimeout) -> io::Result<()> {
        (**self).fmt_process_timeout(data)
    }

    fn fmt_run_outcomes(&mut self, data: FmtRunOutcomes<'_>) -> io::Result<()> {
        (**self).fmt_run_outcomes(data)
    }
}
