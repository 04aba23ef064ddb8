//! Run aggregation.
//!
//! The [`RunAggregator`] is a plain accumulator: the orchestrator registers a
//! [`CaseRecord`] per case, updates it while attempts settle and asks for a
//! [`RunSummary`] at the end of the run. It has no concurrency logic of its own.

use std::{borrow::Cow, io, process::ExitCode, time::Duration};

use tokio::time::Instant;

use crate::{
    error::CaseFailure,
    formatter::FormatError,
    outcome::{AttemptRecord, CaseOutcome, CaseRecord},
    snapshot::SnapshotSummary,
};

/// Index of a registered case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaseId(usize);

#[derive(Debug, Default)]
pub struct RunAggregator {
    records: Vec<CaseRecord>,
    failed: bool,
}

impl RunAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        title: impl Into<String>,
        retries: u32,
        timeout: Option<Duration>,
    ) -> CaseId {
        self.records
            .push(CaseRecord::new(title.into(), retries, timeout));
        CaseId(self.records.len() - 1)
    }

    pub fn record(&self, id: CaseId) -> &CaseRecord {
        &self.records[id.0]
    }

    pub fn records(&self) -> &[CaseRecord] {
        &self.records
    }

    pub fn outcome(&self, id: CaseId) -> CaseOutcome {
        self.records[id.0].outcome.clone()
    }

    /// Mark the first start of a case, later calls keep the first instant.
    pub fn start(&mut self, id: CaseId, now: Instant) {
        self.records[id.0].started.get_or_insert(now);
    }

    pub fn push_attempt(&mut self, id: CaseId, attempt: AttemptRecord) {
        self.records[id.0].attempts.push(attempt);
    }

    /// Record the terminal outcome, a record that already settled is left untouched.
    pub fn settle(&mut self, id: CaseId, outcome: CaseOutcome, now: Instant) {
        let record = &mut self.records[id.0];
        if record.outcome.is_terminal() {
            return;
        }
        if outcome.failed() {
            self.failed = true;
        }
        record.started.get_or_insert(now);
        record.ended = Some(now);
        record.outcome = outcome;
    }

    /// Record a skip that happened before the case ever started.
    pub fn skip(&mut self, id: CaseId, reason: Option<Cow<'static, str>>, now: Instant) {
        self.settle(id, CaseOutcome::Skipped { reason }, now);
    }

    /// Fail the run without attributing it to a case (usage, group and hook errors).
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn summary(&self, now: Instant) -> RunSummary {
        let mut summary = RunSummary {
            total: self.records.len(),
            ..RunSummary::default()
        };
        let mut first_start: Option<Instant> = None;
        let mut last_end: Option<Instant> = None;

        for record in &self.records {
            if let Some(started) = record.started {
                first_start = Some(first_start.map_or(started, |first| first.min(started)));
            }

            match &record.outcome {
                CaseOutcome::Unfinished => {
                    summary.pending_cases.push(PendingCase {
                        title: record.title.clone(),
                        elapsed: record.elapsed(now),
                        timeout: record.timeout,
                    });
                    continue;
                }
                CaseOutcome::Passed => summary.passed += 1,
                CaseOutcome::Failed(_) => summary.failed += 1,
                CaseOutcome::Skipped { .. } => summary.skipped += 1,
            }

            if let Some(ended) = record.ended {
                last_end = Some(last_end.map_or(ended, |last| last.max(ended)));
            }
        }

        summary.pending = summary.pending_cases.len();
        let end = match summary.pending {
            0 => last_end.unwrap_or(now),
            _ => now,
        };
        summary.elapsed = first_start
            .map(|first| end.saturating_duration_since(first))
            .unwrap_or_default();
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCase {
    pub title: String,
    pub elapsed: Duration,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    pub elapsed: Duration,
    pub pending_cases: Vec<PendingCase>,
}

/// The result of a whole run.
#[derive(Debug)]
#[non_exhaustive]
pub struct RunReport {
    pub summary: RunSummary,
    pub snapshots: SnapshotSummary,
    pub records: Vec<CaseRecord>,
    pub failed: bool,
    pub timed_out: bool,
    pub fmt_errors: Vec<(FormatError, io::Error)>,
}

impl RunReport {
    pub fn exit_code(&self) -> ExitCode {
        match self.failed {
            true => ExitCode::FAILURE,
            false => ExitCode::SUCCESS,
        }
    }

    /// Find a case record by its fully qualified title.
    pub fn record(&self, title: &str) -> Option<&CaseRecord> {
        self.records.iter().find(|record| record.title == title)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &CaseFailure)> {
        self.records
            .iter()
            .filter_map(|record| Some((record.title.as_str(), record.outcome.failure()?)))
    }
}
