//! The entry point of a run.
//!
//! An [`Orchestrator`] owns everything that lives for exactly one run: the
//! case records, the snapshot store, the filter and the formatter. Several
//! orchestrators can run in the same process, they share nothing.
//!
//! ```no_run
//! use nestrun::{Group, Orchestrator};
//!
//! fn main() -> std::process::ExitCode {
//!     let report = Orchestrator::from_env()
//!         .run_blocking(async |root: Group| {
//!             root.test("adds", async |_| assert_eq!(1 + 1, 2));
//!         })
//!         .expect("runtime");
//!     report.exit_code()
//! }
//! ```

use std::{cell::RefCell, future::Future, io, rc::Rc, time::Duration};

use tokio::{task::LocalSet, time::Instant};
use tracing::{debug, warn};

use crate::{
    case::BodyResult,
    config::Config,
    context::Group,
    filter::{CaseFilter, NoFilter, SubstringFilter},
    formatter::{
        FmtProcessTimeout, FmtRunOutcomes, FmtRunStart, FormatError, RunFormatter,
        pretty::PrettyFormatter,
    },
    report::{RunAggregator, RunReport},
    snapshot::SnapshotStore,
};

/// State shared by every group and case of one run.
pub(crate) struct RunState {
    pub(crate) report: RefCell<RunAggregator>,
    pub(crate) snapshots: RefCell<SnapshotStore>,
    pub(crate) filter: Box<dyn CaseFilter>,
    formatter: RefCell<Box<dyn RunFormatter>>,
    fmt_errors: RefCell<Vec<(FormatError, io::Error)>>,
}

impl RunState {
    pub(crate) fn new(
        filter: Box<dyn CaseFilter>,
        formatter: Box<dyn RunFormatter>,
        snapshots: SnapshotStore,
    ) -> Self {
        Self {
            report: RefCell::new(RunAggregator::new()),
            snapshots: RefCell::new(snapshots),
            filter,
            formatter: RefCell::new(formatter),
            fmt_errors: RefCell::new(Vec::new()),
        }
    }

    /// Hand one event to the formatter, keeping the error if it fails.
    pub(crate) fn emit(
        &self,
        kind: FormatError,
        f: impl FnOnce(&mut dyn RunFormatter) -> io::Result<()>,
    ) {
        let result = f(&mut **self.formatter.borrow_mut());
        if let Err(err) = result {
            warn!(?kind, %err, "formatter failed");
            self.fmt_errors.borrow_mut().push((kind, err));
        }
    }
}

pub struct Orchestrator<Filter = NoFilter, Formatter = PrettyFormatter<io::Stdout, io::Stderr>> {
    filter: Filter,
    formatter: Formatter,
    snapshots: SnapshotStore,
    process_timeout: Option<Duration>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self {
            filter: NoFilter,
            formatter: PrettyFormatter::default(),
            snapshots: SnapshotStore::default(),
            process_timeout: None,
        }
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An orchestrator configured from the process environment.
    pub fn from_env() -> Orchestrator<SubstringFilter> {
        Self::new().with_config(Config::from_env())
    }
}

impl<Filter, Formatter> Orchestrator<Filter, Formatter> {
    /// Apply the filter and snapshot settings of `config`.
    pub fn with_config(self, config: Config) -> Orchestrator<SubstringFilter, Formatter> {
        Orchestrator {
            filter: SubstringFilter::new(config.filter.clone().unwrap_or_default()),
            formatter: self.formatter,
            snapshots: SnapshotStore::from_config(&config),
            process_timeout: self.process_timeout,
        }
    }

    pub fn with_filter<WithFilter: CaseFilter>(
        self,
        filter: WithFilter,
    ) -> Orchestrator<WithFilter, Formatter> {
        Orchestrator {
            filter,
            formatter: self.formatter,
            snapshots: self.snapshots,
            process_timeout: self.process_timeout,
        }
    }

    pub fn with_formatter<WithFormatter: RunFormatter>(
        self,
        formatter: WithFormatter,
    ) -> Orchestrator<Filter, WithFormatter> {
        Orchestrator {
            filter: self.filter,
            formatter,
            snapshots: self.snapshots,
            process_timeout: self.process_timeout,
        }
    }

    pub fn with_snapshot_store(self, snapshots: SnapshotStore) -> Self {
        Self { snapshots, ..self }
    }

    /// Give up on the run after `timeout`, a zero timeout means none.
    pub fn with_process_timeout(self, timeout: Duration) -> Self {
        Self {
            process_timeout: (!timeout.is_zero()).then_some(timeout),
            ..self
        }
    }
}

impl<Filter, Formatter> Orchestrator<Filter, Formatter>
where
    Filter: CaseFilter + 'static,
    Formatter: RunFormatter + 'static,
{
    /// Run `body` as the root group and report the outcome.
    ///
    /// Must be called on a current thread runtime, or at least from a
    /// context where `LocalSet::run_until` is allowed.
    pub async fn run<F, Fut, R>(self, body: F) -> RunReport
    where
        F: FnOnce(Group) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<BodyResult>,
    {
        let state = Rc::new(RunState::new(
            Box::new(self.filter),
            Box::new(self.formatter),
            self.snapshots,
        ));
        debug!(timeout = ?self.process_timeout, "run started");
        state.emit(FormatError::RunStart, |formatter| {
            formatter.fmt_run_start(FmtRunStart {
                filter: state.filter.banner(),
            })
        });

        let local = LocalSet::new();
        let root = Group::root(Rc::clone(&state));
        let process_timeout = self.process_timeout;
        let settled = local
            .run_until(async move {
                let work = root.run(body);
                match process_timeout {
                    Some(limit) => tokio::time::timeout(limit, work).await.is_ok(),
                    None => {
                        work.await;
                        true
                    }
                }
            })
            .await;
        // unfinished cases and groups are abandoned here
        drop(local);

        if !settled
            && let Some(timeout) = process_timeout
        {
            warn!(?timeout, "process timed out");
            state.report.borrow_mut().mark_failed();
            state.emit(FormatError::ProcessTimeout, |formatter| {
                formatter.fmt_process_timeout(FmtProcessTimeout { timeout })
            });
        }

        finish(&state, !settled)
    }

    /// Build a current thread runtime and [`run`](Self::run) on it.
    pub fn run_blocking<F, Fut, R>(self, body: F) -> io::Result<RunReport>
    where
        F: FnOnce(Group) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<BodyResult>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        Ok(runtime.block_on(self.run(body)))
    }
}

/// The end of the run: flush snapshots, summarize, report.
fn finish(state: &RunState, timed_out: bool) -> RunReport {
    let now = Instant::now();

    let flushed = state.snapshots.borrow_mut().flush();
    let flush_failed = match flushed {
        Ok(_) => false,
        Err(err) => {
            let path = state.snapshots.borrow().path().display().to_string();
            warn!(%path, %err, "cannot write snapshots");
            true
        }
    };

    let summary = state.report.borrow().summary(now);
    let snapshots = state.snapshots.borrow().summary();
    state.emit(FormatError::RunOutcomes, |formatter| {
        formatter.fmt_run_outcomes(FmtRunOutcomes {
            summary: &summary,
            snapshots,
        })
    });

    let report = state.report.borrow();
    let failed = report.is_failed() || timed_out || flush_failed;
    debug!(
        passed = summary.passed,
        failed = summary.failed,
        skipped = summary.skipped,
        pending = summary.pending,
        "run finished"
    );

    RunReport {
        summary,
        snapshots,
        records: report.records().to_vec(),
        failed,
        timed_out,
        fmt_errors: std::mem::take(&mut *state.fmt_errors.borrow_mut()),
    }
}
