//! Leaf test cases.
//!
//! A case is registered on a [`Group`](crate::context::Group) with a body that
//! receives a [`CaseApi`]. The [`CaseRunner`] drives the body through its
//! retry budget: every attempt gets a fresh [`CancelScope`] linked to the
//! group's scope and a fresh timer, and emits exactly one result line.

use std::{
    borrow::Cow,
    cell::{Cell, RefCell},
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    rc::Rc,
    time::Duration,
};

use futures::{FutureExt, future::LocalBoxFuture};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    error::{CancelReason, CaseFailure, CaseSkipped, HookStage, UsageError},
    formatter::{FmtCaseOutcome, FmtHookError, FmtStatus, FormatError},
    orchestrator::RunState,
    outcome::{AttemptRecord, CaseOutcome},
    report::CaseId,
    retry::retry_while,
    scope::{CancelScope, link, with_time_limit},
    snapshot::SnapshotChange,
};

/// What a case body, group body or hook evaluates to.
///
/// Bodies may return `()` or any `Result<(), E>` whose error converts into
/// [`anyhow::Error`].
#[derive(Debug)]
pub struct BodyResult(pub anyhow::Result<()>);

impl From<()> for BodyResult {
    fn from(_: ()) -> Self {
        BodyResult(Ok(()))
    }
}

impl<E: Into<anyhow::Error>> From<Result<(), E>> for BodyResult {
    fn from(value: Result<(), E>) -> Self {
        BodyResult(value.map_err(Into::into))
    }
}

/// Await a body and classify its result, catching panics.
pub(crate) async fn run_body<R: Into<BodyResult>>(
    fut: impl Future<Output = R>,
) -> Result<(), CaseFailure> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result.into().0.map_err(CaseFailure::from_error),
        Err(payload) => Err(CaseFailure::from_panic(payload)),
    }
}

pub(crate) type Hook = Box<dyn FnOnce() -> LocalBoxFuture<'static, BodyResult>>;
type FailHook = Box<dyn FnOnce(CaseFailure) -> LocalBoxFuture<'static, BodyResult>>;

pub(crate) fn boxed_hook<F, Fut, R>(hook: F) -> Hook
where
    F: FnOnce() -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
    R: Into<BodyResult>,
{
    Box::new(move || async move { hook().await.into() }.boxed_local())
}

/// Per case options.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaseOptions {
    /// Time limit of each attempt, `None` or zero means no limit.
    pub timeout: Option<Duration>,
    /// Total number of attempts, `0` and `1` both mean no retry.
    pub retry: u32,
}

impl CaseOptions {
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    pub fn with_retry(self, retry: u32) -> Self {
        Self { retry, ..self }
    }

    pub(crate) fn retries(&self) -> u32 {
        self.retry.max(1)
    }

    pub(crate) fn time_limit(&self) -> Option<Duration> {
        self.timeout.filter(|timeout| !timeout.is_zero())
    }
}

impl From<Duration> for CaseOptions {
    fn from(timeout: Duration) -> Self {
        CaseOptions::default().with_timeout(timeout)
    }
}

struct AttemptState {
    run: Rc<RunState>,
    title: Rc<str>,
    scope: CancelScope,
    attempt: u32,
    ordinal: Cell<usize>,
    settled: Cell<bool>,
    skipped: RefCell<Option<Option<Cow<'static, str>>>>,
    usage: RefCell<Option<UsageError>>,
    fail_hooks: RefCell<Vec<FailHook>>,
    finish_hooks: RefCell<Vec<Hook>>,
}

/// The API handed to a case body, valid for one attempt.
#[derive(Clone)]
pub struct CaseApi(Rc<AttemptState>);

impl CaseApi {
    /// The cancellation scope of this attempt.
    ///
    /// It fires on timeout, when an enclosing group is cancelled and once the
    /// attempt settled.
    pub fn signal(&self) -> CancelScope {
        self.0.scope.clone()
    }

    /// Fully qualified title of the case.
    pub fn title(&self) -> &str {
        &self.0.title
    }

    /// The current attempt, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.0.attempt
    }

    /// Run `hook` with the failure if this attempt fails.
    pub fn on_test_fail<F, Fut, R>(&self, hook: F)
    where
        F: FnOnce(CaseFailure) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<BodyResult>,
    {
        self.0
            .fail_hooks
            .borrow_mut()
            .push(Box::new(move |failure: CaseFailure| {
                async move { hook(failure).await.into() }.boxed_local()
            }));
    }

    /// Run `hook` once this attempt settled, whatever the outcome.
    pub fn on_test_finish<F, Fut, R>(&self, hook: F)
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<BodyResult>,
    {
        self.0.finish_hooks.borrow_mut().push(boxed_hook(hook));
    }

    /// Mark the case as skipped.
    ///
    /// Always returns [`CaseSkipped`] so the body can stop with `?`. The
    /// skip is recorded either way, so the result of the body no longer
    /// matters after this call. An empty reason counts as no reason.
    pub fn skip(&self, reason: impl Into<Cow<'static, str>>) -> Result<(), CaseSkipped> {
        let reason = reason.into();
        let reason = (!reason.is_empty()).then_some(reason);
        self.0.skipped.borrow_mut().get_or_insert(reason);
        Err(CaseSkipped)
    }

    /// Compare `value` with the snapshot `"{title} {n}"`, where `n` counts the
    /// unnamed snapshots of this attempt.
    ///
    /// Once the attempt settled this fails with [`UsageError::SnapshotOutsideCase`].
    pub fn expect_snapshot<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), UsageError> {
        let ordinal = self.0.ordinal.get() + 1;
        self.0.ordinal.set(ordinal);
        let key = format!("{} {ordinal}", self.0.title);
        self.compare_snapshot(&key, value)
    }

    /// Compare `value` with the snapshot stored under `name`.
    pub fn expect_snapshot_named<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), UsageError> {
        self.compare_snapshot(name, value)
    }

    fn compare_snapshot<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), UsageError> {
        if self.0.settled.get() {
            return Err(UsageError::SnapshotOutsideCase);
        }
        let compared = self.0.run.snapshots.borrow_mut().compare(key, value);
        match compared {
            Ok(SnapshotChange::Unchanged) => Ok(()),
            Ok(change) => {
                debug!(key, ?change, "snapshot written");
                Ok(())
            }
            Err(err) => {
                // the case fails even if the body swallows the error
                self.0.usage.borrow_mut().get_or_insert_with(|| err.clone());
                Err(err)
            }
        }
    }
}

impl fmt::Debug for CaseApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseApi")
            .field("title", &self.0.title)
            .field("attempt", &self.0.attempt)
            .finish()
    }
}

/// How a single attempt ended, when it did not fail.
#[derive(Debug)]
enum Settled {
    Passed,
    Skipped(Option<Cow<'static, str>>),
}

/// Emit the line of a case that was skipped without ever starting.
pub(crate) fn emit_skip(run: &RunState, title: &str, reason: Option<&str>, retries: u32) {
    run.emit(FormatError::CaseOutcome, |formatter| {
        formatter.fmt_case_outcome(FmtCaseOutcome {
            title,
            status: FmtStatus::Skipped { reason },
            duration: Duration::ZERO,
            timeout: None,
            attempt: 1,
            retries,
        })
    });
}

/// Runs one registered case to its terminal outcome.
pub(crate) struct CaseRunner {
    pub(crate) run: Rc<RunState>,
    pub(crate) id: CaseId,
    pub(crate) title: Rc<str>,
    pub(crate) group_scope: CancelScope,
    pub(crate) options: CaseOptions,
}

impl CaseRunner {
    pub(crate) async fn run<F, Fut, R>(self, mut body: F)
    where
        F: FnMut(CaseApi) -> Fut,
        Fut: Future<Output = R>,
        R: Into<BodyResult>,
    {
        self.run.report.borrow_mut().start(self.id, Instant::now());
        debug!(title = %self.title, "case started");

        let claimed = self
            .run
            .snapshots
            .borrow_mut()
            .claim_title(&self.title, self.id);
        if let Err(err) = claimed {
            let failure = CaseFailure::from(err);
            self.report_attempt(1, Duration::ZERO, Err(&failure));
            self.settle(CaseOutcome::Failed(failure));
            return;
        }

        let settled = retry_while(
            self.options.retries(),
            async |attempt| self.attempt(attempt, &mut body).await,
            |_| !self.group_scope.is_fired(),
        )
        .await;

        self.settle(match settled {
            Ok(Settled::Passed) => CaseOutcome::Passed,
            Ok(Settled::Skipped(reason)) => CaseOutcome::Skipped { reason },
            Err(failure) => CaseOutcome::Failed(failure),
        });
    }

    async fn attempt<F, Fut, R>(&self, attempt: u32, body: &mut F) -> Result<Settled, CaseFailure>
    where
        F: FnMut(CaseApi) -> Fut,
        Fut: Future<Output = R>,
        R: Into<BodyResult>,
    {
        let scope = CancelScope::new();
        let link = link(&scope, &self.group_scope);
        let api = CaseApi(Rc::new(AttemptState {
            run: Rc::clone(&self.run),
            title: Rc::clone(&self.title),
            scope: scope.clone(),
            attempt,
            ordinal: Cell::new(0),
            settled: Cell::new(false),
            skipped: RefCell::new(None),
            usage: RefCell::new(None),
            fail_hooks: RefCell::new(Vec::new()),
            finish_hooks: RefCell::new(Vec::new()),
        }));

        let started = Instant::now();
        // a fired group scope ends the attempt as well as its own timer
        let result = scope
            .guard(with_time_limit(
                run_body(async { body(api.clone()).await }),
                self.options.time_limit(),
                &scope,
            ))
            .await
            .and_then(|result| result);
        let duration = started.elapsed();

        let state = &api.0;
        let skipped = state.skipped.borrow_mut().take();
        let usage = state.usage.borrow_mut().take();
        let settled = match (skipped, result) {
            (Some(reason), _) => Ok(Settled::Skipped(reason)),
            (None, Err(reason)) => Err(CaseFailure::from(reason)),
            (None, Ok(Err(failure))) => Err(failure),
            (None, Ok(Ok(()))) => match usage {
                Some(usage) => Err(CaseFailure::from(usage)),
                None => Ok(Settled::Passed),
            },
        };

        if let Err(failure) = &settled {
            let hooks = std::mem::take(&mut *state.fail_hooks.borrow_mut());
            for hook in hooks {
                let failure = failure.clone();
                if let Err(err) = run_body(async move { hook(failure).await }).await {
                    self.hook_failed(HookStage::OnTestFail, &err);
                }
            }
        }

        let hooks = std::mem::take(&mut *state.finish_hooks.borrow_mut());
        for hook in hooks {
            if let Err(err) = run_body(async move { hook().await }).await {
                self.hook_failed(HookStage::OnTestFinish, &err);
            }
        }

        state.settled.set(true);
        self.report_attempt(attempt, duration, settled.as_ref());
        scope.fire(CancelReason::Settled);
        link.unlink();
        settled
    }

    fn report_attempt(&self, attempt: u32, duration: Duration, settled: Result<&Settled, &CaseFailure>) {
        let status = match settled {
            Ok(Settled::Passed) => FmtStatus::Passed,
            Ok(Settled::Skipped(reason)) => FmtStatus::Skipped {
                reason: reason.as_deref(),
            },
            Err(failure) => FmtStatus::Failed(failure),
        };
        self.run.emit(FormatError::CaseOutcome, |formatter| {
            formatter.fmt_case_outcome(FmtCaseOutcome {
                title: &self.title,
                status,
                duration,
                timeout: self.options.time_limit(),
                attempt,
                retries: self.options.retries(),
            })
        });

        self.run.report.borrow_mut().push_attempt(
            self.id,
            AttemptRecord {
                attempt,
                duration,
                failure: settled.err().cloned(),
            },
        );
    }

    fn hook_failed(&self, stage: HookStage, failure: &CaseFailure) {
        warn!(title = %self.title, %stage, %failure, "hook failed");
        self.run.emit(FormatError::HookError, |formatter| {
            formatter.fmt_hook_error(FmtHookError {
                title: &self.title,
                stage,
                failure,
            })
        });
    }

    fn settle(&self, outcome: CaseOutcome) {
        debug!(title = %self.title, ?outcome, "case settled");
        self.run
            .report
            .borrow_mut()
            .settle(self.id, outcome, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::Group, test_support::*};

    #[tokio::test]
    async fn body_results_are_classified() {
        assert_eq!(run_body(async {}).await, Ok(()));
        assert_eq!(
            run_body(async { Err::<(), _>(anyhow::anyhow!("nope")) }).await,
            Err(CaseFailure::Error("nope".into()))
        );
        assert_eq!(
            run_body(async { Err::<(), _>(CaseSkipped) }).await,
            Err(CaseFailure::Error("case skipped".into()))
        );
        assert_eq!(
            run_body(async {
                if true {
                    panic!("boom");
                }
            })
            .await,
            Err(CaseFailure::Panicked("boom".into()))
        );
    }

    #[test]
    fn options() {
        let options = CaseOptions::from(Duration::from_millis(10)).with_retry(3);
        assert_eq!(options.time_limit(), Some(Duration::from_millis(10)));
        assert_eq!(options.retries(), 3);

        let options = CaseOptions::default().with_timeout(Duration::ZERO);
        assert_eq!(options.time_limit(), None);
        assert_eq!(options.retries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hook_errors_print_before_the_result_line() {
        let (report, output) = run(async |root: Group| {
            root.test("flaky", async |api: CaseApi| -> anyhow::Result<()> {
                api.on_test_fail(async |_: CaseFailure| -> anyhow::Result<()> {
                    anyhow::bail!("cleanup broke")
                });
                api.on_test_finish(async || {});
                anyhow::bail!("nope")
            });
        })
        .await;

        assert!(report.failed);
        assert!(output.starts_with(
            "✖ flaky [onTestFail]\n    Error: cleanup broke\n✖ flaky\n    Error: nope\n"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_are_rejected_after_the_case_settled() {
        let kept = Rc::new(RefCell::new(None));
        let (report, _) = run({
            let kept = Rc::clone(&kept);
            move |root: Group| async move {
                let case = root.test("keeps its api", {
                    let kept = Rc::clone(&kept);
                    move |api: CaseApi| {
                        let kept = Rc::clone(&kept);
                        async move {
                            *kept.borrow_mut() = Some(api);
                        }
                    }
                });
                assert_eq!(case.await, Some(CaseOutcome::Passed));

                let api: CaseApi = kept.borrow_mut().take().unwrap();
                assert_eq!(
                    api.expect_snapshot(&42),
                    Err(UsageError::SnapshotOutsideCase)
                );
            }
        })
        .await;

        assert!(!report.failed);
        assert!(report.snapshots.is_empty());
    }
}
