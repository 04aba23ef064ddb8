//! Execution contexts.
//!
//! A [`Group`] is the handle through which cases and nested groups are
//! registered. Every group owns a [`CancelScope`] linked to its parent's, an
//! optional [`Limiter`] that bounds how many of its direct children run at
//! once, and the list of children it still has to wait for.
//!
//! A group settles in this order:
//! 1. its body returns (or fails, or the group's time limit expires)
//! 2. every registered child settled, including children registered while
//!    draining
//! 3. its scope fires with [`CancelReason::Settled`] and unlinks from the parent
//! 4. its finish hooks run in registration order

use std::{
    borrow::Cow,
    cell::{Cell, RefCell},
    fmt,
    future::Future,
    pin::pin,
    rc::Rc,
    time::Duration,
};

use futures::future::OptionFuture;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::{
    case::{BodyResult, CaseApi, CaseOptions, CaseRunner, Hook, boxed_hook, emit_skip, run_body},
    error::{CancelReason, CaseFailure, HookStage, UsageError},
    formatter::{FmtGroupError, FmtHookError, FormatError},
    handle::{CaseHandle, Completion, GroupHandle},
    limiter::{Limiter, Parallel},
    orchestrator::RunState,
    scope::{CancelScope, Link, link},
};

/// Separator between the title segments of nested groups and cases.
pub const TITLE_SEPARATOR: &str = " › ";

/// Reason recorded for cases that were still queued when their group body failed.
pub const BODY_FAILED_REASON: &str = "group body failed";

/// Per group options.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GroupOptions {
    /// Time limit of the whole group, children included.
    pub timeout: Option<Duration>,
    /// Parallelism of the direct children, inherited from the parent when `None`.
    pub parallel: Option<Parallel>,
}

impl GroupOptions {
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    pub fn with_parallel(self, parallel: impl Into<Parallel>) -> Self {
        Self {
            parallel: Some(parallel.into()),
            ..self
        }
    }
}

impl From<Duration> for GroupOptions {
    fn from(timeout: Duration) -> Self {
        GroupOptions::default().with_timeout(timeout)
    }
}

impl From<Parallel> for GroupOptions {
    fn from(parallel: Parallel) -> Self {
        GroupOptions::default().with_parallel(parallel)
    }
}

struct GroupInner {
    run: Rc<RunState>,
    title: String,
    scope: CancelScope,
    link: RefCell<Option<Link>>,
    policy: Parallel,
    limiter: Option<Limiter>,
    timeout: Option<Duration>,
    skip: RefCell<Option<Option<Cow<'static, str>>>>,
    usage: RefCell<Option<UsageError>>,
    child_started: Cell<bool>,
    body_failed: Cell<bool>,
    timed_out: Cell<bool>,
    pending: RefCell<Vec<Completion>>,
    finish_hooks: RefCell<Vec<Hook>>,
}

/// A group of cases, the API handed to group and suite bodies.
///
/// Cloning a group yields another handle to the same group.
#[derive(Clone)]
pub struct Group(Rc<GroupInner>);

impl Group {
    pub(crate) fn root(run: Rc<RunState>) -> Self {
        Self::new(run, String::new(), Parallel::Unbounded, None, None)
    }

    fn new(
        run: Rc<RunState>,
        title: String,
        policy: Parallel,
        timeout: Option<Duration>,
        skip: Option<Option<Cow<'static, str>>>,
    ) -> Self {
        Self(Rc::new(GroupInner {
            run,
            title,
            scope: CancelScope::new(),
            link: RefCell::new(None),
            policy,
            limiter: policy.limiter(),
            timeout: timeout.filter(|timeout| !timeout.is_zero()),
            skip: RefCell::new(skip),
            usage: RefCell::new(None),
            child_started: Cell::new(false),
            body_failed: Cell::new(false),
            timed_out: Cell::new(false),
            pending: RefCell::new(Vec::new()),
            finish_hooks: RefCell::new(Vec::new()),
        }))
    }

    /// Create a child group, linked to this one but not yet running.
    pub(crate) fn child(&self, title: String, options: GroupOptions) -> Group {
        let child = Group::new(
            Rc::clone(&self.0.run),
            title,
            options.parallel.unwrap_or(self.0.policy),
            options.timeout,
            self.0.skip.borrow().clone(),
        );
        *child.0.link.borrow_mut() = Some(link(&child.0.scope, &self.0.scope));
        child
    }

    pub(crate) fn child_title(&self, segment: &str) -> String {
        match self.0.title.is_empty() {
            true => segment.to_string(),
            false => format!("{}{TITLE_SEPARATOR}{segment}", self.0.title),
        }
    }

    pub(crate) fn limiter(&self) -> Option<Limiter> {
        self.0.limiter.clone()
    }

    /// Fully qualified title of the group, empty for the root.
    pub fn title(&self) -> &str {
        &self.0.title
    }

    /// The cancellation scope of this group.
    pub fn signal(&self) -> CancelScope {
        self.0.scope.clone()
    }

    pub fn is_skipped(&self) -> bool {
        self.0.skip.borrow().is_some()
    }

    /// Skip every case of this group and of its nested groups.
    ///
    /// Must be called before the first case or group is registered here.
    /// A late call fails with [`UsageError::SkipAfterStart`], which also fails
    /// the group.
    pub fn skip(&self, reason: impl Into<Cow<'static, str>>) -> Result<(), UsageError> {
        if self.0.child_started.get() {
            let err = UsageError::SkipAfterStart;
            self.0.usage.borrow_mut().get_or_insert_with(|| err.clone());
            return Err(err);
        }

        let reason = reason.into();
        let reason = (!reason.is_empty()).then_some(reason);
        debug!(title = %self.0.title, ?reason, "group skipped");
        *self.0.skip.borrow_mut() = Some(reason);
        Ok(())
    }

    /// Run `hook` after this group and all of its children settled.
    pub fn on_finish<F, Fut, R>(&self, hook: F)
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<BodyResult>,
    {
        self.0.finish_hooks.borrow_mut().push(boxed_hook(hook));
    }

    /// Register a nested group.
    pub fn describe<F, Fut, R>(&self, title: &str, body: F) -> GroupHandle
    where
        F: FnOnce(Group) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<BodyResult>,
    {
        self.describe_with(title, GroupOptions::default(), body)
    }

    pub fn describe_with<F, Fut, R>(
        &self,
        title: &str,
        options: impl Into<GroupOptions>,
        body: F,
    ) -> GroupHandle
    where
        F: FnOnce(Group) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<BodyResult>,
    {
        let child = self.child(self.child_title(title), options.into());
        self.spawn_group(child, body)
    }

    /// Start `child` as a direct child of this group.
    pub(crate) fn spawn_group<F, Fut, R>(&self, child: Group, body: F) -> GroupHandle
    where
        F: FnOnce(Group) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<BodyResult>,
    {
        self.0.child_started.set(true);
        let completion = Completion::default();
        self.0.pending.borrow_mut().push(completion.clone());
        let acquire = self.0.limiter.as_ref().map(Limiter::acquire);

        tokio::task::spawn_local({
            let completion = completion.clone();
            async move {
                let _permit = OptionFuture::from(acquire).await;
                child.run(body).await;
                completion.complete();
            }
        });

        GroupHandle { completion }
    }

    /// Register a case.
    pub fn test<F, Fut, R>(&self, title: &str, body: F) -> CaseHandle
    where
        F: FnMut(CaseApi) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<BodyResult>,
    {
        self.test_with(title, CaseOptions::default(), body)
    }

    pub fn test_with<F, Fut, R>(
        &self,
        title: &str,
        options: impl Into<CaseOptions>,
        body: F,
    ) -> CaseHandle
    where
        F: FnMut(CaseApi) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Into<BodyResult>,
    {
        let options = options.into();
        let inner = &self.0;
        let run = Rc::clone(&inner.run);
        let title = self.child_title(title);
        inner.child_started.set(true);

        let completion = Completion::default();
        let handle = |id| CaseHandle {
            run: Rc::clone(&run),
            id,
            completion: completion.clone(),
        };

        if !run.filter.matches(&title) {
            completion.complete();
            return handle(None);
        }

        let id = run
            .report
            .borrow_mut()
            .register(title.clone(), options.retries(), options.time_limit());

        if let Some(reason) = inner.skip.borrow().clone() {
            emit_skip(&run, &title, reason.as_deref(), options.retries());
            run.report.borrow_mut().skip(id, reason, Instant::now());
            completion.complete();
            return handle(Some(id));
        }

        inner.pending.borrow_mut().push(completion.clone());
        let acquire = inner.limiter.as_ref().map(Limiter::acquire);
        let queued = acquire.as_ref().is_some_and(|acquire| !acquire.is_ready());

        tokio::task::spawn_local({
            let group = self.clone();
            let run = Rc::clone(&run);
            let completion = completion.clone();
            async move {
                let _permit = OptionFuture::from(acquire).await;
                match group.skipped_before_start(queued) {
                    Some(reason) => {
                        emit_skip(&run, &title, Some(reason), options.retries());
                        run.report
                            .borrow_mut()
                            .skip(id, Some(reason.into()), Instant::now());
                    }
                    None => {
                        let runner = CaseRunner {
                            run,
                            id,
                            title: title.into(),
                            group_scope: group.signal(),
                            options,
                        };
                        runner.run(body).await;
                    }
                }
                completion.complete();
            }
        });

        handle(Some(id))
    }

    /// The skip reason of a case that waited for a slot while the group body failed.
    ///
    /// A case admitted right at registration counts as started. A case admitted
    /// after its group was cancelled still runs and fails with the scope reason.
    fn skipped_before_start(&self, queued: bool) -> Option<&'static str> {
        (queued && self.0.body_failed.get()).then_some(BODY_FAILED_REASON)
    }

    /// Run the body of this group, wait for all children and run the finish hooks.
    pub(crate) async fn run<F, Fut, R>(self, body: F)
    where
        F: FnOnce(Group) -> Fut,
        Fut: Future<Output = R>,
        R: Into<BodyResult>,
    {
        let inner = &self.0;
        debug!(title = %inner.title, timeout = ?inner.timeout, "group started");

        let mut work = pin!(async {
            let mut result = run_body(async { body(self.clone()).await }).await;
            if result.is_ok()
                && let Some(usage) = inner.usage.borrow_mut().take()
            {
                result = Err(CaseFailure::from(usage));
            }
            if let Err(failure) = result {
                inner.body_failed.set(true);
                // a body outliving its time limit is already reported
                if !inner.timed_out.get() {
                    self.report_error(&failure);
                }
            }
            self.drain().await;
        });

        match inner.timeout {
            Some(limit) => {
                tokio::select! {
                    biased;
                    _ = &mut work => {}
                    _ = sleep(limit) => {
                        inner.timed_out.set(true);
                        inner.scope.fire(CancelReason::Timeout(limit));
                        self.report_error(&CaseFailure::TimedOut(limit));
                        work.await;
                    }
                }
            }
            None => work.await,
        }

        inner.scope.fire(CancelReason::Settled);
        inner.link.borrow_mut().take();

        // hooks registered by a running hook run after it
        loop {
            let hooks = std::mem::take(&mut *inner.finish_hooks.borrow_mut());
            if hooks.is_empty() {
                break;
            }
            for hook in hooks {
                if let Err(failure) = run_body(async move { hook().await }).await {
                    warn!(title = %inner.title, stage = %HookStage::OnFinish, %failure, "hook failed");
                    inner.run.report.borrow_mut().mark_failed();
                    inner.run.emit(FormatError::HookError, |formatter| {
                        formatter.fmt_hook_error(FmtHookError {
                            title: &inner.title,
                            stage: HookStage::OnFinish,
                            failure: &failure,
                        })
                    });
                }
            }
        }

        if let Some(limiter) = &inner.limiter {
            limiter.cleanup();
        }
        debug!(title = %inner.title, "group settled");
    }

    /// Wait until every registered child settled, including children
    /// registered while waiting.
    async fn drain(&self) {
        loop {
            let pending = std::mem::take(&mut *self.0.pending.borrow_mut());
            if pending.is_empty() {
                return;
            }
            for completion in pending {
                completion.wait().await;
            }
        }
    }

    fn report_error(&self, failure: &CaseFailure) {
        warn!(title = %self.0.title, %failure, "group failed");
        self.0.run.report.borrow_mut().mark_failed();
        self.0.run.emit(FormatError::GroupError, |formatter| {
            formatter.fmt_group_error(FmtGroupError {
                title: &self.0.title,
                failure,
            })
        });
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("title", &self.0.title)
            .field("policy", &self.0.policy)
            .field("timeout", &self.0.timeout)
            .field("skipped", &self.is_skipped())
            .field("pending", &self.0.pending.borrow().len())
            .finish()
    }
}
