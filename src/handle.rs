//! Awaitable handles for registered cases and groups.
//!
//! Registering a case or a group never blocks: the work is spawned onto the
//! local set and a handle is returned. Awaiting the handle waits for the work
//! to settle. Awaited work still waits for its turn in the limiter queue of
//! its group.

use std::{cell::Cell, fmt, future::IntoFuture, rc::Rc};

use futures::{FutureExt, future::LocalBoxFuture};
use tokio::sync::Notify;

use crate::{orchestrator::RunState, outcome::CaseOutcome, report::CaseId};

#[derive(Default)]
struct Flag {
    set: Cell<bool>,
    notify: Notify,
}

impl Flag {
    fn set(&self) {
        if !self.set.replace(true) {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.set.get() {
                return;
            }
            notified.await;
        }
    }
}

/// Signals that a spawned case or group settled.
#[derive(Clone, Default)]
pub(crate) struct Completion(Rc<Flag>);

impl Completion {
    pub(crate) fn complete(&self) {
        self.0.set();
    }

    pub(crate) fn is_done(&self) -> bool {
        self.0.set.get()
    }

    pub(crate) async fn wait(&self) {
        self.0.wait().await
    }
}

/// Handle to a registered case.
///
/// Resolves to the final outcome of the case, or `None` when the case was
/// filtered out and never recorded.
pub struct CaseHandle {
    pub(crate) run: Rc<RunState>,
    pub(crate) id: Option<CaseId>,
    pub(crate) completion: Completion,
}

impl CaseHandle {
    pub fn is_finished(&self) -> bool {
        self.completion.is_done()
    }
}

impl fmt::Debug for CaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl IntoFuture for CaseHandle {
    type Output = Option<CaseOutcome>;
    type IntoFuture = LocalBoxFuture<'static, Option<CaseOutcome>>;

    fn into_future(self) -> Self::IntoFuture {
        async move {
            let id = self.id?;
            self.completion.wait().await;
            Some(self.run.report.borrow().outcome(id))
        }
        .boxed_local()
    }
}

/// Handle to a registered group, resolves once the group and all of its
/// children settled and its finish hooks ran.
pub struct GroupHandle {
    pub(crate) completion: Completion,
}

impl GroupHandle {
    pub fn is_finished(&self) -> bool {
        self.completion.is_done()
    }
}

impl fmt::Debug for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl IntoFuture for GroupHandle {
    type Output = ();
    type IntoFuture = LocalBoxFuture<'static, ()>;

    fn into_future(self) -> Self::IntoFuture {
        async move {
            self.completion.wait().await;
        }
        .boxed_local()
    }
}
