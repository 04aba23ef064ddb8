//! Cancellation scopes and how they are linked together.
//!
//! Every group invocation and every case attempt owns a [`CancelScope`].
//! A scope fires at most once, with a [`CancelReason`], and notifies its
//! listeners synchronously in the same turn.
//!
//! Scopes form a tree through [`link`]: a child fires whenever its parent
//! fires and carries the parent's reason. Linking to a parent that already
//! fired fires the child immediately, so there is no window in which a late
//! child believes it still has a live budget.
//!
//! Cancellation is cooperative. Firing a scope never interrupts a running
//! body by itself, bodies observe the signal through [`CancelScope::cancelled`]
//! or [`CancelScope::guard`].

use std::{
    cell::{Cell, OnceCell, RefCell},
    fmt,
    future::Future,
    rc::{Rc, Weak},
    time::Duration,
};

use tokio::sync::Notify;

use crate::error::CancelReason;

type Listener = Box<dyn FnOnce(&CancelReason)>;

/// Identifies a listener registered with [`CancelScope::on_fire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct ScopeInner {
    reason: OnceCell<CancelReason>,
    listeners: RefCell<Vec<(ListenerId, Listener)>>,
    next_id: Cell<u64>,
    notify: Notify,
}

/// A cancellation and timeout domain.
///
/// Cloning a scope is cheap and yields a handle to the same scope.
#[derive(Clone, Default)]
pub struct CancelScope(Rc<ScopeInner>);

impl CancelScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the scope.
    ///
    /// The first call sets the reason and runs every listener in registration
    /// order. Later calls are ignored.
    pub fn fire(&self, reason: CancelReason) {
        if self.0.reason.set(reason).is_err() {
            return;
        }

        let Some(reason) = self.0.reason.get() else {
            return;
        };

        // listeners may unlink from this scope while we notify them
        let listeners = std::mem::take(&mut *self.0.listeners.borrow_mut());
        for (_, listener) in listeners {
            listener(reason);
        }
        self.0.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        self.0.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.0.reason.get().cloned()
    }

    /// Register a listener that runs when the scope fires.
    ///
    /// A listener registered after the scope fired is never called, use
    /// [`link`] when a late subscriber must observe an earlier fire.
    pub fn on_fire(&self, listener: impl FnOnce(&CancelReason) + 'static) -> ListenerId {
        let id = ListenerId(self.0.next_id.get());
        self.0.next_id.set(id.0 + 1);
        if !self.is_fired() {
            self.0.listeners.borrow_mut().push((id, Box::new(listener)));
        }
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.0.listeners.borrow_mut().retain(|(other, _)| *other != id);
    }

    pub fn listener_count(&self) -> usize {
        self.0.listeners.borrow().len()
    }

    /// Wait until the scope fires and return the reason.
    pub async fn cancelled(&self) -> CancelReason {
        loop {
            let notified = self.0.notify.notified();
            if let Some(reason) = self.reason() {
                return reason;
            }
            notified.await;
        }
    }

    /// Run `fut` until it completes or the scope fires, whichever comes first.
    ///
    /// If the scope already fired, `fut` is never polled.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, CancelReason> {
        if let Some(reason) = self.reason() {
            return Err(reason);
        }

        tokio::select! {
            biased;
            reason = self.cancelled() => Err(reason),
            output = fut => Ok(output),
        }
    }

    fn downgrade(&self) -> Weak<ScopeInner> {
        Rc::downgrade(&self.0)
    }
}

impl fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelScope")
            .field("reason", &self.0.reason.get())
            .field("listeners", &self.0.listeners.borrow().len())
            .finish()
    }
}

/// A subscription of a child scope to a parent scope.
///
/// Dropping the link (or calling [`Link::unlink`]) removes the listener from
/// the parent.
#[must_use = "dropping a link unlinks it immediately"]
#[derive(Debug)]
pub struct Link {
    parent: CancelScope,
    id: ListenerId,
}

impl Link {
    pub fn unlink(self) {}
}

impl Drop for Link {
    fn drop(&mut self) {
        self.parent.remove_listener(self.id);
    }
}

/// Make `child` fire whenever `parent` fires, with the parent's reason.
///
/// If `parent` already fired, `child` fires before this function returns.
pub fn link(child: &CancelScope, parent: &CancelScope) -> Link {
    let weak = child.downgrade();
    let id = parent.on_fire(move |reason| {
        if let Some(inner) = weak.upgrade() {
            CancelScope(inner).fire(reason.clone());
        }
    });

    if let Some(reason) = parent.reason() {
        child.fire(reason);
    }

    Link {
        parent: parent.clone(),
        id,
    }
}

/// Race `task` against a timer.
///
/// When the timer wins, `scope` fires with [`CancelReason::Timeout`] and the
/// task is dropped. A `None` or zero limit runs the task without a timer.
pub async fn with_time_limit<F: Future>(
    task: F,
    limit: Option<Duration>,
    scope: &CancelScope,
) -> Result<F::Output, CancelReason> {
    let Some(limit) = limit.filter(|limit| !limit.is_zero()) else {
        return Ok(task.await);
    };

    tokio::select! {
        biased;
        output = task => Ok(output),
        _ = tokio::time::sleep(limit) => {
            let reason = CancelReason::Timeout(limit);
            scope.fire(reason.clone());
            Err(reason)
        }
    }
}
