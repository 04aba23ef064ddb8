//! Concurrency limiting for sibling tasks.
//!
//! A [`Limiter`] is a counting semaphore that hands out [`Permit`]s in strict
//! FIFO order. A waiter joins the queue when [`Limiter::acquire`] is called,
//! not when the returned future is first polled, so admission order is the
//! order in which cases and groups were registered.
//!
//! Three modes exist, selected through [`Parallel`]:
//! - unbounded: no limiter is installed at all
//! - fixed: a classic semaphore with `n >= 1` slots
//! - adaptive: the limit follows the system load, recomputed every
//!   [`ADAPTIVE_INTERVAL`] by a background task
//!
//! Lowering the limit never preempts running holders, it only stops new
//! admissions until enough holders released their permits.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    future::Future,
    num::NonZeroUsize,
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tracing::debug;

/// How often the adaptive limit is recomputed.
pub const ADAPTIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Share of the machine the adaptive limit may give up to load.
pub const MAX_LOAD_REDUCTION: f64 = 0.8;

/// The parallelism policy of a group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Parallel {
    #[default]
    Unbounded,
    Sequential,
    Fixed(NonZeroUsize),
    Auto,
}

impl Parallel {
    /// Build the limiter for this policy, `None` for [`Parallel::Unbounded`].
    ///
    /// [`Parallel::Auto`] spawns its ticker with `spawn_local` and therefore
    /// must be called from within a `LocalSet`.
    pub fn limiter(self) -> Option<Limiter> {
        match self {
            Parallel::Unbounded => None,
            Parallel::Sequential => Some(Limiter::fixed(NonZeroUsize::MIN)),
            Parallel::Fixed(n) => Some(Limiter::fixed(n)),
            Parallel::Auto => Some(Limiter::adaptive()),
        }
    }
}

impl From<bool> for Parallel {
    fn from(value: bool) -> Self {
        match value {
            true => Parallel::Unbounded,
            false => Parallel::Sequential,
        }
    }
}

impl From<NonZeroUsize> for Parallel {
    fn from(value: NonZeroUsize) -> Self {
        Parallel::Fixed(value)
    }
}

/// Compute the adaptive limit from a CPU count and a one minute load average.
///
/// `floor(cpus * (1 - min(load / cpus, 0.8)))`, clamped to `[1, cpus]`.
/// A platform reporting no load (zero) gets `cpus`.
pub fn adaptive_limit(cpus: usize, load: f64) -> usize {
    let cpus = cpus.max(1);
    let pressure = (load / cpus as f64).clamp(0.0, MAX_LOAD_REDUCTION);
    let limit = (cpus as f64 * (1.0 - pressure)).floor() as usize;
    limit.clamp(1, cpus)
}

fn sample_adaptive_limit() -> usize {
    let cpus = std::thread::available_parallelism()
        .unwrap_or(NonZeroUsize::MIN)
        .get();
    let load = sysinfo::System::load_average().one;
    adaptive_limit(cpus, load)
}

struct LimiterState {
    limit: usize,
    running: usize,
    queue: VecDeque<oneshot::Sender<()>>,
}

impl LimiterState {
    /// Admit queued waiters while there is room.
    fn admit(&mut self) {
        while self.running < self.limit {
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            // a waiter that gave up dropped its receiver, skip it
            if waiter.send(()).is_ok() {
                self.running += 1;
            }
        }
    }
}

struct LimiterInner {
    state: RefCell<LimiterState>,
    ticker: RefCell<Option<JoinHandle<()>>>,
    adaptive: Cell<bool>,
}

impl LimiterInner {
    fn release(&self) {
        let mut state = self.state.borrow_mut();
        state.running = state.running.saturating_sub(1);
        state.admit();
    }
}

impl Drop for LimiterInner {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}

/// A FIFO counting semaphore.
#[derive(Clone)]
pub struct Limiter(Rc<LimiterInner>);

impl Limiter {
    pub fn fixed(limit: NonZeroUsize) -> Self {
        Self::with_limit(limit.get())
    }

    /// A limiter that follows system load.
    ///
    /// Must be called from within a `LocalSet`.
    pub fn adaptive() -> Self {
        let limiter = Self::with_limit(sample_adaptive_limit());
        limiter.0.adaptive.set(true);

        let weak = Rc::downgrade(&limiter.0);
        let ticker = tokio::task::spawn_local(async move {
            let mut ticks = interval_at(Instant::now() + ADAPTIVE_INTERVAL, ADAPTIVE_INTERVAL);
            loop {
                ticks.tick().await;
                let Some(inner) = Weak::upgrade(&weak) else {
                    return;
                };
                Limiter(inner).set_limit(sample_adaptive_limit());
            }
        });
        *limiter.0.ticker.borrow_mut() = Some(ticker);
        limiter
    }

    fn with_limit(limit: usize) -> Self {
        Self(Rc::new(LimiterInner {
            state: RefCell::new(LimiterState {
                limit: limit.max(1),
                running: 0,
                queue: VecDeque::new(),
            }),
            ticker: RefCell::new(None),
            adaptive: Cell::new(false),
        }))
    }

    /// Request a slot.
    ///
    /// The caller is placed in the queue right away. The returned future
    /// resolves to a [`Permit`] once the slot is granted.
    pub fn acquire(&self) -> Acquire {
        let mut state = self.0.state.borrow_mut();
        if state.queue.is_empty() && state.running < state.limit {
            state.running += 1;
            return Acquire(AcquireState::Ready(Some(Permit(Rc::clone(&self.0)))));
        }

        let (tx, rx) = oneshot::channel();
        state.queue.push_back(tx);
        Acquire(AcquireState::Queued {
            limiter: Rc::clone(&self.0),
            rx,
        })
    }

    /// Change the admission ceiling, a value of `0` is treated as `1`.
    pub fn set_limit(&self, limit: usize) {
        let mut state = self.0.state.borrow_mut();
        let limit = limit.max(1);
        if state.limit != limit {
            debug!(from = state.limit, to = limit, "limiter ceiling changed");
        }
        state.limit = limit;
        state.admit();
    }

    pub fn limit(&self) -> usize {
        self.0.state.borrow().limit
    }

    pub fn running(&self) -> usize {
        self.0.state.borrow().running
    }

    pub fn queued(&self) -> usize {
        self.0.state.borrow().queue.len()
    }

    pub fn is_adaptive(&self) -> bool {
        self.0.adaptive.get()
    }

    /// Whether the adaptive ticker is still recomputing the limit.
    pub fn is_ticking(&self) -> bool {
        self.0
            .ticker
            .borrow()
            .as_ref()
            .is_some_and(|ticker| !ticker.is_finished())
    }

    /// Stop the adaptive ticker, if any.
    pub fn cleanup(&self) {
        if let Some(ticker) = self.0.ticker.borrow_mut().take() {
            ticker.abort();
        }
    }
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.borrow();
        f.debug_struct("Limiter")
            .field("limit", &state.limit)
            .field("running", &state.running)
            .field("queued", &state.queue.len())
            .field("adaptive", &self.0.adaptive.get())
            .finish()
    }
}

/// A held slot of a [`Limiter`], released on drop.
pub struct Permit(Rc<LimiterInner>);

impl Drop for Permit {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Permit")
    }
}

/// Future returned by [`Limiter::acquire`].
pub struct Acquire(AcquireState);

enum AcquireState {
    Ready(Option<Permit>),
    Queued {
        limiter: Rc<LimiterInner>,
        rx: oneshot::Receiver<()>,
    },
}

impl Acquire {
    /// Whether the slot was granted at request time.
    pub fn is_ready(&self) -> bool {
        matches!(self.0, AcquireState::Ready(_))
    }
}

impl Future for Acquire {
    type Output = Permit;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().0 {
            AcquireState::Ready(permit) => match permit.take() {
                Some(permit) => Poll::Ready(permit),
                None => Poll::Pending,
            },
            AcquireState::Queued { limiter, rx } => match Pin::new(rx).poll(cx) {
                // the sender is only dropped with the limiter, which we keep alive
                Poll::Ready(_) => Poll::Ready(Permit(Rc::clone(limiter))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        if let AcquireState::Queued { limiter, rx } = &mut self.0 {
            rx.close();
            // granted but never picked up, hand the slot on
            if rx.try_recv().is_ok() {
                limiter.release();
            }
        }
    }
}

impl fmt::Debug for Acquire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            AcquireState::Ready(_) => f.write_str("Acquire::Ready"),
            AcquireState::Queued { .. } => f.write_str("Acquire::Queued"),
        }
    }
}
