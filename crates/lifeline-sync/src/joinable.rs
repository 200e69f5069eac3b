//! Thread-bound action scheduler.
//!
//! A [`JoinableThread`] owns a lock-free FIFO of callbacks
//! ([`crossbeam::queue::SegQueue`]) that only its bound thread drains.  Any
//! thread may [`schedule`](JoinableThread::schedule) work onto it.
//!
//! Two bindings exist:
//!
//! - [`JoinableThread::create`] spawns a background thread whose drain loop
//!   pops callbacks and backs off between empty polls.
//! - [`JoinableThread::create_from_current_thread`] binds to the caller,
//!   which drives the queue itself through
//!   [`run_next`](JoinableThread::run_next) or
//!   [`run_loop`](JoinableThread::run_loop).
//!
//! # Futures and hopping
//!
//! [`JoinableThread::spawn`] runs a future on the bound thread: every wake
//! enqueues a poll as an ordinary callback.  Inside such a future,
//! `other.switch_to().await` moves the rest of the future onto `other`.
//! Awaited from any other executor, [`SwitchTo`] resolves once the target
//! thread has drained everything scheduled before it.
//!
//! ```rust,no_run
//! # use lifeline_sync::joinable::JoinableThread;
//! # use lifeline_sync::disposable::Disposable;
//! let ui = JoinableThread::create().unwrap();
//! let worker = JoinableThread::create().unwrap();
//! let ui_target = ui.target();
//! worker
//!     .spawn(async move {
//!         // ... runs on `worker`
//!         ui_target.switch_to().await.unwrap();
//!         // ... continues on `ui`
//!     })
//!     .unwrap();
//! worker.dispose();
//! ui.dispose();
//! ```
//!
//! # Lifecycle
//!
//! `Live -> Disposed`.  Disposal stops the drain loop, joins the background
//! thread (unless disposal runs on that very thread) and discards whatever is
//! still queued.  Scheduling afterwards fails with
//! [`SyncError::ObjectDisposed`].

use std::cell::Cell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::queue::SegQueue;
use futures::future::BoxFuture;
use futures::task::{ArcWake, AtomicWaker, waker_ref};
use futures::FutureExt;

use crate::backoff;
use crate::cancel::CancellationToken;
use crate::config::JoinableThreadConfig;
use crate::disposable::{Disposable, Lifecycle};
use crate::error::{Result, SyncError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A callback queued onto a [`JoinableThread`].
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Scheduler bound to a single thread.
pub struct JoinableThread {
    shared: Arc<Shared>,
    thread: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Queue and lifecycle shared by the handle, its worker, and task wakers.
struct Shared {
    queue: SegQueue<Action>,
    lifecycle: Lifecycle,
    name: Option<String>,
}

/// A cheap, cloneable handle for hopping onto a [`JoinableThread`] from
/// code that does not own it.
#[derive(Clone)]
pub struct ThreadTarget {
    shared: Arc<Shared>,
}

static NEXT_WORKER: AtomicUsize = AtomicUsize::new(1);

// ---------------------------------------------------------------------------
// JoinableThread
// ---------------------------------------------------------------------------

impl JoinableThread {
    /// Spawn a background thread with default options and bind to it.
    pub fn create() -> Result<Self> {
        Self::create_with(JoinableThreadConfig::default())
    }

    /// Spawn a background thread configured by `config` and bind to it.
    pub fn create_with(config: JoinableThreadConfig) -> Result<Self> {
        let name = config.name.unwrap_or_else(|| {
            format!(
                "lifeline-joinable-{}",
                NEXT_WORKER.fetch_add(1, Ordering::Relaxed)
            )
        });
        let shared = Arc::new(Shared::new(Some(name.clone())));

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(bytes) = config.stack_size {
            builder = builder.stack_size(bytes);
        }
        let worker_shared = Arc::clone(&shared);
        let handle = builder
            .spawn(move || {
                tracing::debug!("joinable thread started");
                worker_shared.drain_until_disposed();
                tracing::debug!("joinable thread stopped");
            })
            .map_err(|e| SyncError::ThreadSpawn {
                reason: e.to_string(),
            })?;

        tracing::debug!(thread_name = %name, "joinable thread created");
        Ok(Self {
            shared,
            thread: handle.thread().id(),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Bind to the calling thread.  The caller drives the queue with
    /// [`run_next`](Self::run_next) or [`run_loop`](Self::run_loop).
    pub fn create_from_current_thread() -> Self {
        let current = thread::current();
        tracing::debug!(thread_name = ?current.name(), "joinable thread bound to current thread");
        Self {
            shared: Arc::new(Shared::new(current.name().map(str::to_owned))),
            thread: current.id(),
            worker: Mutex::new(None),
        }
    }

    /// Enqueue `action` to run on the bound thread.
    pub fn schedule<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_safely(|| self.shared.queue.push(Box::new(action)))
    }

    /// Run `future` to completion on the bound thread.
    pub fn spawn<F>(&self, future: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.ensure_not_disposed()?;
        let task = Arc::new(Task {
            future: Mutex::new(Some(future.boxed())),
            home: Mutex::new(Arc::clone(&self.shared)),
        });
        task.schedule()
    }

    /// A suspension point that continues on this thread.
    pub fn switch_to(&self) -> SwitchTo {
        SwitchTo::new(Arc::clone(&self.shared))
    }

    /// A cloneable handle that can [`switch_to`](ThreadTarget::switch_to)
    /// this thread without borrowing the owner.
    pub fn target(&self) -> ThreadTarget {
        ThreadTarget {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Execute exactly one pending callback, if any.  Returns whether one
    /// ran.  Must be called on the bound thread.
    pub fn run_next(&self) -> Result<bool> {
        self.ensure_bound_thread("run_next")?;
        self.ensure_not_disposed()?;
        match self.shared.queue.pop() {
            Some(action) => {
                run_action(action);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drain callbacks until `cancel` fires or the thread is disposed.
    /// Must be called on the bound thread.
    pub fn run_loop(&self, cancel: &CancellationToken) -> Result<()> {
        self.ensure_bound_thread("run_loop")?;
        self.ensure_not_disposed()?;
        let mut executed = 0usize;
        while !cancel.is_cancelled() && !self.shared.is_stopping() {
            match self.shared.queue.pop() {
                Some(action) => {
                    run_action(action);
                    executed += 1;
                }
                None => {
                    backoff::maybe_yield();
                }
            }
        }
        tracing::debug!(executed, cancelled = cancel.is_cancelled(), "run loop exited");
        Ok(())
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// Whether the calling thread is the bound thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    /// Number of callbacks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    fn ensure_bound_thread(&self, operation: &str) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(SyncError::InvalidOperation {
                type_name: self.type_name(),
                reason: format!("{operation} must be called on the bound thread"),
            })
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Disposable for JoinableThread {
    fn lifecycle(&self) -> &Lifecycle {
        &self.shared.lifecycle
    }

    fn dispose_core(&self, disposing: bool) {
        if disposing {
            let handle = self.worker().take();
            if let Some(handle) = handle {
                if handle.thread().id() == thread::current().id() {
                    tracing::trace!("disposed from its own worker; not joining");
                } else if handle.join().is_err() {
                    tracing::error!(thread_name = ?self.name(), "joinable worker panicked");
                }
            }
        }
        let discarded = self.shared.discard_pending();
        if discarded > 0 {
            tracing::debug!(discarded, thread_name = ?self.name(), "discarded pending callbacks");
        }
    }
}

impl Drop for JoinableThread {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl std::fmt::Debug for JoinableThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinableThread")
            .field("name", &self.name())
            .field("thread", &self.thread)
            .field("pending", &self.pending())
            .field("state", &self.shared.lifecycle.state())
            .finish()
    }
}

impl ThreadTarget {
    /// See [`JoinableThread::switch_to`].
    pub fn switch_to(&self) -> SwitchTo {
        SwitchTo::new(Arc::clone(&self.shared))
    }
}

// ---------------------------------------------------------------------------
// Shared queue
// ---------------------------------------------------------------------------

impl Shared {
    fn new(name: Option<String>) -> Self {
        Self {
            queue: SegQueue::new(),
            lifecycle: Lifecycle::new(),
            name,
        }
    }

    fn is_stopping(&self) -> bool {
        self.lifecycle.is_disposing() || self.lifecycle.is_disposed()
    }

    /// Enqueue under a run-lock so nothing lands after disposal began.
    fn post(&self, action: Action) -> Result<()> {
        let type_name = std::any::type_name::<JoinableThread>();
        self.lifecycle.enter(type_name)?;
        self.queue.push(action);
        self.lifecycle.leave(type_name)
    }

    fn drain_until_disposed(&self) {
        while !self.is_stopping() {
            match self.queue.pop() {
                Some(action) => run_action(action),
                None => {
                    backoff::maybe_yield();
                }
            }
        }
    }

    fn discard_pending(&self) -> usize {
        let mut discarded = 0;
        while self.queue.pop().is_some() {
            discarded += 1;
        }
        discarded
    }
}

fn run_action(action: Action) {
    if std::panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
        tracing::error!("scheduled callback panicked");
    }
}

// ---------------------------------------------------------------------------
// Task executor
// ---------------------------------------------------------------------------

thread_local! {
    /// The task being polled on this thread, if any.
    static CURRENT_TASK: Cell<Option<Arc<Task>>> = const { Cell::new(None) };
}

/// A spawned future.  `home` is the thread its next poll is scheduled on.
struct Task {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    home: Mutex<Arc<Shared>>,
}

impl Task {
    fn home(&self) -> MutexGuard<'_, Arc<Shared>> {
        self.home.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule(self: &Arc<Self>) -> Result<()> {
        let home = Arc::clone(&self.home());
        let task = Arc::clone(self);
        home.post(Box::new(move || task.poll()))
    }

    fn poll(self: Arc<Self>) {
        let mut slot = self.future.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(mut future) = slot.take() else {
            return;
        };
        let waker = waker_ref(&self);
        let mut cx = Context::from_waker(&waker);

        let previous = CURRENT_TASK.with(|current| current.replace(Some(Arc::clone(&self))));
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
        CURRENT_TASK.with(|current| current.set(previous));

        match outcome {
            Ok(Poll::Pending) => *slot = Some(future),
            Ok(Poll::Ready(())) => {}
            Err(_) => tracing::error!("spawned future panicked"),
        }
    }
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if let Err(err) = arc_self.schedule() {
            tracing::debug!(error = %err, "dropping task woken onto a disposed thread");
        }
    }
}

fn current_task() -> Option<Arc<Task>> {
    CURRENT_TASK.with(|current| {
        let task = current.take();
        current.set(task.clone());
        task
    })
}

// ---------------------------------------------------------------------------
// SwitchTo
// ---------------------------------------------------------------------------

const HOP_PENDING: u8 = 0;
const HOP_DONE: u8 = 1;
const HOP_CANCELLED: u8 = 2;

#[derive(Default)]
struct HopState {
    status: AtomicU8,
    waker: AtomicWaker,
    /// A task re-homed onto the target, with the home it left.  Restored if
    /// the hop is cancelled so the task resumes where it came from.
    origin: Mutex<Option<(Arc<Task>, Arc<Shared>)>>,
}

impl HopState {
    fn finish(&self, status: u8) {
        if self
            .status
            .compare_exchange(HOP_PENDING, status, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let origin = self
                .origin
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if status == HOP_CANCELLED {
                if let Some((task, home)) = origin {
                    tracing::debug!("hop cancelled; returning task to its previous thread");
                    *task.home() = home;
                }
            }
            self.waker.wake();
        }
    }
}

/// The callback enqueued on the target.  Dropping it unrun (the target was
/// disposed) cancels the hop.
struct Hop(Arc<HopState>);

impl Drop for Hop {
    fn drop(&mut self) {
        self.0.finish(HOP_CANCELLED);
    }
}

/// Future returned by [`JoinableThread::switch_to`].
///
/// Resolves to [`SyncError::ObjectDisposed`] if the target is disposed before
/// the hop runs.
#[must_use = "futures do nothing unless awaited"]
pub struct SwitchTo {
    target: Arc<Shared>,
    hop: Option<Arc<HopState>>,
}

impl SwitchTo {
    fn new(target: Arc<Shared>) -> Self {
        Self { target, hop: None }
    }

    fn disposed_error() -> SyncError {
        SyncError::ObjectDisposed {
            type_name: std::any::type_name::<JoinableThread>(),
            in_progress: false,
        }
    }
}

impl Future for SwitchTo {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(hop) = &this.hop {
            hop.waker.register(cx.waker());
            return match hop.status.load(Ordering::Acquire) {
                HOP_DONE => Poll::Ready(Ok(())),
                HOP_CANCELLED => Poll::Ready(Err(Self::disposed_error())),
                _ => Poll::Pending,
            };
        }

        let state = Arc::new(HopState::default());
        state.waker.register(cx.waker());

        // A task driven by a JoinableThread is polled wherever it is homed,
        // so re-home it before the hop can wake it.
        if let Some(task) = current_task() {
            let previous = std::mem::replace(&mut *task.home(), Arc::clone(&this.target));
            *state.origin.lock().unwrap_or_else(PoisonError::into_inner) = Some((task, previous));
        }

        // A post that fails drops the hop, which cancels it and restores the
        // task's home.
        let hop = Hop(Arc::clone(&state));
        if let Err(err) = this.target.post(Box::new(move || hop.0.finish(HOP_DONE))) {
            return Poll::Ready(Err(err));
        }
        this.hop = Some(state);
        Poll::Pending
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
