//! Exactly-once teardown with in-flight operation tracking.
//!
//! A type opts in by embedding a [`Lifecycle`] and implementing
//! [`Disposable`].  The trait supplies the whole protocol; implementors only
//! override the teardown hooks they need.
//!
//! # State machine
//!
//! ```text
//! Live  --dispose()-->  Disposing  --hook done-->  Disposed
//!   ^                                                 |
//!   +------------- try_clear_disposed() --------------+   (opt-in only)
//! ```
//!
//! The state word carries two independent bits, `DISPOSING` and `DISPOSED`,
//! and is only ever mutated through compare-and-swap.  A second counter,
//! `run_locks`, tracks operations currently executing against the object.
//! Only the caller whose CAS moves the object out of `Live` runs teardown;
//! every other concurrent disposer returns immediately.  Teardown waits for
//! `run_locks` to drain before the hook runs, and `DISPOSED` becomes visible
//! only after the hook has returned.
//!
//! # Usage
//!
//! ```rust
//! use lifeline_sync::disposable::{Disposable, Lifecycle};
//!
//! struct Connection {
//!     lifecycle: Lifecycle,
//! }
//!
//! impl Disposable for Connection {
//!     fn lifecycle(&self) -> &Lifecycle {
//!         &self.lifecycle
//!     }
//!
//!     fn dispose_core(&self, _disposing: bool) {
//!         // close sockets, flush buffers, ...
//!     }
//! }
//!
//! let conn = Connection { lifecycle: Lifecycle::new() };
//! conn.run_safely(|| { /* use the connection */ }).unwrap();
//! conn.dispose();
//! assert!(conn.is_disposed());
//! assert!(conn.ensure_not_disposed().is_err());
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::FutureExt;

use crate::backoff;
use crate::error::{Result, SyncError};

const DISPOSING: u32 = 0b01;
const DISPOSED: u32 = 0b10;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Snapshot of a [`Lifecycle`]'s state word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Accepting operations.
    Live,
    /// A disposer won the race and teardown is running.
    Disposing,
    /// Teardown finished.
    Disposed,
}

/// The shared words behind [`Disposable`]: a two-bit state and a run-lock
/// count.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: AtomicU32,
    run_locks: AtomicUsize,
}

impl Lifecycle {
    /// A live lifecycle with no outstanding run-locks.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            run_locks: AtomicUsize::new(0),
        }
    }

    /// Current state.  `Disposed` wins if both bits are momentarily set.
    pub fn state(&self) -> LifecycleState {
        let bits = self.state.load(Ordering::SeqCst);
        if bits & DISPOSED != 0 {
            LifecycleState::Disposed
        } else if bits & DISPOSING != 0 {
            LifecycleState::Disposing
        } else {
            LifecycleState::Live
        }
    }

    /// Number of operations currently holding a run-lock.
    pub fn run_locks(&self) -> usize {
        self.run_locks.load(Ordering::SeqCst)
    }

    pub fn is_disposing(&self) -> bool {
        self.state.load(Ordering::SeqCst) & DISPOSING != 0
    }

    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::SeqCst) & DISPOSED != 0
    }

    /// Fail with [`SyncError::ObjectDisposed`] unless the object is live.
    pub fn check(&self, type_name: &'static str) -> Result<()> {
        let bits = self.state.load(Ordering::SeqCst);
        if bits & DISPOSING != 0 {
            Err(SyncError::ObjectDisposed {
                type_name,
                in_progress: true,
            })
        } else if bits & DISPOSED != 0 {
            Err(SyncError::ObjectDisposed {
                type_name,
                in_progress: false,
            })
        } else {
            Ok(())
        }
    }

    /// Increment the run-lock count, rolling it back if the object is not
    /// live.
    pub fn enter(&self, type_name: &'static str) -> Result<()> {
        self.run_locks.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.check(type_name) {
            self.run_locks.fetch_sub(1, Ordering::SeqCst);
            return Err(err);
        }
        Ok(())
    }

    /// Decrement the run-lock count.  Fails if no run-lock is outstanding.
    pub fn leave(&self, type_name: &'static str) -> Result<()> {
        self.run_locks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| SyncError::InvalidOperation {
                type_name,
                reason: "leave_run_lock called without a matching enter_run_lock".into(),
            })
    }

    /// Move `Live -> Disposing`.  Returns `true` only for the winning caller.
    fn try_begin_dispose(&self) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current & (DISPOSING | DISPOSED) != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                current | DISPOSING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn wait_for_run_locks(&self) {
        let mut i = 0usize;
        while self.run_locks() != 0 {
            backoff::maybe_yield_at(i);
            i = i.wrapping_add(1);
        }
    }

    async fn wait_for_run_locks_async(&self) {
        let mut i = 0usize;
        while self.run_locks() != 0 {
            if !backoff::maybe_yield_async_at(i).await {
                std::hint::spin_loop();
            }
            i = i.wrapping_add(1);
        }
    }

    /// Publish `DISPOSED`, then drop `DISPOSING`.
    fn complete_dispose(&self) {
        self.state.fetch_or(DISPOSED, Ordering::SeqCst);
        self.state.fetch_and(!DISPOSING, Ordering::SeqCst);
    }

    /// Clear `DISPOSED` unless a disposal is in flight.
    fn try_clear(&self) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current & DISPOSING != 0 || current & DISPOSED == 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                current & !DISPOSED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Disposable
// ---------------------------------------------------------------------------

/// Lifecycle protocol for resource-owning types.
///
/// Public methods of an implementor should start with
/// [`ensure_not_disposed`](Self::ensure_not_disposed) or run their body
/// through [`run_safely`](Self::run_safely).  Implementors that need the
/// drop path should call [`finalize`](Self::finalize) from their `Drop`.
///
/// Teardown hooks must tolerate a partially constructed object and must not
/// fail.  A panic inside a hook is caught and logged; the object still ends
/// up disposed.
#[async_trait]
pub trait Disposable: Send + Sync {
    /// The embedded state words.
    fn lifecycle(&self) -> &Lifecycle;

    /// Synchronous teardown.  `disposing` is `false` on the drop path, where
    /// only resources nothing else will reclaim should be released.
    fn dispose_core(&self, disposing: bool) {
        let _ = disposing;
    }

    /// Asynchronous teardown used by [`dispose_async`](Self::dispose_async).
    async fn dispose_core_async(&self) {
        self.dispose_core(true);
    }

    /// Whether [`try_clear_disposed`](Self::try_clear_disposed) may
    /// reactivate this object.
    fn can_clear_disposed(&self) -> bool {
        false
    }

    /// Name reported in disposed-object errors.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn is_disposing(&self) -> bool {
        self.lifecycle().is_disposing()
    }

    fn is_disposed(&self) -> bool {
        self.lifecycle().is_disposed()
    }

    /// Tear the object down, blocking until in-flight run-locks drain.
    ///
    /// Idempotent: concurrent and repeated calls return without effect once
    /// another caller has started disposal.  Calling this while the current
    /// thread itself holds a run-lock on the object never returns.
    fn dispose(&self) {
        let lifecycle = self.lifecycle();
        if !lifecycle.try_begin_dispose() {
            return;
        }
        let type_name = self.type_name();
        tracing::debug!(type_name, run_locks = lifecycle.run_locks(), "dispose started");

        lifecycle.wait_for_run_locks();
        if std::panic::catch_unwind(AssertUnwindSafe(|| self.dispose_core(true))).is_err() {
            tracing::error!(type_name, "teardown hook panicked");
        }
        lifecycle.complete_dispose();

        tracing::debug!(type_name, "disposed");
    }

    /// Cooperative variant of [`dispose`](Self::dispose).
    ///
    /// The object stays `Disposing` (and rejects run-locks) for the whole
    /// asynchronous teardown; `DISPOSED` is set after it completes.
    async fn dispose_async(&self) {
        let lifecycle = self.lifecycle();
        if !lifecycle.try_begin_dispose() {
            return;
        }
        let type_name = self.type_name();
        tracing::debug!(type_name, run_locks = lifecycle.run_locks(), "async dispose started");

        lifecycle.wait_for_run_locks_async().await;
        if AssertUnwindSafe(self.dispose_core_async())
            .catch_unwind()
            .await
            .is_err()
        {
            tracing::error!(type_name, "async teardown hook panicked");
        }
        lifecycle.complete_dispose();

        tracing::debug!(type_name, "disposed");
    }

    /// Drop-path teardown: runs `dispose_core(false)` if nobody disposed the
    /// object explicitly.
    ///
    /// A [`Lifecycle`] shared beyond the dropped value can still carry
    /// run-locks from other threads; those drain before the hook runs.
    fn finalize(&self) {
        let lifecycle = self.lifecycle();
        if !lifecycle.try_begin_dispose() {
            return;
        }
        let type_name = self.type_name();
        tracing::trace!(type_name, run_locks = lifecycle.run_locks(), "finalizing undisposed object");
        lifecycle.wait_for_run_locks();
        if std::panic::catch_unwind(AssertUnwindSafe(|| self.dispose_core(false))).is_err() {
            tracing::error!(type_name, "finalizer teardown hook panicked");
        }
        lifecycle.complete_dispose();
    }

    /// Fail with [`SyncError::ObjectDisposed`] unless the object is live.
    fn ensure_not_disposed(&self) -> Result<()> {
        self.lifecycle().check(self.type_name())
    }

    /// Register an in-flight operation.  Pair with
    /// [`leave_run_lock`](Self::leave_run_lock), or prefer
    /// [`run_lock`](Self::run_lock).
    fn enter_run_lock(&self) -> Result<()> {
        self.lifecycle().enter(self.type_name())
    }

    fn leave_run_lock(&self) -> Result<()> {
        self.lifecycle().leave(self.type_name())
    }

    /// Enter a run-lock released when the returned guard drops.
    fn run_lock(&self) -> Result<RunLockGuard<'_>> {
        let type_name = self.type_name();
        self.lifecycle().enter(type_name)?;
        Ok(RunLockGuard {
            lifecycle: self.lifecycle(),
            type_name,
        })
    }

    /// Run `action` under a run-lock.  The lock is released on every exit
    /// path, unwinding included.
    fn run_safely<R, F>(&self, action: F) -> Result<R>
    where
        Self: Sized,
        F: FnOnce() -> R,
    {
        let _guard = self.run_lock()?;
        Ok(action())
    }

    /// Async counterpart of [`run_safely`](Self::run_safely); the run-lock
    /// is held until the future returned by `action` completes.
    async fn run_safely_async<R, F, Fut>(&self, action: F) -> Result<R>
    where
        Self: Sized,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = R> + Send,
        R: Send,
    {
        let _guard = self.run_lock()?;
        Ok(action().await)
    }

    /// Reactivate a disposed object.
    ///
    /// Refused with [`SyncError::ClearRefused`] unless
    /// [`can_clear_disposed`](Self::can_clear_disposed) is `true`.  Returns
    /// `Ok(false)` while disposal is in flight or when the object is not
    /// disposed.
    fn try_clear_disposed(&self) -> Result<bool> {
        if !self.can_clear_disposed() {
            return Err(SyncError::ClearRefused {
                type_name: self.type_name(),
            });
        }
        let cleared = self.lifecycle().try_clear();
        if cleared {
            tracing::debug!(type_name = self.type_name(), "disposed state cleared");
        }
        Ok(cleared)
    }
}

/// Holds one run-lock on a [`Disposable`] until dropped.
#[must_use = "the run-lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct RunLockGuard<'a> {
    lifecycle: &'a Lifecycle,
    type_name: &'static str,
}

impl Drop for RunLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lifecycle.leave(self.type_name) {
            tracing::error!(error = %err, "run-lock guard released an unbalanced lock");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every teardown invocation.
    #[derive(Default)]
    struct Probe {
        lifecycle: Lifecycle,
        calls: AtomicUsize,
        saw_disposing: Mutex<Vec<bool>>,
        check_during_teardown: Mutex<Option<bool>>,
        panic_in_hook: bool,
    }

    impl Disposable for Probe {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }

        fn dispose_core(&self, disposing: bool) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.saw_disposing.lock().unwrap().push(disposing);
            if let Err(SyncError::ObjectDisposed { in_progress, .. }) = self.ensure_not_disposed()
            {
                *self.check_during_teardown.lock().unwrap() = Some(in_progress);
            }
            if self.panic_in_hook {
                panic!("hook failure");
            }
        }
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            self.finalize();
        }
    }

    /// Shares its teardown log so it can be inspected after drop.
    struct Tracked {
        lifecycle: Lifecycle,
        log: Arc<Mutex<Vec<bool>>>,
    }

    impl Disposable for Tracked {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }

        fn dispose_core(&self, disposing: bool) {
            self.log.lock().unwrap().push(disposing);
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.finalize();
        }
    }

    /// Lifecycle shared with other owners, the way a handle and its worker
    /// share one.
    struct SharedLife {
        lifecycle: Arc<Lifecycle>,
        log: Arc<Mutex<Vec<bool>>>,
    }

    impl Disposable for SharedLife {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }

        fn dispose_core(&self, disposing: bool) {
            self.log.lock().unwrap().push(disposing);
        }
    }

    impl Drop for SharedLife {
        fn drop(&mut self) {
            self.finalize();
        }
    }

    /// Async hook that panics after suspending.
    #[derive(Default)]
    struct PanickyAsync {
        lifecycle: Lifecycle,
        reached: AtomicUsize,
    }

    #[async_trait]
    impl Disposable for PanickyAsync {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }

        async fn dispose_core_async(&self) {
            tokio::task::yield_now().await;
            self.reached.fetch_add(1, Ordering::SeqCst);
            panic!("async hook failure");
        }
    }

    /// Async hook that suspends before finishing.
    #[derive(Default)]
    struct AsyncProbe {
        lifecycle: Lifecycle,
        calls: AtomicUsize,
        disposed_inside_hook: Mutex<Option<bool>>,
    }

    #[async_trait]
    impl Disposable for AsyncProbe {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }

        fn dispose_core(&self, _disposing: bool) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        async fn dispose_core_async(&self) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            *self.disposed_inside_hook.lock().unwrap() = Some(self.is_disposed());
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Opts in to reactivation.
    #[derive(Default)]
    struct Reusable {
        lifecycle: Lifecycle,
    }

    impl Disposable for Reusable {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }

        fn can_clear_disposed(&self) -> bool {
            true
        }
    }

    #[test]
    fn starts_live() {
        let probe = Probe::default();
        assert_eq!(probe.lifecycle().state(), LifecycleState::Live);
        assert_eq!(probe.lifecycle().run_locks(), 0);
        assert!(probe.ensure_not_disposed().is_ok());
    }

    #[test]
    fn dispose_runs_hook_once() {
        let probe = Probe::default();
        probe.dispose();
        probe.dispose();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*probe.saw_disposing.lock().unwrap(), vec![true]);
        assert_eq!(probe.lifecycle().state(), LifecycleState::Disposed);
        assert!(!probe.is_disposing());
    }

    #[test]
    fn concurrent_dispose_runs_hook_once() {
        let probe = Probe::default();
        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| probe.dispose());
            }
        });
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(probe.is_disposed());
    }

    #[test]
    fn hook_sees_disposal_in_progress() {
        let probe = Probe::default();
        probe.dispose();
        assert_eq!(*probe.check_during_teardown.lock().unwrap(), Some(true));
    }

    #[test]
    fn run_lock_delays_teardown() {
        let probe = Arc::new(Probe::default());
        probe.enter_run_lock().expect("live object accepts run-locks");

        let disposer = {
            let probe = Arc::clone(&probe);
            std::thread::spawn(move || probe.dispose())
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(probe.is_disposing());
        assert!(!probe.is_disposed());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);

        probe.leave_run_lock().expect("balanced leave");
        disposer.join().expect("disposer should not panic");
        assert!(probe.is_disposed());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disposed_object_rejects_operations() {
        let probe = Probe::default();
        probe.dispose();

        let err = probe.ensure_not_disposed().unwrap_err();
        assert!(matches!(
            err,
            SyncError::ObjectDisposed {
                in_progress: false,
                ..
            }
        ));
        assert!(probe.enter_run_lock().unwrap_err().is_disposed_error());
        assert!(probe.run_safely(|| ()).unwrap_err().is_disposed_error());
        // The rejected enter was rolled back.
        assert_eq!(probe.lifecycle().run_locks(), 0);
    }

    #[test]
    fn leave_without_enter_is_invalid() {
        let probe = Probe::default();
        let err = probe.leave_run_lock().unwrap_err();
        assert!(err.is_invalid_operation());
        assert_eq!(probe.lifecycle().run_locks(), 0);
    }

    #[test]
    fn run_safely_releases_on_panic() {
        let probe = Probe::default();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            probe.run_safely(|| panic!("inside operation")).ok();
        }));
        assert!(result.is_err());
        assert_eq!(probe.lifecycle().run_locks(), 0);
        probe.dispose();
        assert!(probe.is_disposed());
    }

    #[test]
    fn run_safely_returns_value() {
        let probe = Probe::default();
        let v = probe
            .run_safely(|| {
                assert_eq!(probe.lifecycle().run_locks(), 1);
                7
            })
            .expect("live object");
        assert_eq!(v, 7);
        assert_eq!(probe.lifecycle().run_locks(), 0);
    }

    #[test]
    fn panicking_hook_is_absorbed() {
        let mut probe = Probe::default();
        probe.panic_in_hook = true;
        probe.dispose();
        assert!(probe.is_disposed());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_runs_unmanaged_teardown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        drop(Tracked {
            lifecycle: Lifecycle::new(),
            log: Arc::clone(&log),
        });
        assert_eq!(*log.lock().unwrap(), vec![false]);
    }

    #[test]
    fn drop_after_explicit_dispose_is_silent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tracked = Tracked {
            lifecycle: Lifecycle::new(),
            log: Arc::clone(&log),
        };
        tracked.dispose();
        drop(tracked);
        assert_eq!(*log.lock().unwrap(), vec![true]);
    }

    #[test]
    fn drop_after_dispose_does_not_rerun_hook() {
        let probe = Probe::default();
        probe.dispose();
        probe.finalize();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_waits_for_run_locks_held_elsewhere() {
        let lifecycle = Arc::new(Lifecycle::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let obj = SharedLife {
            lifecycle: Arc::clone(&lifecycle),
            log: Arc::clone(&log),
        };
        lifecycle.enter("shared").expect("live");

        let dropper = std::thread::spawn(move || drop(obj));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!dropper.is_finished());
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(lifecycle.state(), LifecycleState::Disposing);

        lifecycle.leave("shared").expect("balanced");
        dropper.join().expect("dropper");
        assert_eq!(*log.lock().unwrap(), vec![false]);
        assert_eq!(lifecycle.state(), LifecycleState::Disposed);
    }

    #[test]
    fn clear_during_disposal_is_declined() {
        let obj = Arc::new(Reusable::default());
        obj.enter_run_lock().expect("live");

        let disposer = {
            let obj = Arc::clone(&obj);
            std::thread::spawn(move || obj.dispose())
        };
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !obj.is_disposing() && std::time::Instant::now() < deadline {
            std::thread::yield_now();
        }

        assert!(!obj.try_clear_disposed().expect("allowed"));
        assert_eq!(obj.lifecycle().state(), LifecycleState::Disposing);

        obj.leave_run_lock().expect("balanced");
        disposer.join().expect("disposer");
        assert_eq!(obj.lifecycle().state(), LifecycleState::Disposed);
    }

    #[test]
    fn clear_is_refused_by_default() {
        let probe = Probe::default();
        probe.dispose();
        assert!(matches!(
            probe.try_clear_disposed(),
            Err(SyncError::ClearRefused { .. })
        ));
        assert!(probe.is_disposed());
    }

    #[test]
    fn clear_reactivates_opted_in_type() {
        let obj = Reusable::default();
        assert!(!obj.try_clear_disposed().expect("allowed"));

        obj.dispose();
        assert!(obj.try_clear_disposed().expect("allowed"));
        assert_eq!(obj.lifecycle().state(), LifecycleState::Live);
        assert!(obj.run_safely(|| ()).is_ok());
    }

    #[tokio::test]
    async fn async_dispose_sets_disposed_after_hook() {
        let probe = AsyncProbe::default();
        probe.dispose_async().await;
        assert_eq!(*probe.disposed_inside_hook.lock().unwrap(), Some(false));
        assert!(probe.is_disposed());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn async_dispose_rejects_run_locks_while_suspended() {
        let probe = Arc::new(AsyncProbe::default());
        let disposer = {
            let probe = Arc::clone(&probe);
            tokio::spawn(async move { probe.dispose_async().await })
        };
        while !probe.is_disposing() && !probe.is_disposed() {
            tokio::task::yield_now().await;
        }
        let err = probe.enter_run_lock().unwrap_err();
        assert!(err.is_disposed_error());
        disposer.await.expect("disposer task");
        assert!(probe.is_disposed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn mixed_sync_and_async_disposers_run_hook_once() {
        let probe = Arc::new(AsyncProbe::default());
        let mut handles = Vec::new();
        for i in 0..8 {
            let probe = Arc::clone(&probe);
            if i % 2 == 0 {
                handles.push(tokio::spawn(async move { probe.dispose_async().await }));
            } else {
                handles.push(tokio::task::spawn_blocking(move || probe.dispose()));
            }
        }
        for handle in handles {
            handle.await.expect("disposer");
        }
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(probe.is_disposed());
    }

    #[tokio::test]
    async fn panicking_async_hook_is_absorbed() {
        let obj = PanickyAsync::default();
        obj.dispose_async().await;
        assert_eq!(obj.reached.load(Ordering::SeqCst), 1);
        assert!(obj.is_disposed());
        assert!(!obj.is_disposing());
        assert!(obj.ensure_not_disposed().unwrap_err().is_disposed_error());
    }

    #[tokio::test]
    async fn run_safely_async_holds_lock_across_await() {
        let probe = AsyncProbe::default();
        let observed = probe
            .run_safely_async(|| async {
                tokio::task::yield_now().await;
                probe.lifecycle().run_locks()
            })
            .await
            .expect("live object");
        assert_eq!(observed, 1);
        assert_eq!(probe.lifecycle().run_locks(), 0);
    }
}
