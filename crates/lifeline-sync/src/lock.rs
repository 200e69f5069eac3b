//! Minimal CAS-based mutual exclusion.
//!
//! [`SimpleLock`] is a single atomic word that is either free or held through
//! one of two disciplines:
//!
//! - **sync** -- taken by [`SimpleLock::enter_lock`], which spins the OS
//!   thread.  The owning thread is recorded and only that thread may release
//!   it through [`SimpleLock::leave_lock`].
//! - **async** -- taken by [`SimpleLock::enter_lock_async`], which yields to
//!   the async scheduler between attempts.  There is no owner; cooperative
//!   code is expected to have a single writer per lock at a time.
//!
//! Because the two disciplines use distinct "locked" values, releasing
//! through the wrong path is detected and reported as `false` rather than
//! silently freeing a lock someone else holds.
//!
//! ```rust
//! # use lifeline_sync::lock::{LockState, SimpleLock};
//! let lock = SimpleLock::new();
//! assert!(lock.enter_lock());
//! assert_eq!(lock.get_state(), LockState::Locked);
//! assert!(!lock.leave_lock_async());
//! assert!(lock.leave_lock());
//! assert_eq!(lock.get_state(), LockState::Shared);
//! ```

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use crate::backoff;

const FREE: u8 = 0;
const LOCKED_SYNC: u8 = 1;
const LOCKED_ASYNC: u8 = 2;

/// No thread holds the sync discipline.
const NO_OWNER: u64 = 0;

/// Observable state of a [`SimpleLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockState {
    /// Free; anyone may acquire it.
    Shared,
    /// Held through either discipline.
    Locked,
}

/// Spin lock usable from both blocking and cooperative call sites.
#[derive(Debug)]
pub struct SimpleLock {
    state: AtomicU8,
    owner: AtomicU64,
}

impl SimpleLock {
    /// Create a free lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(FREE),
            owner: AtomicU64::new(NO_OWNER),
        }
    }

    /// Acquire through the sync discipline, spinning until the lock is free.
    ///
    /// There is no failure path; the return value is always `true` once the
    /// call returns, so callers can record "lock taken" before entering a
    /// fallible section.
    pub fn enter_lock(&self) -> bool {
        let mut spins = 0usize;
        while self
            .state
            .compare_exchange_weak(FREE, LOCKED_SYNC, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            backoff::maybe_yield();
        }
        self.owner.store(thread_token(), Ordering::Release);
        tracing::trace!(spins, "simple lock acquired (sync)");
        true
    }

    /// Acquire through the async discipline, yielding to the scheduler until
    /// the lock is free.
    pub async fn enter_lock_async(&self) {
        let mut spins = 0usize;
        while self
            .state
            .compare_exchange_weak(FREE, LOCKED_ASYNC, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            backoff::maybe_yield_async().await;
        }
        tracing::trace!(spins, "simple lock acquired (async)");
    }

    /// Release a lock taken by [`enter_lock`](Self::enter_lock).
    ///
    /// Returns `false` without touching the lock when the calling thread is
    /// not the recorded sync owner.  That includes a lock held through the
    /// async discipline and a lock that is not held at all.
    pub fn leave_lock(&self) -> bool {
        let me = thread_token();
        if self.owner.load(Ordering::Acquire) != me {
            return false;
        }
        // Clear the owner before the state word so a new owner is never
        // overwritten.
        if self
            .owner
            .compare_exchange(me, NO_OWNER, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current == FREE {
                return false;
            }
            if self
                .state
                .compare_exchange_weak(current, FREE, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Release a lock taken by [`enter_lock_async`](Self::enter_lock_async).
    ///
    /// Returns `false` when the lock is held through the sync discipline or
    /// is not held at all.
    pub fn leave_lock_async(&self) -> bool {
        self.state
            .compare_exchange(LOCKED_ASYNC, FREE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Lock-free snapshot of the lock state.
    pub fn get_state(&self) -> LockState {
        match self.state.load(Ordering::Acquire) {
            FREE => LockState::Shared,
            _ => LockState::Locked,
        }
    }

    /// Shorthand for `get_state() == LockState::Locked`.
    pub fn is_locked(&self) -> bool {
        self.get_state() == LockState::Locked
    }

    /// Acquire through the sync discipline and return a guard that releases
    /// on drop.
    pub fn lock(&self) -> SimpleLockGuard<'_> {
        self.enter_lock();
        SimpleLockGuard { lock: self }
    }

    /// Acquire through the async discipline and return a guard that releases
    /// on drop.
    pub async fn lock_async(&self) -> AsyncLockGuard<'_> {
        self.enter_lock_async().await;
        AsyncLockGuard { lock: self }
    }

    /// Run `f` while holding the lock through the sync discipline.
    pub fn with_lock<R, F: FnOnce() -> R>(&self, f: F) -> R {
        let _guard = self.lock();
        f()
    }
}

impl Default for SimpleLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases a sync-held [`SimpleLock`] on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SimpleLockGuard<'a> {
    lock: &'a SimpleLock,
}

impl Drop for SimpleLockGuard<'_> {
    fn drop(&mut self) {
        if !self.lock.leave_lock() {
            tracing::warn!("simple lock guard dropped on a thread that does not own the lock");
        }
    }
}

/// Releases an async-held [`SimpleLock`] on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct AsyncLockGuard<'a> {
    lock: &'a SimpleLock,
}

impl Drop for AsyncLockGuard<'_> {
    fn drop(&mut self) {
        if !self.lock.leave_lock_async() {
            tracing::warn!("async lock guard dropped but the lock was not held asynchronously");
        }
    }
}

/// Process-unique, non-zero identity of the calling thread.
fn thread_token() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static TOKEN: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    TOKEN.with(|t| *t)
}
