//! Lifeline synchronization primitives.
//!
//! This crate gives stateful objects an exactly-once, optionally
//! asynchronous teardown protocol and lets threads schedule work onto one
//! another without a message broker:
//!
//! - **[`backoff`]** -- Probabilistic and counter-driven yielding shared by
//!   every spin loop in the crate.
//! - **[`lock`]** -- [`SimpleLock`], a CAS spin lock with separate sync and
//!   async disciplines.
//! - **[`disposable`]** -- The [`Disposable`] lifecycle: `Live -> Disposing ->
//!   Disposed` plus a run-lock count that holds teardown back while
//!   operations are in flight.
//! - **[`joinable`]** -- [`JoinableThread`], a thread-bound callback queue
//!   with a small future executor and [`SwitchTo`] for hopping threads.
//! - **[`context`]** -- Per-thread mailboxes ([`ExecutionContext`]), their
//!   registry ([`ExecutionContextManager`]) and sender-filtered
//!   conversations ([`ConnectedContext`]).
//! - **[`error`]** -- Unified error type via [`thiserror`].
//!
//! Nothing here parks a thread on a kernel object; waiting is always a CAS
//! retry loop with cooperative back-off.

pub mod backoff;
pub mod cancel;
pub mod config;
pub mod context;
pub mod disposable;
pub mod error;
pub mod joinable;
pub mod lock;

// Re-export the most commonly used types at the crate root for convenience.
pub use cancel::CancellationToken;
pub use config::JoinableThreadConfig;
pub use context::{ConnectedContext, ContextId, ExecutionContext, ExecutionContextManager, Value};
pub use disposable::{Disposable, Lifecycle, LifecycleState, RunLockGuard};
pub use error::{Result, SyncError};
pub use joinable::{JoinableThread, SwitchTo, ThreadTarget};
pub use lock::{LockState, SimpleLock};
