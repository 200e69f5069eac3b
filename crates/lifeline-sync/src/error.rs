//! Synchronization error types.
//!
//! Every primitive in this crate surfaces failures through [`SyncError`].
//! The variants map onto three categories callers care about: the object
//! is (being) disposed, the caller misused the API, or something outside
//! the primitive failed (thread spawn, payload type).
//!
//! Lock-discipline mismatches on [`SimpleLock`](crate::lock::SimpleLock) are
//! *not* errors; the `leave_*` methods return `false` instead.

/// Unified error type for the Lifeline synchronization primitives.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    // -- Lifecycle errors ---------------------------------------------------
    /// An operation was attempted on an object that is disposing or has
    /// already been disposed.
    #[error("{type_name}: {}", disposal_phase(.in_progress))]
    ObjectDisposed {
        /// Concrete type name of the disposed object.
        type_name: &'static str,
        /// `true` while teardown is still running, `false` once complete.
        in_progress: bool,
    },

    /// The caller broke a usage contract (e.g. leaving a run-lock that was
    /// never entered, or driving a thread-bound queue from the wrong thread).
    #[error("invalid operation on {type_name}: {reason}")]
    InvalidOperation {
        type_name: &'static str,
        reason: String,
    },

    /// The type does not support clearing its disposed state.
    #[error("invalid operation on {type_name}: reactivation after disposal is not supported")]
    ClearRefused { type_name: &'static str },

    // -- Thread errors ------------------------------------------------------
    /// The operating system refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {reason}")]
    ThreadSpawn { reason: String },

    // -- Mailbox errors -----------------------------------------------------
    /// An object payload could not be downcast to the requested type.
    #[error("unexpected payload type, expected `{expected}`")]
    UnexpectedPayload { expected: &'static str },

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether this is the disposed-object condition.
    pub fn is_disposed_error(&self) -> bool {
        matches!(self, SyncError::ObjectDisposed { .. })
    }

    /// Whether this is an invalid-operation condition, including a refused
    /// reactivation.
    pub fn is_invalid_operation(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidOperation { .. } | SyncError::ClearRefused { .. }
        )
    }
}

fn disposal_phase(in_progress: &bool) -> &'static str {
    if *in_progress {
        "disposal in progress"
    } else {
        "object is disposed"
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
