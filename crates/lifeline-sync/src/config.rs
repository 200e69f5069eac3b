//! Worker thread configuration.
//!
//! [`JoinableThreadConfig`] controls how
//! [`JoinableThread::create_with`](crate::joinable::JoinableThread::create_with)
//! spawns its background thread.  Defaults come from [`Default`]; the
//! builder-style setters adjust individual fields.

/// Spawn options for a background [`JoinableThread`](crate::joinable::JoinableThread).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinableThreadConfig {
    /// OS-visible thread name.
    ///
    /// Default: **`lifeline-joinable-<n>`** with a process-wide counter.
    pub name: Option<String>,

    /// Stack size in bytes.
    ///
    /// Default: the platform default used by [`std::thread::spawn`].
    pub stack_size: Option<usize>,
}

impl JoinableThreadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the stack size (in bytes).
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}
