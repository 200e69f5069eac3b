//! Per-thread mailboxes and paired conversations.
//!
//! - [`ExecutionContext`] -- a mailbox owned by one thread, with two
//!   independent FIFOs: small [`Value`]s and boxed [`Object`]s.  Every item is
//!   tagged with the [`ContextId`] of the context that sent it.
//! - [`ExecutionContextManager`] -- registry mapping [`ThreadId`] to that
//!   thread's context.  Backed by [`DashMap`], whose sharded reader/writer
//!   locks give concurrent lookups and exclusive insertion.
//! - [`ConnectedContext`] -- a conversation between the calling thread's
//!   context (`client`) and another thread's context (`server`).  `send`
//!   posts to the server; `receive` only returns items the server sent.
//!
//! # Example
//!
//! ```rust
//! # use lifeline_sync::context::ExecutionContextManager;
//! let manager = ExecutionContextManager::new();
//! let main_thread = std::thread::current().id();
//!
//! std::thread::scope(|s| {
//!     s.spawn(|| {
//!         let to_main = manager.connect(main_thread).unwrap();
//!         to_main.send(42).unwrap();
//!     })
//!     .join()
//!     .unwrap();
//! });
//!
//! let inbox = manager.get_client_context().unwrap();
//! assert_eq!(inbox.pending_values(), 1);
//! ```
//!
//! Items from senders other than the configured server are skipped but kept,
//! in arrival order, so several conversations can share one mailbox.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, ThreadId};

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::backoff;
use crate::disposable::{Disposable, Lifecycle};
use crate::error::{Result, SyncError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Unique, time-ordered context identity (UUID v7).
pub type ContextId = Uuid;

/// Payload of the value mailbox.
pub type Value = i64;

/// Payload of the object mailbox.
pub type Object = Box<dyn Any + Send>;

/// A queued item and the context that sent it.
struct Envelope<T> {
    sender: ContextId,
    payload: T,
}

/// One FIFO of a context.
///
/// Producers push onto the lock-free `incoming` queue.  The owning thread
/// moves everything into `held` before searching it, so items skipped by one
/// conversation keep their arrival order for the next.
struct Mailbox<T> {
    incoming: SegQueue<Envelope<T>>,
    held: Mutex<VecDeque<Envelope<T>>>,
}

impl<T> Mailbox<T> {
    fn new() -> Self {
        Self {
            incoming: SegQueue::new(),
            held: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, sender: ContextId, payload: T) {
        self.incoming.push(Envelope { sender, payload });
    }

    /// Remove and return the oldest item sent by `sender`.
    fn take_from(&self, sender: ContextId) -> Option<T> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(envelope) = self.incoming.pop() {
            held.push_back(envelope);
        }
        let position = held.iter().position(|envelope| envelope.sender == sender)?;
        if position > 0 {
            tracing::trace!(skipped = position, "skipped items from other senders");
        }
        held.remove(position).map(|envelope| envelope.payload)
    }

    fn len(&self) -> usize {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.len() + self.incoming.len()
    }

    /// Drop every item sent by `sender`; returns how many were discarded.
    fn discard_from(&self, sender: ContextId) -> usize {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(envelope) = self.incoming.pop() {
            held.push_back(envelope);
        }
        let before = held.len();
        held.retain(|envelope| envelope.sender != sender);
        before - held.len()
    }

    /// Drop everything; returns how many items were discarded.
    fn clear(&self) -> usize {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let mut dropped = held.len();
        held.clear();
        while self.incoming.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Mailbox belonging to a single thread.
pub struct ExecutionContext {
    id: ContextId,
    thread: ThreadId,
    values: Mailbox<Value>,
    objects: Mailbox<Object>,
    lifecycle: Lifecycle,
}

impl ExecutionContext {
    fn new(thread: ThreadId) -> Self {
        Self {
            id: Uuid::now_v7(),
            thread,
            values: Mailbox::new(),
            objects: Mailbox::new(),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The thread this mailbox belongs to.
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// Enqueue `value` as if `sender` had sent it.
    pub fn post_value(&self, sender: &ExecutionContext, value: Value) -> Result<()> {
        self.run_safely(|| self.values.push(sender.id, value))
    }

    /// Enqueue `object` as if `sender` had sent it.
    pub fn post_object<T: Any + Send>(&self, sender: &ExecutionContext, object: T) -> Result<()> {
        self.run_safely(|| self.objects.push(sender.id, Box::new(object)))
    }

    pub fn pending_values(&self) -> usize {
        self.values.len()
    }

    pub fn pending_objects(&self) -> usize {
        self.objects.len()
    }

    /// Drop every value and object `sender` has queued here.  Skipped items
    /// are otherwise held until a conversation with their sender takes them.
    pub fn discard_from(&self, sender: ContextId) -> Result<usize> {
        self.run_safely(|| {
            let dropped = self.values.discard_from(sender) + self.objects.discard_from(sender);
            if dropped > 0 {
                tracing::debug!(context_id = %self.id, sender = %sender, dropped, "discarded items from sender");
            }
            dropped
        })
    }

    fn take_value_from(&self, sender: ContextId) -> Result<Option<Value>> {
        self.run_safely(|| self.values.take_from(sender))
    }

    fn take_object_from(&self, sender: ContextId) -> Result<Option<Object>> {
        self.run_safely(|| self.objects.take_from(sender))
    }
}

impl Disposable for ExecutionContext {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn dispose_core(&self, _disposing: bool) {
        let dropped = self.values.clear() + self.objects.clear();
        tracing::debug!(context_id = %self.id, dropped, "execution context disposed");
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("thread", &self.thread)
            .field("pending_values", &self.pending_values())
            .field("pending_objects", &self.pending_objects())
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ExecutionContextManager
// ---------------------------------------------------------------------------

/// Registry of one live [`ExecutionContext`] per thread.
///
/// Construct one per scope that needs isolation (tests, subsystems).
/// [`ExecutionContextManager::shared`] exists as a convenience only.
///
/// Entries are keyed by [`ThreadId`], which is never reused, so an entry
/// outlives its thread until [`remove`](Self::remove) or
/// [`evict_stale`](Self::evict_stale) drops it.
#[derive(Default)]
pub struct ExecutionContextManager {
    contexts: DashMap<ThreadId, Arc<ExecutionContext>>,
    lifecycle: Lifecycle,
}

impl ExecutionContextManager {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A lazily created process-wide registry.
    pub fn shared() -> &'static ExecutionContextManager {
        static SHARED: OnceLock<ExecutionContextManager> = OnceLock::new();
        SHARED.get_or_init(ExecutionContextManager::new)
    }

    /// The calling thread's context, created on first use.
    pub fn get_client_context(&self) -> Result<Arc<ExecutionContext>> {
        self.get_server_context(thread::current().id())
    }

    /// The context registered for `thread`, created on first use.  A disposed
    /// entry is replaced by a fresh context.
    pub fn get_server_context(&self, thread: ThreadId) -> Result<Arc<ExecutionContext>> {
        self.run_safely(|| {
            let existing = self.contexts.get(&thread).map(|entry| Arc::clone(entry.value()));
            if let Some(context) = existing {
                if !is_stale(&context) {
                    return context;
                }
            }

            match self.contexts.entry(thread) {
                Entry::Occupied(mut entry) => {
                    if is_stale(entry.get()) {
                        let fresh = Arc::new(ExecutionContext::new(thread));
                        tracing::debug!(
                            thread = ?thread,
                            stale = %entry.get().id(),
                            fresh = %fresh.id(),
                            "replaced disposed execution context"
                        );
                        entry.insert(Arc::clone(&fresh));
                        fresh
                    } else {
                        Arc::clone(entry.get())
                    }
                }
                Entry::Vacant(entry) => {
                    let fresh = Arc::new(ExecutionContext::new(thread));
                    tracing::debug!(thread = ?thread, context_id = %fresh.id(), "execution context created");
                    Arc::clone(entry.insert(fresh).value())
                }
            }
        })
    }

    /// Pair the calling thread's context with `thread`'s context.  Disposing
    /// the pair leaves both contexts alive.
    pub fn connect(&self, thread: ThreadId) -> Result<ConnectedContext> {
        self.connect_inner(thread, false)
    }

    /// Like [`connect`](Self::connect), but disposing the pair also disposes
    /// both contexts.
    pub fn connect_owned(&self, thread: ThreadId) -> Result<ConnectedContext> {
        self.connect_inner(thread, true)
    }

    /// Unregister `thread`'s context without disposing it.
    pub fn remove(&self, thread: ThreadId) -> Option<Arc<ExecutionContext>> {
        self.contexts.remove(&thread).map(|(_, context)| context)
    }

    /// Unregister every disposed context; returns how many were dropped.
    pub fn evict_stale(&self) -> usize {
        let before = self.contexts.len();
        self.contexts.retain(|_, context| !is_stale(context));
        let evicted = before.saturating_sub(self.contexts.len());
        if evicted > 0 {
            tracing::debug!(evicted, "evicted disposed execution contexts");
        }
        evicted
    }

    /// Number of registered contexts, stale ones included.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    fn connect_inner(&self, thread: ThreadId, owns_contexts: bool) -> Result<ConnectedContext> {
        let server = self.get_server_context(thread)?;
        let client = self.get_client_context()?;
        tracing::trace!(
            server = %server.id(),
            client = %client.id(),
            owns_contexts,
            "contexts connected"
        );
        Ok(ConnectedContext::new(server, client, owns_contexts))
    }
}

fn is_stale(context: &ExecutionContext) -> bool {
    context.is_disposing() || context.is_disposed()
}

impl Disposable for ExecutionContextManager {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn dispose_core(&self, disposing: bool) {
        let contexts: Vec<Arc<ExecutionContext>> = self
            .contexts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.contexts.clear();
        if disposing {
            for context in &contexts {
                context.dispose();
            }
        }
        tracing::debug!(contexts = contexts.len(), "execution context manager disposed");
    }
}

impl Drop for ExecutionContextManager {
    fn drop(&mut self) {
        self.finalize();
    }
}

// ---------------------------------------------------------------------------
// ConnectedContext
// ---------------------------------------------------------------------------

/// A conversation between the local `client` context and a `server` context.
pub struct ConnectedContext {
    server: Arc<ExecutionContext>,
    client: Arc<ExecutionContext>,
    owns_contexts: bool,
    lifecycle: Lifecycle,
}

impl ConnectedContext {
    fn new(server: Arc<ExecutionContext>, client: Arc<ExecutionContext>, owns_contexts: bool) -> Self {
        Self {
            server,
            client,
            owns_contexts,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn server(&self) -> &Arc<ExecutionContext> {
        &self.server
    }

    pub fn client(&self) -> &Arc<ExecutionContext> {
        &self.client
    }

    /// Whether disposing the pair disposes both contexts.
    pub fn owns_contexts(&self) -> bool {
        self.owns_contexts
    }

    /// Post `value` to the server, tagged with the client's identity.
    pub fn send(&self, value: Value) -> Result<()> {
        let _guard = self.run_lock()?;
        self.server.post_value(&self.client, value)
    }

    /// Pop the next value the server sent, if one is queued.
    pub fn try_receive(&self) -> Result<Option<Value>> {
        let _guard = self.run_lock()?;
        self.client.take_value_from(self.server.id())
    }

    /// Spin (with back-off) until the server sends a value.
    ///
    /// Fails with [`SyncError::ObjectDisposed`] if the pair or the client
    /// context is disposed while waiting.
    ///
    /// Items from other senders stay queued on the client context and each
    /// attempt scans them, so a mailbox shared with senders nobody drains
    /// grows.  [`ExecutionContext::discard_from`] drops them.
    pub fn receive(&self) -> Result<Value> {
        let mut i = 0usize;
        loop {
            if let Some(value) = self.try_receive()? {
                return Ok(value);
            }
            backoff::maybe_yield_at(i);
            i = i.wrapping_add(1);
        }
    }

    /// Cooperative variant of [`receive`](Self::receive).
    pub async fn receive_async(&self) -> Result<Value> {
        loop {
            if let Some(value) = self.try_receive()? {
                return Ok(value);
            }
            tokio::task::yield_now().await;
        }
    }

    /// [`send`](Self::send) followed by [`receive`](Self::receive).
    pub fn send_and_receive(&self, value: Value) -> Result<Value> {
        self.send(value)?;
        self.receive()
    }

    pub async fn send_and_receive_async(&self, value: Value) -> Result<Value> {
        self.send(value)?;
        self.receive_async().await
    }

    /// Post an arbitrary object to the server's object mailbox.
    pub fn send_object<T: Any + Send>(&self, object: T) -> Result<()> {
        let _guard = self.run_lock()?;
        self.server.post_object(&self.client, object)
    }

    /// Pop the next object the server sent, if one is queued.
    ///
    /// An object of the wrong type is consumed and reported as
    /// [`SyncError::UnexpectedPayload`].
    pub fn try_receive_object<T: Any + Send>(&self) -> Result<Option<T>> {
        let _guard = self.run_lock()?;
        match self.client.take_object_from(self.server.id())? {
            Some(object) => object.downcast::<T>().map(|boxed| Some(*boxed)).map_err(|_| {
                SyncError::UnexpectedPayload {
                    expected: std::any::type_name::<T>(),
                }
            }),
            None => Ok(None),
        }
    }

    /// Spin (with back-off) until the server sends an object.
    pub fn receive_object<T: Any + Send>(&self) -> Result<T> {
        let mut i = 0usize;
        loop {
            if let Some(object) = self.try_receive_object::<T>()? {
                return Ok(object);
            }
            backoff::maybe_yield_at(i);
            i = i.wrapping_add(1);
        }
    }
}

impl Disposable for ConnectedContext {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn dispose_core(&self, disposing: bool) {
        if disposing && self.owns_contexts {
            self.server.dispose();
            self.client.dispose();
        }
    }
}

impl Drop for ConnectedContext {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl std::fmt::Debug for ConnectedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedContext")
            .field("server", &self.server.id())
            .field("client", &self.client.id())
            .field("owns_contexts", &self.owns_contexts)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    fn spawn_and_get_id() -> ThreadId {
        thread::spawn(|| thread::current().id())
            .join()
            .expect("thread should not panic")
    }

    #[test]
    fn client_context_is_stable_per_thread() {
        let manager = ExecutionContextManager::new();
        let a = manager.get_client_context().expect("live");
        let b = manager.get_client_context().expect("live");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.thread_id(), thread::current().id());

        let other = thread::scope(|s| {
            s.spawn(|| manager.get_client_context().expect("live"))
                .join()
                .expect("thread")
        });
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn server_context_matches_target_threads_client_context() {
        let manager = ExecutionContextManager::new();
        let (id, from_inside) = thread::scope(|s| {
            s.spawn(|| {
                let ctx = manager.get_client_context().expect("live");
                (thread::current().id(), ctx)
            })
            .join()
            .expect("thread")
        });
        let from_outside = manager.get_server_context(id).expect("live");
        assert!(Arc::ptr_eq(&from_inside, &from_outside));
    }

    #[test]
    fn concurrent_lookups_create_one_context() {
        let manager = ExecutionContextManager::new();
        let target = spawn_and_get_id();
        let ids: Vec<ContextId> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| manager.get_server_context(target).expect("live").id()))
                .collect();
            handles.into_iter().map(|h| h.join().expect("thread")).collect()
        });
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn stale_context_is_replaced() {
        let manager = ExecutionContextManager::new();
        let first = manager.get_client_context().expect("live");
        first.dispose();
        let second = manager.get_client_context().expect("live");
        assert_ne!(first.id(), second.id());
        assert!(!second.is_disposed());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn disposing_manager_disposes_contexts() {
        let manager = ExecutionContextManager::new();
        let ctx = manager.get_client_context().expect("live");
        manager.dispose();
        assert!(ctx.is_disposed());
        assert!(manager.is_empty());
        assert!(manager.get_client_context().unwrap_err().is_disposed_error());
    }

    #[test]
    fn remove_unregisters_without_disposing() {
        let manager = ExecutionContextManager::new();
        let ctx = manager.get_client_context().expect("live");
        let removed = manager.remove(thread::current().id()).expect("registered");
        assert!(Arc::ptr_eq(&ctx, &removed));
        assert!(!removed.is_disposed());
        assert!(manager.is_empty());
    }

    #[test]
    fn receive_skips_foreign_senders() {
        let manager = ExecutionContextManager::new();
        let main = thread::current().id();
        let first_sent = Barrier::new(2);
        let noise_sent = Barrier::new(2);

        let (peer, noise) = thread::scope(|s| {
            let peer = s.spawn(|| {
                let conn = manager.connect(main).expect("live");
                conn.send(1).expect("send");
                first_sent.wait();
                noise_sent.wait();
                conn.send(2).expect("send");
                thread::current().id()
            });
            let noise = s.spawn(|| {
                first_sent.wait();
                manager.connect(main).expect("live").send(99).expect("send");
                noise_sent.wait();
                thread::current().id()
            });
            (peer.join().expect("peer"), noise.join().expect("noise"))
        });

        let inbox = manager.get_client_context().expect("live");
        assert_eq!(inbox.pending_values(), 3);

        let from_peer = manager.connect(peer).expect("live");
        assert_eq!(from_peer.receive().expect("live"), 1);
        assert_eq!(from_peer.receive().expect("live"), 2);
        assert_eq!(from_peer.try_receive().expect("live"), None);
        // The foreign item is still held for its own conversation.
        assert_eq!(inbox.pending_values(), 1);

        let from_noise = manager.connect(noise).expect("live");
        assert_eq!(from_noise.try_receive().expect("live"), Some(99));
        assert_eq!(inbox.pending_values(), 0);
    }

    #[test]
    fn discard_from_drops_only_that_senders_items() {
        let manager = ExecutionContextManager::new();
        let main = thread::current().id();

        let (peer, noise) = thread::scope(|s| {
            let peer = s.spawn(|| {
                let conn = manager.connect(main).expect("live");
                conn.send(7).expect("send");
                conn.client().id()
            });
            let noise = s.spawn(|| {
                let conn = manager.connect(main).expect("live");
                for v in 0..5 {
                    conn.send(100 + v).expect("send");
                }
                conn.send_object("chatter").expect("send");
                conn.client().id()
            });
            (peer.join().expect("peer"), noise.join().expect("noise"))
        });

        let inbox = manager.get_client_context().expect("live");
        assert_eq!(inbox.pending_values(), 6);
        assert_eq!(inbox.pending_objects(), 1);

        assert_eq!(inbox.discard_from(noise).expect("live"), 6);
        assert_eq!(inbox.pending_values(), 1);
        assert_eq!(inbox.pending_objects(), 0);
        assert_eq!(inbox.take_value_from(peer).expect("live"), Some(7));
    }

    #[test]
    fn evict_stale_drops_disposed_entries() {
        let manager = ExecutionContextManager::new();
        let exited = spawn_and_get_id();
        let gone = manager.get_server_context(exited).expect("live");
        let kept = manager.get_client_context().expect("live");
        assert_eq!(manager.len(), 2);

        assert_eq!(manager.evict_stale(), 0);
        gone.dispose();
        assert_eq!(manager.evict_stale(), 1);
        assert_eq!(manager.len(), 1);
        let again = manager.get_client_context().expect("live");
        assert!(Arc::ptr_eq(&kept, &again));
    }

    #[test]
    fn send_and_receive_round_trip() {
        let manager = ExecutionContextManager::new();
        let main = thread::current().id();

        thread::scope(|s| {
            let server = s.spawn(|| {
                let conn = manager.connect(main).expect("live");
                for _ in 0..50 {
                    let v = conn.receive().expect("live");
                    conn.send(v * 2).expect("send");
                }
            });
            let conn = manager.connect(server.thread().id()).expect("live");
            for i in 0..50 {
                assert_eq!(conn.send_and_receive(i).expect("live"), i * 2);
            }
            server.join().expect("server");
        });
    }

    #[test]
    fn objects_round_trip_and_type_mismatch_is_reported() {
        let manager = ExecutionContextManager::new();
        let main = thread::current().id();
        let peer = thread::scope(|s| {
            s.spawn(|| {
                let conn = manager.connect(main).expect("live");
                conn.send_object(String::from("hello")).expect("send");
                conn.send_object(7u32).expect("send");
                thread::current().id()
            })
            .join()
            .expect("peer")
        });

        let conn = manager.connect(peer).expect("live");
        assert_eq!(conn.receive_object::<String>().expect("string"), "hello");
        let err = conn.try_receive_object::<String>().unwrap_err();
        assert!(matches!(err, SyncError::UnexpectedPayload { .. }));
        assert_eq!(conn.client().pending_objects(), 0);
    }

    #[test]
    fn unowned_pair_leaves_contexts_alive() {
        let manager = ExecutionContextManager::new();
        let peer = spawn_and_get_id();
        let conn = manager.connect(peer).expect("live");
        assert!(!conn.owns_contexts());
        conn.dispose();
        assert!(!conn.server().is_disposed());
        assert!(!conn.client().is_disposed());
        assert!(conn.send(1).unwrap_err().is_disposed_error());
    }

    #[test]
    fn owned_pair_disposes_contexts() {
        let manager = ExecutionContextManager::new();
        let peer = spawn_and_get_id();
        let conn = manager.connect_owned(peer).expect("live");
        let (server, client) = (Arc::clone(conn.server()), Arc::clone(conn.client()));
        conn.dispose();
        assert!(server.is_disposed());
        assert!(client.is_disposed());
        // The registry hands out fresh contexts afterwards.
        assert_ne!(manager.get_client_context().expect("live").id(), client.id());
    }

    #[test]
    fn blocked_receive_fails_when_client_is_disposed() {
        let manager = ExecutionContextManager::new();
        let peer = spawn_and_get_id();
        let conn = manager.connect(peer).expect("live");
        let client = Arc::clone(conn.client());
        let err = thread::scope(|s| {
            let waiter = s.spawn(|| conn.receive());
            thread::sleep(Duration::from_millis(20));
            client.dispose();
            waiter.join().expect("waiter")
        })
        .unwrap_err();
        assert!(err.is_disposed_error());
    }

    #[tokio::test]
    async fn receive_async_waits_for_server() {
        let manager = Arc::new(ExecutionContextManager::new());
        let main = thread::current().id();
        let (tx, rx) = std::sync::mpsc::channel();
        let sender = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let conn = manager.connect(main).expect("live");
                tx.send(thread::current().id()).expect("announce");
                thread::sleep(Duration::from_millis(20));
                conn.send(5).expect("send");
            })
        };
        let peer = rx.recv().expect("peer id");
        let conn = manager.connect(peer).expect("live");
        assert_eq!(conn.receive_async().await.expect("live"), 5);
        sender.join().expect("sender");
    }

    #[test]
    fn shared_manager_is_a_singleton() {
        let a = ExecutionContextManager::shared();
        let b = ExecutionContextManager::shared();
        assert!(std::ptr::eq(a, b));
    }
}
