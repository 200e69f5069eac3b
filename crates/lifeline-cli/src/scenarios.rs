//! Stress scenarios driven by the `lifeline` subcommands.
//!
//! Each scenario loads one primitive from `lifeline-sync` far beyond what a
//! unit test does and reports the invariants it checked as a list of
//! expected/observed pairs.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use lifeline_sync::{Disposable, ExecutionContextManager, JoinableThread, Lifecycle, SimpleLock};
use tracing::{debug, error, info};

use crate::config::{DisposeConfig, LockConfig, MailboxConfig, ScheduleConfig};
use crate::helpers::wait_until;

/// How long the schedule scenario waits for its callbacks to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// One invariant checked by a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub label: &'static str,
    pub expected: usize,
    pub observed: usize,
}

impl Check {
    pub fn passed(&self) -> bool {
        self.expected == self.observed
    }
}

/// Outcome of a single scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub checks: Vec<Check>,
    pub elapsed: Duration,
}

impl ScenarioReport {
    fn new(name: &'static str, started: Instant) -> Self {
        Self {
            name,
            checks: Vec::new(),
            elapsed: started.elapsed(),
        }
    }

    fn check(mut self, label: &'static str, expected: usize, observed: usize) -> Self {
        self.checks.push(Check {
            label,
            expected,
            observed,
        });
        self
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(Check::passed)
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed() { "PASS" } else { "FAIL" };
        writeln!(f, "  [{verdict}] {} ({:.2?})", self.name, self.elapsed)?;
        for check in &self.checks {
            let mark = if check.passed() { "=" } else { "!" };
            writeln!(
                f,
                "    [{mark}] {:<24} expected {:>8}  observed {:>8}",
                check.label, check.expected, check.observed
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// dispose
// ---------------------------------------------------------------------------

/// Object whose teardown hook counts its invocations.
struct CountedResource {
    lifecycle: Lifecycle,
    hooks: AtomicUsize,
}

impl CountedResource {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            hooks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Disposable for CountedResource {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn dispose_core(&self, _disposing: bool) {
        self.hooks.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for CountedResource {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Race `disposers` threads on one object per round while the harness holds
/// a run-lock that it releases once the race is underway.
pub fn run_dispose(config: &DisposeConfig) -> Result<ScenarioReport> {
    let started = Instant::now();
    let mut clean_rounds = 0;
    let mut hooks_total = 0;

    for round in 0..config.rounds {
        let resource = CountedResource::new();
        resource
            .enter_run_lock()
            .context("fresh resource refused a run-lock")?;
        let start = Barrier::new(config.disposers + 1);

        thread::scope(|s| {
            for _ in 0..config.disposers {
                s.spawn(|| {
                    start.wait();
                    resource.dispose();
                });
            }
            start.wait();
            thread::yield_now();
            resource.leave_run_lock()
        })
        .context("run-lock release failed")?;

        let hooks = resource.hooks.load(Ordering::SeqCst);
        hooks_total += hooks;
        if hooks == 1 && resource.is_disposed() {
            clean_rounds += 1;
        } else {
            error!(round, hooks, disposed = resource.is_disposed(), "dispose race violated");
        }
    }

    info!(rounds = config.rounds, disposers = config.disposers, "dispose scenario finished");
    Ok(ScenarioReport::new("dispose", started)
        .check("rounds torn down once", config.rounds, clean_rounds)
        .check("hook invocations", config.rounds, hooks_total))
}

// ---------------------------------------------------------------------------
// lock
// ---------------------------------------------------------------------------

/// `tasks` tokio tasks each perform `rounds` read-yield-write increments
/// under the async discipline of one [`SimpleLock`].
pub async fn run_lock(config: &LockConfig) -> Result<ScenarioReport> {
    let started = Instant::now();
    let lock = Arc::new(SimpleLock::new());
    let value = Arc::new(AtomicUsize::new(0));
    let rounds = config.rounds;

    let mut handles = Vec::with_capacity(config.tasks);
    for _ in 0..config.tasks {
        let lock = Arc::clone(&lock);
        let value = Arc::clone(&value);
        handles.push(tokio::spawn(async move {
            for _ in 0..rounds {
                let _guard = lock.lock_async().await;
                let current = value.load(Ordering::Relaxed);
                tokio::task::yield_now().await;
                value.store(current + 1, Ordering::Relaxed);
            }
        }));
    }
    for handle in handles {
        handle.await.context("lock task panicked")?;
    }

    let observed = value.load(Ordering::SeqCst);
    info!(tasks = config.tasks, observed, "lock scenario finished");
    Ok(ScenarioReport::new("lock", started)
        .check("counter", config.tasks * rounds, observed)
        .check("lock held at exit", 0, usize::from(lock.is_locked())))
}

// ---------------------------------------------------------------------------
// schedule
// ---------------------------------------------------------------------------

/// `producers` threads each schedule `per_producer` callbacks onto one
/// [`JoinableThread`]; every callback must run exactly once on it.
pub fn run_schedule(config: &ScheduleConfig) -> Result<ScenarioReport> {
    let started = Instant::now();
    let worker = JoinableThread::create().context("failed to start worker thread")?;
    let bound = worker.thread_id();
    let executed = Arc::new(AtomicUsize::new(0));
    let misplaced = Arc::new(AtomicUsize::new(0));
    let expected = config.producers * config.per_producer;

    thread::scope(|s| -> Result<()> {
        let producers: Vec<_> = (0..config.producers)
            .map(|_| {
                s.spawn(|| -> Result<()> {
                    for _ in 0..config.per_producer {
                        let executed = Arc::clone(&executed);
                        let misplaced = Arc::clone(&misplaced);
                        worker.schedule(move || {
                            if thread::current().id() != bound {
                                misplaced.fetch_add(1, Ordering::SeqCst);
                            }
                            executed.fetch_add(1, Ordering::SeqCst);
                        })?;
                    }
                    Ok(())
                })
            })
            .collect();
        for producer in producers {
            producer
                .join()
                .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;
        }
        Ok(())
    })?;

    let drained = wait_until(DRAIN_TIMEOUT, || executed.load(Ordering::SeqCst) >= expected);
    if !drained {
        error!(pending = worker.pending(), "callbacks did not drain in time");
    }
    worker.dispose();

    let observed = executed.load(Ordering::SeqCst);
    info!(expected, observed, "schedule scenario finished");
    Ok(ScenarioReport::new("schedule", started)
        .check("callbacks executed", expected, observed)
        .check("ran off the worker", 0, misplaced.load(Ordering::SeqCst)))
}

// ---------------------------------------------------------------------------
// mailbox
// ---------------------------------------------------------------------------

/// A joinable server thread answers `messages` increment requests from the
/// calling thread while a noise thread posts `noise` foreign messages to the
/// server.  The noise must never reach the conversation.
pub fn run_mailbox(config: &MailboxConfig) -> Result<ScenarioReport> {
    let started = Instant::now();
    let manager = Arc::new(ExecutionContextManager::new());
    let server = JoinableThread::create().context("failed to start server thread")?;
    let server_thread = server.thread_id();
    let client_thread = thread::current().id();
    let messages = config.messages;

    {
        let manager = Arc::clone(&manager);
        server.schedule(move || {
            let served = (|| -> lifeline_sync::Result<()> {
                let conn = manager.connect(client_thread)?;
                for _ in 0..messages {
                    let request = conn.receive()?;
                    conn.send(request + 1)?;
                }
                Ok(())
            })();
            if let Err(e) = served {
                error!(error = %e, "mailbox server failed");
                // Unblock the client.
                if let Some(client) = manager.remove(client_thread) {
                    client.dispose();
                }
            }
        })?;
    }

    let mut round_trips = 0;
    let conversed = thread::scope(|s| -> Result<()> {
        let noise = s.spawn(|| -> lifeline_sync::Result<()> {
            let conn = manager.connect(server_thread)?;
            for i in 0..config.noise {
                conn.send(-1 - i as i64)?;
            }
            Ok(())
        });

        let conn = manager.connect(server_thread)?;
        for request in 0..messages as i64 {
            let reply = conn
                .send_and_receive(request)
                .context("round trip failed")?;
            if reply == request + 1 {
                round_trips += 1;
            } else {
                error!(request, reply, "unexpected reply");
            }
        }

        noise
            .join()
            .map_err(|_| anyhow::anyhow!("noise thread panicked"))??;
        Ok(())
    });

    let filtered = manager
        .get_server_context(server_thread)
        .map(|context| context.pending_values());
    shut_down_mailbox(&manager, &server);
    conversed?;
    let filtered = filtered?;
    debug!(filtered, "foreign messages left in the server mailbox");

    info!(round_trips, filtered, "mailbox scenario finished");
    Ok(ScenarioReport::new("mailbox", started)
        .check("round trips", messages, round_trips)
        .check("filtered noise", config.noise, filtered))
}

/// Dispose the registry first so a server still blocked in `receive` fails
/// out, then join the server thread.
fn shut_down_mailbox(manager: &ExecutionContextManager, server: &JoinableThread) {
    manager.dispose();
    server.dispose();
}
