//! Cooperative back-off for CAS retry loops.
//!
//! None of the primitives in this crate park a thread.  Instead every spin
//! loop calls into this module, which occasionally gives up the rest of the
//! scheduler quantum so that contending threads (or tasks) make progress.
//!
//! Two flavours are provided:
//!
//! - **Probabilistic** -- [`maybe_yield`] / [`maybe_yield_async`] draw from a
//!   per-thread random source and yield roughly one call in
//!   [`YIELD_ONE_IN`].
//! - **Counter-driven** -- [`maybe_yield_at`] / [`maybe_yield_async_at`]
//!   yield deterministically when `i % YIELD_PERIOD == YIELD_PERIOD - 1`.
//!   Use these inside loops that already carry an iteration counter.
//!
//! Nothing here sleeps for a fixed duration and nothing can fail.

use rand::Rng;

/// Probabilistic variants yield on average once per this many calls.
pub const YIELD_ONE_IN: u32 = 8;

/// Counter-driven variants yield once per this many iterations.
pub const YIELD_PERIOD: usize = 32;

/// Yield the current OS thread roughly one time in [`YIELD_ONE_IN`].
///
/// Returns whether a yield happened.
pub fn maybe_yield() -> bool {
    if should_yield() {
        std::thread::yield_now();
        true
    } else {
        std::hint::spin_loop();
        false
    }
}

/// Yield the current OS thread when `i` hits the end of a
/// [`YIELD_PERIOD`]-long window.
///
/// Returns whether a yield happened.
pub fn maybe_yield_at(i: usize) -> bool {
    if is_period_end(i) {
        std::thread::yield_now();
        true
    } else {
        std::hint::spin_loop();
        false
    }
}

/// Cooperative counterpart of [`maybe_yield`].
///
/// Yields to the async scheduler via [`tokio::task::yield_now`].  Outside a
/// tokio runtime that call simply re-wakes the task, so this also behaves
/// inside a [`JoinableThread`](crate::joinable::JoinableThread) executor.
pub async fn maybe_yield_async() -> bool {
    if should_yield() {
        tokio::task::yield_now().await;
        true
    } else {
        false
    }
}

/// Cooperative counterpart of [`maybe_yield_at`].
pub async fn maybe_yield_async_at(i: usize) -> bool {
    if is_period_end(i) {
        tokio::task::yield_now().await;
        true
    } else {
        false
    }
}

fn should_yield() -> bool {
    rand::thread_rng().gen_ratio(1, YIELD_ONE_IN)
}

fn is_period_end(i: usize) -> bool {
    i % YIELD_PERIOD == YIELD_PERIOD - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_driven_yield_hits_period_end_only() {
        let yielded: Vec<usize> = (0..100).filter(|&i| maybe_yield_at(i)).collect();
        assert_eq!(yielded, vec![31, 63, 95]);
    }

    #[test]
    fn probabilistic_yield_is_roughly_one_in_eight() {
        let hits = (0..8_000).filter(|_| maybe_yield()).count();
        // Expected 1000; the bounds are wide enough to never flake.
        assert!((500..1_500).contains(&hits), "hits = {hits}");
    }

    #[tokio::test]
    async fn async_counter_yield_matches_sync() {
        let mut yielded = Vec::new();
        for i in 0..64 {
            if maybe_yield_async_at(i).await {
                yielded.push(i);
            }
        }
        assert_eq!(yielded, vec![31, 63]);
    }

    #[test]
    fn async_yield_completes_outside_a_runtime() {
        futures::executor::block_on(async {
            for _ in 0..64 {
                maybe_yield_async().await;
            }
        });
    }
}
