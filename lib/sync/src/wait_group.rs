// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Outstanding-operation counter that releases waiters at zero.
//!
//! [`CompletionCounter`] tracks a count of in-flight operations. Waiters
//! park on a per-generation channel: the generation opens when the count
//! leaves zero and its sender is dropped when the count returns to exactly
//! zero, disconnecting (and thereby waking) every waiter at once.
//!
//! The count itself round-trips through a capacity-1 cell; that
//! receive-compute-send sequence is the serialization point, so concurrent
//! `add`/`done`/`wait` calls can never observe a generation mid-transition.

/// Per-generation broadcast channel. Nothing is ever sent on it; waiters
/// are released by dropping `done_tx`, which disconnects every cloned
/// receiver.
struct Generation {
    #[allow(dead_code)]
    done_tx: flume::Sender<()>,
    done_rx: flume::Receiver<()>,
}

struct CounterState {
    count: u64,
    generation: Option<Generation>,
}

/// A wait group over channels.
///
/// Driving the count below zero is a fatal usage error and panics; the
/// cell is restored to a clean zero state first so other holders of the
/// instance are not poisoned.
pub struct CompletionCounter {
    cell_tx: flume::Sender<CounterState>,
    cell_rx: flume::Receiver<CounterState>,
}

impl CompletionCounter {
    /// Creates a counter at zero with no active generation.
    pub fn new() -> Self {
        let (cell_tx, cell_rx) = flume::bounded(1);
        let _ = cell_tx.try_send(CounterState {
            count: 0,
            generation: None,
        });
        Self { cell_tx, cell_rx }
    }

    /// Adjusts the count by `delta`, which may be negative.
    ///
    /// A transition from zero opens a new generation; a return to exactly
    /// zero closes it, releasing every task parked in [`wait`](Self::wait).
    ///
    /// # Panics
    ///
    /// Panics if the count would become negative.
    pub async fn add(&self, delta: i64) {
        let mut state = self.checked_out_state().await;
        let next = state.count as i64 + delta;
        if next < 0 {
            self.put(CounterState {
                count: 0,
                generation: None,
            });
            panic!("completion counter dropped below zero");
        }
        let next = next as u64;
        if state.count == 0 && next > 0 {
            let (done_tx, done_rx) = flume::bounded(1);
            state.generation = Some(Generation { done_tx, done_rx });
        }
        if next == 0 && state.count > 0 {
            // dropping the generation drops its sender, waking every waiter
            state.generation = None;
        }
        state.count = next;
        self.put(state);
    }

    /// Marks one operation complete; equivalent to `add(-1)`.
    pub async fn done(&self) {
        self.add(-1).await;
    }

    /// Suspends until the count returns to zero.
    ///
    /// Returns immediately when no generation is active. Waiters joining an
    /// active generation are all released together when it closes.
    pub async fn wait(&self) {
        let state = self.checked_out_state().await;
        let waiter = state.generation.as_ref().map(|g| g.done_rx.clone());
        self.put(state);

        if let Some(done) = waiter {
            let _ = done.recv_async().await;
        }
    }

    async fn checked_out_state(&self) -> CounterState {
        // both halves of the cell live in self, so it never disconnects
        self.cell_rx
            .recv_async()
            .await
            .expect("counter cell never closes")
    }

    fn put(&self, state: CounterState) {
        // the cell is empty while its state is checked out here
        let _ = self.cell_tx.try_send(state);
    }
}

impl Default for CompletionCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompletionCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionCounter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::yield_now;

    #[tokio::test]
    async fn wait_returns_immediately_when_idle() {
        let counter = CompletionCounter::new();
        counter.wait().await;
    }

    #[tokio::test]
    async fn wait_releases_only_after_the_last_done() {
        let counter = Arc::new(CompletionCounter::new());
        counter.add(3).await;

        let completed = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let counter = Arc::clone(&counter);
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                counter.wait().await;
                completed.load(Ordering::SeqCst)
            })
        };

        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                completed.fetch_add(1, Ordering::SeqCst);
                counter.done().await;
            });
            yield_now().await;
        }

        // the waiter must have observed all three completions
        assert_eq!(waiter.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn all_waiters_release_together() {
        let counter = Arc::new(CompletionCounter::new());
        counter.add(1).await;

        let mut waiters = Vec::new();
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            waiters.push(tokio::spawn(async move { counter.wait().await }));
        }

        yield_now().await;
        counter.done().await;
        for waiter in waiters {
            waiter.await.unwrap();
        }
    }

    #[tokio::test]
    async fn reusable_across_generations() {
        let counter = Arc::new(CompletionCounter::new());

        for _ in 0..3 {
            counter.add(2).await;
            let waiter = {
                let counter = Arc::clone(&counter);
                tokio::spawn(async move { counter.wait().await })
            };
            counter.done().await;
            counter.done().await;
            waiter.await.unwrap();
            counter.wait().await;
        }
    }

    #[tokio::test]
    #[should_panic(expected = "completion counter dropped below zero")]
    async fn negative_count_is_fatal() {
        let counter = CompletionCounter::new();
        counter.add(1).await;
        counter.done().await;
        counter.done().await;
    }
}
