// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Condition variable over an external lock.
//!
//! [`ConditionChannel`] parks tasks that hold a caller-supplied
//! [`Lockable`] until another task signals them. Waiters enter an admission
//! queue in FIFO arrival order; each carries its own single-use wakeup
//! channel. Signals are not sticky: a `signal` or `broadcast` with nobody
//! queued does nothing and leaves nothing behind for future waiters.

use crate::token::Lockable;

/// A condition variable whose admission queue is an unbounded channel of
/// per-waiter capacity-1 wakeup channels.
///
/// As with any condition variable, [`wait`](Self::wait) must be called with
/// the lock held, and a woken waiter should re-check its predicate: the
/// lock is released while parked and other tasks run in between.
pub struct ConditionChannel<L> {
    lock: L,
    queue_tx: flume::Sender<flume::Sender<()>>,
    queue_rx: flume::Receiver<flume::Sender<()>>,
}

impl<L: Lockable> ConditionChannel<L> {
    /// Creates a condition channel parked on `lock`.
    pub fn new(lock: L) -> Self {
        let (queue_tx, queue_rx) = flume::unbounded();
        Self {
            lock,
            queue_tx,
            queue_rx,
        }
    }

    /// The external lock waiters hold around [`wait`](Self::wait).
    pub fn locker(&self) -> &L {
        &self.lock
    }

    /// Atomically releases the lock and parks until signalled, then
    /// re-acquires the lock before returning.
    ///
    /// The waiter is queued before the lock is released, so a signal sent
    /// by the task that observes the released lock cannot be lost.
    pub async fn wait(&self) {
        let (waker_tx, waker_rx) = flume::bounded(1);
        // the queue is unbounded, so admission never blocks a lock holder
        let _ = self.queue_tx.send(waker_tx);
        self.lock.unlock().await;
        let _ = waker_rx.recv_async().await;
        self.lock.lock().await;
    }

    /// Wakes at most one currently-queued waiter.
    ///
    /// A queued entry whose waiter has since gone away is discarded and the
    /// next entry is tried, so one live waiter is woken whenever any exists.
    /// With an empty queue this is a no-op.
    pub fn signal(&self) {
        while let Ok(waiter) = self.queue_rx.try_recv() {
            if waiter.try_send(()).is_ok() {
                return;
            }
        }
    }

    /// Wakes every waiter queued at the time of the call.
    ///
    /// Tasks that call [`wait`](Self::wait) afterwards are not affected.
    pub fn broadcast(&self) {
        while let Ok(waiter) = self.queue_rx.try_recv() {
            let _ = waiter.try_send(());
        }
    }
}

impl<L> std::fmt::Debug for ConditionChannel<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionChannel")
            .field("queued", &self.queue_rx.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::token::ExclusiveToken;

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::yield_now;

    fn condition() -> Arc<ConditionChannel<Arc<ExclusiveToken>>> {
        Arc::new(ConditionChannel::new(Arc::new(ExclusiveToken::new())))
    }

    async fn settle() {
        for _ in 0..16 {
            yield_now().await;
        }
    }

    fn park_waiters(
        cond: &Arc<ConditionChannel<Arc<ExclusiveToken>>>,
        woken: &Arc<AtomicUsize>,
        n: usize,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        (0..n)
            .map(|_| {
                let cond = Arc::clone(cond);
                let woken = Arc::clone(woken);
                tokio::spawn(async move {
                    cond.locker().lock().await;
                    cond.wait().await;
                    woken.fetch_add(1, Ordering::SeqCst);
                    cond.locker().unlock().await;
                })
            })
            .collect()
    }

    #[tokio::test]
    async fn signal_wakes_exactly_one() {
        let cond = condition();
        let woken = Arc::new(AtomicUsize::new(0));
        let waiters = park_waiters(&cond, &woken, 3);

        settle().await;
        cond.signal();
        settle().await;
        assert_eq!(woken.load(Ordering::SeqCst), 1);

        cond.signal();
        cond.signal();
        settle().await;
        assert_eq!(woken.load(Ordering::SeqCst), 3);
        for waiter in waiters {
            waiter.await.unwrap();
        }
    }

    #[tokio::test]
    async fn broadcast_wakes_the_parked_set_only() {
        let cond = condition();
        let woken = Arc::new(AtomicUsize::new(0));
        let first = park_waiters(&cond, &woken, 4);

        settle().await;
        cond.broadcast();
        settle().await;
        assert_eq!(woken.load(Ordering::SeqCst), 4);
        for waiter in first {
            waiter.await.unwrap();
        }

        // a later waiter is not covered by the earlier broadcast
        let late = park_waiters(&cond, &woken, 1);
        settle().await;
        assert_eq!(woken.load(Ordering::SeqCst), 4);

        cond.broadcast();
        settle().await;
        assert_eq!(woken.load(Ordering::SeqCst), 5);
        for waiter in late {
            waiter.await.unwrap();
        }
    }

    #[tokio::test]
    async fn signal_without_waiters_is_not_sticky() {
        let cond = condition();
        cond.signal();
        cond.broadcast();

        let woken = Arc::new(AtomicUsize::new(0));
        let waiters = park_waiters(&cond, &woken, 1);

        settle().await;
        assert_eq!(
            woken.load(Ordering::SeqCst),
            0,
            "waiter consumed a stale wakeup"
        );

        cond.signal();
        settle().await;
        assert_eq!(woken.load(Ordering::SeqCst), 1);
        for waiter in waiters {
            waiter.await.unwrap();
        }
    }

    #[tokio::test]
    async fn wait_reacquires_the_lock_before_returning() {
        let cond = condition();
        let stage = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let cond = Arc::clone(&cond);
            let stage = Arc::clone(&stage);
            tokio::spawn(async move {
                cond.locker().lock().await;
                cond.wait().await;
                stage.store(2, Ordering::SeqCst);
                cond.locker().unlock().await;
            })
        };

        settle().await;
        // take the lock, then signal: the waiter wakes but cannot proceed
        // until the lock is released
        cond.locker().lock().await;
        cond.signal();
        settle().await;
        assert_eq!(stage.load(Ordering::SeqCst), 0);

        cond.locker().unlock().await;
        waiter.await.unwrap();
        assert_eq!(stage.load(Ordering::SeqCst), 2);
    }
}
