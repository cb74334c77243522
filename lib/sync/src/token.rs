// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Binary mutual exclusion over a token channel.
//!
//! [`ExclusiveToken`] is the base building block for the other lock
//! primitives: a capacity-1 channel pre-loaded with a single sentinel value.
//! Receiving the sentinel acquires the lock; sending it back releases it.
//! Whichever task last received from the channel holds the right to act and
//! must return exactly one sentinel.

use async_trait::async_trait;
use std::sync::Arc;

/// Capability for anything that can be locked and unlocked.
///
/// [`ConditionChannel`](crate::ConditionChannel) parks waiters on an
/// external `Lockable` supplied by the caller. Implementations must pair
/// `lock`/`unlock` calls; calling `unlock` without holding the lock is a
/// usage error with unspecified blocking behavior.
#[async_trait]
pub trait Lockable: Send + Sync {
    /// Acquires the lock, suspending until it is available.
    async fn lock(&self);

    /// Releases the lock.
    async fn unlock(&self);
}

#[async_trait]
impl<L: Lockable + ?Sized> Lockable for Arc<L> {
    async fn lock(&self) {
        (**self).lock().await;
    }

    async fn unlock(&self) {
        (**self).unlock().await;
    }
}

/// A binary mutex whose state lives in a capacity-1 token channel.
///
/// The channel starts holding one sentinel. [`lock`](ExclusiveToken::lock)
/// receives it (suspending while another task holds it) and
/// [`unlock`](ExclusiveToken::unlock) sends it back. A double unlock does
/// not panic; it stalls on the full channel until someone locks.
pub struct ExclusiveToken {
    tx: flume::Sender<()>,
    rx: flume::Receiver<()>,
}

impl ExclusiveToken {
    /// Creates a new, unlocked token.
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        tx.try_send(()).expect("fresh token channel accepts the sentinel");
        Self { tx, rx }
    }

    /// Acquires the token, suspending until it is available.
    pub async fn lock(&self) {
        let _ = self.rx.recv_async().await;
    }

    /// Returns the token, releasing the lock.
    pub async fn unlock(&self) {
        let _ = self.tx.send_async(()).await;
    }

    /// Attempts to acquire the token without suspending.
    pub fn try_lock(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

impl Default for ExclusiveToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExclusiveToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveToken").finish_non_exhaustive()
    }
}

#[async_trait]
impl Lockable for ExclusiveToken {
    async fn lock(&self) {
        ExclusiveToken::lock(self).await;
    }

    async fn unlock(&self) {
        ExclusiveToken::unlock(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::yield_now;

    #[tokio::test]
    async fn lock_is_mutually_exclusive() {
        let token = Arc::new(ExclusiveToken::new());
        let in_section = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let token = Arc::clone(&token);
            let in_section = Arc::clone(&in_section);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    token.lock().await;
                    let holders = in_section.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(holders, 0, "two tasks inside the critical section");
                    yield_now().await;
                    in_section.fetch_sub(1, Ordering::SeqCst);
                    token.unlock().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn try_lock_fails_while_held() {
        let token = ExclusiveToken::new();
        assert!(token.try_lock());
        assert!(!token.try_lock());
        token.unlock().await;
        assert!(token.try_lock());
    }

    #[tokio::test]
    async fn unlock_releases_a_waiter() {
        let token = Arc::new(ExclusiveToken::new());
        token.lock().await;

        let waiter = {
            let token = Arc::clone(&token);
            tokio::spawn(async move {
                token.lock().await;
                token.unlock().await;
            })
        };

        yield_now().await;
        assert!(!waiter.is_finished());
        token.unlock().await;
        waiter.await.unwrap();
    }
}
