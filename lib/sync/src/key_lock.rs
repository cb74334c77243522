// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Deadlock-free acquisition of sets of named locks.
//!
//! [`MultiKeyLock`] keeps one token channel per key, created lazily and
//! never removed. Acquisition always walks the requested keys in sorted
//! order, so any two calls sharing keys contend on them in the same
//! relative order and a circular wait cannot form. A cancellation observed
//! while waiting for any key rolls back the keys already taken.
//!
//! The map itself sits behind a small mutex for mutation safety only; the
//! lock semantics live in the per-key channels.

use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Acquisition was abandoned because the caller's token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("multi-key acquisition cancelled")]
pub struct Cancelled;

#[derive(Clone)]
struct KeyToken {
    tx: flume::Sender<()>,
    rx: flume::Receiver<()>,
}

impl KeyToken {
    fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        tx.try_send(()).expect("fresh key token accepts the sentinel");
        Self { tx, rx }
    }
}

/// A lock over an open-ended namespace of string keys.
///
/// Keys within one call must be distinct; requesting the same key twice
/// would wait on a token the call itself holds.
pub struct MultiKeyLock {
    keys: Mutex<HashMap<String, KeyToken>>,
}

impl MultiKeyLock {
    /// Creates an empty key lock.
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires every key in `keys`, suspending on each until it is free.
    ///
    /// Keys are taken in lexicographic order regardless of the order given.
    /// If `cancel` fires first, the keys acquired so far are released and
    /// [`Cancelled`] is returned. On success the returned guard holds all
    /// keys until dropped.
    pub async fn lock_keys<S: AsRef<str>>(
        &self,
        keys: &[S],
        cancel: &CancellationToken,
    ) -> Result<MultiKeyGuard<'_>, Cancelled> {
        let mut sorted: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        sorted.sort();

        let mut held: Vec<String> = Vec::with_capacity(sorted.len());
        for key in sorted {
            let token = self.token_for(&key);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(acquired = held.len(), "key acquisition cancelled, rolling back");
                    self.release(&held);
                    return Err(Cancelled);
                }
                _ = token.rx.recv_async() => {
                    held.push(key);
                }
            }
        }
        Ok(MultiKeyGuard { lock: self, keys: held })
    }

    fn token_for(&self, key: &str) -> KeyToken {
        let mut keys = self.keys.lock();
        match keys.get(key) {
            Some(token) => token.clone(),
            None => {
                let token = KeyToken::new();
                keys.insert(key.to_string(), token.clone());
                token
            }
        }
    }

    fn release(&self, held: &[String]) {
        let keys = self.keys.lock();
        for key in held {
            if let Some(token) = keys.get(key) {
                // non-blocking: the slot is empty while the key is held
                let _ = token.tx.try_send(());
            }
        }
    }
}

impl Default for MultiKeyLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MultiKeyLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiKeyLock")
            .field("known_keys", &self.keys.lock().len())
            .finish()
    }
}

/// Holds a set of acquired keys; dropping it releases them all.
#[must_use = "dropping the guard releases the keys immediately"]
pub struct MultiKeyGuard<'a> {
    lock: &'a MultiKeyLock,
    keys: Vec<String>,
}

impl MultiKeyGuard<'_> {
    /// The held keys, in acquisition (sorted) order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Drop for MultiKeyGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(&self.keys);
    }
}

impl std::fmt::Debug for MultiKeyGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiKeyGuard").field("keys", &self.keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::task::yield_now;

    #[tokio::test]
    async fn acquires_in_sorted_order() {
        let lock = MultiKeyLock::new();
        let guard = lock
            .lock_keys(&["b", "a", "c"], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(guard.keys(), &["a", "b", "c"]);
    }

    #[tokio::test]
    async fn crossed_key_orders_block_then_proceed() {
        let lock = Arc::new(MultiKeyLock::new());
        let guard = lock
            .lock_keys(&["b", "a"], &CancellationToken::new())
            .await
            .unwrap();

        let second = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                let guard = lock
                    .lock_keys(&["a", "b"], &CancellationToken::new())
                    .await
                    .unwrap();
                drop(guard);
            })
        };

        yield_now().await;
        assert!(!second.is_finished(), "overlapping key sets overlapped");
        drop(guard);
        second.await.unwrap();
    }

    #[tokio::test]
    async fn disjoint_key_sets_do_not_contend() {
        let lock = MultiKeyLock::new();
        let cancel = CancellationToken::new();
        let left = lock.lock_keys(&["a", "b"], &cancel).await.unwrap();
        let right = lock.lock_keys(&["c", "d"], &cancel).await.unwrap();
        drop((left, right));
    }

    #[tokio::test]
    async fn cancellation_rolls_back_partial_acquisition() {
        let lock = Arc::new(MultiKeyLock::new());
        let cancel = CancellationToken::new();

        // hold "b" so the waiter stalls after taking "a"
        let holder = lock
            .lock_keys(&["b"], &CancellationToken::new())
            .await
            .unwrap();

        let waiter = {
            let lock = Arc::clone(&lock);
            let cancel = cancel.clone();
            tokio::spawn(async move { lock.lock_keys(&["a", "b"], &cancel).await.map(|g| drop(g)) })
        };

        yield_now().await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), Err(Cancelled));

        // "a" must have been rolled back
        let reclaim = lock
            .lock_keys(&["a"], &CancellationToken::new())
            .await
            .unwrap();
        drop((reclaim, holder));
    }

    #[tokio::test]
    async fn pre_cancelled_token_aborts_before_acquiring() {
        let lock = MultiKeyLock::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(
            lock.lock_keys(&["a"], &cancel).await.err(),
            Some(Cancelled)
        );
        // the key is still free
        let guard = lock.lock_keys(&["a"], &CancellationToken::new()).await.unwrap();
        drop(guard);
    }
}
