// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Coalescing of concurrent identical calls.
//!
//! [`CallDeduplicator`] keeps at most one round in flight per instance.
//! The first caller installs the round and spawns a detached task that runs
//! the callback once; everyone arriving while the round is open parks on
//! its completion channel and receives the same shared outcome. Completion
//! drops the channel's sender (the broadcast) and then clears the round so
//! the next call starts fresh.
//!
//! A waiter whose own cancellation token fires leaves with
//! [`CallError::Cancelled`]; the in-flight round and the other waiters are
//! untouched. The detached task runs under a token owned by the
//! deduplicator, never by a caller.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Outcome of a deduplicated call.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// The waiting caller's token fired; the round itself continues.
    #[error("call cancelled while waiting for the in-flight round")]
    Cancelled,
    /// The round's callback failed; every waiter of the round sees the
    /// same underlying error.
    #[error("deduplicated call failed: {0}")]
    Failed(Arc<anyhow::Error>),
}

struct Round<T> {
    done: flume::Receiver<()>,
    slot: Arc<OnceLock<Result<T, Arc<anyhow::Error>>>>,
}

impl<T> Clone for Round<T> {
    fn clone(&self) -> Self {
        Self {
            done: self.done.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

struct Inner<T> {
    round: Mutex<Option<Round<T>>>,
}

/// Single-flight gate: concurrent calls share one execution.
#[derive(Clone)]
pub struct CallDeduplicator<T> {
    inner: Arc<Inner<T>>,
    root: CancellationToken,
}

impl<T: Clone + Send + Sync + 'static> CallDeduplicator<T> {
    /// Creates a deduplicator with no round in flight.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                round: Mutex::new(None),
            }),
            root: CancellationToken::new(),
        }
    }

    /// Joins the in-flight round, or starts one running `f`.
    ///
    /// All callers of one round observe the identical result or error.
    /// `cancel` covers only this caller's wait: when it fires, the call
    /// returns [`CallError::Cancelled`] while the round runs to completion
    /// for the remaining waiters. A new round can start as soon as the
    /// previous one has completed.
    pub async fn call<F, Fut>(&self, cancel: &CancellationToken, f: F) -> Result<T, CallError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let round = self.join_or_start(f);
        tokio::select! {
            _ = round.done.recv_async() => round
                .slot
                .get()
                .cloned()
                .expect("completed round always carries a result")
                .map_err(CallError::Failed),
            _ = cancel.cancelled() => Err(CallError::Cancelled),
        }
    }

    fn join_or_start<F, Fut>(&self, f: F) -> Round<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut round = self.inner.round.lock();
        if let Some(active) = round.as_ref() {
            return active.clone();
        }

        let (done_tx, done_rx) = flume::bounded(1);
        let slot = Arc::new(OnceLock::new());
        let fresh = Round {
            done: done_rx,
            slot: Arc::clone(&slot),
        };
        *round = Some(fresh.clone());

        tracing::debug!("starting deduplicated round");
        let inner = Arc::clone(&self.inner);
        let fut = f(self.root.child_token());
        tokio::spawn(async move {
            let result = fut.await.map_err(Arc::new);
            let _ = slot.set(result);
            // broadcast completion before clearing the round, so everyone
            // parked on this round reads this round's slot
            drop(done_tx);
            inner.round.lock().take();
        });
        fresh
    }
}

impl<T: Clone + Send + Sync + 'static> Default for CallDeduplicator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for CallDeduplicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDeduplicator")
            .field("in_flight", &self.inner.round.lock().is_some())
            .finish()
    }
}
