// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sliding-window rate limiting.
//!
//! [`WindowedLimiter`] owns `max_count` permit slots, each carrying the
//! deadline at which it becomes reusable. The slot vector lives in a
//! capacity-1 cell, so scans are serialized by the channel rather than a
//! lock. A successful [`acquire`](WindowedLimiter::acquire) claims an
//! expired slot and pushes its deadline one `interval` into the future,
//! which bounds grants to `max_count` within any trailing window of
//! `interval`.
//!
//! When no slot is eligible the caller sleeps until the earliest deadline
//! instead of re-probing, and re-scans from there. Stop and caller
//! cancellation are observed at every suspension point.

use thiserror::Error;
use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Why an [`acquire`](WindowedLimiter::acquire) did not grant a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// [`WindowedLimiter::stop`] was called.
    #[error("limiter stopped")]
    Stopped,
    /// The caller's own token fired while waiting.
    #[error("acquire cancelled")]
    Cancelled,
}

/// A rate limiter granting at most `max_count` permits per sliding window.
pub struct WindowedLimiter {
    interval: Duration,
    slots_tx: flume::Sender<Vec<Instant>>,
    slots_rx: flume::Receiver<Vec<Instant>>,
    stop: CancellationToken,
}

impl WindowedLimiter {
    /// Creates a limiter with `max_count` permit slots cooling down for
    /// `interval` after each grant. All slots start expired, so the first
    /// `max_count` acquisitions succeed immediately.
    ///
    /// # Panics
    ///
    /// Panics if `max_count` is zero.
    pub fn new(max_count: usize, interval: Duration) -> Self {
        assert!(max_count > 0, "limiter needs at least one permit slot");
        let (slots_tx, slots_rx) = flume::bounded(1);
        slots_tx
            .try_send(vec![Instant::now(); max_count])
            .expect("fresh slot cell accepts the deadlines");
        Self {
            interval,
            slots_tx,
            slots_rx,
            stop: CancellationToken::new(),
        }
    }

    /// Obtains a permit, suspending until one frees up.
    ///
    /// Returns [`AcquireError::Stopped`] once the limiter is stopped and
    /// [`AcquireError::Cancelled`] when `cancel` fires; both are checked
    /// before granting and at every wait.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), AcquireError> {
        if self.stop.is_cancelled() {
            return Err(AcquireError::Stopped);
        }
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }

        loop {
            let mut deadlines = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Err(AcquireError::Stopped),
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                slots = self.slots_rx.recv_async() => {
                    slots.expect("slot cell never closes")
                }
            };

            let now = Instant::now();
            if let Some(slot) = deadlines.iter_mut().find(|deadline| **deadline <= now) {
                *slot = now + self.interval;
                self.put(deadlines);
                return Ok(());
            }

            let earliest = deadlines
                .iter()
                .min()
                .copied()
                .expect("limiter always has at least one slot");
            self.put(deadlines);

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Err(AcquireError::Stopped),
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                _ = sleep_until(earliest) => {}
            }
        }
    }

    /// Shuts the limiter down; all pending and future
    /// [`acquire`](Self::acquire) calls return [`AcquireError::Stopped`].
    /// Stopping twice is a no-op.
    pub fn stop(&self) {
        tracing::debug!("limiter stopped");
        self.stop.cancel();
    }

    fn put(&self, deadlines: Vec<Instant>) {
        // the cell is empty while the deadlines are checked out here
        let _ = self.slots_tx.try_send(deadlines);
    }
}

impl std::fmt::Debug for WindowedLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedLimiter")
            .field("interval", &self.interval)
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}
