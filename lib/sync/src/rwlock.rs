// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Multi-reader / single-writer gate.
//!
//! [`ReadWriteGate`] combines two channels: a capacity-1 cell carrying the
//! current reader count, and a writer [`ExclusiveToken`]. The first reader
//! to arrive acquires the writer token on behalf of the whole reader group
//! and the last reader out returns it; writers take the token directly.
//!
//! # Fairness
//!
//! There is no writer preference: a continuous stream of overlapping readers
//! keeps the reader count above zero and can hold off a writer indefinitely.
//! This is an accepted trade-off for protocol simplicity. The gate
//! guarantees exclusion, not fairness.

use crate::token::{ExclusiveToken, Lockable};
use async_trait::async_trait;

/// A reader/writer lock whose state lives entirely in channels.
///
/// Operations return no errors. An unlock without a matching lock is a
/// usage error: it stalls or strands the writer token rather than panicking.
pub struct ReadWriteGate {
    count_tx: flume::Sender<u64>,
    count_rx: flume::Receiver<u64>,
    writer: ExclusiveToken,
}

impl ReadWriteGate {
    /// Creates a new gate with no readers and no writer.
    pub fn new() -> Self {
        let (count_tx, count_rx) = flume::bounded(1);
        count_tx.try_send(0).expect("fresh reader cell accepts the count");
        Self {
            count_tx,
            count_rx,
            writer: ExclusiveToken::new(),
        }
    }

    /// Acquires the gate for shared reading.
    ///
    /// The reader count round-trips through its cell, so concurrent reader
    /// registration is serialized by the channel itself. A count transition
    /// from 0 to 1 first waits for any active writer to release.
    pub async fn read_lock(&self) {
        let count = self.checked_out_count().await;
        if count == 0 {
            self.writer.lock().await;
        }
        let _ = self.count_tx.send_async(count + 1).await;
    }

    /// Releases one shared hold; the last reader out releases the writer token.
    pub async fn read_unlock(&self) {
        let count = self.checked_out_count().await;
        if count == 1 {
            self.writer.unlock().await;
        }
        let _ = self.count_tx.send_async(count.saturating_sub(1)).await;
    }

    /// Acquires the gate exclusively.
    pub async fn write_lock(&self) {
        self.writer.lock().await;
    }

    /// Releases exclusive access.
    pub async fn write_unlock(&self) {
        self.writer.unlock().await;
    }

    async fn checked_out_count(&self) -> u64 {
        // both halves of the cell live in self, so it never disconnects
        self.count_rx
            .recv_async()
            .await
            .expect("reader cell never closes")
    }
}

impl Default for ReadWriteGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReadWriteGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadWriteGate").finish_non_exhaustive()
    }
}

/// The write half of the gate satisfies the external-lock capability, so a
/// gate can serve as the lock under a [`ConditionChannel`](crate::ConditionChannel).
#[async_trait]
impl Lockable for ReadWriteGate {
    async fn lock(&self) {
        self.write_lock().await;
    }

    async fn unlock(&self) {
        self.write_unlock().await;
    }
}
