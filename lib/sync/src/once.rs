// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Exactly-once execution among concurrent callers.
//!
//! [`RunOnceGate`] holds a capacity-1 admission cell pre-loaded with the
//! sender half of a completion channel. The one caller that receives the
//! sender runs the closure and then drops it, disconnecting the completion
//! channel that every other caller parks on. Nobody returns before the
//! closure has finished.

use std::future::Future;

/// One-shot gate: the wrapped operation runs exactly once per instance.
///
/// Re-entrant calls (the closure calling back into the same gate) and a
/// panicking closure are undefined behavior; the gate makes no attempt to
/// recover either.
pub struct RunOnceGate {
    admission: flume::Receiver<flume::Sender<()>>,
    done: flume::Receiver<()>,
}

impl RunOnceGate {
    /// Creates a gate that has not yet run.
    pub fn new() -> Self {
        let (done_tx, done_rx) = flume::bounded(1);
        let (admit_tx, admit_rx) = flume::bounded(1);
        admit_tx
            .try_send(done_tx)
            .expect("fresh admission cell accepts the runner ticket");
        Self {
            admission: admit_rx,
            done: done_rx,
        }
    }

    /// Runs `f` if no caller has before; otherwise suspends until the
    /// original run completes. Every caller returns with the run finished.
    pub async fn call_once<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        match self.admission.try_recv() {
            Ok(completion) => {
                f().await;
                // disconnects `done`, releasing every parked caller
                drop(completion);
            }
            Err(_) => {
                let _ = self.done.recv_async().await;
            }
        }
    }

    /// Whether the wrapped operation has already completed.
    pub fn is_complete(&self) -> bool {
        self.done.is_disconnected() && self.done.is_empty()
    }
}

impl Default for RunOnceGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunOnceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOnceGate")
            .field("complete", &self.is_complete())
            .finish()
    }
}
