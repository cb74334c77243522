// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Coordination primitives built on message passing.
//!
//! # Overview
//!
//! Every primitive in this crate runs its core protocol over channels rather
//! than a native lock: a capacity-1 channel pre-loaded with one sentinel is a
//! mutex, dropping the last sender of a channel is a broadcast, and a
//! receive-compute-send round trip through a one-slot cell serializes access
//! to shared state. Native mutexes appear only as incidental guards around
//! auxiliary map mutation.
//!
//! - [`ExclusiveToken`] — binary mutex over a token channel; implements the
//!   [`Lockable`] capability consumed by [`ConditionChannel`]
//! - [`ReadWriteGate`] — multi-reader / single-writer lock
//! - [`CompletionCounter`] — wait group releasing waiters when the count
//!   returns to zero
//! - [`ConditionChannel`] — condition variable over an external [`Lockable`]
//! - [`RunOnceGate`] — exactly-once execution among concurrent callers
//! - [`MultiKeyLock`] — deadlock-free, cancelable acquisition of named locks
//! - [`CallDeduplicator`] — coalesces concurrent identical calls into one
//! - [`WindowedLimiter`] — sliding-window rate limiter
//! - [`TopicBus`] — in-memory pub/sub exercising the gate and the counter
//!
//! # Caveats
//!
//! A primitive's identity is the identity of its internal channels: share an
//! instance behind [`std::sync::Arc`], never reconstruct it. None of the lock
//! primitives return errors on misuse; unbalanced unlocks stall rather than
//! panic, so callers must pair operations correctly.

pub mod condition;
pub mod dedup;
pub mod key_lock;
pub mod limiter;
pub mod once;
pub mod pubsub;
pub mod rwlock;
pub mod token;
pub mod wait_group;

// ── Re-exports ───────────────────────────────────────────────────────

pub use condition::ConditionChannel;
pub use dedup::{CallDeduplicator, CallError};
pub use key_lock::{Cancelled, MultiKeyGuard, MultiKeyLock};
pub use limiter::{AcquireError, WindowedLimiter};
pub use once::RunOnceGate;
pub use pubsub::{BusClosed, Subscription, TopicBus};
pub use rwlock::ReadWriteGate;
pub use token::{ExclusiveToken, Lockable};
pub use tokio_util::sync::CancellationToken;
pub use wait_group::CompletionCounter;
