// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory topic fan-out built on the crate's own primitives.
//!
//! [`TopicBus`] is the canonical consumer of the lock family:
//! [`ReadWriteGate`](crate::ReadWriteGate) orders publishes (shared) against
//! subscription changes (exclusive), and a
//! [`CompletionCounter`](crate::CompletionCounter) tracks messages that have
//! been handed to a mailbox but not yet run through their handler, which is
//! what lets [`close`](TopicBus::close) drain the bus. The registration map
//! itself sits behind a small mutex for mutation safety only.
//!
//! Each subscription owns a bounded mailbox drained by a dedicated task;
//! a slow handler backpressures its publishers once the mailbox fills.

use crate::rwlock::ReadWriteGate;
use crate::wait_group::CompletionCounter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Mailbox depth per subscription before publishers backpressure.
const MAILBOX_CAPACITY: usize = 100;

/// The bus no longer accepts publishes or subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("topic bus is closed")]
pub struct BusClosed;

struct TopicEntry<M> {
    id: u64,
    mailbox: flume::Sender<M>,
}

struct BusState<M> {
    topics: HashMap<String, Vec<TopicEntry<M>>>,
    closed: bool,
    next_id: u64,
}

struct BusShared<M> {
    gate: ReadWriteGate,
    pending: CompletionCounter,
    state: Mutex<BusState<M>>,
}

/// A topic-keyed publish/subscribe bus.
pub struct TopicBus<M> {
    shared: Arc<BusShared<M>>,
}

impl<M> Clone for TopicBus<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: Clone + Send + 'static> TopicBus<M> {
    /// Creates an open bus with no topics.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BusShared {
                gate: ReadWriteGate::new(),
                pending: CompletionCounter::new(),
                state: Mutex::new(BusState {
                    topics: HashMap::new(),
                    closed: false,
                    next_id: 0,
                }),
            }),
        }
    }

    /// Registers `handler` for `topic` and starts its delivery task.
    ///
    /// Messages published to the topic are run through the handler in
    /// mailbox order. Fails once the bus is closed.
    pub async fn subscribe<F>(
        &self,
        topic: impl Into<String>,
        handler: F,
    ) -> anyhow::Result<Subscription<M>>
    where
        F: Fn(M) + Send + 'static,
    {
        let topic = topic.into();
        self.shared.gate.write_lock().await;
        let registered = self.register(&topic, handler);
        self.shared.gate.write_unlock().await;
        registered
    }

    fn register<F>(&self, topic: &str, handler: F) -> anyhow::Result<Subscription<M>>
    where
        F: Fn(M) + Send + 'static,
    {
        let (id, mailbox_rx) = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(BusClosed.into());
            }
            let id = state.next_id;
            state.next_id += 1;
            let (mailbox_tx, mailbox_rx) = flume::bounded(MAILBOX_CAPACITY);
            state
                .topics
                .entry(topic.to_string())
                .or_default()
                .push(TopicEntry { id, mailbox: mailbox_tx });
            (id, mailbox_rx)
        };

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            // drains the mailbox until the entry's sender is dropped
            while let Ok(message) = mailbox_rx.recv_async().await {
                handler(message);
                shared.pending.done().await;
            }
        });

        Ok(Subscription {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            id,
        })
    }

    /// Delivers `message` to every current subscriber of `topic`.
    ///
    /// Topics with no subscribers accept and discard messages. Fails once
    /// the bus is closed.
    pub async fn publish(&self, topic: &str, message: M) -> anyhow::Result<()> {
        self.shared.gate.read_lock().await;
        let outcome = self.fan_out(topic, message).await;
        self.shared.gate.read_unlock().await;
        outcome
    }

    async fn fan_out(&self, topic: &str, message: M) -> anyhow::Result<()> {
        let mailboxes: Vec<flume::Sender<M>> = {
            let state = self.shared.state.lock();
            if state.closed {
                return Err(BusClosed.into());
            }
            state
                .topics
                .get(topic)
                .map(|entries| entries.iter().map(|e| e.mailbox.clone()).collect())
                .unwrap_or_default()
        };

        for mailbox in mailboxes {
            self.shared.pending.add(1).await;
            if mailbox.send_async(message.clone()).await.is_err() {
                // subscriber unsubscribed mid-publish
                self.shared.pending.done().await;
            }
        }
        Ok(())
    }

    /// Closes the bus and waits for every delivered message to be handled.
    ///
    /// Publish and subscribe calls fail from the moment the bus is marked
    /// closed. Returns an error without finishing the drain when `cancel`
    /// fires first.
    pub async fn close(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.shared.gate.write_lock().await;
        self.shared.state.lock().closed = true;
        self.shared.gate.write_unlock().await;

        tracing::debug!("topic bus closed, draining");
        tokio::select! {
            _ = self.shared.pending.wait() => Ok(()),
            _ = cancel.cancelled() => anyhow::bail!("topic bus drain cancelled"),
        }
    }
}

impl<M: Clone + Send + 'static> Default for TopicBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> std::fmt::Debug for TopicBus<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TopicBus")
            .field("topics", &state.topics.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Handle to one registered subscriber.
pub struct Subscription<M> {
    shared: Arc<BusShared<M>>,
    topic: String,
    id: u64,
}

impl<M: Clone + Send + 'static> Subscription<M> {
    /// The topic this subscription listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Removes the subscriber. Its delivery task finishes the messages
    /// already in the mailbox, then exits.
    pub async fn unsubscribe(self) {
        self.shared.gate.write_lock().await;
        {
            let mut state = self.shared.state.lock();
            if let Some(entries) = state.topics.get_mut(&self.topic) {
                // dropping the entry's sender closes the mailbox
                entries.retain(|entry| entry.id != self.id);
            }
        }
        self.shared.gate.write_unlock().await;
    }
}

impl<M> std::fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}
