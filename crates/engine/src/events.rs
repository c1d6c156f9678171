// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-daemon event bus.
//!
//! Components publish [`Event`]s keyed by instance; subscribers (chat
//! fan-out, tests) filter on the instance they care about. Publishing
//! never blocks and never fails — an event with no subscribers is only
//! traced.

use tokio::sync::broadcast;
use tracing::debug;
use warden_core::Event;

const BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        debug!(instance = %event.instance(), event = %event.message(), "event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Adapter for components that take a plain event callback.
    pub fn sink(&self) -> std::sync::Arc<dyn Fn(Event) + Send + Sync> {
        let bus = self.clone();
        std::sync::Arc::new(move |event| bus.publish(event))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
