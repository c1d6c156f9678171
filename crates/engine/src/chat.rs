// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat bridge: event fan-out to provider connections.
//!
//! Providers (Discord, IRC) live outside the core behind the
//! [`ChatProvider`] trait. One connection's failure never blocks
//! delivery to the others; failing sends are retried with bounded
//! backoff before being dropped.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use warden_core::{ChatChannel, Event, InstanceId};

use crate::events::EventBus;

/// Delivery attempts per channel before a message is dropped.
pub const CHAT_RETRY_ATTEMPTS: u32 = 3;

/// First retry delay; doubled per attempt.
const CHAT_RETRY_BASE: Duration = Duration::from_millis(250);

/// File inside a deployment's live directory that game code uses to
/// publish chat commands.
pub const CUSTOM_COMMANDS_FILE: &str = "chat_commands.json";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("delivery to {channel} failed: {detail}")]
    Delivery { channel: String, detail: String },
}

/// One chat-provider connection.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Connection name (matches the instance's chat settings entry).
    fn name(&self) -> &str;

    async fn send(&self, channel: &str, message: &str) -> Result<(), ChatError>;
}

/// A chat command sourced from the active deployment's game code.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CustomCommand {
    pub name: String,
    pub help_text: String,
    #[serde(default)]
    pub admin_only: bool,
}

struct Connection {
    provider: Arc<dyn ChatProvider>,
    channels: Vec<ChatChannel>,
}

/// Fan-out point for one instance's chat traffic.
#[derive(Default)]
pub struct ChatBridge {
    connections: Mutex<Vec<Connection>>,
    commands: Mutex<Vec<CustomCommand>>,
}

impl ChatBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-materialise the connection list after a settings change.
    pub fn set_connections(&self, connections: Vec<(Arc<dyn ChatProvider>, Vec<ChatChannel>)>) {
        let connections = connections
            .into_iter()
            .map(|(provider, channels)| Connection { provider, channels })
            .collect();
        *self.connections.lock() = connections;
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Deliver an event to every mapped channel of every connection.
    /// Connections run concurrently and failures are isolated.
    pub async fn deliver(self: &Arc<Self>, event: &Event) {
        let class = event.channel_class();
        let message = event.message();

        let mut tasks = JoinSet::new();
        {
            let connections = self.connections.lock();
            for connection in connections.iter() {
                let targets: Vec<String> = connection
                    .channels
                    .iter()
                    .filter(|c| c.classes.contains(&class))
                    .map(|c| c.identifier.clone())
                    .collect();
                if targets.is_empty() {
                    continue;
                }
                let provider = Arc::clone(&connection.provider);
                let message = message.clone();
                tasks.spawn(async move {
                    for channel in targets {
                        send_with_backoff(provider.as_ref(), &channel, &message).await;
                    }
                });
            }
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Reload the command list from the active deployment's live dir.
    pub fn load_custom_commands(&self, live_dir: &Path) {
        let path = live_dir.join(CUSTOM_COMMANDS_FILE);
        let commands = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<CustomCommand>>(&bytes) {
                Ok(commands) => commands,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "bad custom command file");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        debug!(count = commands.len(), "custom chat commands loaded");
        *self.commands.lock() = commands;
    }

    pub fn custom_commands(&self) -> Vec<CustomCommand> {
        self.commands.lock().clone()
    }

    /// Subscribe the bridge to an instance's events on the bus.
    pub fn spawn_fanout(
        self: &Arc<Self>,
        bus: &EventBus,
        instance: InstanceId,
    ) -> tokio::task::JoinHandle<()> {
        let bridge = Arc::clone(self);
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if *event.instance() == instance => bridge.deliver(&event).await,
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(instance = %instance, missed, "chat fan-out lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }
}

async fn send_with_backoff(provider: &dyn ChatProvider, channel: &str, message: &str) {
    let mut delay = CHAT_RETRY_BASE;
    for attempt in 1..=CHAT_RETRY_ATTEMPTS {
        match provider.send(channel, message).await {
            Ok(()) => return,
            Err(e) if attempt < CHAT_RETRY_ATTEMPTS => {
                debug!(provider = provider.name(), attempt, error = %e, "chat send retry");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                warn!(provider = provider.name(), channel, error = %e, "chat delivery dropped");
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeChatProvider;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;

    /// Records deliveries; failures are scripted per-provider.
    pub struct FakeChatProvider {
        name: String,
        sent: Mutex<Vec<(String, String)>>,
        fail_next: Mutex<u32>,
    }

    impl FakeChatProvider {
        pub fn new(name: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                sent: Mutex::new(Vec::new()),
                fail_next: Mutex::new(0),
            })
        }

        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().clone()
        }

        /// Fail the next `n` sends.
        pub fn fail_next(&self, n: u32) {
            *self.fail_next.lock() = n;
        }
    }

    #[async_trait]
    impl ChatProvider for FakeChatProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, channel: &str, message: &str) -> Result<(), ChatError> {
            {
                let mut fail = self.fail_next.lock();
                if *fail > 0 {
                    *fail -= 1;
                    return Err(ChatError::Delivery {
                        channel: channel.to_string(),
                        detail: "scripted failure".into(),
                    });
                }
            }
            self.sent.lock().push((channel.to_string(), message.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "chat_tests.rs"]
mod tests;
