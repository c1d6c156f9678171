// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bridge routing: inbound requests from game sessions.
//!
//! Every launch registers its access identifier here before the process
//! spawns, so the first bridge request a session makes already has a
//! route. The wire format is decoded by the external adapter; the
//! engine only sees structural [`BridgeRequest`]s.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;
use warden_core::RebootState;

/// Queue depth per session inbox.
const INBOX_CAPACITY: usize = 16;

/// Decoded request from a running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeRequest {
    /// The session finished booting and is serving on `port`.
    Startup { port: u16 },
    /// Periodic liveness signal.
    Heartbeat,
    /// The session is about to reboot; `pending` is its current intent.
    Reboot { pending: RebootState },
    /// A chat command sourced from game code.
    Chat { command: String, sender: String },
}

/// Routes bridge requests to the session whose access identifier
/// matches.
#[derive(Default)]
pub struct BridgeRegistrar {
    routes: Mutex<HashMap<String, mpsc::Sender<BridgeRequest>>>,
}

impl BridgeRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identifier and return the session's inbox.
    pub fn register(&self, access_identifier: &str) -> mpsc::Receiver<BridgeRequest> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.routes.lock().insert(access_identifier.to_string(), tx);
        rx
    }

    pub fn deregister(&self, access_identifier: &str) {
        self.routes.lock().remove(access_identifier);
    }

    /// Deliver a request. False when the identifier is unknown or the
    /// session is gone.
    pub async fn route(&self, access_identifier: &str, request: BridgeRequest) -> bool {
        let tx = self.routes.lock().get(access_identifier).cloned();
        match tx {
            Some(tx) => tx.send(request).await.is_ok(),
            None => {
                debug!("bridge request for unknown access identifier");
                false
            }
        }
    }

    pub fn registered_count(&self) -> usize {
        self.routes.lock().len()
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
