// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session ownership: one supervised game-server process, its bridge
//! registration, and its launch composition.

mod bridge;
mod controller;
mod launch;
mod topic;

pub use bridge::{BridgeRegistrar, BridgeRequest};
pub(crate) use controller::SessionDeps;
pub use controller::{SessionController, SessionError};
#[cfg(any(test, feature = "test-support"))]
pub use topic::FakeTopicClient;
pub use topic::{TcpTopicClient, TopicClient, TopicError};

/// Bridge API version reported to launched sessions.
pub const BRIDGE_API_VERSION: &str = "1.0.0";
