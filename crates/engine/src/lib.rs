// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! warden-engine: the host controller's subsystems.
//!
//! Job manager, toolchain cache, deployment store, session controller
//! and bridge, watchdog state machine, chat bridge, and the instance
//! manager that composes them. The HTTP adapter and chat providers live
//! outside; everything here is driven through plain async calls and
//! observed through watch channels and the event bus.

pub mod chat;
pub mod compile;
pub mod deployments;
pub mod events;
pub mod instance;
pub mod jobs;
pub mod manager;
pub mod session;
pub mod toolchain;
pub mod watchdog;

#[cfg(test)]
mod test_fixture;

pub use chat::{ChatBridge, ChatError, ChatProvider, CustomCommand};
#[cfg(any(test, feature = "test-support"))]
pub use chat::FakeChatProvider;
pub use compile::{CompileError, Compiler, ToolchainCompiler};
#[cfg(any(test, feature = "test-support"))]
pub use compile::FakeCompiler;
pub use deployments::{DeployError, DeploymentStore, DmbProvider, PendingDeployment};
pub use events::EventBus;
pub use instance::{InstanceError, InstanceHost};
pub use jobs::{JobContext, JobManager, JobManagerError};
pub use manager::{CreateOutcome, EngineDeps, InstanceManager, ManagerError};
#[cfg(any(test, feature = "test-support"))]
pub use session::FakeTopicClient;
pub use session::{
    BridgeRegistrar, BridgeRequest, SessionController, SessionError, TcpTopicClient, TopicClient,
    TopicError,
};
pub use toolchain::{
    DirectoryInstaller, ToolchainError, ToolchainInstaller, ToolchainManager, UseLock,
};
pub use watchdog::{Watchdog, WatchdogError, WatchdogState, WatchdogStatus};
