// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session controller: owns one game-server process.

use crate::deployments::DmbProvider;
use crate::session::bridge::{BridgeRegistrar, BridgeRequest};
use crate::session::launch::{compose_args, LaunchLine};
use crate::session::topic::{TopicClient, TopicError};
use crate::session::BRIDGE_API_VERSION;
use crate::toolchain::{ToolchainError, ToolchainManager, UseLock, PAGER_BINARY};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;
use warden_core::{
    ErrorCode, InstanceId, LaunchParams, ReattachRecord, RebootState, SecurityLevel, SessionId,
};
use warden_host::{ExecutorError, LaunchSpec, ProcessExecutor, ProcessHandle};

const TOPIC_HEARTBEAT: &str = "command=heartbeat";
const TOPIC_GRACEFUL_REBOOT: &str = "command=graceful_reboot";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("an interactive game pager is running under this user")]
    PagerRunning,

    #[error("failed to spawn game server: {0}")]
    Spawn(#[from] ExecutorError),

    #[error("session did not complete the bridge handshake within {0:?}")]
    StartupTimeout(Duration),

    #[error("game server exited during startup (code {0:?})")]
    DiedDuringStartup(Option<i32>),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::PagerRunning => ErrorCode::DeploymentPagerRunning,
            SessionError::StartupTimeout(_) | SessionError::DiedDuringStartup(_) => {
                ErrorCode::SessionStartupTimeout
            }
            SessionError::Spawn(_) => ErrorCode::InternalError,
            SessionError::Toolchain(e) => e.code(),
        }
    }
}

/// Everything a launch or reattach needs from the outside.
pub(crate) struct SessionDeps {
    pub executor: Arc<dyn ProcessExecutor>,
    pub registrar: Arc<BridgeRegistrar>,
    pub topic: Arc<dyn TopicClient>,
    pub toolchain: Arc<ToolchainManager>,
    pub bridge_port: u16,
}

pub struct SessionController {
    id: SessionId,
    instance: InstanceId,
    access_identifier: String,
    port: u16,
    security: SecurityLevel,
    is_primary: bool,
    provider: DmbProvider,
    // NOTE(lifetime): held to keep the toolchain version pinned; released on drop
    #[allow(dead_code)]
    toolchain_lock: Option<UseLock>,
    handle: Box<dyn ProcessHandle>,
    registrar: Arc<BridgeRegistrar>,
    topic: Arc<dyn TopicClient>,
    topic_timeout: Duration,
    reboot: watch::Sender<RebootState>,
    inbox: tokio::sync::Mutex<mpsc::Receiver<BridgeRequest>>,
    initialised: AtomicBool,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("id", &self.id)
            .field("instance", &self.instance)
            .field("access_identifier", &self.access_identifier)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("is_primary", &self.is_primary)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Launch a new session from the claimed deployment.
    ///
    /// The access identifier is registered with the bridge before the
    /// process spawns so the session's first request already routes.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn launch(
        deps: &SessionDeps,
        instance: InstanceId,
        provider: DmbProvider,
        params: &LaunchParams,
        port: u16,
        is_primary: bool,
        validate: bool,
    ) -> Result<SessionController, SessionError> {
        if deps.executor.interactive_binary_running(PAGER_BINARY) {
            return Err(SessionError::PagerRunning);
        }
        let toolchain_lock =
            deps.toolchain.use_version(&provider.deployment().toolchain_version)?;
        let security = params.effective_security(provider.deployment().min_security);

        // 128 bits of entropy, hex-encoded
        let access_identifier = Uuid::new_v4().simple().to_string();
        let inbox = deps.registrar.register(&access_identifier);

        let args = compose_args(
            params,
            &LaunchLine {
                artifact: provider.artifact_name(),
                port,
                security,
                validate,
                api_version: BRIDGE_API_VERSION,
                bridge_port: deps.bridge_port,
                access_identifier: &access_identifier,
            },
        );
        let spec = LaunchSpec {
            program: toolchain_lock.server_binary(),
            args,
            working_dir: provider.live_dir(is_primary).to_path_buf(),
        };
        let handle = match deps.executor.launch(spec).await {
            Ok(handle) => handle,
            Err(e) => {
                deps.registrar.deregister(&access_identifier);
                return Err(e.into());
            }
        };
        info!(instance = %instance, pid = handle.pid(), port, %security, "session launched");

        let (reboot, _) = watch::channel(RebootState::Normal);
        Ok(Self {
            id: SessionId::generate(),
            instance,
            access_identifier,
            port,
            security,
            is_primary,
            provider,
            toolchain_lock: Some(toolchain_lock),
            handle,
            registrar: Arc::clone(&deps.registrar),
            topic: Arc::clone(&deps.topic),
            topic_timeout: Duration::from_secs(params.topic_timeout_secs),
            reboot,
            inbox: tokio::sync::Mutex::new(inbox),
            initialised: AtomicBool::new(false),
        })
    }

    /// Rebind to a process recorded before a controller restart. None
    /// when the pid is gone: the caller clears the record.
    pub(crate) fn reattach(
        deps: &SessionDeps,
        provider: DmbProvider,
        params: &LaunchParams,
        record: &ReattachRecord,
    ) -> Option<SessionController> {
        let handle = deps.executor.attach(record.pid)?;
        let toolchain_lock =
            deps.toolchain.use_version(&provider.deployment().toolchain_version).ok();
        let inbox = deps.registrar.register(&record.access_identifier);
        info!(instance = %record.instance, pid = record.pid, "session reattached");

        let (reboot, _) = watch::channel(record.reboot_state);
        Some(Self {
            id: SessionId::generate(),
            instance: record.instance.clone(),
            access_identifier: record.access_identifier.clone(),
            port: record.port,
            security: record.security_level,
            is_primary: record.is_primary,
            provider,
            toolchain_lock,
            handle,
            registrar: Arc::clone(&deps.registrar),
            topic: Arc::clone(&deps.topic),
            topic_timeout: Duration::from_secs(params.topic_timeout_secs),
            reboot,
            inbox: tokio::sync::Mutex::new(inbox),
            initialised: AtomicBool::new(true),
        })
    }

    /// Wait for the bridge startup handshake.
    pub async fn wait_for_startup(&self, timeout: Duration) -> Result<(), SessionError> {
        let handshake = async {
            loop {
                let request = { self.inbox.lock().await.recv().await };
                match request {
                    Some(request) => {
                        self.observe(&request);
                        if matches!(request, BridgeRequest::Startup { .. }) {
                            return Ok(());
                        }
                    }
                    None => return Err(SessionError::DiedDuringStartup(None)),
                }
            }
        };
        let died = async { SessionError::DiedDuringStartup(self.handle.wait().await) };

        match tokio::time::timeout(timeout, async {
            tokio::select! {
                result = handshake => result,
                error = died => Err(error),
            }
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SessionError::StartupTimeout(timeout)),
        }
    }

    /// Next inbound bridge request. Updates the session's own view of
    /// init and reboot state before handing the request out.
    pub async fn next_bridge_request(&self) -> Option<BridgeRequest> {
        let request = { self.inbox.lock().await.recv().await };
        if let Some(request) = &request {
            self.observe(request);
        }
        request
    }

    fn observe(&self, request: &BridgeRequest) {
        match request {
            BridgeRequest::Startup { .. } => {
                self.initialised.store(true, Ordering::SeqCst);
            }
            BridgeRequest::Reboot { pending } => {
                debug!(instance = %self.instance, state = %pending, "session reboot state");
                let _ = self.reboot.send(*pending);
            }
            _ => {}
        }
    }

    pub async fn send_topic(&self, payload: &str) -> Result<String, TopicError> {
        self.topic.send(self.port, payload, self.topic_timeout).await
    }

    pub async fn send_heartbeat(&self) -> bool {
        self.send_topic(TOPIC_HEARTBEAT).await.is_ok()
    }

    /// Ask the session to reboot at its own pace (the zero-downtime
    /// swap handoff).
    pub async fn request_graceful_reboot(&self) -> bool {
        self.send_topic(TOPIC_GRACEFUL_REBOOT).await.is_ok()
    }

    /// Record what the session should do at its next natural reboot and
    /// tell it, best-effort.
    pub async fn set_reboot_state(&self, state: RebootState) {
        let _ = self.reboot.send(state);
        let payload = format!("command=set_reboot_state&state={state}");
        let _ = self.send_topic(&payload).await;
    }

    /// Wait for process exit.
    pub async fn wait(&self) -> Option<i32> {
        self.handle.wait().await
    }

    /// Stop the process and release the bridge route.
    pub async fn terminate(&self, graceful: bool) {
        self.registrar.deregister(&self.access_identifier);
        self.handle.terminate(graceful).await;
        info!(instance = %self.instance, pid = self.handle.pid(), graceful, "session terminated");
    }

    /// Persisted handle for rebinding after a controller restart.
    pub fn reattach_record(&self) -> ReattachRecord {
        ReattachRecord {
            instance: self.instance.clone(),
            pid: self.handle.pid(),
            access_identifier: self.access_identifier.clone(),
            port: self.port,
            is_primary: self.is_primary,
            reboot_state: self.reboot_state(),
            security_level: self.security,
            deployment: self.provider.id().clone(),
        }
    }

    // ----- observables ----------------------------------------------------

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    pub fn bound_port(&self) -> u16 {
        self.port
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security
    }

    pub fn reboot_state(&self) -> RebootState {
        *self.reboot.borrow()
    }

    pub fn subscribe_reboot(&self) -> watch::Receiver<RebootState> {
        self.reboot.subscribe()
    }

    pub fn initialised(&self) -> bool {
        self.initialised.load(Ordering::SeqCst)
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn deployment_id(&self) -> &warden_core::DeploymentId {
        self.provider.id()
    }

    pub fn captured_output(&self) -> String {
        self.handle.captured_output()
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
