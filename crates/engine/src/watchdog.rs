// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watchdog: the state machine that keeps one game server alive.
//!
//! Runs as a single task owning up to two session controllers. Control
//! operations are commands answered over oneshot channels, so every
//! transition is atomic from the outside; observers read a consistent
//! [`WatchdogStatus`] snapshot from a watch channel.
//!
//! ```text
//! Offline → Starting → Online ⇄ ReplacingOnline
//!                        ↓
//!                   Terminating → Offline
//! Reattaching → (Online | Offline)
//! ```

use crate::deployments::{DeployError, DeploymentStore};
use crate::events::EventBus;
use crate::session::{BridgeRequest, SessionController, SessionDeps, SessionError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_core::{
    DeploymentId, ErrorCode, Event, InstanceId, LaunchParams, ReattachRecord, RebootState,
    SecurityLevel,
};
use warden_host::ports::port_available;
use warden_storage::Store;

/// Consecutive heartbeat misses tolerated before the session is
/// declared dead.
pub const HEARTBEAT_RETRIES: u32 = 3;

/// Crash relaunches attempted per online period before giving up.
pub const RELAUNCH_ATTEMPTS: u32 = 3;

/// Stand-in interval when the heartbeat is disabled.
const HEARTBEAT_DISABLED: Duration = Duration::from_secs(86_400 * 365);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    Offline,
    Starting,
    Online,
    ReplacingOnline,
    Terminating,
    Reattaching,
}

warden_core::simple_display! {
    WatchdogState {
        Offline => "offline",
        Starting => "starting",
        Online => "online",
        ReplacingOnline => "replacing_online",
        Terminating => "terminating",
        Reattaching => "reattaching",
    }
}

/// Consistent snapshot for observers.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WatchdogStatus {
    pub state: WatchdogState,
    pub active_deployment: Option<DeploymentId>,
    pub staged_deployment: Option<DeploymentId>,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub reboot_state: RebootState,
    pub security: Option<SecurityLevel>,
}

impl WatchdogStatus {
    fn offline() -> Self {
        Self {
            state: WatchdogState::Offline,
            active_deployment: None,
            staged_deployment: None,
            port: None,
            pid: None,
            reboot_state: RebootState::Normal,
            security: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("watchdog is not running")]
    NotRunning,

    #[error("operation cancelled")]
    Cancelled,

    #[error("port {0} is already bound")]
    PortInUse(u16),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error("watchdog task is gone")]
    ChannelClosed,
}

impl WatchdogError {
    pub fn code(&self) -> ErrorCode {
        match self {
            WatchdogError::NotRunning => ErrorCode::WatchdogNotRunning,
            WatchdogError::Cancelled => ErrorCode::JobCancelled,
            WatchdogError::PortInUse(_) => ErrorCode::DreamDaemonPortInUse,
            WatchdogError::Session(e) => e.code(),
            WatchdogError::Deploy(e) => e.code(),
            WatchdogError::ChannelClosed => ErrorCode::InternalError,
        }
    }
}

enum Command {
    Start { token: CancellationToken, reply: oneshot::Sender<Result<(), WatchdogError>> },
    Stop { graceful: bool, reply: oneshot::Sender<()> },
    RestartWithLatest {
        token: CancellationToken,
        reply: oneshot::Sender<Result<(), WatchdogError>>,
    },
    SoftReboot { state: RebootState, reply: oneshot::Sender<Result<(), WatchdogError>> },
    Reattach { record: ReattachRecord, reply: oneshot::Sender<bool> },
    UpdateParams { params: LaunchParams, reply: oneshot::Sender<()> },
}

/// Everything the watchdog needs from the outside.
pub(crate) struct WatchdogDeps {
    pub session: SessionDeps,
    pub deployments: Arc<DeploymentStore>,
    pub store: Arc<Store>,
    pub events: EventBus,
}

/// Handle to a watchdog actor.
#[derive(Clone)]
pub struct Watchdog {
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<WatchdogStatus>,
}

impl Watchdog {
    pub(crate) fn spawn(instance: InstanceId, params: LaunchParams, deps: WatchdogDeps) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(WatchdogStatus::offline());
        let actor = Actor {
            instance,
            deps,
            params,
            cmd_rx,
            status_tx,
            state: WatchdogState::Offline,
            active: None,
            staged_deployment: None,
            is_primary: true,
            heartbeat_misses: 0,
            relaunch_attempts: 0,
        };
        tokio::spawn(actor.run());
        Self { cmd_tx, status_rx }
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R, WatchdogError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(make(tx)).await.map_err(|_| WatchdogError::ChannelClosed)?;
        rx.await.map_err(|_| WatchdogError::ChannelClosed)
    }

    /// Launch from the latest deployment. Idempotent while online.
    pub async fn start(&self) -> Result<(), WatchdogError> {
        self.start_cancellable(CancellationToken::new()).await
    }

    /// Launch, aborting the startup wait when `token` fires.
    pub async fn start_cancellable(&self, token: CancellationToken) -> Result<(), WatchdogError> {
        self.request(|reply| Command::Start { token, reply }).await?
    }

    /// Synchronous stop with bounded grace.
    pub async fn stop(&self, graceful: bool) -> Result<(), WatchdogError> {
        self.request(|reply| Command::Stop { graceful, reply }).await
    }

    /// Zero-downtime swap to the latest deployment (plain start when
    /// offline).
    pub async fn restart_with_latest(&self) -> Result<(), WatchdogError> {
        self.restart_cancellable(CancellationToken::new()).await
    }

    /// Swap, aborting at safe points when `token` fires.
    pub async fn restart_cancellable(
        &self,
        token: CancellationToken,
    ) -> Result<(), WatchdogError> {
        self.request(|reply| Command::RestartWithLatest { token, reply }).await?
    }

    /// Take effect at the session's next natural reboot.
    pub async fn soft_restart(&self) -> Result<(), WatchdogError> {
        self.request(|reply| Command::SoftReboot { state: RebootState::Restart, reply }).await?
    }

    /// Take effect at the session's next natural reboot.
    pub async fn soft_shutdown(&self) -> Result<(), WatchdogError> {
        self.request(|reply| Command::SoftReboot { state: RebootState::Shutdown, reply }).await?
    }

    /// Restore a session from a persisted record. True when the process
    /// was found and rebound.
    pub async fn reattach(&self, record: ReattachRecord) -> Result<bool, WatchdogError> {
        self.request(|reply| Command::Reattach { record, reply }).await
    }

    /// Apply new launch parameters to future launches.
    pub async fn update_params(&self, params: LaunchParams) -> Result<(), WatchdogError> {
        self.request(|reply| Command::UpdateParams { params, reply }).await
    }

    pub fn status(&self) -> WatchdogStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchdogStatus> {
        self.status_rx.clone()
    }
}

enum Step {
    Cmd(Option<Command>),
    Exit(Option<i32>),
    Bridge(Option<BridgeRequest>),
    HeartbeatTick,
}

struct Actor {
    instance: InstanceId,
    deps: WatchdogDeps,
    params: LaunchParams,
    cmd_rx: mpsc::Receiver<Command>,
    status_tx: watch::Sender<WatchdogStatus>,
    state: WatchdogState,
    active: Option<SessionController>,
    /// Populated only while a swap is in flight, for observers.
    staged_deployment: Option<DeploymentId>,
    is_primary: bool,
    heartbeat_misses: u32,
    relaunch_attempts: u32,
}

impl Actor {
    async fn run(mut self) {
        loop {
            self.publish();
            let heartbeat = if self.params.heartbeat_secs > 0 {
                Duration::from_secs(self.params.heartbeat_secs)
            } else {
                HEARTBEAT_DISABLED
            };

            let step = match (self.state, self.active.as_ref()) {
                (WatchdogState::Online, Some(active)) => {
                    tokio::select! {
                        cmd = self.cmd_rx.recv() => Step::Cmd(cmd),
                        code = active.wait() => Step::Exit(code),
                        request = active.next_bridge_request() => Step::Bridge(request),
                        _ = tokio::time::sleep(heartbeat) => Step::HeartbeatTick,
                    }
                }
                _ => Step::Cmd(self.cmd_rx.recv().await),
            };

            match step {
                Step::Cmd(None) => {
                    // Controller shutdown: leave the session running and
                    // keep the reattach record current.
                    self.persist_record();
                    return;
                }
                Step::Cmd(Some(command)) => self.handle_command(command).await,
                Step::Exit(code) => self.handle_exit(code).await,
                Step::Bridge(request) => self.handle_bridge(request).await,
                Step::HeartbeatTick => self.handle_heartbeat().await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { token, reply } => {
                let _ = reply.send(self.start_from_latest(&token).await);
            }
            Command::Stop { graceful, reply } => {
                self.handle_stop(graceful).await;
                let _ = reply.send(());
            }
            Command::RestartWithLatest { token, reply } => {
                let _ = reply.send(self.swap(&token).await);
            }
            Command::SoftReboot { state, reply } => {
                let result = match self.active.as_ref() {
                    Some(active) => {
                        active.set_reboot_state(state).await;
                        self.persist_record();
                        self.publish();
                        Ok(())
                    }
                    None => Err(WatchdogError::NotRunning),
                };
                let _ = reply.send(result);
            }
            Command::Reattach { record, reply } => {
                let _ = reply.send(self.handle_reattach(record).await);
            }
            Command::UpdateParams { params, reply } => {
                self.params = params;
                let _ = reply.send(());
            }
        }
    }

    async fn start_from_latest(&mut self, token: &CancellationToken) -> Result<(), WatchdogError> {
        if self.active.is_some() {
            return Ok(());
        }
        self.set_state(WatchdogState::Starting);
        let result = self.start_inner(token).await;
        if result.is_err() {
            self.set_state(WatchdogState::Offline);
        }
        result
    }

    async fn start_inner(&mut self, token: &CancellationToken) -> Result<(), WatchdogError> {
        let provider = self.deps.deployments.claim_latest()?;
        let port = self.params.primary_port;
        if !port_available(port) {
            return Err(WatchdogError::PortInUse(port));
        }
        let session = SessionController::launch(
            &self.deps.session,
            self.instance.clone(),
            provider,
            &self.params,
            port,
            true,
            false,
        )
        .await?;
        let startup = tokio::select! {
            result = session.wait_for_startup(self.startup_timeout()) => {
                result.map_err(WatchdogError::from)
            }
            _ = token.cancelled() => Err(WatchdogError::Cancelled),
        };
        if let Err(e) = startup {
            session.terminate(false).await;
            return Err(e);
        }
        self.is_primary = true;
        self.active = Some(session);
        self.heartbeat_misses = 0;
        self.relaunch_attempts = 0;
        self.persist_record();
        self.set_state(WatchdogState::Online);
        self.emit(Event::WatchdogLaunched { instance: self.instance.clone() });
        Ok(())
    }

    /// Zero-downtime swap: launch the staged slot, hand off, promote.
    async fn swap(&mut self, token: &CancellationToken) -> Result<(), WatchdogError> {
        if self.active.is_none() {
            return self.start_from_latest(token).await;
        }
        self.set_state(WatchdogState::ReplacingOnline);
        let result = self.swap_inner(token).await;
        self.staged_deployment = None;
        if result.is_err() {
            let state = if self.active.is_some() {
                WatchdogState::Online
            } else {
                WatchdogState::Offline
            };
            self.set_state(state);
        }
        result
    }

    async fn swap_inner(&mut self, token: &CancellationToken) -> Result<(), WatchdogError> {
        let staged_provider = self.deps.deployments.claim_latest()?;
        self.staged_deployment = Some(staged_provider.id().clone());
        self.publish();

        let port = self.other_port();
        if !port_available(port) {
            return Err(WatchdogError::PortInUse(port));
        }
        let staged = SessionController::launch(
            &self.deps.session,
            self.instance.clone(),
            staged_provider,
            &self.params,
            port,
            !self.is_primary,
            false,
        )
        .await?;
        let startup = tokio::select! {
            result = staged.wait_for_startup(self.startup_timeout()) => {
                result.map_err(WatchdogError::from)
            }
            _ = token.cancelled() => Err(WatchdogError::Cancelled),
        };
        if let Err(e) = startup {
            staged.terminate(false).await;
            return Err(e);
        }

        // Handoff: ask the old session to reboot itself away, with a
        // bounded wait before force-kill.
        if let Some(active) = self.active.as_ref() {
            active.request_graceful_reboot().await;
            if tokio::time::timeout(self.startup_timeout(), active.wait()).await.is_err() {
                warn!(instance = %self.instance, "old session ignored graceful reboot");
            }
        }
        if let Some(old) = self.active.take() {
            old.terminate(false).await;
        }

        let deployment = staged.deployment_id().clone();
        self.is_primary = !self.is_primary;
        self.active = Some(staged);
        self.heartbeat_misses = 0;
        self.persist_record();
        self.set_state(WatchdogState::Online);
        info!(instance = %self.instance, deployment = %deployment, "deployment swap complete");
        self.emit(Event::WatchdogSwapComplete { instance: self.instance.clone(), deployment });
        Ok(())
    }

    async fn handle_stop(&mut self, graceful: bool) {
        if let Some(active) = self.active.take() {
            self.set_state(WatchdogState::Terminating);
            active.terminate(graceful).await;
            self.emit(Event::WatchdogShutdown { instance: self.instance.clone() });
        }
        self.clear_record();
        self.set_state(WatchdogState::Offline);
    }

    async fn handle_reattach(&mut self, record: ReattachRecord) -> bool {
        self.set_state(WatchdogState::Reattaching);
        let provider = match self.deps.deployments.claim(&record.deployment) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(instance = %self.instance, error = %e, "reattach deployment gone");
                self.clear_record();
                self.set_state(WatchdogState::Offline);
                return false;
            }
        };
        match SessionController::reattach(&self.deps.session, provider, &self.params, &record) {
            Some(session) => {
                self.is_primary = record.is_primary;
                self.active = Some(session);
                self.heartbeat_misses = 0;
                self.relaunch_attempts = 0;
                self.persist_record();
                self.set_state(WatchdogState::Online);
                info!(instance = %self.instance, pid = record.pid, "watchdog reattached");
                true
            }
            None => {
                info!(instance = %self.instance, pid = record.pid, "recorded process is gone");
                self.clear_record();
                self.set_state(WatchdogState::Offline);
                false
            }
        }
    }

    async fn handle_exit(&mut self, code: Option<i32>) {
        let reboot = self.active.as_ref().map(|a| a.reboot_state()).unwrap_or_default();
        match reboot {
            RebootState::Shutdown => {
                if let Some(old) = self.active.take() {
                    old.terminate(false).await;
                }
                self.clear_record();
                self.set_state(WatchdogState::Offline);
                self.emit(Event::WatchdogShutdown { instance: self.instance.clone() });
            }
            RebootState::Restart => {
                info!(instance = %self.instance, "session exited for soft restart");
                self.relaunch().await;
            }
            RebootState::Normal => {
                let message = match code {
                    Some(code) => format!("server exited unexpectedly (code {code})"),
                    None => "server exited unexpectedly".to_string(),
                };
                warn!(instance = %self.instance, "{message}");
                self.emit(Event::WatchdogCrashed { instance: self.instance.clone(), message });
                self.relaunch().await;
            }
        }
    }

    /// Relaunch the active slot after a crash or soft restart.
    async fn relaunch(&mut self) {
        let Some(old) = self.active.take() else { return };
        let deployment = old.deployment_id().clone();
        let port = old.bound_port();
        let is_primary = old.is_primary();
        old.terminate(false).await;

        if self.relaunch_attempts >= RELAUNCH_ATTEMPTS {
            warn!(instance = %self.instance, "relaunch budget exhausted, going offline");
            self.clear_record();
            self.set_state(WatchdogState::Offline);
            return;
        }
        self.relaunch_attempts += 1;

        let result = async {
            let provider = self.deps.deployments.claim(&deployment)?;
            if !port_available(port) {
                return Err(WatchdogError::PortInUse(port));
            }
            let session = SessionController::launch(
                &self.deps.session,
                self.instance.clone(),
                provider,
                &self.params,
                port,
                is_primary,
                false,
            )
            .await?;
            if let Err(e) = session.wait_for_startup(self.startup_timeout()).await {
                session.terminate(false).await;
                return Err(e.into());
            }
            Ok::<SessionController, WatchdogError>(session)
        }
        .await;

        match result {
            Ok(session) => {
                self.active = Some(session);
                self.heartbeat_misses = 0;
                self.persist_record();
                self.set_state(WatchdogState::Online);
                self.emit(Event::WatchdogRelaunched { instance: self.instance.clone() });
            }
            Err(e) => {
                warn!(instance = %self.instance, error = %e, "relaunch failed");
                self.clear_record();
                self.set_state(WatchdogState::Offline);
            }
        }
    }

    async fn handle_bridge(&mut self, request: Option<BridgeRequest>) {
        match request {
            // Reboot/startup already folded into the session's state
            Some(BridgeRequest::Reboot { .. }) | Some(BridgeRequest::Startup { .. }) => {
                self.persist_record();
            }
            Some(BridgeRequest::Chat { command, sender }) => {
                info!(instance = %self.instance, command, sender, "chat command from game");
            }
            Some(BridgeRequest::Heartbeat) => {
                self.heartbeat_misses = 0;
            }
            None => {}
        }
    }

    async fn handle_heartbeat(&mut self) {
        let healthy = match self.active.as_ref() {
            Some(active) => active.send_heartbeat().await,
            None => return,
        };
        if healthy {
            self.heartbeat_misses = 0;
            return;
        }
        self.heartbeat_misses += 1;
        let reboot_pending = self
            .active
            .as_ref()
            .map(|a| a.reboot_state() != RebootState::Normal)
            .unwrap_or(false);
        if self.heartbeat_misses >= HEARTBEAT_RETRIES && !reboot_pending {
            warn!(
                instance = %self.instance,
                misses = self.heartbeat_misses,
                "heartbeat lost, treating as unexpected exit"
            );
            self.heartbeat_misses = 0;
            self.emit(Event::WatchdogCrashed {
                instance: self.instance.clone(),
                message: format!("missed {HEARTBEAT_RETRIES} heartbeats"),
            });
            self.relaunch().await;
        }
    }

    fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.params.startup_timeout_secs)
    }

    fn other_port(&self) -> u16 {
        let current = self.active.as_ref().map(|a| a.bound_port());
        if current == Some(self.params.primary_port) {
            self.params.secondary_port
        } else {
            self.params.primary_port
        }
    }

    fn set_state(&mut self, state: WatchdogState) {
        if self.state != state {
            info!(instance = %self.instance, from = %self.state, to = %state, "watchdog transition");
            self.state = state;
        }
        self.publish();
    }

    fn publish(&self) {
        let status = WatchdogStatus {
            state: self.state,
            active_deployment: self.active.as_ref().map(|a| a.deployment_id().clone()),
            staged_deployment: self.staged_deployment.clone(),
            port: self.active.as_ref().map(|a| a.bound_port()),
            pid: self.active.as_ref().map(|a| a.pid()),
            reboot_state: self.active.as_ref().map(|a| a.reboot_state()).unwrap_or_default(),
            security: self.active.as_ref().map(|a| a.security_level()),
        };
        let _ = self.status_tx.send(status);
    }

    fn persist_record(&self) {
        let record = self.active.as_ref().map(|a| a.reattach_record());
        let save = self.deps.store.update(|s| match record {
            Some(record) => {
                s.reattach.insert(self.instance.clone(), record);
            }
            None => {
                s.reattach.remove(&self.instance);
            }
        });
        if let Err(e) = save {
            warn!(instance = %self.instance, error = %e, "failed to persist reattach record");
        }
    }

    fn clear_record(&self) {
        let save = self.deps.store.update(|s| {
            s.reattach.remove(&self.instance);
        });
        if let Err(e) = save {
            warn!(instance = %self.instance, error = %e, "failed to clear reattach record");
        }
    }

    fn emit(&self, event: Event) {
        self.deps.events.publish(event);
    }
}

#[cfg(test)]
#[path = "watchdog_tests.rs"]
mod tests;
