// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process spawn, attach, and termination.
//!
//! The engine never touches the OS process table directly; it goes
//! through [`ProcessExecutor`] so the watchdog can be driven by a fake
//! in tests. Attached handles (reattach after a controller restart)
//! have no child to wait on and fall back to pid liveness polling.

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Interval for pid liveness polling on attached handles.
const LIVENESS_POLL: Duration = Duration::from_millis(500);

/// How long a graceful terminate waits before escalating to SIGKILL.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("spawned process has no pid")]
    NoPid,
}

/// Everything needed to start a game-server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

/// A live or attached OS process.
#[async_trait]
pub trait ProcessHandle: Send + Sync + std::fmt::Debug {
    fn pid(&self) -> u32;

    fn is_running(&self) -> bool;

    /// Wait for the process to exit. Returns the exit code when the OS
    /// reports one (attached processes never do).
    async fn wait(&self) -> Option<i32>;

    /// Terminate the process. Graceful sends SIGTERM and waits a bounded
    /// grace period before escalating to SIGKILL.
    async fn terminate(&self, graceful: bool);

    /// Combined stdout/stderr captured after exit. Empty for attached
    /// processes.
    fn captured_output(&self) -> String;
}

/// Spawns and inspects processes.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>, ExecutorError>;

    /// Rebind to an already-running process. None when the pid is gone.
    fn attach(&self, pid: u32) -> Option<Box<dyn ProcessHandle>>;

    /// True when an interactive instance of the named binary is already
    /// running under the controller's user (the pager pre-check).
    fn interactive_binary_running(&self, binary_name: &str) -> bool;
}

fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Real executor backed by tokio's process API and signals.
#[derive(Default, Clone)]
pub struct SystemProcessExecutor;

#[derive(Debug)]
struct SystemHandle {
    pid: u32,
    /// Present for spawned handles; resolves once the reaper task sees
    /// the exit. Attached handles have no child to wait on.
    exit: Option<tokio::sync::watch::Receiver<Option<i32>>>,
    output: std::sync::Arc<Mutex<String>>,
}

impl SystemHandle {
    /// Hand the child to a reaper task so waits are cancel-safe and the
    /// process never lingers as a zombie.
    fn spawned(pid: u32, child: tokio::process::Child) -> Self {
        let (tx, rx) = tokio::sync::watch::channel(None);
        let output = std::sync::Arc::new(Mutex::new(String::new()));
        let task_output = std::sync::Arc::clone(&output);
        tokio::spawn(async move {
            match child.wait_with_output().await {
                Ok(out) => {
                    let mut buf = task_output.lock();
                    buf.push_str(&String::from_utf8_lossy(&out.stdout));
                    buf.push_str(&String::from_utf8_lossy(&out.stderr));
                    drop(buf);
                    let _ = tx.send(Some(out.status.code().unwrap_or(-1)));
                }
                Err(e) => {
                    warn!(pid, error = %e, "wait on child failed");
                    let _ = tx.send(Some(-1));
                }
            }
        });
        Self { pid, exit: Some(rx), output }
    }

    fn attached(pid: u32) -> Self {
        Self { pid, exit: None, output: std::sync::Arc::new(Mutex::new(String::new())) }
    }
}

#[async_trait]
impl ProcessHandle for SystemHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_running(&self) -> bool {
        match &self.exit {
            Some(rx) => rx.borrow().is_none(),
            None => pid_alive(self.pid),
        }
    }

    async fn wait(&self) -> Option<i32> {
        match &self.exit {
            Some(rx) => {
                let mut rx = rx.clone();
                let result = match rx.wait_for(|code| code.is_some()).await {
                    Ok(code) => *code,
                    Err(_) => None,
                };
                result
            }
            None => {
                // Attached: poll liveness; the exit code is not ours to see.
                while pid_alive(self.pid) {
                    tokio::time::sleep(LIVENESS_POLL).await;
                }
                None
            }
        }
    }

    async fn terminate(&self, graceful: bool) {
        if !self.is_running() {
            return;
        }
        let pid = Pid::from_raw(self.pid as i32);
        if graceful {
            let _ = kill(pid, Signal::SIGTERM);
            let grace = tokio::time::timeout(TERMINATE_GRACE, self.wait()).await;
            if grace.is_ok() {
                return;
            }
        }
        if self.is_running() {
            debug!(pid = self.pid, "escalating to SIGKILL");
            let _ = kill(pid, Signal::SIGKILL);
            let _ = tokio::time::timeout(TERMINATE_GRACE, self.wait()).await;
        }
    }

    fn captured_output(&self) -> String {
        self.output.lock().clone()
    }
}

#[async_trait]
impl ProcessExecutor for SystemProcessExecutor {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>, ExecutorError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;
        let pid = child.id().ok_or(ExecutorError::NoPid)?;
        debug!(pid, program = %spec.program.display(), "spawned process");
        Ok(Box::new(SystemHandle::spawned(pid, child)))
    }

    fn attach(&self, pid: u32) -> Option<Box<dyn ProcessHandle>> {
        if pid_alive(pid) {
            Some(Box::new(SystemHandle::attached(pid)))
        } else {
            None
        }
    }

    fn interactive_binary_running(&self, binary_name: &str) -> bool {
        use std::os::unix::fs::MetadataExt;
        let own_uid = nix::unistd::geteuid().as_raw();
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return false;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(pid_str) = name.to_str() else { continue };
            if !pid_str.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if meta.uid() != own_uid {
                continue;
            }
            if let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) {
                if comm.trim() == binary_name {
                    return true;
                }
            }
        }
        false
    }
}

/// Scriptable executor for tests.
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeProcessExecutor;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::sync::watch;

    #[derive(Default)]
    #[derive(Debug)]
    struct FakeInner {
        next_pid: AtomicU32,
        processes: Mutex<HashMap<u32, watch::Sender<Option<i32>>>>,
        launches: Mutex<Vec<LaunchSpec>>,
        pager_running: AtomicBool,
        fail_next_launch: AtomicBool,
    }

    /// In-memory process table. Exits are scripted by the test.
    #[derive(Clone, Default)]
    pub struct FakeProcessExecutor {
        inner: Arc<FakeInner>,
    }

    impl FakeProcessExecutor {
        pub fn new() -> Self {
            let this = Self::default();
            this.inner.next_pid.store(1000, Ordering::SeqCst);
            this
        }

        /// Pre-register a pid as alive (for reattach tests).
        pub fn seed_pid(&self, pid: u32) {
            let (tx, _) = watch::channel(None);
            self.inner.processes.lock().insert(pid, tx);
        }

        /// Script an exit for a running pid.
        pub fn exit(&self, pid: u32, code: i32) {
            if let Some(tx) = self.inner.processes.lock().get(&pid) {
                let _ = tx.send(Some(code));
            }
        }

        pub fn set_pager_running(&self, running: bool) {
            self.inner.pager_running.store(running, Ordering::SeqCst);
        }

        pub fn fail_next_launch(&self) {
            self.inner.fail_next_launch.store(true, Ordering::SeqCst);
        }

        /// Every launch spec seen so far, oldest first.
        pub fn launches(&self) -> Vec<LaunchSpec> {
            self.inner.launches.lock().clone()
        }

        pub fn running_pids(&self) -> Vec<u32> {
            let mut pids: Vec<u32> = self
                .inner
                .processes
                .lock()
                .iter()
                .filter(|(_, tx)| tx.borrow().is_none())
                .map(|(pid, _)| *pid)
                .collect();
            pids.sort_unstable();
            pids
        }
    }

    #[derive(Debug)]
    struct FakeHandle {
        pid: u32,
        rx: watch::Receiver<Option<i32>>,
        inner: Arc<FakeInner>,
    }

    #[async_trait]
    impl ProcessHandle for FakeHandle {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn is_running(&self) -> bool {
            self.rx.borrow().is_none()
        }

        async fn wait(&self) -> Option<i32> {
            let mut rx = self.rx.clone();
            let result = match rx.wait_for(|v| v.is_some()).await {
                Ok(v) => *v,
                Err(_) => None,
            };
            result
        }

        async fn terminate(&self, graceful: bool) {
            let code = if graceful { 0 } else { -9 };
            if let Some(tx) = self.inner.processes.lock().get(&self.pid) {
                let _ = tx.send(Some(code));
            }
        }

        fn captured_output(&self) -> String {
            String::new()
        }
    }

    #[async_trait]
    impl ProcessExecutor for FakeProcessExecutor {
        async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>, ExecutorError> {
            if self.inner.fail_next_launch.swap(false, Ordering::SeqCst) {
                return Err(ExecutorError::Spawn {
                    program: spec.program.display().to_string(),
                    source: std::io::Error::other("scripted launch failure"),
                });
            }
            let pid = self.inner.next_pid.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = watch::channel(None);
            self.inner.processes.lock().insert(pid, tx);
            self.inner.launches.lock().push(spec);
            Ok(Box::new(FakeHandle { pid, rx, inner: Arc::clone(&self.inner) }))
        }

        fn attach(&self, pid: u32) -> Option<Box<dyn ProcessHandle>> {
            let guard = self.inner.processes.lock();
            let tx = guard.get(&pid)?;
            if tx.borrow().is_some() {
                return None;
            }
            Some(Box::new(FakeHandle {
                pid,
                rx: tx.subscribe(),
                inner: Arc::clone(&self.inner),
            }))
        }

        fn interactive_binary_running(&self, _binary_name: &str) -> bool {
            self.inner.pager_running.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
