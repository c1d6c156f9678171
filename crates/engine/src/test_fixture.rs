// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture for engine tests: an [`EngineDeps`] wired entirely
//! with fakes, plus a toolchain mirror and git helpers.

use crate::compile::FakeCompiler;
use crate::events::EventBus;
use crate::jobs::JobManager;
use crate::manager::EngineDeps;
use crate::session::{BridgeRegistrar, BridgeRequest, FakeTopicClient};
use crate::toolchain::{DirectoryInstaller, ToolchainManager, COMPILER_BINARY, SERVER_BINARY};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use warden_core::FakeClock;
use warden_host::FakeProcessExecutor;
use warden_storage::Store;

pub(crate) const TEST_TOOLCHAIN: &str = "514.1589";

pub(crate) struct TestEnv {
    pub tmp: tempfile::TempDir,
    pub deps: EngineDeps<FakeClock>,
    pub executor: FakeProcessExecutor,
    pub compiler: Arc<FakeCompiler>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::load(tmp.path().join("state.json")).unwrap());

        let bin = tmp.path().join("mirror").join(TEST_TOOLCHAIN).join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join(SERVER_BINARY), b"#!bin").unwrap();
        std::fs::write(bin.join(COMPILER_BINARY), b"#!bin").unwrap();
        let toolchain = Arc::new(ToolchainManager::new(
            tmp.path().join("cache"),
            Arc::new(DirectoryInstaller::new(tmp.path().join("mirror"))),
        ));
        toolchain
            .install(
                TEST_TOOLCHAIN,
                &warden_core::ProgressReporter::discard(),
                &tokio_util::sync::CancellationToken::new(),
            )
            .await
            .unwrap();

        let install_dir = tmp.path().join("controller");
        std::fs::create_dir_all(&install_dir).unwrap();

        let clock = FakeClock::new();
        let executor = FakeProcessExecutor::new();
        let compiler = FakeCompiler::new();
        let jobs = Arc::new(
            JobManager::new(Arc::clone(&store), clock.clone())
                .with_drain_timeout(Duration::from_millis(100)),
        );

        let deps = EngineDeps {
            store,
            jobs,
            executor: Arc::new(executor.clone()),
            registrar: Arc::new(BridgeRegistrar::new()),
            topic: Arc::new(FakeTopicClient::new()),
            toolchain,
            compiler: compiler.clone(),
            events: EventBus::new(),
            clock,
            bridge_port: 5580,
            install_dir,
            instance_limit: 10,
            valid_instance_paths: None,
        };
        Self { tmp, deps, executor, compiler }
    }

    pub fn instances_root(&self) -> std::path::PathBuf {
        self.tmp.path().join("instances")
    }

    /// Answers every launch's bridge handshake in the background.
    pub fn spawn_handshaker(&self) {
        let executor = self.executor.clone();
        let registrar = Arc::clone(&self.deps.registrar);
        tokio::spawn(async move {
            let mut seen = 0;
            loop {
                let launches = executor.launches();
                while seen < launches.len() {
                    let launch = &launches[seen];
                    let port: u16 = launch
                        .args
                        .iter()
                        .position(|a| a == "-port")
                        .and_then(|i| launch.args.get(i + 1))
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(0);
                    if let Some(access) = launch
                        .args
                        .last()
                        .and_then(|p| p.split('&').find_map(|x| x.strip_prefix("access_identifier=")))
                    {
                        registrar.route(access, BridgeRequest::Startup { port }).await;
                    }
                    seen += 1;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
    }
}

/// Run git in a directory, panicking on failure.
pub(crate) fn git(dir: &Path, args: &[&str]) -> String {
    let out = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "tester")
        .env("GIT_AUTHOR_EMAIL", "tester@localhost")
        .env("GIT_COMMITTER_NAME", "tester")
        .env("GIT_COMMITTER_EMAIL", "tester@localhost")
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Initialise a git repository with one commit at `dir`.
pub(crate) fn seed_repo(dir: &Path) -> String {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/master"]);
    std::fs::write(dir.join("station.dme"), b"// project\n").unwrap();
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-m", "initial"]);
    git(dir, &["rev-parse", "HEAD"])
}
