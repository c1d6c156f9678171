// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn spec(program: &str, args: &[&str]) -> LaunchSpec {
    LaunchSpec {
        program: PathBuf::from(program),
        args: args.iter().map(|s| s.to_string()).collect(),
        working_dir: std::env::temp_dir(),
    }
}

#[tokio::test]
async fn spawned_process_reports_exit_code() {
    let executor = SystemProcessExecutor;
    let handle = executor.launch(spec("/bin/sh", &["-c", "exit 3"])).await.unwrap();
    assert_eq!(handle.wait().await, Some(3));
    assert!(!handle.is_running());
}

#[tokio::test]
async fn spawned_process_captures_combined_output() {
    let executor = SystemProcessExecutor;
    let handle =
        executor.launch(spec("/bin/sh", &["-c", "echo out; echo err 1>&2"])).await.unwrap();
    handle.wait().await;

    let output = handle.captured_output();
    assert!(output.contains("out"));
    assert!(output.contains("err"));
}

#[tokio::test]
async fn terminate_kills_long_running_process() {
    let executor = SystemProcessExecutor;
    let handle = executor.launch(spec("/bin/sleep", &["300"])).await.unwrap();
    assert!(handle.is_running());

    handle.terminate(false).await;
    assert!(!handle.is_running());
}

#[tokio::test]
async fn attach_to_missing_pid_returns_none() {
    let executor = SystemProcessExecutor;
    // Pids wrap below 2^22 on Linux; 4_000_000 is safely outside it.
    assert!(executor.attach(4_000_000).is_none());
}

#[tokio::test]
async fn attach_to_live_process_works() {
    let executor = SystemProcessExecutor;
    let spawned = executor.launch(spec("/bin/sleep", &["300"])).await.unwrap();

    let attached = executor.attach(spawned.pid()).unwrap();
    assert!(attached.is_running());
    assert_eq!(attached.pid(), spawned.pid());

    spawned.terminate(false).await;
}

#[tokio::test]
async fn launch_failure_names_program() {
    let executor = SystemProcessExecutor;
    let err = executor.launch(spec("/nonexistent/binary", &[])).await.unwrap_err();
    assert!(err.to_string().contains("/nonexistent/binary"));
}

mod fake {
    use super::*;

    #[tokio::test]
    async fn scripted_exit_resolves_wait() {
        let executor = FakeProcessExecutor::new();
        let handle = executor.launch(spec("game", &[])).await.unwrap();
        assert!(handle.is_running());

        executor.exit(handle.pid(), 0);
        assert_eq!(handle.wait().await, Some(0));
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn attach_sees_seeded_pids() {
        let executor = FakeProcessExecutor::new();
        executor.seed_pid(777);

        let handle = executor.attach(777).unwrap();
        assert!(handle.is_running());

        executor.exit(777, 1);
        assert!(executor.attach(777).is_none());
        assert_eq!(handle.wait().await, Some(1));
    }

    #[tokio::test]
    async fn records_launch_specs() {
        let executor = FakeProcessExecutor::new();
        executor.launch(spec("game", &["-port", "1337"])).await.unwrap();

        let launches = executor.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].args, vec!["-port", "1337"]);
    }

    #[tokio::test]
    async fn scripted_launch_failure() {
        let executor = FakeProcessExecutor::new();
        executor.fail_next_launch();
        assert!(executor.launch(spec("game", &[])).await.is_err());
        // Only the next launch fails
        assert!(executor.launch(spec("game", &[])).await.is_ok());
    }
}
