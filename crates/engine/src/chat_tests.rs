// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use warden_core::ChannelClass;

fn ins() -> InstanceId {
    InstanceId::from_string("ins-1")
}

fn channel(id: &str, classes: &[ChannelClass]) -> ChatChannel {
    ChatChannel { identifier: id.into(), classes: classes.to_vec() }
}

#[tokio::test]
async fn delivers_to_matching_channel_classes_only() {
    let bridge = Arc::new(ChatBridge::new());
    let provider = FakeChatProvider::new("main");
    bridge.set_connections(vec![(
        provider.clone() as Arc<dyn ChatProvider>,
        vec![
            channel("dev-chan", &[ChannelClass::Dev]),
            channel("wd-chan", &[ChannelClass::Watchdog]),
        ],
    )]);

    bridge.deliver(&Event::WatchdogLaunched { instance: ins() }).await;

    let sent = provider.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "wd-chan");
}

#[tokio::test]
async fn provider_failure_does_not_block_others() {
    let bridge = Arc::new(ChatBridge::new());
    let flaky = FakeChatProvider::new("flaky");
    let steady = FakeChatProvider::new("steady");
    // Exhaust every retry for the flaky provider
    flaky.fail_next(CHAT_RETRY_ATTEMPTS);

    bridge.set_connections(vec![
        (flaky.clone() as Arc<dyn ChatProvider>, vec![channel("a", &[ChannelClass::Dev])]),
        (steady.clone() as Arc<dyn ChatProvider>, vec![channel("b", &[ChannelClass::Dev])]),
    ]);

    bridge.deliver(&Event::RepoFetch { instance: ins() }).await;

    assert!(flaky.sent().is_empty());
    assert_eq!(steady.sent().len(), 1);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let bridge = Arc::new(ChatBridge::new());
    let provider = FakeChatProvider::new("main");
    provider.fail_next(CHAT_RETRY_ATTEMPTS - 1);

    bridge.set_connections(vec![(
        provider.clone() as Arc<dyn ChatProvider>,
        vec![channel("dev", &[ChannelClass::Dev])],
    )]);

    bridge.deliver(&Event::RepoFetch { instance: ins() }).await;
    assert_eq!(provider.sent().len(), 1);
}

#[tokio::test]
async fn fanout_filters_by_instance() {
    let bus = EventBus::new();
    let bridge = Arc::new(ChatBridge::new());
    let provider = FakeChatProvider::new("main");
    bridge.set_connections(vec![(
        provider.clone() as Arc<dyn ChatProvider>,
        vec![channel("wd", &[ChannelClass::Watchdog])],
    )]);
    let _task = bridge.spawn_fanout(&bus, ins());

    bus.publish(Event::WatchdogLaunched { instance: InstanceId::from_string("ins-other") });
    bus.publish(Event::WatchdogLaunched { instance: ins() });

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while provider.sent().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(provider.sent().len(), 1);
}

#[test]
fn custom_commands_load_from_live_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(CUSTOM_COMMANDS_FILE),
        serde_json::json!([
            {"name": "who", "help_text": "list players"},
            {"name": "adminwho", "help_text": "list admins", "admin_only": true},
        ])
        .to_string(),
    )
    .unwrap();

    let bridge = ChatBridge::new();
    bridge.load_custom_commands(dir.path());

    let commands = bridge.custom_commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0].name, "who");
    assert!(!commands[0].admin_only);
    assert!(commands[1].admin_only);
}

#[test]
fn missing_command_file_clears_the_list() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = ChatBridge::new();
    bridge.load_custom_commands(dir.path());
    assert!(bridge.custom_commands().is_empty());
}
