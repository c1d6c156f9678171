// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use warden_core::InstanceId;

#[tokio::test]
async fn subscribers_receive_published_events() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();

    bus.publish(Event::RepoFetch { instance: InstanceId::from_string("ins-1") });

    let event = rx.recv().await.unwrap();
    assert!(matches!(event, Event::RepoFetch { .. }));
}

#[tokio::test]
async fn publish_without_subscribers_is_fine() {
    let bus = EventBus::new();
    bus.publish(Event::RepoFetch { instance: InstanceId::from_string("ins-1") });
}

#[tokio::test]
async fn sink_feeds_the_bus() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();

    let sink = bus.sink();
    sink(Event::RepoFetch { instance: InstanceId::from_string("ins-1") });

    assert!(rx.recv().await.is_ok());
}
