//! Inventory scan and event stream racing over the same containers

use std::{collections::HashMap, time::Duration};

use c8s::{
    ProjectId,
    runtime::ContainerSummary,
    actors::{events::EventStreamActor, messages::DiscoverySummary, registry::RegistryHandle},
    config::Config,
    gateway::QueryClient,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

#[tokio::test]
async fn test_scan_tracks_running_and_stopped_compose_containers() {
    let runtime = FakeRuntime::new(vec![
        compose_container("a", "shop", "web", "running"),
        compose_container("b", "shop", "db", "exited"),
        plain_container("c"),
    ]);
    let monitor = start(runtime);

    let summary = monitor.discover().await.unwrap();
    assert_eq!(
        summary,
        DiscoverySummary {
            created: 2,
            already_tracked: 0,
            ignored: 1,
            removed: 0,
        }
    );

    let projects = monitor.client().project_list().await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].id, ProjectId::from("/srv/shop"));
    assert_eq!(projects[0].name, "shop");
    assert_eq!(projects[0].containers_total, 2);
    assert_eq!(projects[0].containers_running, 1);

    monitor.shutdown();
}

#[tokio::test]
async fn test_scan_groups_container_with_only_working_dir_label() {
    let runtime = FakeRuntime::new(vec![
        compose_container("a", "p1", "web", "running"),
        ContainerSummary {
            id: "b".into(),
            names: vec!["/b".to_string()],
            labels: HashMap::from([(
                "com.docker.compose.project.working_dir".to_string(),
                "/srv/p1".to_string(),
            )]),
            state: "exited".to_string(),
        },
    ]);
    let monitor = start(runtime);

    monitor.discover().await.unwrap();

    let projects = monitor.client().project_list().await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].id, ProjectId::from("/srv/p1"));
    assert_eq!(projects[0].name, "p1");
    assert_eq!(projects[0].containers_total, 2);
    assert_eq!(projects[0].containers_running, 1);

    monitor.shutdown();
}

#[tokio::test]
async fn test_scan_without_stopped_containers() {
    let runtime = FakeRuntime::new(vec![
        compose_container("a", "shop", "web", "running"),
        compose_container("b", "shop", "db", "exited"),
    ]);
    let config = Config {
        include_stopped: false,
        ..Default::default()
    };
    let registry = RegistryHandle::spawn(runtime, &config, CancellationToken::new());

    let summary = registry.discover().await.unwrap();

    assert_eq!(summary.created, 1);
}

#[tokio::test]
async fn test_repeated_scan_is_a_no_op() {
    let runtime = FakeRuntime::new(vec![compose_container("a", "shop", "web", "running")]);
    let monitor = start(runtime.clone());

    monitor.discover().await.unwrap();
    let second = monitor.discover().await.unwrap();

    assert_eq!(second.created, 0);
    assert_eq!(second.already_tracked, 1);

    let projects = monitor.client().project_list().await.unwrap();
    assert_eq!(projects[0].containers_total, 1);

    runtime.stats("a").await;
    assert_eq!(runtime.stat_streams_opened("a"), 1);

    monitor.shutdown();
}

#[tokio::test]
async fn test_create_event_racing_scan_tracks_once() {
    let runtime = FakeRuntime::new(vec![compose_container("a", "shop", "web", "running")]);
    runtime.emit(compose_event("create", "a", "shop", "web"));
    let monitor = start(runtime.clone());

    let summary = monitor.discover().await.unwrap();
    assert_eq!(summary.created + summary.already_tracked, 1);

    // events are applied in order, once "b" shows up "a"'s event was handled too
    runtime.emit(compose_event("start", "b", "blog", "web"));
    let client = monitor.client();
    wait_for_container(&client, "b", |container| container.is_some()).await;

    let detail = client
        .project_detail(ProjectId::from("/srv/shop"))
        .await
        .unwrap();
    assert_eq!(detail.len(), 1);

    runtime.stats("a").await;
    assert_eq!(runtime.stat_streams_opened("a"), 1);

    monitor.shutdown();
}

#[tokio::test]
async fn test_destroy_before_scan_is_ignored() {
    let runtime = FakeRuntime::new(vec![compose_container("b", "blog", "web", "running")]);
    runtime.emit(compose_event("destroy", "a", "shop", "web"));
    runtime.emit(compose_event("start", "b", "blog", "web"));
    let monitor = start(runtime.clone());
    let client = monitor.client();

    wait_for_container(&client, "b", |container| container.is_some()).await;
    monitor.discover().await.unwrap();

    assert_eq!(client.container_detail("a".into()).await.unwrap(), None);
    assert_eq!(runtime.stat_streams_opened("a"), 0);

    let projects = client.project_list().await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].name, "blog");

    monitor.shutdown();
}

#[tokio::test]
async fn test_sub_event_leaves_unknown_container_to_scan() {
    let runtime = FakeRuntime::new(vec![compose_container("a", "shop", "web", "running")]);
    runtime.emit(compose_event("health_status: healthy", "a", "shop", "web"));
    runtime.emit(compose_event("start", "b", "blog", "web"));
    let monitor = start(runtime.clone());
    let client = monitor.client();

    wait_for_container(&client, "b", |container| container.is_some()).await;
    assert_eq!(client.container_detail("a".into()).await.unwrap(), None);
    assert_eq!(runtime.stat_streams_opened("a"), 0);

    let summary = monitor.discover().await.unwrap();
    assert_eq!(summary.created, 1);

    let container = client
        .container_detail("a".into())
        .await
        .unwrap()
        .expect("listed container not tracked");
    assert!(container.state.running);

    let shop = client
        .project_list()
        .await
        .unwrap()
        .into_iter()
        .find(|project| project.name == "shop")
        .expect("shop project missing");
    assert_eq!(shop.containers_running, 1);
    assert_eq!(shop.containers_total, 1);

    monitor.shutdown();
}

#[tokio::test]
async fn test_rescan_retires_containers_destroyed_while_stream_was_down() {
    let runtime = FakeRuntime::new(vec![compose_container("a", "shop", "web", "running")]);
    let cancel = CancellationToken::new();
    let registry = RegistryHandle::spawn(runtime.clone(), &Config::default(), cancel.clone());
    let client = QueryClient::spawn(registry.clone(), 16, cancel.clone());
    registry.discover().await.unwrap();
    runtime.stats("a").await;

    EventStreamActor::new(runtime.clone(), registry, cancel.clone())
        .with_reconnect_delay(Duration::from_millis(10))
        .spawn();

    // destroyed without the event ever reaching us
    runtime.set_listing(vec![]);
    runtime.end_stats("a");
    runtime.close_events();

    let container = wait_for_container(&client, "a", |container| container.is_none()).await;
    assert_eq!(container, None);
    assert!(client.project_list().await.unwrap().is_empty());

    cancel.cancel();
}

#[tokio::test]
async fn test_event_stream_end_triggers_new_scan() {
    let runtime = FakeRuntime::new(vec![]);
    let cancel = CancellationToken::new();
    let registry = RegistryHandle::spawn(runtime.clone(), &Config::default(), cancel.clone());
    let client = QueryClient::spawn(registry.clone(), 16, cancel.clone());

    EventStreamActor::new(runtime.clone(), registry, cancel.clone())
        .with_reconnect_delay(Duration::from_millis(10))
        .spawn();

    // container started while the event stream is down
    runtime.set_listing(vec![compose_container("a", "shop", "web", "running")]);
    runtime.close_events();

    let container = wait_for_container(&client, "a", |container| container.is_some()).await;
    assert!(container.is_some(), "container missed during reconnect was not found");

    cancel.cancel();
}

#[tokio::test]
async fn test_shutdown_stops_all_tasks() {
    let runtime = FakeRuntime::new(vec![compose_container("a", "shop", "web", "running")]);
    let monitor = start(runtime.clone());
    monitor.discover().await.unwrap();
    let stats = runtime.stats("a").await;

    monitor.shutdown();

    tokio::time::timeout(TIMEOUT, stats.closed())
        .await
        .expect("stat stream still open after shutdown");

    let client = monitor.client();
    let stopped = tokio::time::timeout(TIMEOUT, async {
        while client.project_list().await.is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(stopped.is_ok(), "gateway still answering after shutdown");
}
