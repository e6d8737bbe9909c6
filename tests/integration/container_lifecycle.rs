//! Container lifecycle: metrics, running state, retirement and queries

use assert_matches::assert_matches;
use c8s::{
    ContainerId, ProjectId, actors::messages::ContainerUpdate, runtime::RuntimeError,
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_project_usage_is_sum_of_containers() {
    let runtime = FakeRuntime::new(vec![
        compose_container("a", "shop", "web", "running"),
        compose_container("b", "shop", "db", "running"),
        compose_container("c", "blog", "web", "running"),
    ]);
    let monitor = start(runtime.clone());
    monitor.discover().await.unwrap();

    runtime.stats("a").await.send(Ok(sample(250, 256, 1024))).unwrap();
    runtime.stats("b").await.send(Ok(sample(125, 512, 1024))).unwrap();
    runtime.stats("c").await.send(Ok(sample(500, 0, 0))).unwrap();

    let projects = wait_for_projects(&monitor.client(), |projects| {
        projects.len() == 2 && projects[0].cpu_percentage == 50.0 && projects[1].cpu_percentage == 37.5
    })
    .await;

    assert_eq!(projects[0].name, "blog");
    assert_eq!(projects[0].cpu_percentage, 50.0);
    assert_eq!(projects[0].memory_percentage, 0.0);

    assert_eq!(projects[1].name, "shop");
    assert_eq!(projects[1].cpu_percentage, 37.5);
    assert_eq!(projects[1].memory_percentage, 75.0);
    assert_eq!(projects[1].containers_running, 2);

    monitor.shutdown();
}

#[tokio::test]
async fn test_destroy_retires_container_and_releases_stats() {
    let runtime = FakeRuntime::new(vec![compose_container("a", "shop", "web", "running")]);
    let monitor = start(runtime.clone());
    monitor.discover().await.unwrap();
    let stats = runtime.stats("a").await;

    runtime.emit(compose_event("destroy", "a", "shop", "web"));

    let container = wait_for_container(&monitor.client(), "a", |container| container.is_none()).await;
    assert_eq!(container, None);

    tokio::time::timeout(TIMEOUT, stats.closed())
        .await
        .expect("stat stream still open after destroy");

    assert!(monitor.client().project_list().await.unwrap().is_empty());

    monitor.shutdown();
}

#[tokio::test]
async fn test_stat_stream_error_retires_container() {
    let runtime = FakeRuntime::new(vec![
        compose_container("a", "shop", "web", "running"),
        compose_container("b", "shop", "db", "running"),
    ]);
    let monitor = start(runtime.clone());
    monitor.discover().await.unwrap();

    runtime
        .stats("a")
        .await
        .send(Err(RuntimeError::Stream("connection reset".to_string())))
        .unwrap();

    let container = wait_for_container(&monitor.client(), "a", |container| container.is_none()).await;
    assert_eq!(container, None);

    // the other container of the project is unaffected
    let projects = monitor.client().project_list().await.unwrap();
    assert_eq!(projects[0].containers_total, 1);

    monitor.shutdown();
}

#[tokio::test]
async fn test_stat_stream_end_keeps_container() {
    let runtime = FakeRuntime::new(vec![compose_container("a", "shop", "web", "exited")]);
    let monitor = start(runtime.clone());
    monitor.discover().await.unwrap();

    let stats = runtime.stats("a").await;
    stats.send(Ok(sample(250, 0, 0))).unwrap();
    drop(stats);
    runtime.end_stats("a");

    let container = wait_for_container(&monitor.client(), "a", |container| {
        container.is_some_and(|c| c.state.cpu_percentage == 25.0)
    })
    .await
    .expect("container retired after its stat stream ended");

    assert_eq!(container.state.cpu_percentage, 25.0);
    assert!(!container.state.running);

    monitor.shutdown();
}

#[tokio::test]
async fn test_lifecycle_events_toggle_running() {
    let runtime = FakeRuntime::new(vec![compose_container("a", "shop", "web", "running")]);
    let monitor = start(runtime.clone());
    let client = monitor.client();
    monitor.discover().await.unwrap();

    runtime.emit(compose_event("die", "a", "shop", "web"));
    let container =
        wait_for_container(&client, "a", |container| container.is_some_and(|c| !c.state.running))
            .await;
    assert_matches!(container, Some(c) if !c.state.running);

    // exec sessions say nothing about the container itself
    runtime.emit(compose_event("exec_start: sh", "a", "shop", "web"));
    runtime.emit(compose_event("start", "a", "shop", "web"));
    let container =
        wait_for_container(&client, "a", |container| container.is_some_and(|c| c.state.running))
            .await;
    assert_matches!(container, Some(c) if c.state.running);

    monitor.shutdown();
}

#[tokio::test]
async fn test_event_for_unknown_container_creates_it() {
    let runtime = FakeRuntime::new(vec![]);
    let monitor = start(runtime.clone());
    monitor.discover().await.unwrap();

    runtime.emit(compose_event("start", "web1", "shop", "web"));

    let container = wait_for_container(&monitor.client(), "web1", |container| container.is_some())
        .await
        .expect("container not created from event");

    assert_eq!(container.identity.name, "shop-web-1");
    assert_eq!(container.identity.service, "web");
    assert_eq!(container.identity.project.name, "shop");
    assert_eq!(container.identity.project.id, ProjectId::from("/srv/shop"));
    assert!(container.state.running);

    runtime.stats("web1").await;

    monitor.shutdown();
}

#[tokio::test]
async fn test_event_without_compose_labels_is_ignored() {
    let runtime = FakeRuntime::new(vec![]);
    let monitor = start(runtime.clone());

    runtime.emit(c8s::runtime::RuntimeEvent::new("start", "plain"));
    runtime.emit(compose_event("start", "b", "blog", "web"));

    wait_for_container(&monitor.client(), "b", |container| container.is_some()).await;
    assert_eq!(monitor.client().container_detail("plain".into()).await.unwrap(), None);
    assert_eq!(runtime.stat_streams_opened("plain"), 0);

    monitor.shutdown();
}

#[tokio::test]
async fn test_unknown_ids_give_empty_answers() {
    let runtime = FakeRuntime::new(vec![compose_container("a", "shop", "web", "running")]);
    let monitor = start(runtime);
    let client = monitor.client();
    monitor.discover().await.unwrap();

    assert!(client
        .project_detail(ProjectId::from("/srv/missing"))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(client.container_detail("missing".into()).await.unwrap(), None);

    monitor.shutdown();
}

#[tokio::test]
async fn test_project_detail_is_sorted_by_name() {
    let runtime = FakeRuntime::new(vec![
        compose_container("1", "shop", "worker", "running"),
        compose_container("2", "shop", "db", "running"),
        compose_container("3", "shop", "web", "exited"),
        compose_container("4", "blog", "web", "running"),
    ]);
    let monitor = start(runtime);
    monitor.discover().await.unwrap();

    let detail = monitor
        .client()
        .project_detail(ProjectId::from("/srv/shop"))
        .await
        .unwrap();

    let names: Vec<_> = detail.iter().map(|c| c.identity.name.as_str()).collect();
    assert_eq!(names, vec!["shop-db-1", "shop-web-1", "shop-worker-1"]);

    monitor.shutdown();
}

#[tokio::test]
async fn test_changes_are_broadcast() {
    let runtime = FakeRuntime::new(vec![compose_container("a", "shop", "web", "running")]);
    let monitor = start(runtime.clone());
    let mut updates = monitor.subscribe();
    monitor.discover().await.unwrap();

    let update = next_update(&mut updates, |update| {
        matches!(update, ContainerUpdate::Changed(c) if c.identity.id.as_str() == "a")
    })
    .await;
    assert_matches!(update, ContainerUpdate::Changed(c) if c.state.running);

    runtime.stats("a").await.send(Ok(sample(250, 0, 0))).unwrap();
    let update = next_update(&mut updates, |update| {
        matches!(update, ContainerUpdate::Changed(c) if c.updated_at.is_some())
    })
    .await;
    assert_matches!(update, ContainerUpdate::Changed(c) if c.state.cpu_percentage == 25.0);

    runtime.emit(compose_event("destroy", "a", "shop", "web"));
    let update = next_update(&mut updates, |update| {
        matches!(update, ContainerUpdate::Removed(_))
    })
    .await;
    assert_eq!(update, ContainerUpdate::Removed(ContainerId::from("a")));

    monitor.shutdown();
}
