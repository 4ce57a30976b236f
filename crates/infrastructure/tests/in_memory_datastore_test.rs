use chrono::{Duration, Utc};
use conductor_domain::models::{Job, Node, NodeStatus, Service, Task, TaskLogPart, TaskState};
use conductor_domain::repositories::Datastore;
use conductor_domain::{ConductorError, ServiceState};
use conductor_infrastructure::InMemoryDatastore;

fn task(id: &str, job_id: &str, state: TaskState) -> Task {
    Task {
        id: id.into(),
        job_id: Some(job_id.into()),
        state,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_task_update_is_atomic() {
    let store = InMemoryDatastore::new();
    store.create_task(&task("t1", "j1", TaskState::Pending)).await.unwrap();

    let updated = store
        .update_task(
            "t1",
            Box::new(|t: &mut Task| {
                t.state = TaskState::Scheduled;
                Ok(())
            }),
        )
        .await
        .unwrap();
    assert_eq!(updated.state, TaskState::Scheduled);

    let result = store
        .update_task(
            "t1",
            Box::new(|t: &mut Task| {
                t.state = TaskState::Running;
                Err(ConductorError::InvalidState("rejected".into()))
            }),
        )
        .await;
    assert!(result.is_err());
    assert_eq!(
        store.get_task("t1").await.unwrap().state,
        TaskState::Scheduled
    );
}

#[tokio::test]
async fn test_missing_entities_are_not_found() {
    let store = InMemoryDatastore::new();
    assert!(store.get_task("nope").await.unwrap_err().is_not_found());
    assert!(store.get_job("nope").await.unwrap_err().is_not_found());
    assert!(store.get_node("nope").await.unwrap_err().is_not_found());
    assert!(store
        .get_service("default", "nope")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(store
        .update_job("nope", Box::new(|_: &mut Job| Ok(())))
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_duplicate_create_is_rejected() {
    let store = InMemoryDatastore::new();
    let job = Job {
        id: "j1".into(),
        ..Default::default()
    };
    store.create_job(&job).await.unwrap();
    assert!(matches!(
        store.create_job(&job).await,
        Err(ConductorError::Datastore(_))
    ));
}

#[tokio::test]
async fn test_active_tasks_filter_by_job_and_state() {
    let store = InMemoryDatastore::new();
    store.create_task(&task("t1", "j1", TaskState::Running)).await.unwrap();
    store.create_task(&task("t2", "j1", TaskState::Completed)).await.unwrap();
    store.create_task(&task("t3", "j1", TaskState::Scheduled)).await.unwrap();
    store.create_task(&task("t4", "j2", TaskState::Running)).await.unwrap();

    let mut ids: Vec<String> = store
        .get_active_tasks("j1")
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["t1", "t3"]);
}

#[tokio::test]
async fn test_services_are_keyed_by_namespace_and_name() {
    let store = InMemoryDatastore::new();
    let service = Service {
        id: "s1".into(),
        name: "web".into(),
        ..Default::default()
    };
    store.create_service(&service).await.unwrap();

    let other = Service {
        id: "s2".into(),
        namespace: "staging".into(),
        name: "web".into(),
        ..Default::default()
    };
    store.create_service(&other).await.unwrap();

    store
        .update_service(
            "default",
            "web",
            Box::new(|s: &mut Service| {
                s.state = ServiceState::Running;
                Ok(())
            }),
        )
        .await
        .unwrap();

    assert_eq!(
        store.get_service("default", "web").await.unwrap().state,
        ServiceState::Running
    );
    assert_eq!(
        store.get_service("staging", "web").await.unwrap().state,
        ServiceState::Pending
    );
}

#[tokio::test]
async fn test_active_nodes_require_recent_heartbeat() {
    let store = InMemoryDatastore::new();
    let now = Utc::now();
    store
        .create_node(&Node {
            id: "n1".into(),
            name: "fresh".into(),
            last_heartbeat_at: Some(now),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .create_node(&Node {
            id: "n2".into(),
            name: "stale".into(),
            last_heartbeat_at: Some(now - Duration::minutes(10)),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .create_node(&Node {
            id: "n3".into(),
            name: "down".into(),
            last_heartbeat_at: Some(now),
            status: NodeStatus::Down,
            ..Default::default()
        })
        .await
        .unwrap();

    let active = store.get_active_nodes().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "n1");
}

#[tokio::test]
async fn test_log_parts_are_ordered_by_number() {
    let store = InMemoryDatastore::new();
    for number in [2, 1, 3] {
        store
            .create_task_log_part(&TaskLogPart {
                number,
                task_id: "t1".into(),
                contents: format!("line {number}"),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let parts = store.get_task_log_parts("t1").await.unwrap();
    let numbers: Vec<u64> = parts.iter().map(|p| p.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(store.get_task_log_parts("t2").await.unwrap().is_empty());
}
