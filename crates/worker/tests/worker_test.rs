use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use conductor_core::{ConductorError, ConductorResult, ProbeConfig};
use conductor_domain::messaging::{
    BrokerExt, BrokerRef, QUEUE_COMPLETED, QUEUE_DEFAULT, QUEUE_ERROR, QUEUE_STARTED,
};
use conductor_domain::middleware::{EventType, Middleware, Next};
use conductor_domain::models::{Node, NodeStatus, Task, TaskState};
use conductor_infrastructure::InMemoryBroker;
use conductor_testing_utils::{MockBehavior, MockRuntime, RecordingHandler, TaskBuilder, TestEnv};
use conductor_worker::Worker;

const WAIT: Duration = Duration::from_secs(3);

struct Queues {
    started: Arc<RecordingHandler<Task>>,
    completed: Arc<RecordingHandler<Task>>,
    error: Arc<RecordingHandler<Task>>,
}

async fn observe(broker: &BrokerRef) -> Queues {
    let queues = Queues {
        started: Arc::new(RecordingHandler::new()),
        completed: Arc::new(RecordingHandler::new()),
        error: Arc::new(RecordingHandler::new()),
    };
    broker
        .subscribe_for_tasks(QUEUE_STARTED, queues.started.clone())
        .await
        .unwrap();
    broker
        .subscribe_for_tasks(QUEUE_COMPLETED, queues.completed.clone())
        .await
        .unwrap();
    broker
        .subscribe_for_tasks(QUEUE_ERROR, queues.error.clone())
        .await
        .unwrap();
    queues
}

async fn wait_len<T: Clone + Send + Sync + 'static>(recorder: &Arc<RecordingHandler<T>>, n: usize) {
    let recorder = recorder.clone();
    assert!(
        TestEnv::wait_for(move || {
            let recorder = recorder.clone();
            async move { recorder.len() >= n }
        }, WAIT)
        .await,
        "expected at least {n} messages"
    );
}

fn fast_probe() -> ProbeConfig {
    ProbeConfig {
        max_attempts: 3,
        interval_seconds: 0,
        request_timeout_seconds: 1,
    }
}

async fn start_worker(broker: &BrokerRef, runtime: MockRuntime) -> Worker {
    let worker = Worker::builder()
        .name("test-worker")
        .broker(broker.clone())
        .runtime(Arc::new(runtime))
        .probe(fast_probe())
        .heartbeat_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    worker.start().await.unwrap();
    worker
}

async fn serve(status: StatusCode) -> SocketAddr {
    let app = Router::new().route("/", get(move || async move { status }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_regular_task_reports_started_then_completed() {
    let broker: BrokerRef = Arc::new(InMemoryBroker::new());
    let queues = observe(&broker).await;
    let worker = start_worker(&broker, MockRuntime::succeeding()).await;

    let task = TaskBuilder::new().with_name("build").build();
    broker.publish_task(QUEUE_DEFAULT, &task).await.unwrap();

    wait_len(&queues.completed, 1).await;
    let started = queues.started.received()[0].clone();
    assert_eq!(started.id, task.id);
    assert_eq!(started.state, TaskState::Running);
    assert_eq!(started.node_id.as_deref(), Some(worker.id()));

    let completed = queues.completed.received()[0].clone();
    assert_eq!(completed.state, TaskState::Completed);
    assert_eq!(completed.result.as_deref(), Some("ok"));
    assert!(completed.completed_at.is_some());
    assert!(queues.error.is_empty());
    assert!(worker.running_tasks().is_empty());
    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_runtime_failure_goes_to_error_queue() {
    let broker: BrokerRef = Arc::new(InMemoryBroker::new());
    let queues = observe(&broker).await;
    let runtime =
        MockRuntime::succeeding().with_behavior("flaky", MockBehavior::Fail("exit 1".into()));
    let worker = start_worker(&broker, runtime).await;

    let task = TaskBuilder::new().with_name("flaky").build();
    broker.publish_task(QUEUE_DEFAULT, &task).await.unwrap();

    wait_len(&queues.error, 1).await;
    let failed = queues.error.received()[0].clone();
    assert_eq!(failed.state, TaskState::Failed);
    assert!(failed.error.unwrap_or_default().contains("exit 1"));
    assert!(failed.failed_at.is_some());
    assert_eq!(queues.started.len(), 1);
    assert!(queues.completed.is_empty());
    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_timeout_fails_task() {
    let broker: BrokerRef = Arc::new(InMemoryBroker::new());
    let queues = observe(&broker).await;
    let runtime = MockRuntime::new(MockBehavior::Delay(Duration::from_secs(30), "late".into()));
    let worker = start_worker(&broker, runtime).await;

    let task = TaskBuilder::new().with_timeout(1).build();
    broker.publish_task(QUEUE_DEFAULT, &task).await.unwrap();

    wait_len(&queues.error, 1).await;
    let failed = queues.error.received()[0].clone();
    assert_eq!(
        failed.error.as_deref(),
        Some(ConductorError::ExecutionTimeout.to_string().as_str())
    );
    assert!(queues.completed.is_empty());
    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancel_signal_stops_running_task() {
    let broker: BrokerRef = Arc::new(InMemoryBroker::new());
    let queues = observe(&broker).await;
    let worker = start_worker(&broker, MockRuntime::new(MockBehavior::WaitForCancel)).await;

    let task = TaskBuilder::new().with_name("long").build();
    broker.publish_task(QUEUE_DEFAULT, &task).await.unwrap();

    let running = worker.running_tasks();
    let id = task.id.clone();
    assert!(
        TestEnv::wait_for(move || {
            let running = running.clone();
            let id = id.clone();
            async move { running.contains(&id) }
        }, WAIT)
        .await
    );

    broker
        .publish_task(&worker.cancel_queue(), &task)
        .await
        .unwrap();

    wait_len(&queues.error, 1).await;
    assert_eq!(
        queues.error.received()[0].error.as_deref(),
        Some(ConductorError::Cancelled.to_string().as_str())
    );
    assert!(!worker.running_tasks().contains(&task.id));
    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancel_for_unknown_task_is_noop() {
    let broker: BrokerRef = Arc::new(InMemoryBroker::new());
    let queues = observe(&broker).await;
    let worker = start_worker(&broker, MockRuntime::succeeding()).await;

    let stranger = TaskBuilder::new().build();
    broker
        .publish_task(&worker.cancel_queue(), &stranger)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(queues.error.is_empty());
    assert!(queues.started.is_empty());
    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_healthy_service_task_reports_started_with_ports() {
    let addr = serve(StatusCode::OK).await;
    let broker: BrokerRef = Arc::new(InMemoryBroker::new());
    let queues = observe(&broker).await;
    let runtime = MockRuntime::new(MockBehavior::WaitForCancel)
        .with_port_binding("8080", &addr.to_string());
    let worker = start_worker(&broker, runtime).await;

    let task = TaskBuilder::new().with_name("web").with_probe("/", "8080").build();
    broker.publish_task(QUEUE_DEFAULT, &task).await.unwrap();

    wait_len(&queues.started, 1).await;
    let started = queues.started.received()[0].clone();
    assert_eq!(started.id, task.id);
    assert_eq!(
        started.ports["8080"].address.as_deref(),
        Some(addr.to_string().as_str())
    );
    assert!(worker.running_tasks().ports(&task.id).is_some());
    assert!(queues.error.is_empty());

    broker
        .publish_task(&worker.cancel_queue(), &task)
        .await
        .unwrap();
    let running = worker.running_tasks();
    let id = task.id.clone();
    assert!(
        TestEnv::wait_for(move || {
            let running = running.clone();
            let id = id.clone();
            async move { !running.contains(&id) }
        }, WAIT)
        .await
    );
    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_unhealthy_service_task_fails_once() {
    let addr = serve(StatusCode::SERVICE_UNAVAILABLE).await;
    let broker: BrokerRef = Arc::new(InMemoryBroker::new());
    let queues = observe(&broker).await;
    let runtime = MockRuntime::new(MockBehavior::WaitForCancel)
        .with_port_binding("8080", &addr.to_string());
    let worker = start_worker(&broker, runtime).await;

    let task = TaskBuilder::new().with_name("web").with_probe("/", "8080").build();
    broker.publish_task(QUEUE_DEFAULT, &task).await.unwrap();

    wait_len(&queues.error, 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let errors = queues.error.received();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error.as_deref(), Some("Health check failed"));
    assert!(queues.started.is_empty());
    assert!(!worker.running_tasks().contains(&task.id));
    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_service_runtime_crash_is_reported_once() {
    let broker: BrokerRef = Arc::new(InMemoryBroker::new());
    let queues = observe(&broker).await;
    let worker = Worker::builder()
        .broker(broker.clone())
        .runtime(Arc::new(MockRuntime::new(MockBehavior::Fail("crashed".into()))))
        .probe(ProbeConfig {
            max_attempts: 5,
            interval_seconds: 1,
            request_timeout_seconds: 1,
        })
        .build()
        .unwrap();
    worker.start().await.unwrap();

    let task = TaskBuilder::new().with_name("web").with_probe("/", "8080").build();
    broker.publish_task(QUEUE_DEFAULT, &task).await.unwrap();

    wait_len(&queues.error, 1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let errors = queues.error.received();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].error.clone().unwrap_or_default().contains("crashed"));
    assert!(!worker.running_tasks().contains(&task.id));
    worker.stop().await.unwrap();
}

struct RejectAll;

#[async_trait]
impl Middleware<Task> for RejectAll {
    async fn handle(
        &self,
        _event: EventType,
        _task: &mut Task,
        _next: Next<'_, Task>,
    ) -> ConductorResult<()> {
        Err(ConductorError::InvalidState("rejected by policy".to_string()))
    }
}

#[tokio::test]
async fn test_middleware_rejection_fails_task() {
    let broker: BrokerRef = Arc::new(InMemoryBroker::new());
    let queues = observe(&broker).await;
    let runtime = MockRuntime::succeeding();
    let worker = Worker::builder()
        .broker(broker.clone())
        .runtime(Arc::new(runtime.clone()))
        .middleware(Arc::new(RejectAll))
        .build()
        .unwrap();
    worker.start().await.unwrap();

    let task = TaskBuilder::new().build();
    broker.publish_task(QUEUE_DEFAULT, &task).await.unwrap();

    wait_len(&queues.error, 1).await;
    assert!(queues.error.received()[0]
        .error
        .clone()
        .unwrap_or_default()
        .contains("rejected by policy"));
    assert_eq!(runtime.run_count(), 0);
    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_reflects_runtime_health() {
    let broker: BrokerRef = Arc::new(InMemoryBroker::new());
    let heartbeats = Arc::new(RecordingHandler::<Node>::new());
    broker
        .subscribe_for_heartbeats(heartbeats.clone())
        .await
        .unwrap();

    let runtime = MockRuntime::succeeding();
    let worker = start_worker(&broker, runtime.clone()).await;
    wait_len(&heartbeats, 1).await;

    let first = heartbeats.received()[0].clone();
    assert_eq!(first.id, worker.id());
    assert_eq!(first.name, "test-worker");
    assert_eq!(first.status, NodeStatus::Up);
    assert_eq!(first.queue, Some(worker.cancel_queue()));
    assert!(!first.version.is_empty());

    runtime.set_healthy(false);
    let seen = heartbeats.clone();
    assert!(
        TestEnv::wait_for(move || {
            let seen = seen.clone();
            async move {
                seen.received()
                    .iter()
                    .any(|node| node.status == NodeStatus::Down)
            }
        }, WAIT)
        .await
    );
    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_reserved_queues_are_not_subscribed() {
    let broker: BrokerRef = Arc::new(InMemoryBroker::new());
    let worker = Worker::builder()
        .broker(broker.clone())
        .runtime(Arc::new(MockRuntime::succeeding()))
        .queue("pending", 2)
        .queue("gpu", 2)
        .build()
        .unwrap();
    worker.start().await.unwrap();

    let queues = broker.queues().await.unwrap();
    assert!(queues.iter().all(|q| q.name != "pending"));
    let gpu = queues.iter().find(|q| q.name == "gpu").unwrap();
    assert_eq!(gpu.subscribers, 2);
    let cancel = queues.iter().find(|q| q.name == worker.cancel_queue()).unwrap();
    assert_eq!(cancel.subscribers, 1);
    worker.stop().await.unwrap();
}
