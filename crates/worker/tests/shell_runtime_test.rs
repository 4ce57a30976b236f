use std::sync::Arc;
use std::time::{Duration, Instant};

use conductor_core::ConductorError;
use conductor_domain::messaging::{BrokerExt, BrokerRef};
use conductor_domain::models::TaskLogPart;
use conductor_domain::runtime::{RunContext, Runtime};
use conductor_infrastructure::InMemoryBroker;
use conductor_testing_utils::{RecordingHandler, TaskBuilder, TestEnv};
use conductor_worker::ShellRuntime;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_stdout_becomes_result() {
    let runtime = ShellRuntime::new();
    let mut task = TaskBuilder::new().with_run("echo hello; echo world").build();

    runtime.run(&RunContext::default(), &mut task).await.unwrap();

    assert_eq!(task.result.as_deref(), Some("hello\nworld"));
}

#[tokio::test]
async fn test_files_and_env_are_visible_to_script() {
    let runtime = ShellRuntime::new();
    let mut task = TaskBuilder::new()
        .with_run("cat conf/greeting.txt; echo \"$TARGET\"")
        .with_env("TARGET", "prod")
        .build();
    task.files
        .insert("conf/greeting.txt".to_string(), "hi there\n".to_string());

    runtime.run(&RunContext::default(), &mut task).await.unwrap();

    assert_eq!(task.result.as_deref(), Some("hi there\nprod"));
}

#[tokio::test]
async fn test_output_file_overrides_stdout() {
    let runtime = ShellRuntime::new();
    let mut task = TaskBuilder::new()
        .with_run("echo noise; printf 'v1.2.3\\n' > \"$CONDUCTOR_OUTPUT\"")
        .build();

    runtime.run(&RunContext::default(), &mut task).await.unwrap();

    assert_eq!(task.result.as_deref(), Some("v1.2.3"));
}

#[tokio::test]
async fn test_non_zero_exit_is_execution_error() {
    let runtime = ShellRuntime::new();
    let mut task = TaskBuilder::new()
        .with_run("echo 'disk full' >&2; exit 3")
        .build();

    let err = runtime
        .run(&RunContext::default(), &mut task)
        .await
        .unwrap_err();

    match err {
        ConductorError::TaskExecution(message) => {
            assert!(message.contains("Some(3)"));
            assert!(message.contains("disk full"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(task.result.is_none());
}

#[tokio::test]
async fn test_missing_command_is_rejected() {
    let runtime = ShellRuntime::new();
    let mut task = TaskBuilder::new().with_run("   ").build();

    let result = runtime.run(&RunContext::default(), &mut task).await;

    assert!(matches!(result, Err(ConductorError::TaskExecution(_))));
}

#[tokio::test]
async fn test_file_outside_workdir_is_rejected() {
    let runtime = ShellRuntime::new();
    let mut task = TaskBuilder::new().build();
    task.files
        .insert("../escape.sh".to_string(), "echo no".to_string());

    let result = runtime.run(&RunContext::default(), &mut task).await;

    assert!(matches!(result, Err(ConductorError::TaskExecution(_))));
}

#[tokio::test]
async fn test_cancel_kills_process() {
    let runtime = ShellRuntime::new();
    let mut task = TaskBuilder::new().with_run("sleep 30").build();
    let cancel = CancellationToken::new();
    let ctx = RunContext::new(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = runtime.run(&ctx, &mut task).await;

    assert!(matches!(result, Err(ConductorError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_declared_ports_resolve_to_loopback() {
    let runtime = ShellRuntime::new();
    let mut task = TaskBuilder::new()
        .with_run("true")
        .with_probe("/health", "8080")
        .build();
    let ctx = RunContext::default();

    runtime.run(&ctx, &mut task).await.unwrap();

    assert_eq!(ctx.ports.addresses(), vec!["127.0.0.1:8080".to_string()]);
}

#[tokio::test]
async fn test_output_lines_are_shipped_as_log_parts() {
    let broker: BrokerRef = Arc::new(InMemoryBroker::new());
    let parts = Arc::new(RecordingHandler::<TaskLogPart>::new());
    broker.subscribe_for_log_parts(parts.clone()).await.unwrap();

    let runtime = ShellRuntime::new().with_log_broker(broker.clone());
    let mut task = TaskBuilder::new().with_run("echo one; echo two").build();
    runtime.run(&RunContext::default(), &mut task).await.unwrap();

    let seen = parts.clone();
    assert!(
        TestEnv::wait_for(move || {
            let seen = seen.clone();
            async move { seen.len() >= 2 }
        }, Duration::from_secs(2))
        .await
    );

    let mut received = parts.received();
    received.sort_by_key(|part| part.number);
    assert_eq!(received[0].number, 1);
    assert_eq!(received[0].contents, "one");
    assert_eq!(received[1].contents, "two");
    assert!(received.iter().all(|part| part.task_id == task.id));
}

#[tokio::test]
async fn test_health_check_runs_shell() {
    assert!(ShellRuntime::new().health_check().await.is_ok());
    assert!(ShellRuntime::new()
        .with_shell("/nonexistent/shell")
        .health_check()
        .await
        .is_err());
}
