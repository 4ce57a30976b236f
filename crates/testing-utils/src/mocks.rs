//! Test doubles for runtime and handler seams

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use conductor_domain::middleware::{EventType, Handler};
use conductor_domain::runtime::{RunContext, Runtime};
use conductor_domain::models::Task;

/// 模拟运行时对单个任务的行为
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// 立即成功并写入结果
    Succeed(String),
    /// 返回执行错误
    Fail(String),
    /// 阻塞直到收到取消信号
    WaitForCancel,
    /// 延迟后成功，期间响应取消
    Delay(Duration, String),
}

/// 可编排的运行时
///
/// 行为按任务名匹配，未匹配时使用默认行为。服务任务可以预先绑定端口地址，
/// 用于让探测命中测试内启动的 HTTP 服务。
#[derive(Debug, Clone)]
pub struct MockRuntime {
    default: MockBehavior,
    by_name: Arc<Mutex<HashMap<String, MockBehavior>>>,
    bindings: Arc<Mutex<Vec<(String, String)>>>,
    runs: Arc<Mutex<Vec<Task>>>,
    healthy: Arc<Mutex<bool>>,
}

impl MockRuntime {
    pub fn new(default: MockBehavior) -> Self {
        Self {
            default,
            by_name: Arc::new(Mutex::new(HashMap::new())),
            bindings: Arc::new(Mutex::new(Vec::new())),
            runs: Arc::new(Mutex::new(Vec::new())),
            healthy: Arc::new(Mutex::new(true)),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(MockBehavior::Succeed("ok".to_string()))
    }

    pub fn with_behavior(self, task_name: &str, behavior: MockBehavior) -> Self {
        self.by_name
            .lock()
            .unwrap()
            .insert(task_name.to_string(), behavior);
        self
    }

    /// 运行时启动任务时把端口解析到给定地址
    pub fn with_port_binding(self, port: &str, address: &str) -> Self {
        self.bindings
            .lock()
            .unwrap()
            .push((port.to_string(), address.to_string()));
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.healthy.lock().unwrap() = healthy;
    }

    /// 已经开始执行的任务
    pub fn runs(&self) -> Vec<Task> {
        self.runs.lock().unwrap().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    fn behavior_for(&self, task: &Task) -> MockBehavior {
        self.by_name
            .lock()
            .unwrap()
            .get(&task.name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    async fn run(&self, ctx: &RunContext, task: &mut Task) -> ConductorResult<()> {
        self.runs.lock().unwrap().push(task.clone());

        let bindings = self.bindings.lock().unwrap().clone();
        for (port, address) in bindings {
            ctx.ports.bind(&port, address);
        }

        match self.behavior_for(task) {
            MockBehavior::Succeed(result) => {
                task.result = Some(result);
                Ok(())
            }
            MockBehavior::Fail(error) => Err(ConductorError::TaskExecution(error)),
            MockBehavior::WaitForCancel => {
                ctx.cancel.cancelled().await;
                Err(ConductorError::Cancelled)
            }
            MockBehavior::Delay(delay, result) => {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => {
                        Err(ConductorError::Cancelled)
                    }
                    _ = tokio::time::sleep(delay) => {
                        task.result = Some(result);
                        Ok(())
                    }
                }
            }
        }
    }

    async fn health_check(&self) -> ConductorResult<()> {
        if *self.healthy.lock().unwrap() {
            Ok(())
        } else {
            Err(ConductorError::Internal("mock runtime unhealthy".to_string()))
        }
    }
}

/// 记录收到的实体，用于断言队列上的消息
pub struct RecordingHandler<T> {
    received: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> RecordingHandler<T> {
    pub fn new() -> Self {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn received(&self) -> Vec<T> {
        self.received.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for RecordingHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Handler<T> for RecordingHandler<T> {
    async fn handle(&self, _event: EventType, entity: &mut T) -> ConductorResult<()> {
        self.received.lock().unwrap().push(entity.clone());
        Ok(())
    }
}
