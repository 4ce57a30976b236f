//! Test data builders with sensible defaults

use std::collections::HashMap;

use chrono::Utc;
use conductor_core::new_id;
use conductor_domain::models::{
    Job, JobDefaults, JobState, Port, Probe, Service, ServiceState, Task, TaskRetry, TaskState,
    Webhook,
};

/// Builder for test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task {
                id: new_id(),
                name: "test_task".to_string(),
                state: TaskState::Created,
                run: Some("echo hello".to_string()),
                created_at: Some(Utc::now()),
                ..Default::default()
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_job(mut self, job_id: &str, position: usize) -> Self {
        self.task.job_id = Some(job_id.to_string());
        self.task.position = position;
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.task.state = state;
        self
    }

    pub fn with_run(mut self, run: &str) -> Self {
        self.task.run = Some(run.to_string());
        self
    }

    pub fn with_queue(mut self, queue: &str) -> Self {
        self.task.queue = Some(queue.to_string());
        self
    }

    pub fn with_var(mut self, var: &str) -> Self {
        self.task.var = Some(var.to_string());
        self
    }

    pub fn with_retry(mut self, limit: u32) -> Self {
        self.task.retry = Some(TaskRetry::new(limit));
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.task.timeout_seconds = Some(timeout_seconds);
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.task.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_node(mut self, node_id: &str) -> Self {
        self.task.node_id = Some(node_id.to_string());
        self
    }

    /// 携带探测配置即为服务任务
    pub fn with_probe(mut self, path: &str, port: &str) -> Self {
        self.task.probe = Some(Probe {
            path: path.to_string(),
            interval_seconds: None,
        });
        self.task.ports.insert(port.to_string(), Port::new(port));
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for test Job entities
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            job: Job {
                id: new_id(),
                name: "test_job".to_string(),
                state: JobState::Pending,
                created_at: Some(Utc::now()),
                ..Default::default()
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.job.id = id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.job.name = name.to_string();
        self
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.job.state = state;
        self
    }

    /// 追加一个声明任务，同步 task_count
    pub fn with_task(mut self, task: Task) -> Self {
        self.job.tasks.push(task);
        self.job.task_count = self.job.tasks.len();
        self
    }

    /// 按名称追加若干简单任务
    pub fn with_tasks(mut self, names: &[&str]) -> Self {
        for name in names {
            self = self.with_task(TaskBuilder::new().with_name(name).build());
        }
        self
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.job.position = position;
        self
    }

    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.job.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn with_defaults(mut self, defaults: JobDefaults) -> Self {
        self.job.defaults = Some(defaults);
        self
    }

    pub fn with_webhook(mut self, url: &str, event: Option<&str>) -> Self {
        self.job.webhooks.push(Webhook {
            url: url.to_string(),
            headers: HashMap::new(),
            event: event.map(str::to_string),
        });
        self
    }

    pub fn with_input(mut self, key: &str, value: &str) -> Self {
        self.job.inputs.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for test Service entities
pub struct ServiceBuilder {
    service: Service,
}

impl ServiceBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            service: Service {
                id: new_id(),
                name: name.to_string(),
                state: ServiceState::Pending,
                run: Some("python -m http.server 8080".to_string()),
                created_at: Some(Utc::now()),
                ..Default::default()
            },
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.service.namespace = namespace.to_string();
        self
    }

    pub fn with_state(mut self, state: ServiceState) -> Self {
        self.service.state = state;
        self
    }

    pub fn with_port(mut self, port: &str) -> Self {
        self.service.ports.push(Port::new(port));
        self
    }

    pub fn with_probe_path(mut self, path: &str) -> Self {
        self.service.probe.path = path.to_string();
        self
    }

    pub fn with_queue(mut self, queue: &str) -> Self {
        self.service.queue = Some(queue.to_string());
        self
    }

    pub fn build(self) -> Service {
        self.service
    }
}
