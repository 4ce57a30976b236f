use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    #[default]
    Created,
    Pending,
    Scheduled,
    Running,
    Cancelled,
    Stopped,
    Completed,
    Failed,
}

impl TaskState {
    /// 仍可能被调度或执行的状态
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskState::Created | TaskState::Pending | TaskState::Scheduled | TaskState::Running
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Created => "CREATED",
            TaskState::Pending => "PENDING",
            TaskState::Scheduled => "SCHEDULED",
            TaskState::Running => "RUNNING",
            TaskState::Cancelled => "CANCELLED",
            TaskState::Stopped => "STOPPED",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// 重试策略：`attempts` 记录已经执行过的重试次数
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskRetry {
    pub limit: u32,
    #[serde(default)]
    pub attempts: u32,
}

impl TaskRetry {
    pub fn new(limit: u32) -> Self {
        Self { limit, attempts: 0 }
    }

    pub fn has_remaining(&self) -> bool {
        self.attempts < self.limit
    }
}

/// 服务任务的 HTTP 就绪探测
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Probe {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Port {
    pub port: String,
    /// 运行后解析出的 `host:port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Port {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            address: None,
        }
    }
}

/// 最小执行单元
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Task {
    pub id: String,
    pub job_id: Option<String>,
    /// 在所属作业任务列表中的下标（从0开始）
    pub position: usize,
    pub name: String,
    pub description: Option<String>,
    pub state: TaskState,
    pub created_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub image: Option<String>,
    pub run: Option<String>,
    pub env: HashMap<String, String>,
    pub files: HashMap<String, String>,
    pub queue: Option<String>,
    pub limits: Option<TaskLimits>,
    pub timeout_seconds: Option<u64>,
    pub retry: Option<TaskRetry>,
    pub priority: i32,
    /// 结果写入作业上下文时使用的变量名
    pub var: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub node_id: Option<String>,
    pub probe: Option<Probe>,
    pub ports: BTreeMap<String, Port>,
}

impl Task {
    /// 携带非空探测配置的任务按长期运行的服务任务处理
    pub fn is_service(&self) -> bool {
        self.probe
            .as_ref()
            .is_some_and(|probe| !probe.path.is_empty())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = TaskState::Failed;
        self.failed_at = Some(Utc::now());
        self.completed_at = None;
        self.error = Some(error.into());
    }

    pub fn mark_completed(&mut self, result: Option<String>) {
        self.state = TaskState::Completed;
        self.completed_at = Some(Utc::now());
        self.failed_at = None;
        self.result = result;
    }

    pub fn mark_cancelled(&mut self) {
        self.state = TaskState::Cancelled;
        self.cancelled_at = Some(Utc::now());
    }

    /// 为重试生成新的任务实例，保留声明信息并清空执行痕迹
    pub fn to_retry(&self, id: String) -> Task {
        let mut retry = self.clone();
        retry.id = id;
        retry.state = TaskState::Pending;
        retry.created_at = Some(Utc::now());
        retry.scheduled_at = None;
        retry.started_at = None;
        retry.completed_at = None;
        retry.failed_at = None;
        retry.cancelled_at = None;
        retry.result = None;
        retry.error = None;
        retry.node_id = None;
        if let Some(policy) = retry.retry.as_mut() {
            policy.attempts += 1;
        }
        retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_format() {
        let json = serde_json::to_string(&TaskState::Scheduled).unwrap();
        assert_eq!(json, "\"SCHEDULED\"");
        assert_eq!(TaskState::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_terminal_markers_are_exclusive() {
        let mut task = Task::default();
        task.mark_failed("boom");
        assert!(task.failed_at.is_some());
        task.mark_completed(Some("ok".into()));
        assert!(task.failed_at.is_none());
        assert!(task.completed_at.is_some());
        assert_eq!(task.state, TaskState::Completed);
    }

    #[test]
    fn test_is_service_requires_probe_path() {
        let mut task = Task::default();
        assert!(!task.is_service());
        task.probe = Some(Probe::default());
        assert!(!task.is_service());
        task.probe = Some(Probe {
            path: "/health".into(),
            interval_seconds: None,
        });
        assert!(task.is_service());
    }

    #[test]
    fn test_to_retry_increments_attempts_and_resets_trail() {
        let mut task = Task {
            id: "t1".into(),
            node_id: Some("n1".into()),
            retry: Some(TaskRetry::new(2)),
            ..Default::default()
        };
        task.mark_failed("exit 1");

        let retry = task.to_retry("t2".into());
        assert_eq!(retry.id, "t2");
        assert_eq!(retry.state, TaskState::Pending);
        assert_eq!(retry.retry.as_ref().map(|r| r.attempts), Some(1));
        assert!(retry.error.is_none());
        assert!(retry.failed_at.is_none());
        assert!(retry.node_id.is_none());
    }
}
