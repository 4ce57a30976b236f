use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{Task, TaskLimits, TaskRetry};

/// 作业状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Pending,
    Scheduled,
    Running,
    Cancelled,
    Completed,
    Failed,
    Restart,
}

impl JobState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobState::Pending | JobState::Scheduled | JobState::Running | JobState::Restart
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "PENDING",
            JobState::Scheduled => "SCHEDULED",
            JobState::Running => "RUNNING",
            JobState::Cancelled => "CANCELLED",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Restart => "RESTART",
        };
        write!(f, "{s}")
    }
}

/// 作业上下文，后续任务可见
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobContext {
    pub job: HashMap<String, String>,
    pub inputs: HashMap<String, String>,
    pub secrets: HashMap<String, String>,
    /// 任务变量名 -> 任务结果
    pub tasks: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobDefaults {
    pub retry: Option<TaskRetry>,
    pub limits: Option<TaskLimits>,
    pub timeout_seconds: Option<u64>,
    pub queue: Option<String>,
    pub priority: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Webhook {
    pub url: String,
    pub headers: HashMap<String, String>,
    /// 为空时订阅所有作业状态变化
    pub event: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Permission {
    pub user: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AutoDelete {
    pub after_seconds: u64,
}

/// 有序任务工作流
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Job {
    pub id: String,
    pub parent_id: Option<String>,
    pub service_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub state: JobState,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// 声明的任务列表
    pub tasks: Vec<Task>,
    /// 实际执行过的任务，只追加
    pub execution: Vec<Task>,
    /// 已完成的任务数，也是下一个待派发任务的下标
    pub position: usize,
    pub inputs: HashMap<String, String>,
    pub context: JobContext,
    pub task_count: usize,
    pub output: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub defaults: Option<JobDefaults>,
    pub webhooks: Vec<Webhook>,
    pub permissions: Vec<Permission>,
    pub auto_delete: Option<AutoDelete>,
    pub delete_at: Option<DateTime<Utc>>,
    pub secrets: HashMap<String, String>,
}

impl Job {
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            service_id: self.service_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            state: self.state,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            position: self.position,
            task_count: self.task_count,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }

    /// 所有任务是否已完成
    pub fn is_finished(&self) -> bool {
        self.position >= self.task_count
    }

    /// 记录派发出去的任务
    pub fn record_execution(&mut self, task: &Task) {
        self.execution.push(task.clone());
    }

    /// 按任务ID更新执行记录，不存在时追加
    pub fn update_execution(&mut self, task: &Task) {
        match self.execution.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => self.execution.push(task.clone()),
        }
    }
}

/// 作业摘要，用于事件与 webhook 负载
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    pub id: String,
    pub parent_id: Option<String>,
    pub service_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub state: JobState,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub position: usize,
    pub task_count: usize,
    pub result: Option<String>,
    pub error: Option<String>,
}
