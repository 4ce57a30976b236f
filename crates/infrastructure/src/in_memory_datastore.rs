use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use conductor_core::{ConductorError, ConductorResult};
use conductor_domain::models::{Job, Node, NodeStatus, Service, Task, TaskLogPart};
use conductor_domain::repositories::{Datastore, Update};

/// 超过该时长没有心跳的节点不再视为活跃
const NODE_ACTIVE_WINDOW_SECONDS: i64 = 90;

/// 内存数据存储
///
/// 每次更新在同一把锁内完成读取、回调与写回；回调失败时记录保持原样。
#[derive(Debug, Default)]
pub struct InMemoryDatastore {
    tasks: Mutex<HashMap<String, Task>>,
    jobs: Mutex<HashMap<String, Job>>,
    services: Mutex<HashMap<(String, String), Service>>,
    nodes: Mutex<HashMap<String, Node>>,
    log_parts: Mutex<HashMap<String, Vec<TaskLogPart>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> ConductorResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| ConductorError::Datastore(format!("lock poisoned: {e}")))
}

/// 在副本上执行回调，成功后整体写回
fn apply<T: Clone>(record: &mut T, modify: Update<'_, T>) -> ConductorResult<T> {
    let mut updated = record.clone();
    modify(&mut updated)?;
    *record = updated.clone();
    Ok(updated)
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    /// 作业下的全部任务，按位置与创建时间排序
    pub fn tasks_for_job(&self, job_id: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .map(|tasks| {
                tasks
                    .values()
                    .filter(|t| t.job_id.as_deref() == Some(job_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        tasks.sort_by(|a, b| (a.position, a.created_at).cmp(&(b.position, b.created_at)));
        tasks
    }

    pub fn all_jobs(&self) -> Vec<Job> {
        self.jobs
            .lock()
            .map(|jobs| jobs.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn create_task(&self, task: &Task) -> ConductorResult<()> {
        let mut tasks = lock(&self.tasks)?;
        if tasks.contains_key(&task.id) {
            return Err(ConductorError::Datastore(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> ConductorResult<Task> {
        lock(&self.tasks)?
            .get(id)
            .cloned()
            .ok_or_else(|| ConductorError::TaskNotFound { id: id.to_string() })
    }

    async fn update_task(&self, id: &str, modify: Update<'_, Task>) -> ConductorResult<Task> {
        let mut tasks = lock(&self.tasks)?;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| ConductorError::TaskNotFound { id: id.to_string() })?;
        apply(task, modify)
    }

    async fn get_active_tasks(&self, job_id: &str) -> ConductorResult<Vec<Task>> {
        let tasks = lock(&self.tasks)?;
        let mut active: Vec<Task> = tasks
            .values()
            .filter(|t| t.job_id.as_deref() == Some(job_id) && t.state.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|t| t.position);
        Ok(active)
    }

    async fn create_job(&self, job: &Job) -> ConductorResult<()> {
        let mut jobs = lock(&self.jobs)?;
        if jobs.contains_key(&job.id) {
            return Err(ConductorError::Datastore(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> ConductorResult<Job> {
        lock(&self.jobs)?
            .get(id)
            .cloned()
            .ok_or_else(|| ConductorError::JobNotFound { id: id.to_string() })
    }

    async fn update_job(&self, id: &str, modify: Update<'_, Job>) -> ConductorResult<Job> {
        let mut jobs = lock(&self.jobs)?;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| ConductorError::JobNotFound { id: id.to_string() })?;
        apply(job, modify)
    }

    async fn create_service(&self, service: &Service) -> ConductorResult<()> {
        let key = (service.namespace.clone(), service.name.clone());
        let mut services = lock(&self.services)?;
        if services.contains_key(&key) {
            return Err(ConductorError::Datastore(format!(
                "service {}/{} already exists",
                service.namespace, service.name
            )));
        }
        services.insert(key, service.clone());
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> ConductorResult<Service> {
        lock(&self.services)?
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ConductorError::ServiceNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn get_service_by_id(&self, id: &str) -> ConductorResult<Service> {
        lock(&self.services)?
            .values()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| ConductorError::ServiceNotFound {
                namespace: String::new(),
                name: id.to_string(),
            })
    }

    async fn update_service(
        &self,
        namespace: &str,
        name: &str,
        modify: Update<'_, Service>,
    ) -> ConductorResult<Service> {
        let mut services = lock(&self.services)?;
        let service = services
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ConductorError::ServiceNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        apply(service, modify)
    }

    async fn create_node(&self, node: &Node) -> ConductorResult<()> {
        let mut nodes = lock(&self.nodes)?;
        if nodes.contains_key(&node.id) {
            return Err(ConductorError::Datastore(format!("node {} already exists", node.id)));
        }
        nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn get_node(&self, id: &str) -> ConductorResult<Node> {
        lock(&self.nodes)?
            .get(id)
            .cloned()
            .ok_or_else(|| ConductorError::NodeNotFound { id: id.to_string() })
    }

    async fn update_node(&self, id: &str, modify: Update<'_, Node>) -> ConductorResult<Node> {
        let mut nodes = lock(&self.nodes)?;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| ConductorError::NodeNotFound { id: id.to_string() })?;
        apply(node, modify)
    }

    async fn get_active_nodes(&self) -> ConductorResult<Vec<Node>> {
        let cutoff = Utc::now() - Duration::seconds(NODE_ACTIVE_WINDOW_SECONDS);
        let nodes = lock(&self.nodes)?;
        let mut active: Vec<Node> = nodes
            .values()
            .filter(|n| {
                n.status == NodeStatus::Up && n.last_heartbeat_at.is_some_and(|at| at >= cutoff)
            })
            .cloned()
            .collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(active)
    }

    async fn create_task_log_part(&self, part: &TaskLogPart) -> ConductorResult<()> {
        lock(&self.log_parts)?
            .entry(part.task_id.clone())
            .or_default()
            .push(part.clone());
        Ok(())
    }

    async fn get_task_log_parts(&self, task_id: &str) -> ConductorResult<Vec<TaskLogPart>> {
        let mut parts = lock(&self.log_parts)?
            .get(task_id)
            .cloned()
            .unwrap_or_default();
        parts.sort_by_key(|p| p.number);
        Ok(parts)
    }
}
