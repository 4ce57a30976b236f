use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::ConductorResult;

use crate::models::{Job, Node, Service, Task, TaskLogPart};

/// 读-改-写更新回调；返回错误时存储保持不变
pub type Update<'a, T> = Box<dyn FnOnce(&mut T) -> ConductorResult<()> + Send + 'a>;

/// 持久化协作方接口
///
/// `update_*` 必须是原子的读-改-写：回调看到的是最新记录，
/// 回调成功后整体写回并返回更新后的实体。
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn create_task(&self, task: &Task) -> ConductorResult<()>;
    async fn get_task(&self, id: &str) -> ConductorResult<Task>;
    async fn update_task(&self, id: &str, modify: Update<'_, Task>) -> ConductorResult<Task>;
    /// 作业下仍处于活动状态的任务
    async fn get_active_tasks(&self, job_id: &str) -> ConductorResult<Vec<Task>>;

    async fn create_job(&self, job: &Job) -> ConductorResult<()>;
    async fn get_job(&self, id: &str) -> ConductorResult<Job>;
    async fn update_job(&self, id: &str, modify: Update<'_, Job>) -> ConductorResult<Job>;

    async fn create_service(&self, service: &Service) -> ConductorResult<()>;
    async fn get_service(&self, namespace: &str, name: &str) -> ConductorResult<Service>;
    /// 部署作业只记录服务ID，按ID反查服务
    async fn get_service_by_id(&self, id: &str) -> ConductorResult<Service>;
    async fn update_service(
        &self,
        namespace: &str,
        name: &str,
        modify: Update<'_, Service>,
    ) -> ConductorResult<Service>;

    async fn create_node(&self, node: &Node) -> ConductorResult<()>;
    async fn get_node(&self, id: &str) -> ConductorResult<Node>;
    async fn update_node(&self, id: &str, modify: Update<'_, Node>) -> ConductorResult<Node>;
    async fn get_active_nodes(&self) -> ConductorResult<Vec<Node>>;

    async fn create_task_log_part(&self, part: &TaskLogPart) -> ConductorResult<()>;
    async fn get_task_log_parts(&self, task_id: &str) -> ConductorResult<Vec<TaskLogPart>>;
}

pub type DatastoreRef = Arc<dyn Datastore>;
