use std::collections::BTreeMap;

use conductor_domain::models::Port;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// 正在本节点执行的任务
#[derive(Debug, Clone)]
pub struct RunningTask {
    pub cancel: CancellationToken,
    /// 服务任务通过健康探测后解析出的端口
    pub ports: BTreeMap<String, Port>,
}

/// 任务ID到取消句柄的并发注册表
///
/// 所有操作都是单键的原子读写，不会跨阻塞调用持有锁。
#[derive(Debug, Default)]
pub struct RunningTasks {
    tasks: DashMap<String, RunningTask>,
}

impl RunningTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task_id: &str, cancel: CancellationToken) {
        self.tasks.insert(
            task_id.to_string(),
            RunningTask {
                cancel,
                ports: BTreeMap::new(),
            },
        );
    }

    /// 记录服务任务的端口；任务已不在注册表中时忽略
    pub fn set_ports(&self, task_id: &str, ports: BTreeMap<String, Port>) {
        if let Some(mut entry) = self.tasks.get_mut(task_id) {
            entry.ports = ports;
        }
    }

    pub fn ports(&self, task_id: &str) -> Option<BTreeMap<String, Port>> {
        self.tasks.get(task_id).map(|entry| entry.ports.clone())
    }

    /// 取消并移除任务，返回任务是否在本节点上
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.tasks.remove(task_id) {
            Some((_, running)) => {
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, task_id: &str) {
        self.tasks.remove(task_id);
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_fires_token_and_removes_entry() {
        let tasks = RunningTasks::new();
        let token = CancellationToken::new();
        tasks.insert("t1", token.clone());

        assert!(tasks.cancel("t1"));
        assert!(token.is_cancelled());
        assert!(!tasks.contains("t1"));
        assert!(!tasks.cancel("t1"));
    }

    #[test]
    fn test_ports_only_recorded_for_registered_tasks() {
        let tasks = RunningTasks::new();
        let ports = BTreeMap::from([("8080".to_string(), Port::new("8080"))]);

        tasks.set_ports("ghost", ports.clone());
        assert!(tasks.ports("ghost").is_none());

        tasks.insert("svc", CancellationToken::new());
        tasks.set_ports("svc", ports);
        assert_eq!(tasks.ports("svc").map(|p| p.len()), Some(1));
        assert_eq!(tasks.len(), 1);
    }
}
