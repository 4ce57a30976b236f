use std::path::{Component, Path};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use conductor_core::{ConductorError, ConductorResult};
use conductor_domain::messaging::{BrokerExt, BrokerRef};
use conductor_domain::models::{Task, TaskLogPart};
use conductor_domain::runtime::{RunContext, Runtime};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// 脚本可写入该文件来显式设置任务结果
const OUTPUT_FILE_ENV: &str = "CONDUCTOR_OUTPUT";
const OUTPUT_FILE: &str = ".conductor-output";

/// Shell运行时
///
/// 以 `sh -c <run>` 在临时工作目录中执行任务，`files` 写入该目录，
/// 标准输出与标准错误逐行作为日志片段发布。服务任务声明的端口解析为
/// `127.0.0.1:<port>`。
pub struct ShellRuntime {
    shell: String,
    logs: Option<BrokerRef>,
}

impl ShellRuntime {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            logs: None,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// 把任务输出发布到 logs 队列
    pub fn with_log_broker(mut self, broker: BrokerRef) -> Self {
        self.logs = Some(broker);
        self
    }
}

impl Default for ShellRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// 拒绝绝对路径和 `..`，文件只能落在工作目录内
fn safe_relative(name: &str) -> ConductorResult<&Path> {
    let path = Path::new(name);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if name.is_empty() || escapes {
        return Err(ConductorError::TaskExecution(format!("非法的文件路径: {name}")));
    }
    Ok(path)
}

#[derive(Clone)]
struct LogShipper {
    task_id: String,
    broker: Option<BrokerRef>,
    next: Arc<AtomicU64>,
}

impl LogShipper {
    async fn ship(&self, line: &str) {
        let Some(broker) = self.broker.as_ref() else {
            return;
        };
        let part = TaskLogPart {
            id: None,
            number: self.next.fetch_add(1, Ordering::SeqCst) + 1,
            task_id: self.task_id.clone(),
            contents: line.to_string(),
            created_at: Some(Utc::now()),
        };
        if let Err(e) = broker.publish_log_part(&part).await {
            warn!("发布任务 {} 的日志失败: {}", self.task_id, e);
        }
    }
}

async fn collect_lines<R>(reader: R, shipper: LogShipper) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut collected = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        shipper.ship(&line).await;
        collected.push(line);
    }
    collected
}

#[async_trait]
impl Runtime for ShellRuntime {
    async fn run(&self, ctx: &RunContext, task: &mut Task) -> ConductorResult<()> {
        let script = task
            .run
            .clone()
            .filter(|run| !run.trim().is_empty())
            .ok_or_else(|| {
                ConductorError::TaskExecution(format!("任务 {} 没有可执行的命令", task.id))
            })?;

        let workdir = tempfile::tempdir()
            .map_err(|e| ConductorError::TaskExecution(format!("创建工作目录失败: {e}")))?;
        for (name, contents) in &task.files {
            let path = workdir.path().join(safe_relative(name)?);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ConductorError::TaskExecution(format!("创建目录 {} 失败: {e}", parent.display()))
                })?;
            }
            tokio::fs::write(&path, contents).await.map_err(|e| {
                ConductorError::TaskExecution(format!("写入文件 {name} 失败: {e}"))
            })?;
        }

        for name in task.ports.keys() {
            ctx.ports.bind(name, format!("127.0.0.1:{name}"));
        }

        let output_file = workdir.path().join(OUTPUT_FILE);
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&script)
            .current_dir(workdir.path())
            .envs(&task.env)
            .env(OUTPUT_FILE_ENV, &output_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConductorError::TaskExecution(format!("启动Shell命令失败: {e}")))?;

        info!("执行Shell任务: task_id={}, pid={:?}", task.id, child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConductorError::TaskExecution("无法获取stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ConductorError::TaskExecution("无法获取stderr".to_string()))?;

        let shipper = LogShipper {
            task_id: task.id.clone(),
            broker: self.logs.clone(),
            next: Arc::new(AtomicU64::new(0)),
        };
        let stdout_reader = tokio::spawn(collect_lines(stdout, shipper.clone()));
        let stderr_reader = tokio::spawn(collect_lines(stderr, shipper));

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| ConductorError::TaskExecution(format!("等待进程结束失败: {e}")))?,
            _ = ctx.cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("终止任务 {} 的进程失败: {}", task.id, e);
                }
                debug!("Shell任务已取消: task_id={}", task.id);
                return Err(ConductorError::Cancelled);
            }
        };

        let stdout_lines = stdout_reader.await.unwrap_or_default();
        let stderr_lines = stderr_reader.await.unwrap_or_default();

        if !status.success() {
            let detail = stderr_lines.last().cloned().unwrap_or_default();
            return Err(ConductorError::TaskExecution(format!(
                "命令执行失败，退出码: {:?} {}",
                status.code(),
                detail
            )));
        }

        let explicit = tokio::fs::read_to_string(&output_file).await.ok();
        task.result = match explicit {
            Some(result) => Some(result.trim_end().to_string()),
            None if stdout_lines.is_empty() => None,
            None => Some(stdout_lines.join("\n")),
        };

        info!("Shell任务执行完成: task_id={}", task.id);
        Ok(())
    }

    async fn health_check(&self) -> ConductorResult<()> {
        let status = Command::new(&self.shell)
            .arg("-c")
            .arg("true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| ConductorError::Internal(format!("无法启动 {}: {e}", self.shell)))?;

        if status.success() {
            Ok(())
        } else {
            Err(ConductorError::Internal(format!("{} 自检失败", self.shell)))
        }
    }
}
