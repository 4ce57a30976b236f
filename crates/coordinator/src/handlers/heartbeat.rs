use async_trait::async_trait;
use conductor_core::ConductorResult;
use conductor_domain::middleware::{EventType, Handler};
use conductor_domain::models::Node;
use conductor_domain::repositories::DatastoreRef;
use tracing::debug;

/// 保存节点的最新心跳；较旧的心跳不会覆盖较新的记录
pub struct HeartbeatHandler {
    datastore: DatastoreRef,
}

impl HeartbeatHandler {
    pub fn new(datastore: DatastoreRef) -> Self {
        Self { datastore }
    }

    async fn refresh(&self, node: &Node) -> ConductorResult<()> {
        let incoming = node.clone();
        self.datastore
            .update_node(
                &node.id,
                Box::new(move |n: &mut Node| {
                    if incoming.last_heartbeat_at > n.last_heartbeat_at {
                        *n = incoming;
                    }
                    Ok(())
                }),
            )
            .await?;
        debug!("更新节点 {} 的心跳", node.id);
        Ok(())
    }
}

#[async_trait]
impl Handler<Node> for HeartbeatHandler {
    async fn handle(&self, _event: EventType, node: &mut Node) -> ConductorResult<()> {
        match self.refresh(node).await {
            Err(e) if e.is_not_found() => {
                debug!("首次收到节点 {} ({}) 的心跳", node.id, node.name);
                if let Err(e) = self.datastore.create_node(node).await {
                    // 同一节点的另一条首次心跳已先写入
                    debug!("创建节点 {} 失败，改为更新: {}", node.id, e);
                    self.refresh(node).await?;
                }
                Ok(())
            }
            other => other,
        }
    }
}
