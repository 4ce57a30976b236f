use async_trait::async_trait;
use chrono::Utc;
use conductor_core::{new_id, ConductorResult};
use conductor_domain::middleware::{EventType, Handler};
use conductor_domain::models::TaskLogPart;
use conductor_domain::repositories::DatastoreRef;

pub struct LogHandler {
    datastore: DatastoreRef,
}

impl LogHandler {
    pub fn new(datastore: DatastoreRef) -> Self {
        Self { datastore }
    }
}

#[async_trait]
impl Handler<TaskLogPart> for LogHandler {
    async fn handle(&self, _event: EventType, part: &mut TaskLogPart) -> ConductorResult<()> {
        if part.id.is_none() {
            part.id = Some(new_id());
        }
        if part.created_at.is_none() {
            part.created_at = Some(Utc::now());
        }
        self.datastore.create_task_log_part(part).await
    }
}
