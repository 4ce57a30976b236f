use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use conductor_core::{new_id, ConductorError, ConductorResult};
use conductor_domain::middleware::{EventType, Handler, HandlerRef};
use conductor_domain::models::{Job, JobState, Port, Service, ServiceState, Task};
use conductor_domain::repositories::DatastoreRef;
use tracing::{debug, info};

/// 把声明式服务转换为单任务的部署作业
pub struct ServiceHandler {
    datastore: DatastoreRef,
    on_job: HandlerRef<Job>,
}

impl ServiceHandler {
    pub fn new(datastore: DatastoreRef, on_job: HandlerRef<Job>) -> Self {
        Self { datastore, on_job }
    }

    async fn start_service(&self, service: &mut Service) -> ConductorResult<()> {
        debug!("启动服务 {}/{}", service.namespace, service.name);

        let ports: BTreeMap<String, Port> = service
            .ports
            .iter()
            .map(|p| (p.port.clone(), p.clone()))
            .collect();
        let task = Task {
            name: service.name.clone(),
            image: service.image.clone(),
            run: service.run.clone(),
            env: service.env.clone(),
            files: service.files.clone(),
            queue: service.queue.clone(),
            probe: Some(service.probe.clone()),
            ports,
            ..Default::default()
        };
        let mut job = Job {
            id: new_id(),
            name: format!("Initial deployment of {}", service.name),
            service_id: Some(service.id.clone()),
            state: JobState::Pending,
            created_at: Some(Utc::now()),
            task_count: 1,
            tasks: vec![task],
            ..Default::default()
        };
        self.datastore.create_job(&job).await?;

        let job_id = job.id.clone();
        let scheduled = self
            .datastore
            .update_service(
                &service.namespace,
                &service.name,
                Box::new(move |s: &mut Service| {
                    s.state = ServiceState::Scheduled;
                    s.job_id = Some(job_id);
                    Ok(())
                }),
            )
            .await?;
        *service = scheduled;
        info!(
            "服务 {}/{} 已创建部署作业 {}",
            service.namespace, service.name, job.id
        );

        self.on_job.handle(EventType::StateChange, &mut job).await
    }
}

#[async_trait]
impl Handler<Service> for ServiceHandler {
    async fn handle(&self, _event: EventType, service: &mut Service) -> ConductorResult<()> {
        match service.state {
            ServiceState::Pending => self.start_service(service).await,
            state => Err(ConductorError::InvalidState(format!(
                "invalid service state: {state}"
            ))),
        }
    }
}
