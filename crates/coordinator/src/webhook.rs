use std::time::Duration;

use conductor_domain::events::WEBHOOK_JOB_STATE_CHANGE;
use conductor_domain::models::{Job, JobSummary, Webhook};
use tracing::{debug, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// 作业状态变化的 webhook 通知
///
/// 每个 webhook 在独立任务中投递，失败只记录日志，不影响作业状态。
#[derive(Clone, Default)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn notify(&self, job: &Job) {
        let summary = job.summary();
        for webhook in job.webhooks.iter().filter(|w| subscribes_to_state_change(w)) {
            let client = self.client.clone();
            let webhook = webhook.clone();
            let summary = summary.clone();
            tokio::spawn(async move {
                deliver(&client, &webhook, &summary).await;
            });
        }
    }
}

fn subscribes_to_state_change(webhook: &Webhook) -> bool {
    match webhook.event.as_deref() {
        None | Some("") => true,
        Some(event) => event == WEBHOOK_JOB_STATE_CHANGE,
    }
}

async fn deliver(client: &reqwest::Client, webhook: &Webhook, summary: &JobSummary) {
    let mut request = client
        .post(&webhook.url)
        .timeout(WEBHOOK_TIMEOUT)
        .json(summary);
    for (name, value) in &webhook.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    match request.send().await {
        Ok(response) if response.status().is_success() => {
            debug!("作业 {} 的 webhook 已送达 {}", summary.id, webhook.url);
        }
        Ok(response) => {
            warn!(
                "作业 {} 的 webhook {} 返回 HTTP {}",
                summary.id,
                webhook.url,
                response.status()
            );
        }
        Err(e) => {
            warn!("作业 {} 的 webhook {} 投递失败: {}", summary.id, webhook.url, e);
        }
    }
}
