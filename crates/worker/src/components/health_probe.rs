use std::collections::BTreeMap;
use std::time::Duration;

use conductor_core::{ConductorError, ConductorResult, ProbeConfig};
use conductor_domain::models::{Port, Probe};
use conductor_domain::runtime::PortBindings;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 服务任务的 HTTP 就绪探测
///
/// 每轮依次请求所有已解析的端口地址，任一返回 200 即视为就绪；
/// 轮次之间等待探测间隔，用尽次数后返回 `HealthCheckFailed`。
pub struct HealthProbe {
    client: reqwest::Client,
    max_attempts: u32,
    interval: Duration,
}

impl HealthProbe {
    pub fn new(config: &ProbeConfig) -> ConductorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ConductorError::Network(format!("创建探测HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            max_attempts: config.max_attempts,
            interval: Duration::from_secs(config.interval_seconds),
        })
    }

    pub async fn wait_until_healthy(
        &self,
        task_id: &str,
        probe: &Probe,
        ports: &PortBindings,
        cancel: &CancellationToken,
    ) -> ConductorResult<BTreeMap<String, Port>> {
        let interval = probe
            .interval_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.interval);

        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(ConductorError::Cancelled);
            }

            for address in ports.addresses() {
                let url = probe_url(&address, &probe.path);
                match self.client.get(&url).send().await {
                    Ok(response) if response.status() == StatusCode::OK => {
                        debug!("服务任务 {} 在第 {} 次探测时就绪: {}", task_id, attempt, url);
                        return Ok(ports.snapshot());
                    }
                    Ok(response) => {
                        debug!("服务任务 {} 健康检查返回 {}", task_id, response.status());
                    }
                    Err(e) => {
                        debug!("服务任务 {} 健康检查请求失败: {}", task_id, e);
                    }
                }
            }

            if attempt < self.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ConductorError::Cancelled),
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        Err(ConductorError::HealthCheckFailed)
    }
}

fn probe_url(address: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("http://{address}{path}")
    } else {
        format!("http://{address}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_url_joins_path() {
        assert_eq!(probe_url("127.0.0.1:8080", "/"), "http://127.0.0.1:8080/");
        assert_eq!(
            probe_url("127.0.0.1:8080", "health"),
            "http://127.0.0.1:8080/health"
        );
    }

    #[tokio::test]
    async fn test_no_addresses_exhausts_attempts() {
        let probe = HealthProbe::new(&ProbeConfig {
            max_attempts: 2,
            interval_seconds: 0,
            request_timeout_seconds: 1,
        })
        .unwrap();

        let result = probe
            .wait_until_healthy(
                "t1",
                &Probe {
                    path: "/".into(),
                    interval_seconds: None,
                },
                &PortBindings::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ConductorError::HealthCheckFailed)));
    }

    #[tokio::test]
    async fn test_cancelled_probe_stops_early() {
        let probe = HealthProbe::new(&ProbeConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = probe
            .wait_until_healthy("t1", &Probe::default(), &PortBindings::default(), &cancel)
            .await;
        assert!(matches!(result, Err(ConductorError::Cancelled)));
    }
}
