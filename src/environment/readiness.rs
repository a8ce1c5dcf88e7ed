//! HTTP readiness probing.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use super::BringUpError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeProtocol {
    #[default]
    Http,
}

/// A service is ready once `protocol://<service>:<port><path>` answers with a
/// success status.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReadinessProbe {
    pub service: String,
    pub port: u16,
    pub path: String,
    #[serde(default)]
    pub protocol: ProbeProtocol,
}

impl ReadinessProbe {
    pub fn http(service: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            port,
            path: path.into(),
            protocol: ProbeProtocol::Http,
        }
    }
}

/// `timeout` is the budget of the whole readiness gate, shared by every probe.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessWait {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for ReadinessWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            interval: Duration::from_millis(500),
        }
    }
}

/// Single GET; any 2xx is ready.
pub async fn probe_once(client: &reqwest::Client, url: &Url) -> Result<()> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("probing {url}"))?;
    if !response.status().is_success() {
        bail!("{url} answered {}", response.status());
    }
    Ok(())
}

/// Block until `url` answers, or fail with [`BringUpError::NotReady`] once
/// `wait.timeout` has elapsed since `gate_started`.
pub async fn wait_until_ready(
    client: &reqwest::Client,
    probe: &ReadinessProbe,
    url: &Url,
    wait: ReadinessWait,
    gate_started: Instant,
) -> Result<(), BringUpError> {
    loop {
        let attempt = match probe.protocol {
            ProbeProtocol::Http => probe_once(client, url).await,
        };
        match attempt {
            Ok(()) => {
                info!(service = %probe.service, %url, "Service is ready");
                return Ok(());
            }
            Err(e) => {
                let waited = gate_started.elapsed();
                if waited >= wait.timeout {
                    return Err(BringUpError::NotReady {
                        service: probe.service.clone(),
                        url: url.clone(),
                        waited,
                        last: e,
                    });
                }
                debug!(service = %probe.service, "⏰ Waiting for service to be ready: {:#}", e);
            }
        }
        tokio::time::sleep(wait.interval).await;
    }
}
