//! Environment controller.
//!
//! Brings the service topology up through an [`Orchestrator`], gates on every
//! [`ReadinessProbe`], resolves the collector's metrics endpoint and always
//! tears the topology down again, whatever the verification did.

use std::{fmt, future::Future, panic::AssertUnwindSafe, time::Duration};

use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use reqwest::Url;
use tracing::{error, info};

use crate::utils::logger::LogMe;

pub mod compose;
pub mod readiness;

pub use compose::DockerCompose;
pub use readiness::{ProbeProtocol, ReadinessProbe, ReadinessWait};

/// Externally reachable address of a service port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
}

impl ServiceAddress {
    pub fn url(&self, path: &str) -> Result<Url> {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        Url::parse(&format!("http://{host}:{}{path}", self.port))
            .with_context(|| format!("building url for {host}:{}{path}", self.port))
    }
}

/// Process/container orchestration backend.
pub trait Orchestrator {
    fn up(&mut self) -> impl Future<Output = Result<()>>;
    fn down(&mut self) -> impl Future<Output = Result<()>>;
    /// Host and published port for `port` of `service`.
    fn service_address(&self, service: &str, port: u16)
        -> impl Future<Output = Result<ServiceAddress>>;
}

/// Where the collector's self-observability metrics are served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsEndpointSpec {
    pub service: String,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsEndpointSpec {
    fn default() -> Self {
        Self {
            service: "otelcol".to_string(),
            port: 8888,
            path: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub metrics: Url,
}

#[derive(Debug)]
pub enum BringUpError {
    Orchestration {
        stage: &'static str,
        cause: anyhow::Error,
    },
    NotReady {
        service: String,
        url: Url,
        waited: Duration,
        last: anyhow::Error,
    },
}

impl fmt::Display for BringUpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BringUpError::Orchestration { stage, cause } => {
                write!(f, "orchestration failed during {stage}: {cause:#}")
            }
            BringUpError::NotReady {
                service,
                url,
                waited,
                last,
            } => write!(
                f,
                "service {service} not ready at {url} after {:.1}s: {last:#}",
                waited.as_secs_f64()
            ),
        }
    }
}

impl std::error::Error for BringUpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BringUpError::Orchestration { cause, .. } => {
                Some(AsRef::<dyn std::error::Error>::as_ref(cause))
            }
            BringUpError::NotReady { last, .. } => Some(AsRef::<dyn std::error::Error>::as_ref(last)),
        }
    }
}

const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Scoped handle on one service topology.
///
/// [`Environment::run`] owns the whole lifecycle: up, readiness, the caller's
/// verification, then down.
pub struct Environment<O> {
    orchestrator: O,
    probes: Vec<ReadinessProbe>,
    readiness: ReadinessWait,
    metrics: MetricsEndpointSpec,
    run_timeout: Duration,
    client: reqwest::Client,
}

impl<O: Orchestrator> Environment<O> {
    pub fn new(orchestrator: O, probes: Vec<ReadinessProbe>) -> Result<Self> {
        Ok(Self {
            orchestrator,
            probes,
            readiness: ReadinessWait::default(),
            metrics: MetricsEndpointSpec::default(),
            run_timeout: Duration::from_secs(600),
            client: probe_client(PROBE_REQUEST_TIMEOUT)?,
        })
    }

    pub fn with_readiness(mut self, readiness: ReadinessWait) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_metrics_endpoint(mut self, metrics: MetricsEndpointSpec) -> Self {
        self.metrics = metrics;
        self
    }

    /// Upper bound for the verification closure. Teardown is not counted.
    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    /// Start the topology and wait until all probes pass.
    pub async fn bring_up(&mut self) -> Result<ResolvedEndpoints, BringUpError> {
        info!("🚀 Bringing up environment");
        self.orchestrator
            .up()
            .await
            .map_err(|cause| BringUpError::Orchestration { stage: "up", cause })?;

        let gate_started = tokio::time::Instant::now();
        for probe in &self.probes {
            let url = self
                .resolve(&probe.service, probe.port, &probe.path)
                .await
                .map_err(|cause| BringUpError::Orchestration {
                    stage: "readiness probe resolution",
                    cause,
                })?;
            readiness::wait_until_ready(&self.client, probe, &url, self.readiness, gate_started)
                .await?;
        }

        let metrics = self
            .resolve(&self.metrics.service, self.metrics.port, &self.metrics.path)
            .await
            .map_err(|cause| BringUpError::Orchestration {
                stage: "metrics endpoint resolution",
                cause,
            })?;
        info!(%metrics, "Environment is up");
        Ok(ResolvedEndpoints { metrics })
    }

    async fn resolve(&self, service: &str, port: u16, path: &str) -> Result<Url> {
        self.orchestrator
            .service_address(service, port)
            .await
            .with_context(|| format!("resolving {service}:{port}"))?
            .url(path)
    }

    /// Bring up, run `verify` with the resolved endpoints, tear down.
    ///
    /// Teardown runs on every path, a panic inside `verify` included: the
    /// panic is resumed once the topology is down. A teardown failure is
    /// returned only when everything before it succeeded; otherwise it is
    /// logged and the primary error is kept.
    pub async fn run<T, F, Fut>(mut self, verify: F) -> Result<T>
    where
        F: FnOnce(ResolvedEndpoints) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut panic = None;
        let outcome = match self.bring_up().await {
            Ok(endpoints) => {
                let guarded =
                    AssertUnwindSafe(async move { verify(endpoints).await }).catch_unwind();
                match tokio::time::timeout(self.run_timeout, guarded).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(payload)) => {
                        panic = Some(payload);
                        Err(anyhow!("verification panicked"))
                    }
                    Err(_) => Err(anyhow!("verification run exceeded {:?}", self.run_timeout)),
                }
            }
            Err(e) => Err(e.into()),
        };

        let teardown = self
            .orchestrator
            .down()
            .await
            .log_error("tearing down environment");

        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }

        match (outcome, teardown) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), _) => {
                error!("{:#}", e);
                Err(e)
            }
        }
    }
}

fn probe_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("building readiness probe client")
}
