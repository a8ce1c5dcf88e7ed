use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Result};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::{
    environment::{MetricsEndpointSpec, ReadinessProbe, ReadinessWait},
    model::VerificationTarget,
    poller::PollSettings,
};

const DEFAULTS: &str = include_str!("conf_defaults.toml");

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ComposeConf {
    pub program: String,
    /// Base topology descriptors, applied in order.
    pub files: Vec<PathBuf>,
    /// Environment variable holding a comma separated list of override files.
    pub override_env: String,
    pub project_prefix: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CollectorConf {
    pub service: String,
    pub metrics_port: u16,
    pub metrics_path: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReadinessConf {
    pub timeout_secs: u64,
    pub interval_ms: u64,
    pub probes: Vec<ReadinessProbe>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PollConf {
    pub interval_ms: u64,
    pub deadline_secs: u64,
    pub fetch_timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Conf {
    /// `full`, `json` or `prefixed`
    pub log_format: String,
    pub run_timeout_secs: u64,
    pub compose: ComposeConf,
    pub collector: CollectorConf,
    pub readiness: ReadinessConf,
    pub poll: PollConf,
    pub targets: Vec<VerificationTarget>,
}

impl Conf {
    pub fn new(
        config_file: Option<String>,
        compose_files: Option<Vec<String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULTS, FileFormat::Toml));
        // Priority order: defaults, config file, environment variables, then CLI
        if let Some(config_file) = config_file {
            builder = builder.add_source(File::with_name(config_file.as_str()));
        }
        let s = builder
            .add_source(
                Environment::with_prefix("otelcol_e2e")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("compose.files", compose_files)?
            .build()?;

        s.try_deserialize()
    }

    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            bail!("no verification targets configured");
        }
        if self.poll.interval_ms == 0 {
            bail!("poll.interval_ms must be positive");
        }
        if self.compose.files.is_empty() {
            bail!("compose.files must name at least one base compose file");
        }
        Ok(())
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(self.poll.interval_ms),
            deadline: Duration::from_secs(self.poll.deadline_secs),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.poll.fetch_timeout_secs)
    }

    pub fn readiness_wait(&self) -> ReadinessWait {
        ReadinessWait {
            timeout: Duration::from_secs(self.readiness.timeout_secs),
            interval: Duration::from_millis(self.readiness.interval_ms),
        }
    }

    pub fn metrics_endpoint(&self) -> MetricsEndpointSpec {
        MetricsEndpointSpec {
            service: self.collector.service.clone(),
            port: self.collector.metrics_port,
            path: self.collector.metrics_path.clone(),
        }
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}
