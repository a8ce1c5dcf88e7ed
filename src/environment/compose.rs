//! `docker compose` backed [`Orchestrator`].
//!
//! The topology is a base compose file plus zero or more override files
//! layered on top. Override files come from a comma separated environment
//! variable (`COMPOSE_OVERRIDE_FILE` by default). Each instance uses its own
//! project name so concurrent runs do not collide.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{bail, Context, Result};
use rand::{distributions::Alphanumeric, Rng};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Orchestrator, ServiceAddress};

pub struct DockerCompose {
    program: String,
    project: String,
    files: Vec<PathBuf>,
    started: bool,
}

impl DockerCompose {
    pub fn new(files: Vec<PathBuf>, project_prefix: &str) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();
        Self {
            program: "docker".to_string(),
            project: format!("{project_prefix}-{suffix}"),
            files,
            started: false,
        }
    }

    /// Base files followed by the overrides listed in `override_env`.
    pub fn from_env(base: Vec<PathBuf>, override_env: &str, project_prefix: &str) -> Self {
        let mut files = base;
        if let Ok(list) = std::env::var(override_env) {
            let overrides = parse_override_list(&list);
            if !overrides.is_empty() {
                info!(variable = override_env, ?overrides, "Layering compose overrides");
            }
            files.extend(overrides);
        }
        Self::new(files, project_prefix)
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "--project-name".to_string(),
            self.project.clone(),
        ];
        for file in &self.files {
            args.push("--file".to_string());
            args.push(file.display().to_string());
        }
        args
    }

    async fn compose(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.base_args())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(project = %self.project, ?args, "Running docker compose");

        let output = cmd.output().await.with_context(|| {
            format!(
                "Failed to execute '{} compose'. Is docker installed?",
                self.program
            )
        })?;
        if !output.status.success() {
            bail!(
                "docker compose {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Orchestrator for DockerCompose {
    async fn up(&mut self) -> Result<()> {
        for file in &self.files {
            if !Path::new(file).is_file() {
                bail!("compose file {} does not exist", file.display());
            }
        }
        info!(project = %self.project, files = ?self.files, "Starting compose stack");
        // Marked before the command runs: a partial start still needs a down.
        self.started = true;
        self.compose(&["up", "--detach"]).await?;
        Ok(())
    }

    async fn down(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        info!(project = %self.project, "Stopping compose stack");
        self.compose(&["down", "--remove-orphans"]).await?;
        self.started = false;
        Ok(())
    }

    async fn service_address(&self, service: &str, port: u16) -> Result<ServiceAddress> {
        let port_arg = port.to_string();
        let stdout = self.compose(&["port", service, &port_arg]).await?;
        parse_port_output(&stdout, &docker_host())
            .with_context(|| format!("no published port for {service}:{port}"))
    }
}

impl Drop for DockerCompose {
    fn drop(&mut self) {
        if !self.started {
            return;
        }
        // Only reached when `down` was skipped or failed. Blocks the current
        // thread, which may be a tokio worker.
        warn!(project = %self.project, "Compose stack still running on drop, stopping it");
        let status = std::process::Command::new(&self.program)
            .args(self.base_args())
            .args(["down", "--remove-orphans"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = status {
            warn!(project = %self.project, "Could not stop compose stack: {}", e);
        }
    }
}

/// Split a comma separated list of compose files. Blank entries are ignored.
pub fn parse_override_list(list: &str) -> Vec<PathBuf> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Host the published ports are reachable on.
fn docker_host() -> String {
    std::env::var("DOCKER_HOST")
        .ok()
        .and_then(|h| host_of_docker_url(&h))
        .unwrap_or_else(|| "localhost".to_string())
}

fn host_of_docker_url(url: &str) -> Option<String> {
    let rest = url.strip_prefix("tcp://")?;
    let authority = rest.split('/').next()?;
    let host = match authority.rsplit_once(':') {
        Some((host, _)) => host,
        None => authority,
    };
    (!host.is_empty()).then(|| host.to_string())
}

/// Parse `docker compose port` output such as `0.0.0.0:49153` or `[::]:49153`.
/// Wildcard bind addresses are replaced by `wildcard_host`.
pub fn parse_port_output(stdout: &str, wildcard_host: &str) -> Result<ServiceAddress> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .context("empty port output")?;
    let (host, port) = line
        .rsplit_once(':')
        .with_context(|| format!("unexpected port output '{line}'"))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("unexpected port in '{line}'"))?;
    if port == 0 {
        bail!("port is not published");
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = match host {
        "" | "0.0.0.0" | "::" => wildcard_host.to_string(),
        other => other.to_string(),
    };
    Ok(ServiceAddress { host, port })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_list_is_comma_separated() {
        assert_eq!(
            parse_override_list("ci.yaml, gcp.yaml"),
            vec![PathBuf::from("ci.yaml"), PathBuf::from("gcp.yaml")]
        );
        assert!(parse_override_list("").is_empty());
        assert_eq!(parse_override_list(",a.yaml,,"), vec![PathBuf::from("a.yaml")]);
    }

    #[test]
    fn port_output_with_wildcard_host() {
        let addr = parse_port_output("0.0.0.0:49153\n", "localhost").unwrap();
        assert_eq!(
            addr,
            ServiceAddress {
                host: "localhost".into(),
                port: 49153
            }
        );

        let addr = parse_port_output("[::]:49154\n", "localhost").unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 49154);
    }

    #[test]
    fn port_output_with_explicit_host() {
        let addr = parse_port_output("127.0.0.1:8888", "localhost").unwrap();
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, 8888);
    }

    #[test]
    fn unpublished_port_is_an_error() {
        assert!(parse_port_output("", "localhost").is_err());
        assert!(parse_port_output(":0\n", "localhost").is_err());
        assert!(parse_port_output("garbage", "localhost").is_err());
    }

    #[test]
    fn docker_host_from_tcp_url() {
        assert_eq!(
            host_of_docker_url("tcp://10.0.0.5:2375"),
            Some("10.0.0.5".to_string())
        );
        assert_eq!(host_of_docker_url("unix:///var/run/docker.sock"), None);
    }

    #[test]
    fn projects_are_unique_per_instance() {
        let a = DockerCompose::new(vec!["docker-compose.yaml".into()], "otelcol-e2e");
        let b = DockerCompose::new(vec!["docker-compose.yaml".into()], "otelcol-e2e");
        assert!(a.project().starts_with("otelcol-e2e-"));
        assert_ne!(a.project(), b.project());
    }

    #[tokio::test]
    async fn up_rejects_missing_compose_file() {
        let mut stack = DockerCompose::new(vec!["does-not-exist.yaml".into()], "otelcol-e2e");
        let err = stack.up().await.unwrap_err();
        assert!(err.to_string().contains("does-not-exist.yaml"));
        // Nothing was started so nothing must be torn down.
        assert!(stack.down().await.is_ok());
    }
}
