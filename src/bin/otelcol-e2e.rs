use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use otelcol_e2e::{
    environment::{DockerCompose, Environment},
    fetcher::{HttpMetricsFetcher, MetricsFetcher},
    poller::Poller,
    utils::{
        conf::Conf,
        logger::{setup_tracing, TracingMode},
    },
    verify::verify_targets,
};
use reqwest::Url;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Checks that an OpenTelemetry collector exports to its backend", long_about = None)]
struct Args {
    #[arg(long)]
    config_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring up the compose stack, verify every target, tear the stack down
    Run {
        /// Base compose file(s). Replaces `compose.files` from the config.
        #[arg(long = "compose-file")]
        compose_files: Vec<String>,
    },
    /// Verify targets against an already running collector
    Check {
        /// Collector metrics endpoint, e.g. http://localhost:8888/metrics
        #[arg(long)]
        endpoint: Url,
    },
    /// Fetch and print the decoded metrics once
    Scrape {
        #[arg(long)]
        endpoint: Url,

        /// Only print this metric family
        #[arg(long)]
        family: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let compose_files = match &args.command {
        Command::Run { compose_files } if !compose_files.is_empty() => Some(compose_files.clone()),
        _ => None,
    };
    let config = Conf::new(args.config_file, compose_files).context("reading config")?;
    config.validate()?;

    let stack = DockerCompose::from_env(
        config.compose.files.clone(),
        &config.compose.override_env,
        &config.compose.project_prefix,
    )
    .with_program(config.compose.program.clone());

    setup_tracing(
        TracingMode::from_log_format(&config.log_format),
        stack.project().to_string(),
    )?;

    let fetcher = HttpMetricsFetcher::new(config.fetch_timeout())?;

    match args.command {
        Command::Run { .. } => {
            let environment = Environment::new(stack, config.readiness.probes.clone())?
                .with_readiness(config.readiness_wait())
                .with_metrics_endpoint(config.metrics_endpoint())
                .with_run_timeout(config.run_timeout());

            let poller = Poller::new(fetcher, config.poll_settings());
            let targets = config.targets.clone();
            environment
                .run(|endpoints| async move {
                    verify_targets(&poller, &endpoints.metrics, &targets)
                        .await
                        .into_result()
                        .context("verifying exports")
                })
                .await?;
            info!("🎉 All exports verified");
        }
        Command::Check { endpoint } => {
            drop(stack);
            let poller = Poller::new(fetcher, config.poll_settings());
            verify_targets(&poller, &endpoint, &config.targets)
                .await
                .into_result()
                .context("verifying exports")?;
            info!("🎉 All exports verified");
        }
        Command::Scrape { endpoint, family } => {
            drop(stack);
            let mut snapshot = fetcher.fetch(&endpoint).await?;
            if let Some(family) = family {
                snapshot = snapshot.only(&family);
            }
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}
