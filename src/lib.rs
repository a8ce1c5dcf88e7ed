//! # otelcol-e2e
//!
//! *End-to-end check that a telemetry pipeline is alive and exporting.*
//!
//! Brings up a docker compose topology (an instrumented app plus an OpenTelemetry
//! collector), waits for every service to answer its readiness probe, then scrapes
//! the collector's self-observability `/metrics` endpoint until the exporter
//! counters show that spans, log records and metric points reached the backend.
//!
//! ## Flow
//!
//! ```text
//! Environment::run
//!   ├── Orchestrator::up (DockerCompose)
//!   ├── readiness probes (HTTP, all must pass)
//!   ├── resolve collector metrics endpoint
//!   ├── verify_targets ── Poller::wait_for per target
//!   │                        ├── MetricsFetcher::fetch → MetricSnapshot
//!   │                        └── match_target → PollOutcome
//!   └── Orchestrator::down (always)
//! ```

pub mod environment;
pub mod fetcher;
pub mod matcher;
pub mod model;
pub mod poller;
pub mod utils;
pub mod verify;

pub use environment::{Environment, Orchestrator, ReadinessProbe, ResolvedEndpoints};
pub use fetcher::{FetchError, HttpMetricsFetcher, MetricsFetcher};
pub use matcher::match_target;
pub use model::{MetricSnapshot, PollOutcome, VerificationTarget};
pub use poller::{PollSettings, Poller};
pub use verify::{verify_targets, VerificationReport};
