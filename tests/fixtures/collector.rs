#![allow(unused)]

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{CounterVec, Encoder, Opts, Registry, TextEncoder};
use reqwest::Url;
use tokio::task::JoinHandle;
use tracing::info;

/// Stand-in for the collector's self-observability port plus the app's
/// readiness route.
pub struct FakeCollector {
    pub addr: SocketAddr,
    pub sent_spans: CounterVec,
    pub sent_log_records: CounterVec,
    pub sent_metric_points: CounterVec,
    state: Arc<ServerState>,
    server: JoinHandle<()>,
}

struct ServerState {
    registry: Registry,
    scrapes: AtomicU32,
    app_probes: AtomicU32,
    /// Scrapes answered with 503 before the registry is served.
    metrics_unavailable_for: AtomicU32,
    /// `/single` requests answered with 503 before the app is ready.
    app_unavailable_for: AtomicU32,
    /// Served instead of the registry when set.
    raw_body: Mutex<Option<String>>,
}

fn exporter_counter(registry: &Registry, name: &str, help: &str) -> Result<CounterVec> {
    let counter = CounterVec::new(Opts::new(name, help), &["exporter"])?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl FakeCollector {
    pub async fn start() -> Result<Self> {
        let registry = Registry::new();
        let sent_spans = exporter_counter(
            &registry,
            "otelcol_exporter_sent_spans",
            "Number of spans successfully sent to destination.",
        )?;
        let sent_log_records = exporter_counter(
            &registry,
            "otelcol_exporter_sent_log_records",
            "Number of log record successfully sent to destination.",
        )?;
        let sent_metric_points = exporter_counter(
            &registry,
            "otelcol_exporter_sent_metric_points",
            "Number of metric points successfully sent to destination.",
        )?;

        let state = Arc::new(ServerState {
            registry,
            scrapes: AtomicU32::new(0),
            app_probes: AtomicU32::new(0),
            metrics_unavailable_for: AtomicU32::new(0),
            app_unavailable_for: AtomicU32::new(0),
            raw_body: Mutex::new(None),
        });

        let router = Router::new()
            .route("/metrics", get(metrics))
            .route("/single", get(single))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("binding fake collector")?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        info!(%addr, "fake collector listening");

        Ok(Self {
            addr,
            sent_spans,
            sent_log_records,
            sent_metric_points,
            state,
            server,
        })
    }

    pub fn metrics_url(&self) -> Url {
        Url::parse(&format!("http://{}/metrics", self.addr)).unwrap()
    }

    pub fn metrics_unavailable_for(&self, scrapes: u32) {
        self.state
            .metrics_unavailable_for
            .store(scrapes, Ordering::SeqCst);
    }

    pub fn app_unavailable_for(&self, probes: u32) {
        self.state.app_unavailable_for.store(probes, Ordering::SeqCst);
    }

    pub fn serve_raw(&self, body: impl Into<String>) {
        *self.state.raw_body.lock().unwrap() = Some(body.into());
    }

    pub fn scrapes(&self) -> u32 {
        self.state.scrapes.load(Ordering::SeqCst)
    }

    pub fn app_probes(&self) -> u32 {
        self.state.app_probes.load(Ordering::SeqCst)
    }

    /// All three exporters well above the usual threshold of 100.
    pub fn export_everything(&self) {
        self.sent_spans
            .with_label_values(&["googlecloud"])
            .inc_by(150.0);
        self.sent_log_records
            .with_label_values(&["googlecloud"])
            .inc_by(240.0);
        self.sent_metric_points
            .with_label_values(&["googlemanagedprometheus"])
            .inc_by(1200.0);
    }
}

impl Drop for FakeCollector {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn metrics(State(state): State<Arc<ServerState>>) -> Response {
    let served = state.scrapes.fetch_add(1, Ordering::SeqCst);
    if served < state.metrics_unavailable_for.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "starting").into_response();
    }
    if let Some(body) = state.raw_body.lock().unwrap().clone() {
        return (StatusCode::OK, body).into_response();
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.registry.gather(), &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    (
        StatusCode::OK,
        [(CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

async fn single(State(state): State<Arc<ServerState>>) -> Response {
    let served = state.app_probes.fetch_add(1, Ordering::SeqCst);
    if served < state.app_unavailable_for.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "starting").into_response();
    }
    (StatusCode::OK, "ok").into_response()
}
