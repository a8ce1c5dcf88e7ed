use anyhow::Result;
use std::fmt::Display;
use tracing::error;
use tracing::{level_filters::LevelFilter, Subscriber};
use tracing_subscriber::{
    fmt::{format, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
    EnvFilter,
};

/// Log an error with context on the way up, without breaking the `?` chain.
pub trait LogMe<T> {
    fn log_error<C: Display + Send + Sync + 'static>(self, context_msg: C) -> anyhow::Result<T>;
}

// ERROR {context_msg}: {cause}
impl<T, E> LogMe<T> for Result<T, E>
where
    E: Into<anyhow::Error> + Display + Send + Sync + 'static,
{
    fn log_error<C: Display + Send + Sync + 'static>(self, context_msg: C) -> anyhow::Result<T> {
        self.map_err(|e| {
            let ae: anyhow::Error = e.into();
            let ae = ae.context(context_msg);
            error!("{:#}", ae);
            ae
        })
    }
}

/// Prefixes every event with the compose project name
struct RunNameFormatter<T> {
    run_name: String,
    base_formatter: T,
}

impl<S, N, T> FormatEvent<S, N> for RunNameFormatter<T>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    T: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        write!(&mut writer, "[{}] ", &self.run_name)?;
        self.base_formatter.format_event(ctx, writer, event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingMode {
    /// Human readable, for local runs
    Full,
    /// JSON lines, for CI log collection
    Json,
    /// Full tracing prefixed with the run name, when several stacks run side by side
    Prefixed,
}

impl TracingMode {
    pub fn from_log_format(log_format: &str) -> Self {
        match log_format {
            "json" => TracingMode::Json,
            "prefixed" => TracingMode::Prefixed,
            _ => TracingMode::Full,
        }
    }
}

/// Setup tracing - stdout subscriber
/// stdout defaults to INFO, hyper and reqwest stay at INFO unless RUST_LOG names them
pub fn setup_tracing(mode: TracingMode, run_name: String) -> Result<()> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    let var = std::env::var("RUST_LOG").unwrap_or("".to_string());
    if !var.contains("hyper") {
        filter = filter.add_directive("hyper=info".parse()?);
    }
    if !var.contains("reqwest") {
        filter = filter.add_directive("reqwest=info".parse()?);
    }

    // Can't use match inline because these are different return types
    match mode {
        TracingMode::Full => register_global_subscriber(filter, tracing_subscriber::fmt::layer()),
        TracingMode::Json => register_global_subscriber(
            filter,
            tracing_subscriber::fmt::layer().event_format(tracing_subscriber::fmt::format().json()),
        ),
        TracingMode::Prefixed => register_global_subscriber(
            filter,
            tracing_subscriber::fmt::layer().event_format(RunNameFormatter {
                run_name,
                base_formatter: tracing_subscriber::fmt::format(),
            }),
        ),
    };

    Ok(())
}

fn register_global_subscriber<T, S>(filter: EnvFilter, fmt_layer: T)
where
    S: Subscriber,
    T: tracing_subscriber::Layer<S> + Send + Sync,
    tracing_subscriber::filter::Filtered<T, tracing_subscriber::EnvFilter, S>:
        tracing_subscriber::Layer<tracing_subscriber::Registry>,
{
    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_selects_mode() {
        assert_eq!(TracingMode::from_log_format("json"), TracingMode::Json);
        assert_eq!(TracingMode::from_log_format("prefixed"), TracingMode::Prefixed);
        assert_eq!(TracingMode::from_log_format("full"), TracingMode::Full);
        assert_eq!(TracingMode::from_log_format("anything"), TracingMode::Full);
    }

    #[test]
    fn log_error_adds_context() {
        let res: Result<(), std::io::Error> = Err(std::io::Error::other("boom"));
        let err = res.log_error("tearing down").unwrap_err();
        assert_eq!(format!("{err:#}"), "tearing down: boom");
    }
}
