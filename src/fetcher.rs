//! Scrapes the collector's self-observability endpoint into a [`MetricSnapshot`].
//!
//! The fetcher performs exactly one read per call. Retrying is the poller's
//! job, so every failure is returned as a [`FetchError`] with its cause kept
//! for diagnostics.

use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    time::Duration,
};

use derive_more::Display;
use prometheus_parse::Scrape;
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::model::{MetricFamily, MetricInstance, MetricSnapshot};

#[derive(Debug, Display)]
pub enum FetchError {
    /// Connection refused, reset, timed out...
    #[display("requesting {url}: {source}")]
    Transport { url: Url, source: reqwest::Error },
    #[display("{url} answered {status}")]
    Status { url: Url, status: StatusCode },
    #[display("decoding metrics from {url}: {source}")]
    Decode { url: Url, source: std::io::Error },
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Transport { source, .. } => Some(source),
            FetchError::Status { .. } => None,
            FetchError::Decode { source, .. } => Some(source),
        }
    }
}

pub trait MetricsFetcher {
    fn fetch(&self, endpoint: &Url) -> impl Future<Output = Result<MetricSnapshot, FetchError>>;
}

impl<T: MetricsFetcher + ?Sized> MetricsFetcher for &T {
    fn fetch(&self, endpoint: &Url) -> impl Future<Output = Result<MetricSnapshot, FetchError>> {
        (**self).fetch(endpoint)
    }
}

/// Fetches over HTTP GET. Idle connections are not pooled so every poll
/// opens a fresh connection to the collector.
#[derive(Debug, Clone)]
pub struct HttpMetricsFetcher {
    client: reqwest::Client,
}

impl HttpMetricsFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .user_agent(concat!("otelcol-e2e/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl MetricsFetcher for HttpMetricsFetcher {
    async fn fetch(&self, endpoint: &Url) -> Result<MetricSnapshot, FetchError> {
        let transport = |source| FetchError::Transport {
            url: endpoint.clone(),
            source,
        };

        let response = self
            .client
            .get(endpoint.clone())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: endpoint.clone(),
                status,
            });
        }

        let body = response.text().await.map_err(transport)?;
        debug!(%endpoint, bytes = body.len(), "scraped metrics");

        decode_snapshot(&body).map_err(|source| FetchError::Decode {
            url: endpoint.clone(),
            source,
        })
    }
}

/// Decode a text exposition payload.
///
/// Every line that is neither blank nor a comment must be a well formed
/// sample, otherwise the whole payload is rejected. Samples are grouped by
/// metric name, keeping their order inside each family. Histogram and
/// summary samples are not counters and are skipped.
pub fn decode_snapshot(payload: &str) -> std::io::Result<MetricSnapshot> {
    // HELP text only, its sample parsing is lenient.
    let scrape = Scrape::parse(
        payload
            .lines()
            .filter(|line| line.trim_start().starts_with("# HELP"))
            .map(|line| Ok(line.to_owned())),
    )?;
    let mut skipped_families = BTreeSet::new();

    let mut families: BTreeMap<String, MetricFamily> = BTreeMap::new();
    for (index, line) in payload.lines().enumerate() {
        let line = line.trim();
        if let Some(declaration) = line.strip_prefix("# TYPE ") {
            let mut parts = declaration.split_whitespace();
            if let (Some(name), Some("histogram" | "summary")) = (parts.next(), parts.next()) {
                skipped_families.insert(name.to_string());
            }
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let sample = parse_sample_line(line).map_err(|reason| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("line {}: {reason}: '{line}'", index + 1),
            )
        })?;
        if belongs_to(&skipped_families, &sample.name) {
            continue;
        }
        let family = families
            .entry(sample.name.clone())
            .or_insert_with(|| MetricFamily {
                help: scrape.docs.get(&sample.name).cloned(),
                metrics: Vec::new(),
            });
        family
            .metrics
            .push(MetricInstance::new(sample.labels, sample.value));
    }

    Ok(MetricSnapshot::new(families))
}

/// `name` is one of the skipped families or one of their `_bucket`, `_sum`,
/// `_count` series.
fn belongs_to(skipped: &BTreeSet<String>, name: &str) -> bool {
    skipped.contains(name)
        || ["_bucket", "_sum", "_count"]
            .iter()
            .filter_map(|suffix| name.strip_suffix(suffix))
            .any(|base| skipped.contains(base))
}

#[derive(Debug, PartialEq)]
struct RawSample {
    name: String,
    labels: Vec<(String, String)>,
    value: f64,
}

/// `name{label="value",...} value [timestamp]`
fn parse_sample_line(line: &str) -> Result<RawSample, String> {
    let mut chars = line.char_indices().peekable();

    let name = take_identifier(line, &mut chars, true);
    if name.is_empty() {
        return Err("expected a metric name".to_string());
    }

    let mut labels = Vec::new();
    if let Some((_, '{')) = chars.peek() {
        chars.next();
        loop {
            skip_spaces(&mut chars);
            if let Some((_, '}')) = chars.peek() {
                chars.next();
                break;
            }
            let key = take_identifier(line, &mut chars, false);
            if key.is_empty() {
                return Err("expected a label name".to_string());
            }
            skip_spaces(&mut chars);
            if chars.next().map(|(_, c)| c) != Some('=') {
                return Err(format!("expected '=' after label {key}"));
            }
            skip_spaces(&mut chars);
            if chars.next().map(|(_, c)| c) != Some('"') {
                return Err(format!("expected a quoted value for label {key}"));
            }
            let value = take_label_value(&mut chars)
                .ok_or_else(|| format!("unterminated value for label {key}"))?;
            labels.push((key.to_string(), value));
            skip_spaces(&mut chars);
            match chars.next().map(|(_, c)| c) {
                Some(',') => continue,
                Some('}') => break,
                _ => return Err("expected ',' or '}' after a label".to_string()),
            }
        }
    }

    let rest = match chars.peek() {
        Some(&(at, c)) if c == ' ' || c == '\t' => &line[at..],
        Some(_) => return Err("unexpected character after the metric name".to_string()),
        None => return Err("missing sample value".to_string()),
    };
    let mut fields = rest.split_whitespace();
    let value = fields
        .next()
        .ok_or_else(|| "missing sample value".to_string())?;
    let value = value
        .parse::<f64>()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if let Some(timestamp) = fields.next() {
        timestamp
            .parse::<i64>()
            .map_err(|_| format!("'{timestamp}' is not a timestamp"))?;
    }
    if fields.next().is_some() {
        return Err("trailing data after the sample".to_string());
    }

    Ok(RawSample {
        name: name.to_string(),
        labels,
        value,
    })
}

type Chars<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

fn take_identifier<'a>(line: &'a str, chars: &mut Chars<'a>, allow_colon: bool) -> &'a str {
    let Some(&(start, _)) = chars.peek() else {
        return "";
    };
    let mut end = start;
    while let Some(&(at, c)) = chars.peek() {
        let valid = c == '_'
            || c.is_ascii_alphabetic()
            || (allow_colon && c == ':')
            || (at > start && c.is_ascii_digit());
        if !valid {
            break;
        }
        end = at + c.len_utf8();
        chars.next();
    }
    &line[start..end]
}

/// Reads up to the closing quote, resolving `\\`, `\"` and `\n`.
fn take_label_value(chars: &mut Chars<'_>) -> Option<String> {
    let mut value = String::new();
    loop {
        match chars.next()?.1 {
            '"' => return Some(value),
            '\\' => match chars.next()?.1 {
                'n' => value.push('\n'),
                other => value.push(other),
            },
            c => value.push(c),
        }
    }
}

fn skip_spaces(chars: &mut Chars<'_>) {
    while let Some((_, ' ' | '\t')) = chars.peek() {
        chars.next();
    }
}
