//! Data model shared by the fetcher, matcher and poller.

use std::collections::BTreeMap;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::fetcher::FetchError;

/// What must be observed on the collector's metrics endpoint.
///
/// A target selects one series inside a metric family by an exact label
/// match and requires its counter to be strictly above `threshold`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Display)]
#[display("{family}{{{label_key}=\"{label_value}\"}} > {threshold}")]
pub struct VerificationTarget {
    pub family: String,
    pub label_key: String,
    pub label_value: String,
    pub threshold: f64,
}

impl VerificationTarget {
    pub fn new(
        family: impl Into<String>,
        label_key: impl Into<String>,
        label_value: impl Into<String>,
        threshold: f64,
    ) -> Self {
        Self {
            family: family.into(),
            label_key: label_key.into(),
            label_value: label_value.into(),
            threshold,
        }
    }
}

/// One sample of a metric family.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MetricInstance {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl MetricInstance {
    pub fn new<K, V>(labels: impl IntoIterator<Item = (K, V)>, value: f64) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            value,
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Samples sharing a metric name, in exposition order.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct MetricFamily {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    pub metrics: Vec<MetricInstance>,
}

/// Decoded content of one scrape. Never mutated once fetched.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct MetricSnapshot {
    families: BTreeMap<String, MetricFamily>,
}

impl MetricSnapshot {
    pub fn new(families: BTreeMap<String, MetricFamily>) -> Self {
        Self { families }
    }

    pub fn family(&self, name: &str) -> Option<&MetricFamily> {
        self.families.get(name)
    }

    pub fn families(&self) -> impl Iterator<Item = (&str, &MetricFamily)> {
        self.families.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Keep only the named family. Used by the `scrape` diagnostic.
    pub fn only(self, name: &str) -> Self {
        Self {
            families: self
                .families
                .into_iter()
                .filter(|(k, _)| k == name)
                .collect(),
        }
    }
}

impl FromIterator<(String, MetricFamily)> for MetricSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, MetricFamily)>>(iter: T) -> Self {
        Self {
            families: iter.into_iter().collect(),
        }
    }
}

/// Why a poll has not succeeded yet.
#[derive(Debug, Clone, PartialEq, Display)]
pub enum Pending {
    #[display("metric family not exposed yet")]
    FamilyAbsent,
    /// The family exists but no series carries the wanted label value.
    /// `seen` lists the values found for the label key.
    #[display("no series with the expected label, seen {seen:?}")]
    SeriesAbsent { seen: Vec<String> },
    #[display("observed value {_0}")]
    AtOrBelowThreshold(f64),
}

/// Result of one fetch + match cycle.
#[derive(Debug, Display)]
pub enum PollOutcome {
    #[display("observed value {_0}")]
    Success(f64),
    #[display("{_0}")]
    NotYetObserved(Pending),
    #[display("{_0}")]
    FetchError(FetchError),
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Success(_))
    }
}
