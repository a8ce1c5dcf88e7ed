//! Runs every target's wait loop and collects the verdict.

use std::fmt;

use futures::future::join_all;
use reqwest::Url;
use tracing::info;

use crate::{
    fetcher::MetricsFetcher,
    model::VerificationTarget,
    poller::{Clock, Poller, Success, TimeoutFailure},
};

/// Outcome of a verification run, one entry per target in input order.
#[derive(Debug)]
pub struct VerificationReport {
    pub results: Vec<Result<Success, TimeoutFailure>>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }

    pub fn successes(&self) -> impl Iterator<Item = &Success> {
        self.results.iter().filter_map(|r| r.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TimeoutFailure> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }

    /// Turn the report into the run's pass/fail result.
    pub fn into_result(self) -> Result<Vec<Success>, VerificationFailed> {
        let (ok, failed): (Vec<_>, Vec<_>) = self.results.into_iter().partition(Result::is_ok);
        if failed.is_empty() {
            Ok(ok.into_iter().filter_map(Result::ok).collect())
        } else {
            Err(VerificationFailed {
                failures: failed.into_iter().filter_map(Result::err).collect(),
            })
        }
    }
}

/// At least one target timed out.
#[derive(Debug)]
pub struct VerificationFailed {
    pub failures: Vec<TimeoutFailure>,
}

impl fmt::Display for VerificationFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} target(s) failed verification", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  - {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for VerificationFailed {}

/// Wait on all targets concurrently. A timeout on one target does not stop
/// the others.
pub async fn verify_targets<F, C>(
    poller: &Poller<F, C>,
    endpoint: &Url,
    targets: &[VerificationTarget],
) -> VerificationReport
where
    F: MetricsFetcher,
    C: Clock,
{
    info!(
        %endpoint,
        targets = targets.len(),
        "Waiting for collector metrics indicating successful export"
    );
    let results = join_all(targets.iter().map(|t| poller.wait_for(t, endpoint))).await;
    VerificationReport { results }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{model::Pending, poller::LastObservation};

    fn target(label_value: &str) -> VerificationTarget {
        VerificationTarget::new("otelcol_exporter_sent_spans", "exporter", label_value, 100.0)
    }

    #[test]
    fn failures_are_listed_in_the_verdict() {
        let report = VerificationReport {
            results: vec![
                Ok(Success {
                    target: target("googlecloud"),
                    value: 150.0,
                    attempts: 1,
                    elapsed: Duration::ZERO,
                }),
                Err(TimeoutFailure {
                    target: target("otlphttp"),
                    elapsed: Duration::from_secs(120),
                    attempts: 121,
                    last: LastObservation::NotYetObserved(Pending::FamilyAbsent),
                }),
            ],
        };
        assert!(!report.passed());
        assert_eq!(report.successes().count(), 1);

        let err = report.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("1 target(s) failed verification"), "{msg}");
        assert!(msg.contains(r#"exporter="otlphttp""#), "{msg}");
        assert!(!msg.contains("googlecloud"), "{msg}");
    }

    #[test]
    fn all_successes_pass() {
        let report = VerificationReport {
            results: vec![Ok(Success {
                target: target("googlecloud"),
                value: 101.0,
                attempts: 3,
                elapsed: Duration::from_secs(2),
            })],
        };
        assert!(report.passed());
        assert_eq!(report.into_result().unwrap()[0].value, 101.0);
    }
}
