//! Repeats fetch + match until the target is observed or the deadline passes.
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! Polling --Success--------------------------> Succeeded
//! Polling --NotYetObserved | FetchError--+---> Polling (after `interval`)
//!                                        +---> TimedOut (elapsed >= deadline)
//! ```
//!
//! Time comes from a [`Clock`] so tests can run the machine without waiting.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use derive_more::Display;
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::{
    fetcher::{FetchError, MetricsFetcher},
    matcher::match_target,
    model::{Pending, PollOutcome, VerificationTarget},
};

pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

/// Wall clock backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            deadline: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Success {
    pub target: VerificationTarget,
    pub value: f64,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Last thing seen before giving up.
#[derive(Debug, Display)]
pub enum LastObservation {
    #[display("{_0}")]
    NotYetObserved(Pending),
    #[display("last fetch failed: {_0}")]
    FetchError(FetchError),
}

/// The target was not observed before the deadline.
#[derive(Debug, Display)]
#[display(
    "{target} not observed within {:.1}s ({attempts} attempts): {last}",
    elapsed.as_secs_f64()
)]
pub struct TimeoutFailure {
    pub target: VerificationTarget,
    pub elapsed: Duration,
    pub attempts: u32,
    pub last: LastObservation,
}

impl std::error::Error for TimeoutFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.last {
            LastObservation::FetchError(e) => Some(e),
            LastObservation::NotYetObserved(_) => None,
        }
    }
}

#[derive(Debug)]
enum PollState {
    Polling { attempts: u32 },
    Succeeded(Success),
    TimedOut(TimeoutFailure),
}

impl PollState {
    fn advance(
        self,
        outcome: PollOutcome,
        target: &VerificationTarget,
        elapsed: Duration,
        deadline: Duration,
    ) -> PollState {
        let attempts = match self {
            PollState::Polling { attempts } => attempts + 1,
            done => return done,
        };

        let last = match outcome {
            PollOutcome::Success(value) => {
                return PollState::Succeeded(Success {
                    target: target.clone(),
                    value,
                    attempts,
                    elapsed,
                })
            }
            PollOutcome::NotYetObserved(pending) => LastObservation::NotYetObserved(pending),
            PollOutcome::FetchError(e) => LastObservation::FetchError(e),
        };

        if elapsed >= deadline {
            PollState::TimedOut(TimeoutFailure {
                target: target.clone(),
                elapsed,
                attempts,
                last,
            })
        } else {
            debug!(check = %target, attempts, "⏰ {}", last);
            PollState::Polling { attempts }
        }
    }
}

pub struct Poller<F, C = TokioClock> {
    fetcher: F,
    clock: C,
    settings: PollSettings,
}

impl<F: MetricsFetcher> Poller<F> {
    pub fn new(fetcher: F, settings: PollSettings) -> Self {
        Self::with_clock(fetcher, TokioClock, settings)
    }
}

impl<F: MetricsFetcher, C: Clock> Poller<F, C> {
    pub fn with_clock(fetcher: F, clock: C, settings: PollSettings) -> Self {
        Self {
            fetcher,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Poll `endpoint` until `target` is observed.
    ///
    /// A fresh snapshot is fetched on every attempt. Fetch errors are
    /// retried like a missing series; the last one is reported if the
    /// deadline passes.
    pub async fn wait_for(
        &self,
        target: &VerificationTarget,
        endpoint: &Url,
    ) -> Result<Success, TimeoutFailure> {
        let PollSettings { interval, deadline } = self.settings;
        let started = self.clock.now();
        let mut state = PollState::Polling { attempts: 0 };

        loop {
            let outcome = match self.fetcher.fetch(endpoint).await {
                Ok(snapshot) => match_target(&snapshot, target),
                Err(e) => PollOutcome::FetchError(e),
            };
            let elapsed = self.clock.now().saturating_duration_since(started);

            state = state.advance(outcome, target, elapsed, deadline);
            match state {
                PollState::Polling { .. } => {
                    self.clock
                        .sleep(interval.min(deadline.saturating_sub(elapsed)))
                        .await
                }
                PollState::Succeeded(success) => {
                    info!(
                        check = %success.target,
                        value = success.value,
                        attempts = success.attempts,
                        "✅ export observed"
                    );
                    return Ok(success);
                }
                PollState::TimedOut(failure) => {
                    warn!("❌ {}", failure);
                    return Err(failure);
                }
            }
        }
    }
}
