//! Bounded polling of asynchronously converging cluster state
//!
//! There is no push signal for "Cilium is ready" or "CoreDNS is serving", so
//! every wait point polls at a fixed interval with a finite iteration budget.
//! The poller reports `Satisfied` or `TimedOut` and never decides what a
//! timeout means; that is the caller's policy.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::observer::{ClusterObserver, Readiness, ResourceSelector};
use crate::{Error, Result};

/// Progress is logged on every Nth evaluation rather than every one
pub const PROGRESS_LOG_EVERY: u32 = 6;

/// Limits for a polling loop
#[derive(Clone, Copy, Debug)]
pub struct PollBudget {
    /// Sleep between evaluations
    pub interval: Duration,
    /// Maximum number of evaluations
    pub max_iterations: u32,
    /// Optional wall-clock deadline; once passed no further sleep happens
    pub deadline: Option<Instant>,
}

impl PollBudget {
    /// Budget bounded only by iteration count
    pub fn new(interval: Duration, max_iterations: u32) -> Self {
        Self {
            interval,
            max_iterations,
            deadline: None,
        }
    }

    /// Additionally stop once `deadline` has passed
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Result of a polling loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The check produced a value
    Ready {
        /// Value returned by the check
        value: T,
        /// Evaluations performed, including the successful one
        iterations: u32,
    },
    /// The budget ran out first
    Exhausted {
        /// Evaluations performed
        iterations: u32,
    },
}

/// Evaluate `check` until it yields `Some`, the iteration budget is spent, or
/// the deadline passes.
///
/// `check` receives the 1-based iteration number. No sleep follows the final
/// evaluation, so a never-satisfied check costs `interval * (max_iterations - 1)`.
pub async fn poll<T, F, Fut>(description: &str, budget: PollBudget, mut check: F) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();
    let mut iteration = 0u32;

    while iteration < budget.max_iterations {
        iteration += 1;

        if let Some(value) = check(iteration).await {
            debug!(description, iterations = iteration, "condition met");
            return PollOutcome::Ready {
                value,
                iterations: iteration,
            };
        }

        if iteration >= budget.max_iterations {
            break;
        }
        if budget.deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        if iteration % PROGRESS_LOG_EVERY == 0 {
            info!(
                description,
                iteration,
                max_iterations = budget.max_iterations,
                elapsed_secs = start.elapsed().as_secs(),
                "still waiting"
            );
        }

        tokio::time::sleep(budget.interval).await;
    }

    PollOutcome::Exhausted {
        iterations: iteration,
    }
}

/// What a resource must look like to count as healthy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuccessCondition {
    /// The resource exists
    Exists,
    /// The endpoint answers requests (API server)
    Reachable,
    /// At least `min` replicas desired and every desired replica ready
    AllReady {
        /// Minimum number of desired replicas
        min: u32,
    },
}

impl SuccessCondition {
    /// Evaluate the condition against an observation
    pub fn is_met(&self, readiness: &Readiness) -> bool {
        match self {
            Self::Exists | Self::Reachable => readiness.exists,
            Self::AllReady { min } => {
                readiness.exists
                    && readiness.desired >= (*min).max(1)
                    && readiness.ready >= readiness.desired
            }
        }
    }
}

/// Outcome of a single wait point
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The condition held
    Satisfied {
        /// Evaluations performed
        iterations: u32,
    },
    /// The iteration budget ran out
    TimedOut {
        /// Evaluations performed
        iterations: u32,
    },
}

/// A wait point: selector, condition and polling budget
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthPredicate {
    /// Resource being observed
    pub selector: ResourceSelector,
    /// Condition that ends the wait
    pub condition: SuccessCondition,
    /// Sleep between evaluations
    pub poll_interval: Duration,
    /// Maximum number of evaluations
    pub max_iterations: u32,
}

impl HealthPredicate {
    /// Create a predicate
    pub fn new(
        selector: ResourceSelector,
        condition: SuccessCondition,
        poll_interval: Duration,
        max_iterations: u32,
    ) -> Self {
        Self {
            selector,
            condition,
            poll_interval,
            max_iterations,
        }
    }

    /// Poll until the condition holds or the budget is exhausted
    pub async fn wait_until<O: ClusterObserver + ?Sized>(&self, observer: &O) -> WaitOutcome {
        let description = self.selector.to_string();
        let budget = PollBudget::new(self.poll_interval, self.max_iterations);
        let selector = &self.selector;
        let condition = self.condition;

        let outcome = poll(&description, budget, move |_| async move {
            match observer.readiness(selector).await {
                Ok(readiness) if condition.is_met(&readiness) => Some(()),
                Ok(readiness) => {
                    debug!(
                        selector = %selector,
                        exists = readiness.exists,
                        desired = readiness.desired,
                        ready = readiness.ready,
                        "not ready yet"
                    );
                    None
                }
                Err(e) => {
                    debug!(selector = %selector, error = %e, "observation failed, retrying");
                    None
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready { iterations, .. } => WaitOutcome::Satisfied { iterations },
            PollOutcome::Exhausted { iterations } => WaitOutcome::TimedOut { iterations },
        }
    }

    /// Wait and turn a timeout into `Error::Timeout`
    pub async fn require<O: ClusterObserver + ?Sized>(&self, observer: &O) -> Result<u32> {
        match self.wait_until(observer).await {
            WaitOutcome::Satisfied { iterations } => Ok(iterations),
            WaitOutcome::TimedOut { iterations } => {
                Err(Error::timeout(self.selector.to_string(), iterations))
            }
        }
    }
}
