//! Waiting for GitOps-managed applications to become healthy
//!
//! The set of applications is not known ahead of time: the root applications
//! fan out into whatever the GitOps repository declares. The monitor lists
//! Argo CD `Application` resources when it starts and polls each one in turn
//! until it reports `Healthy`, its own iteration budget is spent, or the
//! overall monitoring budget runs out.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::ResourceExt;
#[cfg(test)]
use mockall::automock;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::health::{poll, PollBudget, PollOutcome};
use crate::Result;

/// Argo CD sync status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    /// Live state matches the repository
    Synced,
    /// Live state differs from the repository
    OutOfSync,
    /// Automated sync is suspended
    Suspended,
    /// Not reported or unrecognised
    Unknown,
}

impl SyncStatus {
    /// Parse the value of `status.sync.status`
    pub fn parse(value: &str) -> Self {
        match value {
            "Synced" => Self::Synced,
            "OutOfSync" => Self::OutOfSync,
            "Suspended" => Self::Suspended,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Synced => "Synced",
            Self::OutOfSync => "OutOfSync",
            Self::Suspended => "Suspended",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Argo CD health status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    /// Every managed resource is healthy
    Healthy,
    /// Resources are still rolling out (also used for suspended resources)
    Progressing,
    /// At least one resource failed
    Degraded,
    /// Unhealthy without a more specific reason
    Unhealthy,
    /// Not reported, missing or unrecognised
    Unknown,
}

impl HealthStatus {
    /// Parse the value of `status.health.status`
    pub fn parse(value: &str) -> Self {
        match value {
            "Healthy" => Self::Healthy,
            "Progressing" | "Suspended" => Self::Progressing,
            "Degraded" => Self::Degraded,
            "Unhealthy" => Self::Unhealthy,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "Healthy",
            Self::Progressing => "Progressing",
            Self::Degraded => "Degraded",
            Self::Unhealthy => "Unhealthy",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Observed state of one managed application
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationRecord {
    /// Application name
    pub name: String,
    /// Namespace the Application resource lives in
    pub namespace: String,
    /// Sync status
    pub sync_status: SyncStatus,
    /// Health status
    pub health_status: HealthStatus,
}

impl ApplicationRecord {
    /// Build a record from an `applications.argoproj.io` object.
    ///
    /// Returns `None` for objects without a name. Missing status fields map
    /// to `Unknown`.
    pub fn from_dynamic(obj: &DynamicObject) -> Option<Self> {
        let name = obj.metadata.name.clone()?;
        let namespace = obj.namespace().unwrap_or_default();
        let status = obj.data.get("status");
        let field = |section: &str| {
            status
                .and_then(|s| s.get(section))
                .and_then(|s| s.get("status"))
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown")
        };

        Some(Self {
            name,
            namespace,
            sync_status: SyncStatus::parse(field("sync")),
            health_status: HealthStatus::parse(field("health")),
        })
    }

    /// Healthy is the terminal condition regardless of sync status
    pub fn is_converged(&self) -> bool {
        self.health_status == HealthStatus::Healthy
    }
}

/// Lists and reads managed applications
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApplicationSource: Send + Sync {
    /// Every application that exists right now
    async fn discover(&self) -> Result<Vec<ApplicationRecord>>;

    /// Current state of one application, `None` if it no longer exists
    async fn fetch(&self, name: &str, namespace: &str) -> Result<Option<ApplicationRecord>>;
}

/// Convergence of a single application
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConvergence {
    /// Application name
    pub name: String,
    /// Application namespace
    pub namespace: String,
    /// Last observed state; `None` if it vanished
    pub record: Option<ApplicationRecord>,
    /// Evaluations spent on this application
    pub iterations: u32,
    /// Whether it reached `Healthy`
    pub converged: bool,
}

/// Outcome of a monitoring run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConvergenceReport {
    /// Per-application results, in discovery order
    pub apps: Vec<AppConvergence>,
    /// Total time spent monitoring
    pub elapsed: Duration,
}

impl ConvergenceReport {
    /// Whether every discovered application is healthy
    pub fn all_converged(&self) -> bool {
        self.apps.iter().all(|a| a.converged)
    }

    /// Applications that did not converge
    pub fn pending(&self) -> Vec<&AppConvergence> {
        self.apps.iter().filter(|a| !a.converged).collect()
    }
}

/// Polls discovered applications until they are healthy
#[derive(Clone, Copy, Debug)]
pub struct ConvergenceMonitor {
    /// Sleep between evaluations of one application
    pub poll_interval: Duration,
    /// Evaluation budget per application
    pub app_max_iterations: u32,
    /// Overall wall-clock budget
    pub budget: Duration,
}

impl ConvergenceMonitor {
    /// Create a monitor
    pub fn new(poll_interval: Duration, app_max_iterations: u32, budget: Duration) -> Self {
        Self {
            poll_interval,
            app_max_iterations,
            budget,
        }
    }

    /// Discover applications and wait for each in turn.
    ///
    /// Each application is evaluated at least once even when the overall
    /// budget is already spent, so a zero budget yields a snapshot without
    /// sleeping. Only discovery failures are errors.
    pub async fn await_all<S: ApplicationSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<ConvergenceReport> {
        let start = Instant::now();
        let deadline = start.checked_add(self.budget);

        let discovered = source.discover().await?;
        info!(
            count = discovered.len(),
            budget_secs = self.budget.as_secs(),
            "monitoring application convergence"
        );
        if discovered.is_empty() {
            warn!("no applications discovered");
        }

        let mut apps = Vec::with_capacity(discovered.len());
        for app in discovered {
            apps.push(self.await_one(source, app, deadline).await);
        }

        Ok(ConvergenceReport {
            apps,
            elapsed: start.elapsed(),
        })
    }

    async fn await_one<S: ApplicationSource + ?Sized>(
        &self,
        source: &S,
        app: ApplicationRecord,
        deadline: Option<Instant>,
    ) -> AppConvergence {
        let description = format!("application/{}/{}", app.namespace, app.name);
        let mut budget = PollBudget::new(self.poll_interval, self.app_max_iterations.max(1));
        if let Some(deadline) = deadline {
            budget = budget.with_deadline(deadline);
        }

        let last = Mutex::new(Some(app.clone()));
        let name = app.name.as_str();
        let namespace = app.namespace.as_str();
        let last_ref = &last;

        let outcome = poll(&description, budget, move |_| async move {
            let observed = match source.fetch(name, namespace).await {
                Ok(observed) => observed,
                Err(e) => {
                    warn!(app = name, error = %e, "failed to read application");
                    return None;
                }
            };
            let converged = observed.as_ref().is_some_and(ApplicationRecord::is_converged);
            *last_ref.lock().await = observed.clone();
            if converged {
                observed
            } else {
                None
            }
        })
        .await;

        let (record, iterations, converged) = match outcome {
            PollOutcome::Ready { value, iterations } => (Some(value), iterations, true),
            PollOutcome::Exhausted { iterations } => (last.into_inner(), iterations, false),
        };

        match &record {
            Some(r) if converged => {
                info!(app = %r.name, sync = %r.sync_status, iterations, "application healthy")
            }
            Some(r) => warn!(
                app = %r.name,
                sync = %r.sync_status,
                health = %r.health_status,
                iterations,
                "application not healthy within budget"
            ),
            None => warn!(app = %app.name, "application disappeared while monitoring"),
        }

        AppConvergence {
            name: app.name,
            namespace: app.namespace,
            record,
            iterations,
            converged,
        }
    }
}
