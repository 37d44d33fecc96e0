//! End-to-end bootstrap run
//!
//! Ties the pieces together: prerequisite check, optional teardown, the phase
//! sequencer, convergence monitoring and the workload verification phases.
//! Only a missing prerequisite or a failed teardown is returned as an error;
//! everything after that is recorded in the [`RunSummary`].

use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::bootstrap::{self, kind};
use crate::convergence::{ApplicationSource, ConvergenceMonitor, ConvergenceReport};
use crate::observer::ClusterObserver;
use crate::phase::{Phase, PhaseReport, PhaseSequencer, SequencerOutcome};
use crate::report::{convergence_table, format_elapsed, phase_table};
use crate::session::BootstrapSession;
use crate::tool::{check_prerequisites, ToolInvoker, PREREQUISITES};
use crate::Result;

/// The fatal phase failure that stopped a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbortedPhase {
    /// Phase name
    pub phase: String,
    /// Error message
    pub error: String,
    /// Captured tool output of every failed member
    pub diagnostics: Vec<String>,
}

/// What happened during one run
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    /// Bootstrap phase reports, in execution order
    pub phases: Vec<PhaseReport>,
    /// Set when a fatal phase failed
    pub aborted: Option<AbortedPhase>,
    /// Application convergence; `None` if monitoring did not run or discovery failed
    pub convergence: Option<ConvergenceReport>,
    /// Workload verification reports
    pub verification: Vec<PhaseReport>,
    /// Whether unconverged applications fail the run
    pub require_convergence: bool,
    /// Nothing was executed
    pub dry_run: bool,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl RunSummary {
    /// Whether every monitored application converged
    pub fn converged(&self) -> bool {
        self.convergence
            .as_ref()
            .is_some_and(ConvergenceReport::all_converged)
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> u8 {
        if self.dry_run {
            return 0;
        }
        if self.aborted.is_some() {
            return 1;
        }
        if self.require_convergence && !self.converged() {
            return 1;
        }
        0
    }

    /// Human readable summary
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("\n=== Phases ===\n");
        out.push_str(&phase_table(&self.phases));

        if let Some(aborted) = &self.aborted {
            out.push_str(&format!(
                "\nPhase '{}' failed: {}\n",
                aborted.phase, aborted.error
            ));
            for line in &aborted.diagnostics {
                out.push_str(&format!("  {}\n", line));
            }
        }

        if let Some(convergence) = &self.convergence {
            out.push_str("\n=== Applications ===\n");
            out.push_str(&convergence_table(convergence));
        }

        if !self.verification.is_empty() {
            out.push_str("\n=== Verification ===\n");
            out.push_str(&phase_table(&self.verification));
        }

        let verdict = match (self.exit_code(), &self.aborted) {
            (_, Some(_)) => "Bootstrap failed",
            (0, None) if self.converged() => "Bootstrap complete",
            (0, None) => "Bootstrap complete, some applications are still converging",
            (_, None) => "Bootstrap complete, but applications did not converge",
        };
        out.push_str(&format!(
            "\n=== {} ===\nDuration: {}\n",
            verdict,
            format_elapsed(self.elapsed)
        ));
        out
    }
}

/// Render the phases a run would execute
pub fn render_plan(session: &BootstrapSession, phases: &[Phase], verification: &[Phase]) -> String {
    let mut out = String::from("=== Plan ===\n");
    if session.force_recreate() {
        out.push_str(&format!(
            "[Teardown] delete kind cluster {} if it exists\n",
            session.cluster_name()
        ));
    }

    let total = phases.len();
    for (index, phase) in phases.iter().enumerate() {
        out.push_str(&format!(
            "[Phase {}/{}] {} ({:?})\n",
            index + 1,
            total,
            phase.name,
            phase.on_failure
        ));
        for label in phase.step_labels() {
            out.push_str(&format!("    {}\n", label));
        }
    }

    out.push_str("[Convergence] wait for discovered Argo CD applications\n");
    for phase in verification {
        out.push_str(&format!("[Verify] {} ({:?})\n", phase.name, phase.on_failure));
        for label in phase.step_labels() {
            out.push_str(&format!("    {}\n", label));
        }
    }
    out
}

/// Runs a full bootstrap against the given collaborators
pub struct Orchestrator<'a> {
    session: &'a BootstrapSession,
    invoker: &'a dyn ToolInvoker,
    observer: &'a dyn ClusterObserver,
    applications: &'a dyn ApplicationSource,
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator for `session`
    pub fn new(
        session: &'a BootstrapSession,
        invoker: &'a dyn ToolInvoker,
        observer: &'a dyn ClusterObserver,
        applications: &'a dyn ApplicationSource,
    ) -> Self {
        Self {
            session,
            invoker,
            observer,
            applications,
        }
    }

    /// Run the bootstrap.
    ///
    /// Returns `Err` only when no phase could start: a prerequisite is
    /// missing, the plan cannot be built, or the forced teardown failed.
    pub async fn run(&self) -> Result<RunSummary> {
        let start = Instant::now();
        let session = self.session;

        let phases = bootstrap::plan(session)?;
        let verification = bootstrap::verification_plan(session);

        let mut summary = RunSummary {
            require_convergence: session.require_convergence(),
            ..Default::default()
        };

        if session.dry_run() {
            print!("{}", render_plan(session, &phases, &verification));
            summary.dry_run = true;
            summary.elapsed = start.elapsed();
            return Ok(summary);
        }

        check_prerequisites(self.invoker, PREREQUISITES).await?;

        if session.force_recreate() {
            kind::delete_cluster(self.invoker, session.cluster_name()).await?;
        }

        match PhaseSequencer::new(phases)
            .run(self.invoker, self.observer)
            .await
        {
            SequencerOutcome::Completed { reports } => summary.phases = reports,
            SequencerOutcome::Aborted {
                phase,
                error,
                reports,
            } => {
                let diagnostics = error.diagnostics();
                error!(phase = %phase, error = %error, "bootstrap aborted");
                for line in &diagnostics {
                    error!(phase = %phase, "{}", line);
                }
                summary.phases = reports;
                summary.aborted = Some(AbortedPhase {
                    phase,
                    error: error.to_string(),
                    diagnostics,
                });
                summary.elapsed = start.elapsed();
                return Ok(summary);
            }
        }

        info!("[Convergence] Waiting for GitOps applications to become healthy...");
        let monitor = ConvergenceMonitor::new(
            session.poll_interval(),
            session.app_max_iterations(),
            session.monitoring_duration(),
        );
        match monitor.await_all(self.applications).await {
            Ok(report) => {
                let pending = report.pending().len();
                if pending > 0 {
                    warn!(
                        pending,
                        total = report.apps.len(),
                        "applications still converging when monitoring ended"
                    );
                }
                summary.convergence = Some(report);
            }
            Err(e) => warn!(error = %e, "application discovery failed, skipping convergence"),
        }

        info!("[Verify] Checking the sample workload...");
        let outcome = PhaseSequencer::new(verification)
            .run(self.invoker, self.observer)
            .await;
        summary.verification = outcome.reports().to_vec();

        summary.elapsed = start.elapsed();
        Ok(summary)
    }
}
