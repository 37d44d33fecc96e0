//! Ordered phases with per-phase failure policy
//!
//! The sequencer runs phases strictly in list order. A phase may be skipped
//! only by its own precondition. When a phase fails, its [`FailurePolicy`]
//! decides whether the run aborts or carries on with a warning.

use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::group::ConcurrentTaskGroup;
use crate::health::HealthPredicate;
use crate::observer::ClusterObserver;
use crate::task::{ExistsCheck, IdempotentTask, TaskOutcome};
use crate::tool::ToolInvoker;
use crate::{Error, Result};

/// What a phase failure means for the rest of the run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the run; exit non-zero
    Fatal,
    /// Log a warning and run the next phase
    WarnAndContinue,
}

/// One step of a phase
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// A single create-if-absent task
    Task(IdempotentTask),
    /// Independent tasks applied in parallel
    Group(ConcurrentTaskGroup),
    /// A bounded wait on cluster state
    Wait {
        /// Condition to wait for
        predicate: HealthPredicate,
        /// `Fatal` fails the phase on timeout; `WarnAndContinue` logs and
        /// moves on to the next step
        on_timeout: FailurePolicy,
    },
}

impl Step {
    fn label(&self) -> String {
        match self {
            Self::Task(task) => format!("task {}", task.name),
            Self::Group(group) => format!("group {}", group.name),
            Self::Wait { predicate, .. } => format!("wait {}", predicate.selector),
        }
    }
}

/// A named stage of the bootstrap
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phase {
    /// Phase name, e.g. `network-fabric`
    pub name: String,
    /// Human readable summary for logs and dry runs
    pub description: String,
    /// When satisfied, the whole phase is skipped
    pub precondition: Option<ExistsCheck>,
    /// Steps in execution order
    pub steps: Vec<Step>,
    /// Severity of a failure
    pub on_failure: FailurePolicy,
}

/// Mutations performed by a phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseTally {
    /// Tasks whose actions ran
    pub applied: usize,
    /// Tasks whose target already existed
    pub already_satisfied: usize,
    /// Wait points that were satisfied
    pub waits: usize,
    /// Wait points that timed out without failing the phase
    pub soft_timeouts: usize,
}

impl PhaseTally {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Applied => self.applied += 1,
            TaskOutcome::AlreadySatisfied => self.already_satisfied += 1,
        }
    }
}

impl Phase {
    /// A fatal phase with no steps
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            precondition: None,
            steps: Vec::new(),
            on_failure: FailurePolicy::Fatal,
        }
    }

    /// Failures only warn
    pub fn warn_on_failure(mut self) -> Self {
        self.on_failure = FailurePolicy::WarnAndContinue;
        self
    }

    /// Skip the phase when `check` is satisfied
    pub fn skip_if(mut self, check: ExistsCheck) -> Self {
        self.precondition = Some(check);
        self
    }

    /// Append a task step
    pub fn task(mut self, task: IdempotentTask) -> Self {
        self.steps.push(Step::Task(task));
        self
    }

    /// Append a concurrent group step
    pub fn group(mut self, group: ConcurrentTaskGroup) -> Self {
        self.steps.push(Step::Group(group));
        self
    }

    /// Append a wait step whose timeout is only logged
    pub fn wait(mut self, predicate: HealthPredicate) -> Self {
        self.steps.push(Step::Wait {
            predicate,
            on_timeout: FailurePolicy::WarnAndContinue,
        });
        self
    }

    /// Append a wait step whose timeout fails the phase
    pub fn require(mut self, predicate: HealthPredicate) -> Self {
        self.steps.push(Step::Wait {
            predicate,
            on_timeout: FailurePolicy::Fatal,
        });
        self
    }

    /// Human readable step labels
    pub fn step_labels(&self) -> Vec<String> {
        self.steps.iter().map(Step::label).collect()
    }

    /// Run every step in order, stopping at the first failure
    pub async fn run<I, O>(&self, invoker: &I, observer: &O) -> Result<PhaseTally>
    where
        I: ToolInvoker + ?Sized,
        O: ClusterObserver + ?Sized,
    {
        let mut tally = PhaseTally::default();
        for step in &self.steps {
            match step {
                Step::Task(task) => tally.record(task.apply(invoker).await?),
                Step::Group(group) => {
                    for (_, outcome) in group.run_all(invoker).await.into_result()? {
                        tally.record(outcome);
                    }
                }
                Step::Wait {
                    predicate,
                    on_timeout,
                } => {
                    info!(phase = %self.name, selector = %predicate.selector, "waiting");
                    match predicate.require(observer).await {
                        Ok(iterations) => {
                            info!(phase = %self.name, selector = %predicate.selector, iterations, "ready");
                            tally.waits += 1;
                        }
                        Err(e) if *on_timeout == FailurePolicy::WarnAndContinue => {
                            warn!(phase = %self.name, error = %e, "wait timed out, continuing");
                            tally.soft_timeouts += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(tally)
    }
}

/// How a phase ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PhaseStatus {
    /// All steps succeeded
    Succeeded(PhaseTally),
    /// The precondition was already satisfied
    Skipped,
    /// Failed under `WarnAndContinue`
    Warned(String),
    /// Failed under `Fatal`
    Failed(String),
}

impl PhaseStatus {
    /// Short label for summaries
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded(tally) if tally.soft_timeouts > 0 => "timed out",
            Self::Succeeded(_) => "ok",
            Self::Skipped => "skipped",
            Self::Warned(_) => "warning",
            Self::Failed(_) => "failed",
        }
    }
}

/// Record of one executed phase
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseReport {
    /// Phase name
    pub name: String,
    /// How it ended
    pub status: PhaseStatus,
    /// Wall-clock duration
    pub elapsed: Duration,
}

/// Final state of a sequencer run
#[derive(Debug)]
pub enum SequencerOutcome {
    /// Every phase ran (some may have warned)
    Completed {
        /// One report per phase
        reports: Vec<PhaseReport>,
    },
    /// A fatal phase failed; later phases did not run
    Aborted {
        /// Name of the failing phase
        phase: String,
        /// Why it failed
        error: Error,
        /// Reports of the phases that ran, including the failing one
        reports: Vec<PhaseReport>,
    },
}

impl SequencerOutcome {
    /// Reports of all executed phases
    pub fn reports(&self) -> &[PhaseReport] {
        match self {
            Self::Completed { reports } | Self::Aborted { reports, .. } => reports,
        }
    }

    /// Whether the run aborted
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Runs phases in order
#[derive(Clone, Debug, Default)]
pub struct PhaseSequencer {
    phases: Vec<Phase>,
}

impl PhaseSequencer {
    /// Sequencer over `phases`, in the given order
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { phases }
    }

    /// The phases in execution order
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Run all phases, halting at the first fatal failure
    pub async fn run<I, O>(&self, invoker: &I, observer: &O) -> SequencerOutcome
    where
        I: ToolInvoker + ?Sized,
        O: ClusterObserver + ?Sized,
    {
        let total = self.phases.len();
        let mut reports = Vec::with_capacity(total);

        for (index, phase) in self.phases.iter().enumerate() {
            info!("[Phase {}/{}] {}...", index + 1, total, phase.description);
            let start = Instant::now();

            let result = match &phase.precondition {
                Some(check) => match check.is_satisfied(invoker).await {
                    Ok(true) => Ok(None),
                    Ok(false) => phase.run(invoker, observer).await.map(Some),
                    Err(e) => Err(e),
                },
                None => phase.run(invoker, observer).await.map(Some),
            };
            let elapsed = start.elapsed();

            match result {
                Ok(Some(tally)) => {
                    info!(
                        phase = %phase.name,
                        applied = tally.applied,
                        already_present = tally.already_satisfied,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "phase complete"
                    );
                    reports.push(PhaseReport {
                        name: phase.name.clone(),
                        status: PhaseStatus::Succeeded(tally),
                        elapsed,
                    });
                }
                Ok(None) => {
                    info!(phase = %phase.name, "precondition satisfied, skipping phase");
                    reports.push(PhaseReport {
                        name: phase.name.clone(),
                        status: PhaseStatus::Skipped,
                        elapsed,
                    });
                }
                Err(e) => match phase.on_failure {
                    FailurePolicy::WarnAndContinue => {
                        warn!(phase = %phase.name, error = %e, "phase failed, continuing");
                        for line in e.diagnostics() {
                            warn!(phase = %phase.name, "{}", line);
                        }
                        reports.push(PhaseReport {
                            name: phase.name.clone(),
                            status: PhaseStatus::Warned(e.to_string()),
                            elapsed,
                        });
                    }
                    FailurePolicy::Fatal => {
                        error!(phase = %phase.name, error = %e, "phase failed, aborting");
                        reports.push(PhaseReport {
                            name: phase.name.clone(),
                            status: PhaseStatus::Failed(e.to_string()),
                            elapsed,
                        });
                        return SequencerOutcome::Aborted {
                            phase: phase.name.clone(),
                            error: e,
                            reports,
                        };
                    }
                },
            }
        }

        SequencerOutcome::Completed { reports }
    }
}
