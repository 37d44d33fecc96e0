//! Fan-out/fan-in over independent tasks
//!
//! All members are launched together and joined regardless of individual
//! failures, so one broken member never hides the outcome of the others.

use futures::future::join_all;
use tracing::{error, info};

use crate::observer::ResourceSelector;
use crate::task::{IdempotentTask, TaskOutcome};
use crate::tool::ToolInvoker;
use crate::{Error, Result};

/// A bounded set of independent idempotent tasks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConcurrentTaskGroup {
    /// Group name
    pub name: String,
    /// Members; order only affects reporting
    pub tasks: Vec<IdempotentTask>,
}

/// Outcome of one group member
#[derive(Debug)]
pub struct MemberResult {
    /// Member task name
    pub name: String,
    /// Member target
    pub selector: ResourceSelector,
    /// What happened
    pub outcome: Result<TaskOutcome>,
}

impl MemberResult {
    /// Captured tool output for a failed member, empty otherwise
    pub fn diagnostics(&self) -> Vec<String> {
        match &self.outcome {
            Ok(_) => Vec::new(),
            Err(e) => e.diagnostics(),
        }
    }
}

/// Every member's outcome, in member order
#[derive(Debug)]
pub struct TaskGroupResult {
    /// Group name
    pub group: String,
    /// One entry per member
    pub members: Vec<MemberResult>,
}

impl TaskGroupResult {
    /// Whether at least one member failed
    pub fn is_failure(&self) -> bool {
        self.members.iter().any(|m| m.outcome.is_err())
    }

    /// Failed members
    pub fn failed(&self) -> impl Iterator<Item = &MemberResult> {
        self.members.iter().filter(|m| m.outcome.is_err())
    }

    /// `Ok` with every member outcome, or `Error::Aggregate` naming each failed
    /// member with its diagnostics
    pub fn into_result(self) -> Result<Vec<(String, TaskOutcome)>> {
        if !self.is_failure() {
            return Ok(self
                .members
                .into_iter()
                .filter_map(|m| m.outcome.ok().map(|o| (m.name, o)))
                .collect());
        }

        let total = self.members.len();
        let mut failures = Vec::new();
        let mut diagnostics = Vec::new();
        for member in &self.members {
            if let Err(e) = &member.outcome {
                failures.push((member.name.clone(), e.to_string()));
                diagnostics.extend(e.diagnostics());
            }
        }

        Err(Error::Aggregate {
            group: self.group,
            total,
            failures,
            diagnostics,
        })
    }
}

impl ConcurrentTaskGroup {
    /// Create a group
    pub fn new(name: impl Into<String>, tasks: Vec<IdempotentTask>) -> Self {
        Self {
            name: name.into(),
            tasks,
        }
    }

    /// Apply every member concurrently and wait for all of them
    pub async fn run_all<I: ToolInvoker + ?Sized>(&self, invoker: &I) -> TaskGroupResult {
        info!(group = %self.name, members = self.tasks.len(), "applying group in parallel");

        let futures: Vec<_> = self
            .tasks
            .iter()
            .map(|task| async move {
                MemberResult {
                    name: task.name.clone(),
                    selector: task.selector.clone(),
                    outcome: task.apply(invoker).await,
                }
            })
            .collect();

        let members = join_all(futures).await;

        for member in &members {
            if let Err(e) = &member.outcome {
                error!(
                    group = %self.name,
                    task = %member.name,
                    selector = %member.selector,
                    error = %e,
                    "group member failed"
                );
            }
        }

        TaskGroupResult {
            group: self.name.clone(),
            members,
        }
    }
}
