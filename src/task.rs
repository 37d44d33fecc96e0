//! Create-if-absent units of work
//!
//! An [`IdempotentTask`] checks whether its target already exists with a
//! read-only query and only then runs its mutating invocations. Running a
//! task against a cluster where the target is already present performs no
//! mutation at all, which is what makes a re-run of the whole bootstrap safe.

use tracing::{debug, info};

use crate::observer::ResourceSelector;
use crate::tool::{run_checked, Invocation, ToolInvoker};
use crate::{Error, Result};

/// How a task decides that its target state is already present
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExistsCheck {
    /// Never present; the desired invocations always run
    Never,
    /// Present iff the query exits zero (`helm status`, `kubectl get`)
    Succeeds(Invocation),
    /// Present iff a line of the query's stdout starts with `name` as its
    /// first whitespace-separated field (`kind get clusters`, `helm repo list`).
    /// A non-zero exit counts as "not listed".
    ListsName {
        /// Listing query
        invocation: Invocation,
        /// Name to look for
        name: String,
    },
    /// Present iff the query prints a JSON document whose string at `pointer`
    /// equals `expected` (`helm status -o json` at `/info/status`)
    JsonField {
        /// Query printing JSON
        invocation: Invocation,
        /// RFC 6901 pointer into the document
        pointer: String,
        /// Required value
        expected: String,
    },
}

impl ExistsCheck {
    /// Present iff `name` appears in the listing printed by `invocation`
    pub fn lists_name(invocation: Invocation, name: impl Into<String>) -> Self {
        Self::ListsName {
            invocation,
            name: name.into(),
        }
    }

    /// Present iff the string at `pointer` in the JSON printed by `invocation`
    /// is `expected`
    pub fn json_field(
        invocation: Invocation,
        pointer: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::JsonField {
            invocation,
            pointer: pointer.into(),
            expected: expected.into(),
        }
    }

    /// The query this check runs, if any
    pub fn invocation(&self) -> Option<&Invocation> {
        match self {
            Self::Never => None,
            Self::Succeeds(inv) => Some(inv),
            Self::ListsName { invocation, .. } | Self::JsonField { invocation, .. } => {
                Some(invocation)
            }
        }
    }

    /// Run the check. Errors only if the query could not be run at all.
    pub async fn is_satisfied<I: ToolInvoker + ?Sized>(&self, invoker: &I) -> Result<bool> {
        match self {
            Self::Never => Ok(false),
            Self::Succeeds(inv) => Ok(invoker.invoke(inv).await?.success()),
            Self::ListsName { invocation, name } => {
                let output = invoker.invoke(invocation).await?;
                if !output.success() {
                    return Ok(false);
                }
                Ok(output
                    .stdout
                    .lines()
                    .filter_map(|line| line.split_whitespace().next())
                    .any(|first| first == name))
            }
            Self::JsonField {
                invocation,
                pointer,
                expected,
            } => {
                let output = invoker.invoke(invocation).await?;
                if !output.success() {
                    return Ok(false);
                }
                let document: serde_json::Value = match serde_json::from_str(&output.stdout) {
                    Ok(document) => document,
                    Err(e) => {
                        debug!(command = %invocation, error = %e, "check printed no JSON");
                        return Ok(false);
                    }
                };
                let actual = document.pointer(pointer).and_then(serde_json::Value::as_str);
                if actual != Some(expected.as_str()) {
                    debug!(command = %invocation, pointer = %pointer, actual = ?actual, "not in the expected state");
                    return Ok(false);
                }
                Ok(true)
            }
        }
    }
}

/// Result of applying a task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The desired invocations ran
    Applied,
    /// The target already existed; nothing ran
    AlreadySatisfied,
}

/// A named create-if-absent unit of work
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdempotentTask {
    /// Task name, used in logs and reports
    pub name: String,
    /// Resource the task produces
    pub selector: ResourceSelector,
    /// Read-only check for the target state
    pub exists_check: ExistsCheck,
    /// Mutating invocations run in order when the target is absent
    pub desired: Vec<Invocation>,
}

impl IdempotentTask {
    /// A task with no check and no actions
    pub fn new(name: impl Into<String>, selector: ResourceSelector) -> Self {
        Self {
            name: name.into(),
            selector,
            exists_check: ExistsCheck::Never,
            desired: Vec::new(),
        }
    }

    /// Skip the actions when `check` is satisfied
    pub fn when_absent(mut self, check: ExistsCheck) -> Self {
        self.exists_check = check;
        self
    }

    /// Append an action
    pub fn run(mut self, invocation: Invocation) -> Self {
        self.desired.push(invocation);
        self
    }

    /// Bring the target into existence unless it is already there.
    ///
    /// Any failure is wrapped in `Error::Apply` carrying the task name and
    /// selector; the underlying `CommandFailed` keeps the tool's output.
    pub async fn apply<I: ToolInvoker + ?Sized>(&self, invoker: &I) -> Result<TaskOutcome> {
        let present = self
            .exists_check
            .is_satisfied(invoker)
            .await
            .map_err(|e| Error::apply(&self.name, &self.selector, e))?;

        if present {
            info!(task = %self.name, selector = %self.selector, "already present, skipping");
            return Ok(TaskOutcome::AlreadySatisfied);
        }

        info!(task = %self.name, selector = %self.selector, "applying");
        for invocation in &self.desired {
            debug!(task = %self.name, command = %invocation, "running");
            run_checked(invoker, invocation)
                .await
                .map_err(|e| Error::apply(&self.name, &self.selector, e))?;
        }

        Ok(TaskOutcome::Applied)
    }
}
