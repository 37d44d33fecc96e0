//! Error types for the bootstrap orchestrator
//!
//! Every variant that originates from an external tool keeps the captured
//! output of that tool so a fatal abort can show the operator what went wrong.

use thiserror::Error;

/// Main error type for bootstrap operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A required external tool is not installed
    #[error("prerequisite not found: {tool} - {hint}")]
    PrerequisiteNotFound {
        /// The tool that was not found
        tool: String,
        /// Hint for how to install it
        hint: String,
    },

    /// An external command exited unsuccessfully or could not be spawned
    #[error("command failed: {command} (exit code {})", exit_code_label(.code))]
    CommandFailed {
        /// Redacted command line
        command: String,
        /// Process exit code, if the process ran to completion
        code: Option<i32>,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },

    /// An idempotent task's action failed
    #[error("task {task} on {selector} failed: {source}")]
    Apply {
        /// Task name
        task: String,
        /// Target resource
        selector: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// A polling construct exhausted its iteration budget
    #[error("timed out waiting for {description} after {iterations} checks")]
    Timeout {
        /// What was being waited on
        description: String,
        /// Number of evaluations performed
        iterations: u32,
    },

    /// One or more members of a concurrent task group failed
    #[error("{} of {total} tasks failed in group {group}", .failures.len())]
    Aggregate {
        /// Group name
        group: String,
        /// Total number of members launched
        total: usize,
        /// (member name, rendered error) for every failed member
        failures: Vec<(String, String)>,
        /// Captured diagnostics of every failed member
        diagnostics: Vec<String>,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error while talking to a child process
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("validation error: {0}")]
    Validation(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a timeout error for the given wait
    pub fn timeout(description: impl Into<String>, iterations: u32) -> Self {
        Self::Timeout {
            description: description.into(),
            iterations,
        }
    }

    /// Wrap an error with the task and resource it was raised for
    pub fn apply(task: impl Into<String>, selector: impl ToString, source: Error) -> Self {
        Self::Apply {
            task: task.into(),
            selector: selector.to_string(),
            source: Box::new(source),
        }
    }

    /// Whether this error is a bounded-polling timeout (directly or wrapped)
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Apply { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Captured output of the external processes involved in this error.
    ///
    /// Empty for errors that did not come from a tool invocation.
    pub fn diagnostics(&self) -> Vec<String> {
        match self {
            Self::CommandFailed {
                command,
                stdout,
                stderr,
                ..
            } => {
                let mut lines = Vec::new();
                let stderr = stderr.trim();
                let stdout = stdout.trim();
                if !stderr.is_empty() {
                    lines.push(format!("{command}: stderr: {stderr}"));
                }
                if !stdout.is_empty() {
                    lines.push(format!("{command}: stdout: {stdout}"));
                }
                lines
            }
            Self::Apply { source, .. } => source.diagnostics(),
            Self::Aggregate { diagnostics, .. } => diagnostics.clone(),
            _ => Vec::new(),
        }
    }
}
