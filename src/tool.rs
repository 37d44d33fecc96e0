//! External tool invocation
//!
//! Every interaction with kind, helm and kubectl goes through [`ToolInvoker`].
//! Invocations are classified as queries or mutations so that re-runs can be
//! audited for unwanted side effects.

use std::fmt;
use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Whether an invocation may change external state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvocationKind {
    /// Read-only: listing, status, existence checks
    Query,
    /// Creates, updates or deletes external state
    Mutation,
}

/// A single external command to run
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name, resolved through `PATH`
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Payload written to the child's stdin (manifests, cluster configs).
    /// Wiped from memory when the invocation is dropped.
    pub stdin: Option<Zeroizing<String>>,
    /// Query or mutation
    pub kind: InvocationKind,
}

impl Invocation {
    /// A read-only invocation
    pub fn query<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            kind: InvocationKind::Query,
        }
    }

    /// A state-changing invocation
    pub fn mutation<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: InvocationKind::Mutation,
            ..Self::query(program, args)
        }
    }

    /// Attach a stdin payload
    pub fn with_stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(Zeroizing::new(payload.into()));
        self
    }

    /// The stdin payload, if any
    pub fn stdin_payload(&self) -> Option<&str> {
        self.stdin.as_deref().map(String::as_str)
    }

    /// Whether this invocation may change external state
    pub fn is_mutation(&self) -> bool {
        self.kind == InvocationKind::Mutation
    }

    /// Subcommand words without flags, e.g. `["create", "cluster"]`
    pub fn verbs(&self) -> Vec<&str> {
        let mut verbs = Vec::new();
        let mut skip_value = false;
        for arg in &self.args {
            if skip_value {
                skip_value = false;
                continue;
            }
            if let Some(flag) = arg.strip_prefix("--") {
                skip_value = !flag.contains('=') && flag_takes_value(flag);
                continue;
            }
            if arg.starts_with('-') {
                // Short flags used here (-o, -n, -l, -f) all take a value
                skip_value = arg.len() == 2;
                continue;
            }
            verbs.push(arg.as_str());
        }
        verbs
    }

    /// Value of a `--flag value` or `--flag=value` argument
    pub fn flag(&self, name: &str) -> Option<&str> {
        let long = format!("--{name}");
        let prefix = format!("--{name}=");
        let mut iter = self.args.iter();
        while let Some(arg) = iter.next() {
            if *arg == long {
                return iter.next().map(String::as_str);
            }
            if let Some(value) = arg.strip_prefix(&prefix) {
                return Some(value);
            }
        }
        None
    }
}

/// Long flags whose value is a separate argument
fn flag_takes_value(flag: &str) -> bool {
    !matches!(
        flag,
        "install" | "overwrite" | "create-namespace" | "force-update" | "help"
    )
}

impl fmt::Display for Invocation {
    /// Program and arguments only; stdin payloads may hold credentials and are
    /// never rendered.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field(
                "stdin",
                &self.stdin_payload().map(|s| format!("<{} bytes>", s.len())),
            )
            .field("kind", &self.kind)
            .finish()
    }
}

/// Exit status and captured output of a finished process
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` if the process was terminated by a signal
    pub code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ToolOutput {
    /// A successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with status zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into `Error::CommandFailed`, keeping all output
    pub fn into_result(self, invocation: &Invocation) -> Result<ToolOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::CommandFailed {
                command: invocation.to_string(),
                code: self.code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs external cluster-management commands
///
/// Implementations must not fail merely because the command exited non-zero;
/// the exit status is part of the returned [`ToolOutput`]. `Err` is reserved
/// for failing to run the command at all.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run the invocation to completion and capture its output
    async fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Run an invocation and require it to succeed
pub async fn run_checked<I: ToolInvoker + ?Sized>(
    invoker: &I,
    invocation: &Invocation,
) -> Result<ToolOutput> {
    invoker.invoke(invocation).await?.into_result(invocation)
}

/// [`ToolInvoker`] backed by real child processes
#[derive(Clone, Debug, Default)]
pub struct ProcessInvoker;

impl ProcessInvoker {
    /// Create a new process invoker
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    async fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput> {
        debug!(command = %invocation, mutation = invocation.is_mutation(), "invoking");

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let mut child = command.spawn().map_err(|e| Error::CommandFailed {
            command: invocation.to_string(),
            code: None,
            stdout: String::new(),
            stderr: format!("failed to spawn {}: {}", invocation.program, e),
        })?;

        if let (Some(payload), Some(mut stdin)) = (invocation.stdin_payload(), child.stdin.take()) {
            match stdin.write_all(payload.as_bytes()).await {
                Ok(()) => {}
                // The child exited before reading everything; its exit status
                // and stderr below say why
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    warn!(command = %invocation, "child closed stdin before reading all input");
                }
                Err(e) => return Err(e.into()),
            }
            // Closing stdin signals EOF to tools reading `-f -`
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        Ok(ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// A tool the orchestrator cannot run without
#[derive(Clone, Copy, Debug)]
pub struct Prerequisite {
    /// Binary name
    pub tool: &'static str,
    /// Installation hint shown when missing
    pub hint: &'static str,
}

/// Tools required for a full bootstrap
pub const PREREQUISITES: &[Prerequisite] = &[
    Prerequisite {
        tool: "docker",
        hint: "Install Docker: https://docs.docker.com/get-docker/",
    },
    Prerequisite {
        tool: "kind",
        hint: "Install kind: https://kind.sigs.k8s.io/docs/user/quick-start/#installation",
    },
    Prerequisite {
        tool: "kubectl",
        hint: "Install kubectl: https://kubernetes.io/docs/tasks/tools/",
    },
    Prerequisite {
        tool: "helm",
        hint: "Install helm: https://helm.sh/docs/intro/install/",
    },
];

/// Verify every prerequisite tool is on `PATH`
pub async fn check_prerequisites<I: ToolInvoker + ?Sized>(
    invoker: &I,
    prerequisites: &[Prerequisite],
) -> Result<()> {
    info!("Checking prerequisites...");

    for prerequisite in prerequisites {
        let which = Invocation::query("which", [prerequisite.tool]);
        let found = match invoker.invoke(&which).await {
            Ok(output) => output.success(),
            Err(e) => {
                return Err(Error::PrerequisiteNotFound {
                    tool: "which".to_string(),
                    hint: format!("cannot look up {}: {e}", prerequisite.tool),
                })
            }
        };
        if !found {
            return Err(Error::PrerequisiteNotFound {
                tool: prerequisite.tool.to_string(),
                hint: prerequisite.hint.to_string(),
            });
        }
        debug!(tool = prerequisite.tool, "found");
    }

    Ok(())
}
