//! Run configuration
//!
//! Command-line flags and environment overrides are parsed once into an
//! immutable [`BootstrapSession`] before anything touches the cluster.

use std::fmt;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Bootstrap a kind cluster with Cilium and Argo CD, then hand it to GitOps
#[derive(Parser)]
#[command(name = "platform-bootstrap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Delete and recreate the cluster if it already exists
    #[arg(long)]
    pub force: bool,

    /// Admin password stored as a Secret for the observability stack
    #[arg(long, value_name = "VALUE")]
    pub password: Option<String>,

    /// Name of the kind cluster
    #[arg(long, env = "CLUSTER_NAME", default_value = "platform")]
    pub cluster_name: String,

    /// Seconds to wait for GitOps applications to become healthy
    #[arg(long, env = "MONITORING_DURATION", default_value_t = 600)]
    pub monitoring_duration: u64,

    /// Seconds between health checks
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 10)]
    pub poll_interval: u64,

    /// Maximum health checks per infrastructure wait
    #[arg(long, default_value_t = 60)]
    pub max_wait_iterations: u32,

    /// Maximum health checks per application
    #[arg(long, default_value_t = 30)]
    pub app_max_iterations: u32,

    /// Exit non-zero if any application is unhealthy when monitoring ends
    #[arg(long, env = "REQUIRE_CONVERGENCE")]
    pub require_convergence: bool,

    /// Git repository the root applications point at
    #[arg(long, env = "GITOPS_REPO_URL")]
    pub gitops_repo_url: Option<String>,

    /// Revision of the GitOps repository to track
    #[arg(long, env = "GITOPS_REVISION", default_value = "HEAD")]
    pub gitops_revision: String,

    /// Namespace of the sample workload
    #[arg(long, env = "WORKLOAD_NAMESPACE", default_value = "app")]
    pub workload_namespace: String,

    /// Name of the sample workload's Deployment and Service
    #[arg(long, env = "WORKLOAD_NAME", default_value = "my-app")]
    pub workload_name: String,

    /// Print the phase plan without running anything
    #[arg(long)]
    pub dry_run: bool,
}

/// Where the root applications get their manifests
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitOpsSource {
    /// Repository URL
    pub repo_url: String,
    /// Branch, tag or commit
    pub revision: String,
    /// Path of the platform root application
    pub platform_path: String,
    /// Path of the workloads root application
    pub apps_path: String,
}

/// The sample workload checked after convergence
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadTarget {
    /// Namespace
    pub namespace: String,
    /// Deployment and Service name; pods carry `app=<name>`
    pub name: String,
}

/// Immutable configuration of one bootstrap run
pub struct BootstrapSession {
    cluster_name: String,
    force_recreate: bool,
    credential: Option<Zeroizing<String>>,
    monitoring_duration: Duration,
    poll_interval: Duration,
    max_wait_iterations: u32,
    app_max_iterations: u32,
    require_convergence: bool,
    gitops: Option<GitOpsSource>,
    workload: WorkloadTarget,
    dry_run: bool,
}

impl BootstrapSession {
    /// Validate parsed arguments into a session
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let cluster_name = cli.cluster_name.trim().to_string();
        if cluster_name.is_empty() {
            return Err(Error::validation("cluster name must not be empty"));
        }
        if cluster_name.len() > 63
            || !cluster_name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::validation(format!(
                "invalid cluster name '{cluster_name}': use lowercase letters, digits and '-'"
            )));
        }
        if cli.workload_namespace.trim().is_empty() || cli.workload_name.trim().is_empty() {
            return Err(Error::validation("workload namespace and name must not be empty"));
        }

        let credential = match cli.password {
            Some(p) if p.is_empty() => {
                return Err(Error::validation("--password must not be empty"));
            }
            Some(p) => Some(Zeroizing::new(p)),
            None => None,
        };

        let gitops = cli
            .gitops_repo_url
            .filter(|url| !url.trim().is_empty())
            .map(|repo_url| GitOpsSource {
                repo_url,
                revision: cli.gitops_revision,
                platform_path: "platform".to_string(),
                apps_path: "apps".to_string(),
            });

        Ok(Self {
            cluster_name,
            force_recreate: cli.force,
            credential,
            monitoring_duration: Duration::from_secs(cli.monitoring_duration),
            poll_interval: Duration::from_secs(cli.poll_interval),
            max_wait_iterations: cli.max_wait_iterations.max(1),
            app_max_iterations: cli.app_max_iterations.max(1),
            require_convergence: cli.require_convergence,
            gitops,
            workload: WorkloadTarget {
                namespace: cli.workload_namespace,
                name: cli.workload_name,
            },
            dry_run: cli.dry_run,
        })
    }

    /// Kind cluster name
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Kube context kind writes for the cluster
    pub fn kube_context(&self) -> String {
        format!("kind-{}", self.cluster_name)
    }

    /// Whether to delete an existing cluster first
    pub fn force_recreate(&self) -> bool {
        self.force_recreate
    }

    /// The credential, if one was supplied
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_ref().map(|c| c.as_str())
    }

    /// Overall budget for application convergence
    pub fn monitoring_duration(&self) -> Duration {
        self.monitoring_duration
    }

    /// Sleep between health checks
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Check budget for infrastructure waits
    pub fn max_wait_iterations(&self) -> u32 {
        self.max_wait_iterations
    }

    /// Check budget per application
    pub fn app_max_iterations(&self) -> u32 {
        self.app_max_iterations
    }

    /// Whether unconverged applications fail the run
    pub fn require_convergence(&self) -> bool {
        self.require_convergence
    }

    /// GitOps source for the root applications, if configured
    pub fn gitops(&self) -> Option<&GitOpsSource> {
        self.gitops.as_ref()
    }

    /// Sample workload
    pub fn workload(&self) -> &WorkloadTarget {
        &self.workload
    }

    /// Whether this is a dry run
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

impl fmt::Debug for BootstrapSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapSession")
            .field("cluster_name", &self.cluster_name)
            .field("force_recreate", &self.force_recreate)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("monitoring_duration", &self.monitoring_duration)
            .field("poll_interval", &self.poll_interval)
            .field("max_wait_iterations", &self.max_wait_iterations)
            .field("app_max_iterations", &self.app_max_iterations)
            .field("require_convergence", &self.require_convergence)
            .field("gitops", &self.gitops)
            .field("workload", &self.workload)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

/// Exit code for a clap parse error: 0 for help and version, 1 otherwise
pub fn usage_exit_code(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 0,
        _ => 1,
    }
}

/// Parse arguments into a session, or the exit code to stop with.
///
/// Help and version text go to stdout, usage errors to stderr.
pub fn parse_args<I, T>(args: I) -> std::result::Result<BootstrapSession, u8>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return Err(usage_exit_code(&e));
        }
    };

    BootstrapSession::from_cli(cli).map_err(|e| {
        eprintln!("error: {e}");
        1
    })
}
