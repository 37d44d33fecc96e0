//! Integration tests for the platform bootstrap
//!
//! Tests are organized by the story they tell:
//!
//! - `idempotence`: Stories about re-running the bootstrap against a cluster
//!   that is already bootstrapped, and about forced recreation
//!
//! - `ordering`: Stories about phases that run before their dependencies and
//!   about missing prerequisites
//!
//! - `convergence`: Stories about waiting for GitOps applications, including
//!   applications that never become healthy and applications added later

mod convergence;
mod fake;
mod ordering;

use clap::Parser;

use platform_bootstrap::orchestrator::{Orchestrator, RunSummary};
use platform_bootstrap::session::{BootstrapSession, Cli};

use fake::FakePlatform;

/// Cluster name every story uses
pub const CLUSTER: &str = "test";

/// Flags every story starts from: fast polling, small budgets, a GitOps source
const DEFAULTS: &[(&str, &str)] = &[
    ("--cluster-name", CLUSTER),
    ("--poll-interval", "0"),
    ("--max-wait-iterations", "3"),
    ("--app-max-iterations", "2"),
    ("--monitoring-duration", "5"),
    ("--gitops-repo-url", "https://git.example.com/platform.git"),
    ("--workload-namespace", "app"),
    ("--workload-name", "my-app"),
];

/// A session from the defaults, with `extra` flags added or overriding them
pub fn session(extra: &[&str]) -> BootstrapSession {
    let mut argv = vec!["platform-bootstrap"];
    for &(flag, value) in DEFAULTS {
        if !extra.contains(&flag) {
            argv.push(flag);
            argv.push(value);
        }
    }
    argv.extend_from_slice(extra);
    BootstrapSession::from_cli(Cli::try_parse_from(argv).expect("valid flags"))
        .expect("valid session")
}

/// Run the orchestrator with the fake as every collaborator
pub async fn run(platform: &FakePlatform, session: &BootstrapSession) -> RunSummary {
    Orchestrator::new(session, platform, platform, platform)
        .run()
        .await
        .expect("bootstrap should start")
}
