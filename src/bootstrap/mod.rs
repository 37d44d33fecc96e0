//! The platform bootstrap plan
//!
//! Builds the ordered phase list for one session. Building the plan performs
//! no I/O; everything happens when the sequencer runs it.
//!
//! Order matters: Cilium must be running before CoreDNS can schedule, and
//! Argo CD needs both before it can reconcile anything. Argo CD manages the
//! platform only after the handoff phase applies the root applications.

pub mod argocd;
pub mod cilium;
pub mod credentials;
pub mod handoff;
pub mod kind;
pub mod namespaces;
pub mod repositories;
pub mod verify;

use crate::health::{HealthPredicate, SuccessCondition};
use crate::observer::{ResourceKind, ResourceSelector};
use crate::phase::Phase;
use crate::session::BootstrapSession;
use crate::task::ExistsCheck;
use crate::tool::Invocation;
use crate::Result;
use tracing::warn;

/// Namespace Argo CD is installed into
pub const ARGOCD_NAMESPACE: &str = "argocd";

/// Namespace of the observability stack
pub const MONITORING_NAMESPACE: &str = "monitoring";

/// Namespace of cluster-level components
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Builds kubectl and helm invocations pinned to one kube context
#[derive(Clone, Copy, Debug)]
pub struct ClusterTools<'a> {
    context: &'a str,
}

impl<'a> ClusterTools<'a> {
    /// Tools for `context`, e.g. `kind-platform`
    pub fn new(context: &'a str) -> Self {
        Self { context }
    }

    fn with_flag(flag: &str, context: &str, args: &[&str]) -> Vec<String> {
        let mut full = vec![flag.to_string(), context.to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        full
    }

    /// Read-only kubectl invocation
    pub fn kubectl_query(&self, args: &[&str]) -> Invocation {
        Invocation::query("kubectl", Self::with_flag("--context", self.context, args))
    }

    /// State-changing kubectl invocation
    pub fn kubectl_mutation(&self, args: &[&str]) -> Invocation {
        Invocation::mutation("kubectl", Self::with_flag("--context", self.context, args))
    }

    /// Read-only helm invocation
    pub fn helm_query(&self, args: &[&str]) -> Invocation {
        Invocation::query("helm", Self::with_flag("--kube-context", self.context, args))
    }

    /// Skip an install unless `release` in `namespace` is deployed.
    ///
    /// `helm status` exits zero for failed and pending releases too, so the
    /// status field is compared rather than the exit code.
    pub fn release_deployed(&self, release: &str, namespace: &str) -> ExistsCheck {
        ExistsCheck::json_field(
            self.helm_query(&["status", release, "--namespace", namespace, "-o", "json"]),
            "/info/status",
            "deployed",
        )
    }

    /// State-changing helm invocation
    pub fn helm_mutation(&self, args: &[&str]) -> Invocation {
        Invocation::mutation("helm", Self::with_flag("--kube-context", self.context, args))
    }
}

/// Infrastructure wait with the session's polling budget
pub(crate) fn wait_for(
    session: &BootstrapSession,
    selector: ResourceSelector,
    condition: SuccessCondition,
) -> HealthPredicate {
    HealthPredicate::new(
        selector,
        condition,
        session.poll_interval(),
        session.max_wait_iterations(),
    )
}

/// Wait for CoreDNS, which can only schedule once the CNI is up
pub fn dns_phase(session: &BootstrapSession) -> Phase {
    Phase::new("dns", "Waiting for cluster DNS").require(wait_for(
        session,
        ResourceSelector::named(ResourceKind::Deployment, KUBE_SYSTEM_NAMESPACE, "coredns"),
        SuccessCondition::AllReady { min: 1 },
    ))
}

/// The full bootstrap, in dependency order
pub fn plan(session: &BootstrapSession) -> Result<Vec<Phase>> {
    let context = session.kube_context();
    let tools = ClusterTools::new(&context);

    let mut phases = vec![
        kind::cluster_phase(session)?,
        repositories::repositories_phase(),
        namespaces::namespaces_phase(session, tools),
        namespaces::labels_phase(session, tools),
        cilium::network_fabric_phase(session, tools),
        dns_phase(session),
        argocd::control_plane_phase(session, tools),
    ];

    if let Some(credential) = session.credential() {
        phases.push(credentials::credentials_phase(tools, credential)?);
    }

    match session.gitops() {
        Some(source) => phases.push(handoff::handoff_phase(tools, source)?),
        None => warn!("GITOPS_REPO_URL not set, skipping root application handoff"),
    }

    Ok(phases)
}

/// Checks on the sample workload run after convergence monitoring
pub fn verification_plan(session: &BootstrapSession) -> Vec<Phase> {
    vec![verify::workload_phase(session)]
}
