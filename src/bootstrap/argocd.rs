//! Argo CD install

use super::{wait_for, ClusterTools, ARGOCD_NAMESPACE};
use crate::health::SuccessCondition;
use crate::observer::{ResourceKind, ResourceSelector};
use crate::phase::Phase;
use crate::session::BootstrapSession;
use crate::task::IdempotentTask;

/// Pinned `argo/argo-cd` chart version
pub const ARGOCD_CHART_VERSION: &str = "7.7.11";

/// Helm release name
pub const ARGOCD_RELEASE: &str = "argocd";

const VALUES: &[&str] = &[
    "--set",
    "configs.params.server\\.insecure=true",
    "--set",
    "dex.enabled=false",
    "--set",
    "notifications.enabled=false",
];

/// `helm upgrade --install` for Argo CD, skipped when the release is deployed
pub fn install_task(tools: ClusterTools<'_>) -> IdempotentTask {
    let mut args = vec![
        "upgrade",
        "--install",
        ARGOCD_RELEASE,
        "argo/argo-cd",
        "--version",
        ARGOCD_CHART_VERSION,
        "--namespace",
        ARGOCD_NAMESPACE,
    ];
    args.extend_from_slice(VALUES);

    IdempotentTask::new(
        "install-argocd",
        ResourceSelector::named(ResourceKind::HelmRelease, ARGOCD_NAMESPACE, ARGOCD_RELEASE),
    )
    .when_absent(tools.release_deployed(ARGOCD_RELEASE, ARGOCD_NAMESPACE))
    .run(tools.helm_mutation(&args))
}

/// Install Argo CD and wait for the components the handoff depends on
pub fn control_plane_phase(session: &BootstrapSession, tools: ClusterTools<'_>) -> Phase {
    let ready = SuccessCondition::AllReady { min: 1 };
    Phase::new("gitops-control-plane", "Installing Argo CD")
        .task(install_task(tools))
        .require(wait_for(
            session,
            ResourceSelector::named(ResourceKind::Deployment, ARGOCD_NAMESPACE, "argocd-server"),
            ready,
        ))
        .require(wait_for(
            session,
            ResourceSelector::named(
                ResourceKind::Deployment,
                ARGOCD_NAMESPACE,
                "argocd-repo-server",
            ),
            ready,
        ))
        .require(wait_for(
            session,
            ResourceSelector::named(
                ResourceKind::StatefulSet,
                ARGOCD_NAMESPACE,
                "argocd-application-controller",
            ),
            ready,
        ))
}
