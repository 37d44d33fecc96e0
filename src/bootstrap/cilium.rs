//! Cilium CNI install

use super::kind::NODE_COUNT;
use super::{wait_for, ClusterTools, KUBE_SYSTEM_NAMESPACE};
use crate::health::SuccessCondition;
use crate::observer::{ResourceKind, ResourceSelector};
use crate::phase::Phase;
use crate::session::BootstrapSession;
use crate::task::IdempotentTask;

/// Cilium chart settings
#[derive(Debug, Clone)]
pub struct CiliumConfig {
    /// Chart version
    pub version: &'static str,
}

impl Default for CiliumConfig {
    fn default() -> Self {
        Self { version: "1.16.5" }
    }
}

/// Helm values for running Cilium on kind
const VALUES: &[&str] = &[
    "--set",
    "ipam.mode=kubernetes",
    "--set",
    "kubeProxyReplacement=false",
    "--set",
    "image.pullPolicy=IfNotPresent",
    "--set",
    "operator.replicas=1",
    "--set",
    "hubble.relay.enabled=false",
    "--set",
    "hubble.ui.enabled=false",
];

/// `helm upgrade --install` for the Cilium release, skipped when deployed
pub fn install_task(tools: ClusterTools<'_>, config: &CiliumConfig) -> IdempotentTask {
    let mut args = vec![
        "upgrade",
        "--install",
        "cilium",
        "cilium/cilium",
        "--version",
        config.version,
        "--namespace",
        KUBE_SYSTEM_NAMESPACE,
    ];
    args.extend_from_slice(VALUES);

    IdempotentTask::new(
        "install-cilium",
        ResourceSelector::named(ResourceKind::HelmRelease, KUBE_SYSTEM_NAMESPACE, "cilium"),
    )
    .when_absent(tools.release_deployed("cilium", KUBE_SYSTEM_NAMESPACE))
    .run(tools.helm_mutation(&args))
}

/// Install Cilium and wait until agents, operator and every node are ready
pub fn network_fabric_phase(session: &BootstrapSession, tools: ClusterTools<'_>) -> Phase {
    Phase::new("network-fabric", "Installing Cilium")
        .task(install_task(tools, &CiliumConfig::default()))
        .require(wait_for(
            session,
            ResourceSelector::named(ResourceKind::DaemonSet, KUBE_SYSTEM_NAMESPACE, "cilium"),
            SuccessCondition::AllReady { min: NODE_COUNT },
        ))
        .require(wait_for(
            session,
            ResourceSelector::named(
                ResourceKind::Deployment,
                KUBE_SYSTEM_NAMESPACE,
                "cilium-operator",
            ),
            SuccessCondition::AllReady { min: 1 },
        ))
        .require(wait_for(
            session,
            ResourceSelector::nodes(),
            SuccessCondition::AllReady { min: NODE_COUNT },
        ))
}
