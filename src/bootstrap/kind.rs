//! Kind cluster creation and teardown

use serde::Serialize;
use tracing::info;

use super::wait_for;
use crate::health::SuccessCondition;
use crate::observer::{ResourceKind, ResourceSelector};
use crate::phase::Phase;
use crate::session::BootstrapSession;
use crate::task::{ExistsCheck, IdempotentTask};
use crate::tool::{run_checked, Invocation, ToolInvoker};
use crate::{Error, Result};

/// Worker nodes besides the single control plane
pub const WORKER_NODES: usize = 2;

/// Total nodes in the cluster
pub const NODE_COUNT: u32 = 1 + WORKER_NODES as u32;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KindCluster {
    kind: &'static str,
    api_version: &'static str,
    networking: KindNetworking,
    nodes: Vec<KindNode>,
}

#[derive(Serialize)]
struct KindNetworking {
    /// Cilium replaces kindnet
    #[serde(rename = "disableDefaultCNI")]
    disable_default_cni: bool,
}

#[derive(Serialize)]
struct KindNode {
    role: NodeRole,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
enum NodeRole {
    ControlPlane,
    Worker,
}

/// Render the kind cluster config fed to `kind create cluster --config -`
pub fn render_config(workers: usize) -> Result<String> {
    let mut nodes = vec![KindNode {
        role: NodeRole::ControlPlane,
    }];
    nodes.extend((0..workers).map(|_| KindNode {
        role: NodeRole::Worker,
    }));

    let config = KindCluster {
        kind: "Cluster",
        api_version: "kind.x-k8s.io/v1alpha4",
        networking: KindNetworking {
            disable_default_cni: true,
        },
        nodes,
    };
    serde_yaml::to_string(&config).map_err(|e| Error::serialization(format!("kind config: {e}")))
}

fn list_clusters() -> Invocation {
    Invocation::query("kind", ["get", "clusters"])
}

/// Whether `kind get clusters` lists `name`
pub fn cluster_exists_check(name: &str) -> ExistsCheck {
    ExistsCheck::lists_name(list_clusters(), name)
}

/// Create the cluster if absent, then wait for its API server
pub fn cluster_phase(session: &BootstrapSession) -> Result<Phase> {
    let name = session.cluster_name();
    let create = IdempotentTask::new(
        "create-cluster",
        ResourceSelector::cluster_scoped(ResourceKind::Cluster, name),
    )
    .when_absent(cluster_exists_check(name))
    .run(
        Invocation::mutation("kind", ["create", "cluster", "--name", name, "--config", "-"])
            .with_stdin(render_config(WORKER_NODES)?),
    );

    Ok(Phase::new("cluster", format!("Creating kind cluster {name}"))
        .task(create)
        .require(wait_for(
            session,
            ResourceSelector::api_server(),
            SuccessCondition::Reachable,
        )))
}

/// Delete the cluster if it exists. Returns whether anything was deleted.
pub async fn delete_cluster<I: ToolInvoker + ?Sized>(invoker: &I, name: &str) -> Result<bool> {
    if !cluster_exists_check(name).is_satisfied(invoker).await? {
        info!(cluster = name, "no existing cluster to delete");
        return Ok(false);
    }

    info!(cluster = name, "Deleting existing cluster (--force)...");
    run_checked(
        invoker,
        &Invocation::mutation("kind", ["delete", "cluster", "--name", name]),
    )
    .await?;
    Ok(true)
}
