//! Handing the cluster to Argo CD
//!
//! Two root applications point Argo CD at the GitOps repository: one for
//! platform components, one for workloads. They are independent, so they are
//! applied as a concurrent group.

use serde_json::json;

use super::{ClusterTools, ARGOCD_NAMESPACE};
use crate::group::ConcurrentTaskGroup;
use crate::observer::{ResourceKind, ResourceSelector};
use crate::phase::Phase;
use crate::session::GitOpsSource;
use crate::task::{ExistsCheck, IdempotentTask};
use crate::{Error, Result};

/// A root Application and the repository path it tracks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootApplication {
    /// Application name
    pub name: String,
    /// Path inside the GitOps repository
    pub path: String,
}

/// Root applications for `source`
pub fn root_applications(source: &GitOpsSource) -> Vec<RootApplication> {
    vec![
        RootApplication {
            name: "platform".to_string(),
            path: source.platform_path.clone(),
        },
        RootApplication {
            name: "workloads".to_string(),
            path: source.apps_path.clone(),
        },
    ]
}

/// Render an Argo CD Application with automated sync
pub fn application_manifest(app: &RootApplication, source: &GitOpsSource) -> Result<String> {
    let manifest = json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Application",
        "metadata": {
            "name": app.name,
            "namespace": ARGOCD_NAMESPACE,
            "finalizers": ["resources-finalizer.argocd.argoproj.io"],
        },
        "spec": {
            "project": "default",
            "source": {
                "repoURL": source.repo_url,
                "targetRevision": source.revision,
                "path": app.path,
                "directory": { "recurse": true },
            },
            "destination": {
                "server": "https://kubernetes.default.svc",
                "namespace": ARGOCD_NAMESPACE,
            },
            "syncPolicy": {
                "automated": { "prune": true, "selfHeal": true },
                "syncOptions": ["CreateNamespace=true"],
            },
        },
    });
    serde_json::to_string(&manifest)
        .map_err(|e| Error::serialization(format!("application {}: {e}", app.name)))
}

fn apply_application_task(
    tools: ClusterTools<'_>,
    app: &RootApplication,
    source: &GitOpsSource,
) -> Result<IdempotentTask> {
    Ok(IdempotentTask::new(
        format!("root-app-{}", app.name),
        ResourceSelector::named(ResourceKind::Application, ARGOCD_NAMESPACE, &app.name),
    )
    .when_absent(ExistsCheck::Succeeds(tools.kubectl_query(&[
        "get",
        "applications.argoproj.io",
        &app.name,
        "-n",
        ARGOCD_NAMESPACE,
        "-o",
        "name",
    ])))
    .run(
        tools
            .kubectl_mutation(&["apply", "-f", "-"])
            .with_stdin(application_manifest(app, source)?),
    ))
}

/// Apply every root application concurrently
pub fn handoff_phase(tools: ClusterTools<'_>, source: &GitOpsSource) -> Result<Phase> {
    let tasks = root_applications(source)
        .iter()
        .map(|app| apply_application_task(tools, app, source))
        .collect::<Result<Vec<_>>>()?;

    Ok(Phase::new("workload-handoff", "Handing off to Argo CD")
        .group(ConcurrentTaskGroup::new("root-applications", tasks)))
}
