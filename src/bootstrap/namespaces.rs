//! Namespaces created ahead of the charts and applications that use them

use super::{ClusterTools, ARGOCD_NAMESPACE, MONITORING_NAMESPACE};
use crate::observer::{ResourceKind, ResourceSelector};
use crate::phase::Phase;
use crate::session::BootstrapSession;
use crate::task::{ExistsCheck, IdempotentTask};

/// Label marking namespaces owned by the platform
pub const PLATFORM_LABEL_KEY: &str = "app.kubernetes.io/part-of";

/// Value of [`PLATFORM_LABEL_KEY`]
pub const PLATFORM_LABEL_VALUE: &str = "platform";

/// Namespaces the bootstrap owns, in creation order
pub fn platform_namespaces(session: &BootstrapSession) -> Vec<String> {
    vec![
        ARGOCD_NAMESPACE.to_string(),
        MONITORING_NAMESPACE.to_string(),
        session.workload().namespace.clone(),
    ]
}

fn create_namespace_task(tools: ClusterTools<'_>, name: &str) -> IdempotentTask {
    IdempotentTask::new(
        format!("namespace-{name}"),
        ResourceSelector::cluster_scoped(ResourceKind::Namespace, name),
    )
    .when_absent(ExistsCheck::Succeeds(
        tools.kubectl_query(&["get", "namespace", name, "-o", "name"]),
    ))
    .run(tools.kubectl_mutation(&["create", "namespace", name]))
}

/// JSON pointer to the platform label, with `/` escaped as `~1`
fn platform_label_pointer() -> String {
    format!(
        "/metadata/labels/{}",
        PLATFORM_LABEL_KEY.replace('~', "~0").replace('/', "~1")
    )
}

fn label_namespace_task(tools: ClusterTools<'_>, name: &str) -> IdempotentTask {
    let label = format!("{PLATFORM_LABEL_KEY}={PLATFORM_LABEL_VALUE}");
    IdempotentTask {
        name: format!("label-{name}"),
        selector: ResourceSelector {
            kind: ResourceKind::Namespace,
            name: Some(name.to_string()),
            namespace: None,
            label_selector: Some(label.clone()),
        },
        // kubectl refuses a name together with a label selector
        exists_check: ExistsCheck::json_field(
            tools.kubectl_query(&["get", "namespace", name, "-o", "json"]),
            platform_label_pointer(),
            PLATFORM_LABEL_VALUE,
        ),
        desired: vec![tools.kubectl_mutation(&["label", "namespace", name, &label, "--overwrite"])],
    }
}

/// Create the platform namespaces
pub fn namespaces_phase(session: &BootstrapSession, tools: ClusterTools<'_>) -> Phase {
    platform_namespaces(session).iter().fold(
        Phase::new("namespaces", "Creating platform namespaces"),
        |phase, ns| phase.task(create_namespace_task(tools, ns)),
    )
}

/// Label the platform namespaces; best effort
pub fn labels_phase(session: &BootstrapSession, tools: ClusterTools<'_>) -> Phase {
    platform_namespaces(session)
        .iter()
        .fold(
            Phase::new("namespace-labels", "Labelling platform namespaces"),
            |phase, ns| phase.task(label_namespace_task(tools, ns)),
        )
        .warn_on_failure()
}
