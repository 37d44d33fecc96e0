//! Helm chart repositories

use crate::observer::{ResourceKind, ResourceSelector};
use crate::phase::Phase;
use crate::task::{ExistsCheck, IdempotentTask};
use crate::tool::Invocation;

/// A named remote chart repository
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HelmRepository {
    /// Local alias, e.g. `cilium`
    pub name: &'static str,
    /// Repository URL
    pub url: &'static str,
}

/// Repositories the bootstrap installs charts from
pub const REPOSITORIES: &[HelmRepository] = &[
    HelmRepository {
        name: "cilium",
        url: "https://helm.cilium.io/",
    },
    HelmRepository {
        name: "argo",
        url: "https://argoproj.github.io/argo-helm",
    },
];

fn add_repository_task(repo: &HelmRepository) -> IdempotentTask {
    IdempotentTask::new(
        format!("helm-repo-{}", repo.name),
        ResourceSelector::cluster_scoped(ResourceKind::HelmRepository, repo.name),
    )
    .when_absent(ExistsCheck::lists_name(
        Invocation::query("helm", ["repo", "list"]),
        repo.name,
    ))
    .run(Invocation::mutation(
        "helm",
        ["repo", "add", repo.name, repo.url, "--force-update"],
    ))
    // Rewrites the local index cache, so only after a repository was added
    .run(Invocation::mutation("helm", ["repo", "update", repo.name]))
}

/// Register every chart repository and fetch its index
pub fn repositories_phase() -> Phase {
    REPOSITORIES
        .iter()
        .fold(Phase::new("repositories", "Registering Helm repositories"), |phase, repo| {
            phase.task(add_repository_task(repo))
        })
}
