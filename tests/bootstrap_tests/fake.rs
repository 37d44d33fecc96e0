//! In-memory stand-in for kind, helm, kubectl and the Kubernetes API
//!
//! The fake keeps just enough state to behave like the real tools where the
//! bootstrap depends on it: listing commands print what exists, creating
//! something that already exists fails, and commands aimed at a cluster or
//! namespace that does not exist yet are rejected. Workloads only become
//! ready once the CNI is installed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use platform_bootstrap::convergence::{
    ApplicationRecord, ApplicationSource, HealthStatus, SyncStatus,
};
use platform_bootstrap::observer::{ClusterObserver, Readiness, ResourceKind, ResourceSelector};
use platform_bootstrap::tool::{Invocation, ToolInvoker, ToolOutput};
use platform_bootstrap::{Error, Result};

/// Nodes kind creates for the rendered config
const NODES: u32 = 3;

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeMap<String, BTreeSet<String>>,
    /// Helm release status by (namespace, name)
    releases: BTreeMap<(String, String), String>,
    secrets: BTreeMap<(String, String), serde_json::Value>,
    applications: BTreeMap<String, ApplicationRecord>,
}

impl ClusterState {
    fn new() -> Self {
        let mut state = Self::default();
        for ns in ["default", "kube-system", "kube-public"] {
            state.namespaces.insert(ns.to_string(), BTreeSet::new());
        }
        state
    }

    fn release_status(&self, namespace: &str, name: &str) -> Option<&str> {
        self.releases
            .get(&(namespace.to_string(), name.to_string()))
            .map(String::as_str)
    }

    fn has_release(&self, namespace: &str, name: &str) -> bool {
        self.release_status(namespace, name) == Some("deployed")
    }

    fn cni_ready(&self) -> bool {
        self.has_release("kube-system", "cilium")
    }

    fn argocd_installed(&self) -> bool {
        self.has_release("argocd", "argocd")
    }
}

#[derive(Default)]
struct State {
    clusters: BTreeMap<String, ClusterState>,
    repositories: BTreeSet<String>,
}

/// A fake platform that implements every collaborator of the orchestrator
pub struct FakePlatform {
    state: Mutex<State>,
    log: Mutex<Vec<Invocation>>,
    missing_tools: Vec<&'static str>,
    app_health: Mutex<HealthStatus>,
    discovery_fails: bool,
}

impl FakePlatform {
    /// A machine with every tool installed and no clusters
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            log: Mutex::new(Vec::new()),
            missing_tools: Vec::new(),
            app_health: Mutex::new(HealthStatus::Healthy),
            discovery_fails: false,
        }
    }

    /// Pretend `tool` is not on PATH
    pub fn without_tool(mut self, tool: &'static str) -> Self {
        self.missing_tools.push(tool);
        self
    }

    /// Make listing applications fail
    pub fn with_failing_discovery(mut self) -> Self {
        self.discovery_fails = true;
        self
    }

    /// Health reported by applications applied from now on
    pub fn set_app_health(&self, health: HealthStatus) {
        *self.app_health.lock().unwrap() = health;
    }

    /// Simulate Argo CD creating a child application in `cluster`
    pub fn add_application(&self, cluster: &str, name: &str, health: HealthStatus) {
        let mut state = self.state.lock().unwrap();
        let cluster = state.clusters.get_mut(cluster).expect("cluster exists");
        cluster
            .applications
            .insert(name.to_string(), record(name, health));
    }

    /// Leave a helm release behind in `status`, as an interrupted install does
    pub fn set_release_status(&self, cluster: &str, namespace: &str, release: &str, status: &str) {
        let mut state = self.state.lock().unwrap();
        let cluster = state.clusters.get_mut(cluster).expect("cluster exists");
        cluster
            .releases
            .insert((namespace.to_string(), release.to_string()), status.to_string());
    }

    /// Every invocation seen so far
    pub fn invocations(&self) -> Vec<Invocation> {
        self.log.lock().unwrap().clone()
    }

    /// Invocations that may have changed state
    pub fn mutations(&self) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(Invocation::is_mutation)
            .collect()
    }

    /// Forget the invocation log
    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Whether kind knows about `cluster`
    pub fn has_cluster(&self, cluster: &str) -> bool {
        self.state.lock().unwrap().clusters.contains_key(cluster)
    }

    /// Labels of a namespace, if it exists
    pub fn namespace_labels(&self, cluster: &str, namespace: &str) -> Option<BTreeSet<String>> {
        let state = self.state.lock().unwrap();
        state.clusters.get(cluster)?.namespaces.get(namespace).cloned()
    }

    /// Stored secret manifest
    pub fn secret(&self, cluster: &str, namespace: &str, name: &str) -> Option<serde_json::Value> {
        let state = self.state.lock().unwrap();
        state
            .clusters
            .get(cluster)?
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Names of the applications in `cluster`
    pub fn application_names(&self, cluster: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .clusters
            .get(cluster)
            .map(|c| c.applications.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn run(&self, inv: &Invocation) -> ToolOutput {
        match inv.program.as_str() {
            "which" => {
                let tool = inv.args.first().map(String::as_str).unwrap_or_default();
                if self.missing_tools.iter().any(|missing| *missing == tool) {
                    ToolOutput::failed(1, "")
                } else {
                    ToolOutput::ok(format!("/usr/local/bin/{tool}\n"))
                }
            }
            "kind" => self.kind(inv),
            "helm" => self.helm(inv),
            "kubectl" => self.kubectl(inv),
            other => ToolOutput::failed(127, format!("{other}: command not found")),
        }
    }

    fn kind(&self, inv: &Invocation) -> ToolOutput {
        let mut state = self.state.lock().unwrap();
        let name = inv.flag("name").unwrap_or("kind").to_string();
        match inv.verbs().as_slice() {
            ["get", "clusters"] => {
                let names: Vec<&str> = state.clusters.keys().map(String::as_str).collect();
                if names.is_empty() {
                    // kind prints this on stderr and exits zero
                    return ToolOutput {
                        code: Some(0),
                        stdout: String::new(),
                        stderr: "No kind clusters found.\n".to_string(),
                    };
                }
                ToolOutput::ok(format!("{}\n", names.join("\n")))
            }
            ["create", "cluster"] => {
                if state.clusters.contains_key(&name) {
                    return ToolOutput::failed(
                        1,
                        format!("ERROR: failed to create cluster: node(s) already exist for a cluster with the name \"{name}\""),
                    );
                }
                let config = inv.stdin_payload().unwrap_or_default();
                if !config.contains("disableDefaultCNI: true") {
                    return ToolOutput::failed(1, "expected a config with the default CNI disabled");
                }
                state.clusters.insert(name, ClusterState::new());
                ToolOutput::ok("")
            }
            ["delete", "cluster"] => {
                state.clusters.remove(&name);
                ToolOutput::ok("")
            }
            _ => ToolOutput::failed(1, format!("unexpected kind invocation: {inv}")),
        }
    }

    fn helm(&self, inv: &Invocation) -> ToolOutput {
        let mut state = self.state.lock().unwrap();
        let verbs = inv.verbs();

        if verbs.first() == Some(&"repo") {
            return match verbs.as_slice() {
                ["repo", "list"] => {
                    if state.repositories.is_empty() {
                        return ToolOutput::failed(1, "Error: no repositories to show");
                    }
                    let mut out = String::from("NAME\tURL\n");
                    for repo in &state.repositories {
                        out.push_str(&format!("{repo}\thttps://charts.example.com/{repo}\n"));
                    }
                    ToolOutput::ok(out)
                }
                ["repo", "add", name, _url] => {
                    state.repositories.insert(name.to_string());
                    ToolOutput::ok(format!("\"{name}\" has been added to your repositories"))
                }
                ["repo", "update", names @ ..] => {
                    if let Some(unknown) = names.iter().find(|n| !state.repositories.contains(**n)) {
                        return ToolOutput::failed(1, format!("Error: no repositories found matching '{unknown}'"));
                    }
                    if state.repositories.is_empty() {
                        return ToolOutput::failed(1, "Error: no repositories found");
                    }
                    ToolOutput::ok("Update Complete.")
                }
                _ => ToolOutput::failed(1, format!("unexpected helm invocation: {inv}")),
            };
        }

        let repositories = state.repositories.clone();
        let Some(cluster) = context_cluster(&mut state.clusters, inv.flag("kube-context")) else {
            return ToolOutput::failed(1, "Error: Kubernetes cluster unreachable");
        };
        let namespace = inv.flag("namespace").unwrap_or("default").to_string();

        match verbs.as_slice() {
            // helm status exits zero whatever state the release is in
            ["status", release] => match cluster.release_status(&namespace, release) {
                None => ToolOutput::failed(1, "Error: release: not found"),
                Some(status) if short_flag(inv, "-o") == Some("json") => ToolOutput::ok(
                    serde_json::json!({
                        "name": release,
                        "namespace": namespace,
                        "info": { "status": status },
                    })
                    .to_string(),
                ),
                Some(status) => ToolOutput::ok(format!("NAME: {release}\nSTATUS: {status}\n")),
            },
            ["upgrade", release, chart] => {
                let repo = chart.split('/').next().unwrap_or_default();
                if !repositories.contains(repo) {
                    return ToolOutput::failed(
                        1,
                        format!("Error: repo {repo} not found"),
                    );
                }
                if !cluster.namespaces.contains_key(&namespace) {
                    return ToolOutput::failed(
                        1,
                        format!("Error: create: failed to create: namespaces \"{namespace}\" not found"),
                    );
                }
                cluster
                    .releases
                    .insert((namespace, release.to_string()), "deployed".to_string());
                ToolOutput::ok(format!("Release \"{release}\" has been upgraded. Happy Helming!"))
            }
            _ => ToolOutput::failed(1, format!("unexpected helm invocation: {inv}")),
        }
    }

    fn kubectl(&self, inv: &Invocation) -> ToolOutput {
        let mut state = self.state.lock().unwrap();
        let app_health = *self.app_health.lock().unwrap();
        let Some(cluster) = context_cluster(&mut state.clusters, inv.flag("context")) else {
            return ToolOutput::failed(
                1,
                "The connection to the server 127.0.0.1:6443 was refused",
            );
        };
        let namespace = short_flag(inv, "-n").unwrap_or("default").to_string();

        match inv.verbs().as_slice() {
            ["get", "namespace", _] if short_flag(inv, "-l").is_some() => {
                ToolOutput::failed(1, "error: name cannot be provided when a selector is specified")
            }
            ["get", "namespace", name] => match cluster.namespaces.get(*name) {
                None => not_found("namespaces", name),
                Some(labels) if short_flag(inv, "-o") == Some("json") => {
                    let labels: serde_json::Map<String, serde_json::Value> = labels
                        .iter()
                        .filter_map(|l| l.split_once('='))
                        .map(|(k, v)| (k.to_string(), serde_json::Value::from(v)))
                        .collect();
                    ToolOutput::ok(
                        serde_json::json!({
                            "apiVersion": "v1",
                            "kind": "Namespace",
                            "metadata": { "name": name, "labels": labels },
                        })
                        .to_string(),
                    )
                }
                Some(_) => ToolOutput::ok(format!("namespace/{name}\n")),
            },
            ["create", "namespace", name] => {
                if cluster.namespaces.contains_key(*name) {
                    return ToolOutput::failed(
                        1,
                        format!("Error from server (AlreadyExists): namespaces \"{name}\" already exists"),
                    );
                }
                cluster.namespaces.insert(name.to_string(), BTreeSet::new());
                ToolOutput::ok(format!("namespace/{name} created\n"))
            }
            ["label", "namespace", name, label] => match cluster.namespaces.get_mut(*name) {
                None => not_found("namespaces", name),
                Some(labels) => {
                    let key = label.split_once('=').map_or(*label, |(k, _)| k);
                    labels.retain(|l| l.split_once('=').map_or(l.as_str(), |(k, _)| k) != key);
                    labels.insert(label.to_string());
                    ToolOutput::ok(format!("namespace/{name} labeled\n"))
                }
            },
            ["get", "secret", name] => {
                if cluster
                    .secrets
                    .contains_key(&(namespace.clone(), name.to_string()))
                {
                    ToolOutput::ok(format!("secret/{name}\n"))
                } else {
                    not_found("secrets", name)
                }
            }
            ["get", "applications.argoproj.io", name] => {
                if !cluster.argocd_installed() {
                    return ToolOutput::failed(
                        1,
                        "error: the server doesn't have a resource type \"applications\"",
                    );
                }
                if cluster.applications.contains_key(*name) {
                    ToolOutput::ok(format!("application.argoproj.io/{name}\n"))
                } else {
                    not_found("applications.argoproj.io", name)
                }
            }
            ["apply"] => apply(
                cluster,
                inv.stdin_payload().unwrap_or_default(),
                app_health,
            ),
            _ => ToolOutput::failed(1, format!("unexpected kubectl invocation: {inv}")),
        }
    }
}

fn record(name: &str, health: HealthStatus) -> ApplicationRecord {
    ApplicationRecord {
        name: name.to_string(),
        namespace: "argocd".to_string(),
        sync_status: SyncStatus::Synced,
        health_status: health,
    }
}

fn context_cluster<'a>(
    clusters: &'a mut BTreeMap<String, ClusterState>,
    context: Option<&str>,
) -> Option<&'a mut ClusterState> {
    let name = context?.strip_prefix("kind-")?;
    clusters.get_mut(name)
}

fn short_flag<'a>(inv: &'a Invocation, flag: &str) -> Option<&'a str> {
    let index = inv.args.iter().position(|a| a == flag)?;
    inv.args.get(index + 1).map(String::as_str)
}

fn not_found(resource: &str, name: &str) -> ToolOutput {
    ToolOutput::failed(
        1,
        format!("Error from server (NotFound): {resource} \"{name}\" not found"),
    )
}

fn apply(cluster: &mut ClusterState, manifest: &str, app_health: HealthStatus) -> ToolOutput {
    let Ok(doc) = serde_json::from_str::<serde_json::Value>(manifest) else {
        return ToolOutput::failed(1, "error: error parsing STDIN");
    };
    let kind = doc["kind"].as_str().unwrap_or_default();
    let name = doc["metadata"]["name"].as_str().unwrap_or_default().to_string();
    let namespace = doc["metadata"]["namespace"]
        .as_str()
        .unwrap_or("default")
        .to_string();

    if !cluster.namespaces.contains_key(&namespace) {
        return not_found("namespaces", &namespace);
    }

    match kind {
        "Secret" => {
            cluster.secrets.insert((namespace, name.clone()), doc);
            ToolOutput::ok(format!("secret/{name} created\n"))
        }
        "Application" => {
            if !cluster.argocd_installed() {
                return ToolOutput::failed(
                    1,
                    "error: resource mapping not found for name: \"application\": ensure CRDs are installed first",
                );
            }
            cluster
                .applications
                .insert(name.clone(), record(&name, app_health));
            ToolOutput::ok(format!("application.argoproj.io/{name} created\n"))
        }
        other => ToolOutput::failed(1, format!("error: unsupported kind {other}")),
    }
}

/// The observer is bound to one context and every story uses one cluster
fn only_cluster(state: &State) -> Option<&ClusterState> {
    state.clusters.values().next()
}

fn workload_readiness(cluster: &ClusterState, selector: &ResourceSelector) -> Readiness {
    let name = selector.name.as_deref().unwrap_or_default();
    let namespace = selector.namespace.as_deref().unwrap_or_default();
    let cni = cluster.cni_ready();
    let scheduled = |replicas: u32| Readiness::counts(replicas, if cni { replicas } else { 0 });

    match (selector.kind, namespace, name) {
        (ResourceKind::DaemonSet, "kube-system", "cilium") if cni => scheduled(NODES),
        (ResourceKind::Deployment, "kube-system", "cilium-operator") if cni => scheduled(1),
        (ResourceKind::Deployment, "kube-system", "coredns") => scheduled(2),
        (ResourceKind::Deployment, "argocd", "argocd-server" | "argocd-repo-server")
        | (ResourceKind::StatefulSet, "argocd", "argocd-application-controller")
            if cluster.argocd_installed() =>
        {
            scheduled(1)
        }
        _ => Readiness::absent(),
    }
}

#[async_trait]
impl ToolInvoker for FakePlatform {
    async fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput> {
        self.log.lock().unwrap().push(invocation.clone());
        Ok(self.run(invocation))
    }
}

#[async_trait]
impl ClusterObserver for FakePlatform {
    async fn readiness(&self, selector: &ResourceSelector) -> Result<Readiness> {
        let state = self.state.lock().unwrap();
        let Some(cluster) = only_cluster(&state) else {
            return Err(Error::validation("connection refused"));
        };

        let readiness = match selector.kind {
            ResourceKind::ApiServer => Readiness::counts(1, 1),
            ResourceKind::Node => {
                Readiness::counts(NODES, if cluster.cni_ready() { NODES } else { 0 })
            }
            ResourceKind::Namespace => {
                let name = selector.name.as_deref().unwrap_or_default();
                if cluster.namespaces.contains_key(name) {
                    Readiness::counts(1, 1)
                } else {
                    Readiness::absent()
                }
            }
            // Argo CD syncs the sample workload once the workloads root app exists
            ResourceKind::Deployment | ResourceKind::Pod | ResourceKind::Service
                if cluster.applications.contains_key("workloads")
                    && selector.namespace.as_deref() == Some("app") =>
            {
                Readiness::counts(1, 1)
            }
            _ => workload_readiness(cluster, selector),
        };
        Ok(readiness)
    }
}

#[async_trait]
impl ApplicationSource for FakePlatform {
    async fn discover(&self) -> Result<Vec<ApplicationRecord>> {
        if self.discovery_fails {
            return Err(Error::validation("applications.argoproj.io is forbidden"));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .clusters
            .values()
            .flat_map(|c| c.applications.values().cloned())
            .collect())
    }

    async fn fetch(&self, name: &str, _namespace: &str) -> Result<Option<ApplicationRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .clusters
            .values()
            .find_map(|c| c.applications.get(name).cloned()))
    }
}
