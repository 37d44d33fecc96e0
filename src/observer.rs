//! Read-only view of live cluster state
//!
//! Health predicates ask a [`ClusterObserver`] how ready a resource is; the
//! convergence monitor asks an [`ApplicationSource`] which Argo CD
//! applications exist and how healthy they are. [`KubeObserver`] implements
//! both on kube-rs against the kind cluster's kube context.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};
use kube::api::{Api, DynamicObject, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::convergence::{ApplicationRecord, ApplicationSource};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// Connection timeout for the local API server
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for API requests
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Kinds of resources tasks act on and predicates observe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// The kind cluster itself
    Cluster,
    /// The Kubernetes API server
    ApiServer,
    /// A Helm chart repository registered with the local helm client
    HelmRepository,
    /// A Helm release
    HelmRelease,
    /// Cluster nodes
    Node,
    /// Namespace
    Namespace,
    /// DaemonSet
    DaemonSet,
    /// Deployment
    Deployment,
    /// StatefulSet
    StatefulSet,
    /// Pods matching a label selector
    Pod,
    /// Service
    Service,
    /// Secret
    Secret,
    /// Argo CD Application
    Application,
}

impl ResourceKind {
    /// Lowercase name used in selectors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::ApiServer => "apiserver",
            Self::HelmRepository => "helmrepository",
            Self::HelmRelease => "helmrelease",
            Self::Node => "nodes",
            Self::Namespace => "namespace",
            Self::DaemonSet => "daemonset",
            Self::Deployment => "deployment",
            Self::StatefulSet => "statefulset",
            Self::Pod => "pods",
            Self::Service => "service",
            Self::Secret => "secret",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the resource a task targets or a predicate observes
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceSelector {
    /// Resource kind
    pub kind: ResourceKind,
    /// Resource name, if selecting a single object
    pub name: Option<String>,
    /// Namespace for namespaced kinds
    pub namespace: Option<String>,
    /// Label selector for kinds observed as a set
    pub label_selector: Option<String>,
}

impl ResourceSelector {
    /// A namespaced object by name
    pub fn named(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            label_selector: None,
        }
    }

    /// A cluster-scoped (or cluster-external) object by name
    pub fn cluster_scoped(kind: ResourceKind, name: &str) -> Self {
        Self {
            kind,
            name: Some(name.to_string()),
            namespace: None,
            label_selector: None,
        }
    }

    /// A set of objects matching `selector` in `namespace`
    pub fn labelled(kind: ResourceKind, namespace: &str, selector: &str) -> Self {
        Self {
            kind,
            name: None,
            namespace: Some(namespace.to_string()),
            label_selector: Some(selector.to_string()),
        }
    }

    /// The API server of the current cluster
    pub fn api_server() -> Self {
        Self {
            kind: ResourceKind::ApiServer,
            name: None,
            namespace: None,
            label_selector: None,
        }
    }

    /// All nodes of the current cluster
    pub fn nodes() -> Self {
        Self {
            kind: ResourceKind::Node,
            ..Self::api_server()
        }
    }

    fn require_name(&self) -> Result<&str> {
        self.name
            .as_deref()
            .ok_or_else(|| Error::validation(format!("selector {self} has no name")))
    }

    fn require_namespace(&self) -> Result<&str> {
        self.namespace
            .as_deref()
            .ok_or_else(|| Error::validation(format!("selector {self} has no namespace")))
    }
}

impl fmt::Display for ResourceSelector {
    /// `kind[/namespace][/name][[labels]]`, e.g. `daemonset/kube-system/cilium`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ns) = &self.namespace {
            write!(f, "/{ns}")?;
        }
        if let Some(name) = &self.name {
            write!(f, "/{name}")?;
        }
        if let Some(labels) = &self.label_selector {
            write!(f, "[{labels}]")?;
        }
        Ok(())
    }
}

/// A single observation of a resource
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Whether the resource (or, for sets, any member) exists
    pub exists: bool,
    /// Replicas, pods or nodes that should be ready
    pub desired: u32,
    /// Replicas, pods or nodes that are ready
    pub ready: u32,
}

impl Readiness {
    /// The resource does not exist
    pub fn absent() -> Self {
        Self::default()
    }

    /// The resource exists with the given counts
    pub fn counts(desired: u32, ready: u32) -> Self {
        Self {
            exists: true,
            desired,
            ready,
        }
    }
}

/// Observes live cluster resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterObserver: Send + Sync {
    /// Current readiness of the selected resource.
    ///
    /// A resource that does not exist yet is `Ok(Readiness::absent())`, not an error.
    async fn readiness(&self, selector: &ResourceSelector) -> Result<Readiness>;
}

/// Argo CD `Application` resource definition
pub fn application_api_resource() -> ApiResource {
    ApiResource {
        group: "argoproj.io".to_string(),
        version: "v1alpha1".to_string(),
        api_version: "argoproj.io/v1alpha1".to_string(),
        kind: "Application".to_string(),
        plural: "applications".to_string(),
    }
}

/// kube-rs backed observer for one kube context
///
/// The client is built lazily on first use: the context does not exist until
/// the cluster phase has created it.
pub struct KubeObserver {
    context: String,
    client: OnceCell<Client>,
    retry: RetryConfig,
}

impl KubeObserver {
    /// Observer for the given kubeconfig context, e.g. `kind-platform`
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            client: OnceCell::new(),
            retry: RetryConfig::default(),
        }
    }

    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| create_client(&self.context))
            .await
    }

    async fn get_optional<K>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>
    where
        K: kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
    {
        let client = self.client().await?.clone();
        let api: Api<K> = match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::default_namespaced(client),
        };
        match api.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                trace!(name, "not found yet");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn nodes_readiness(&self, selector: &ResourceSelector) -> Result<Readiness> {
        let nodes: Api<Node> = Api::all(self.client().await?.clone());
        let mut params = ListParams::default();
        if let Some(labels) = &selector.label_selector {
            params = params.labels(labels);
        }
        let list = nodes.list(&params).await?;

        let desired = list.items.len() as u32;
        let ready = list.items.iter().filter(|n| node_is_ready(n)).count() as u32;
        Ok(Readiness {
            exists: desired > 0,
            desired,
            ready,
        })
    }

    async fn pods_readiness(&self, selector: &ResourceSelector) -> Result<Readiness> {
        let pods: Api<Pod> = Api::namespaced(
            self.client().await?.clone(),
            selector.require_namespace()?,
        );
        let mut params = ListParams::default();
        if let Some(labels) = &selector.label_selector {
            params = params.labels(labels);
        }
        let list = pods.list(&params).await?;

        let desired = list.items.len() as u32;
        let running = list
            .items
            .iter()
            .filter(|p| {
                p.status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .is_some_and(|phase| phase == "Running")
            })
            .count() as u32;
        Ok(Readiness {
            exists: desired > 0,
            desired,
            ready: running,
        })
    }

    async fn namespace_readiness(&self, name: &str) -> Result<Readiness> {
        let namespaces: Api<Namespace> = Api::all(self.client().await?.clone());
        match namespaces.get(name).await {
            Ok(_) => Ok(Readiness::counts(1, 1)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(Readiness::absent()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Create a client for `context` from the default kubeconfig with timeouts
pub async fn create_client(context: &str) -> Result<Client> {
    let kubeconfig = Kubeconfig::read()
        .map_err(|e| Error::validation(format!("failed to read kubeconfig: {e}")))?;
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| Error::validation(format!("failed to load context {context}: {e}")))?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    debug!(context, "created kube client");
    Ok(Client::try_from(config)?)
}

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn to_count(value: Option<i32>) -> u32 {
    value.unwrap_or(0).max(0) as u32
}

#[async_trait]
impl ClusterObserver for KubeObserver {
    async fn readiness(&self, selector: &ResourceSelector) -> Result<Readiness> {
        match selector.kind {
            ResourceKind::ApiServer => {
                let info = self.client().await?.apiserver_version().await?;
                trace!(version = %info.git_version, "apiserver reachable");
                Ok(Readiness::counts(1, 1))
            }
            ResourceKind::Node => self.nodes_readiness(selector).await,
            ResourceKind::Pod => self.pods_readiness(selector).await,
            ResourceKind::Namespace => self.namespace_readiness(selector.require_name()?).await,
            ResourceKind::DaemonSet => {
                let ds: Option<DaemonSet> = self
                    .get_optional(selector.namespace.as_deref(), selector.require_name()?)
                    .await?;
                Ok(ds.map_or_else(Readiness::absent, |ds| {
                    let status = ds.status.unwrap_or_default();
                    Readiness::counts(
                        status.desired_number_scheduled.max(0) as u32,
                        status.number_ready.max(0) as u32,
                    )
                }))
            }
            ResourceKind::Deployment => {
                let deploy: Option<Deployment> = self
                    .get_optional(selector.namespace.as_deref(), selector.require_name()?)
                    .await?;
                Ok(deploy.map_or_else(Readiness::absent, |d| {
                    let desired = to_count(Some(d.spec.and_then(|s| s.replicas).unwrap_or(1)));
                    let available = to_count(d.status.and_then(|s| s.available_replicas));
                    Readiness::counts(desired, available)
                }))
            }
            ResourceKind::StatefulSet => {
                let sts: Option<StatefulSet> = self
                    .get_optional(selector.namespace.as_deref(), selector.require_name()?)
                    .await?;
                Ok(sts.map_or_else(Readiness::absent, |s| {
                    let desired = to_count(Some(s.spec.and_then(|s| s.replicas).unwrap_or(1)));
                    let ready = to_count(s.status.and_then(|s| s.ready_replicas));
                    Readiness::counts(desired, ready)
                }))
            }
            ResourceKind::Service => {
                let svc: Option<Service> = self
                    .get_optional(selector.namespace.as_deref(), selector.require_name()?)
                    .await?;
                Ok(svc.map_or_else(Readiness::absent, |_| Readiness::counts(1, 1)))
            }
            // Applications are followed by the convergence monitor, the rest
            // only by the tasks that create them
            ResourceKind::Cluster
            | ResourceKind::HelmRepository
            | ResourceKind::HelmRelease
            | ResourceKind::Secret
            | ResourceKind::Application => Err(Error::validation(format!(
                "{} readiness is not observed",
                selector.kind
            ))),
        }
    }
}

#[async_trait]
impl ApplicationSource for KubeObserver {
    async fn discover(&self) -> Result<Vec<ApplicationRecord>> {
        let ar = application_api_resource();
        let client = self.client().await?.clone();
        let api: Api<DynamicObject> = Api::all_with(client, &ar);

        let list = retry_with_backoff(&self.retry, "list-applications", || {
            let api = api.clone();
            async move { api.list(&ListParams::default()).await }
        })
        .await?;

        let mut records: Vec<ApplicationRecord> =
            list.items.iter().filter_map(ApplicationRecord::from_dynamic).collect();
        records.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(records)
    }

    async fn fetch(&self, name: &str, namespace: &str) -> Result<Option<ApplicationRecord>> {
        let ar = application_api_resource();
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client().await?.clone(), namespace, &ar);
        match api.get(name).await {
            Ok(obj) => Ok(ApplicationRecord::from_dynamic(&obj)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
