//! Admin credentials for the observability stack
//!
//! The credential only ever travels on kubectl's stdin. It never appears in
//! an argument list, a log line or a file. The session, the rendered manifest
//! and the stdin payload hold it in [`Zeroizing`] buffers, and the copy inside
//! the `Secret` is wiped once rendered. Buffers serde_json discards while
//! growing its output are not.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use zeroize::{Zeroize, Zeroizing};

use super::{ClusterTools, MONITORING_NAMESPACE};
use crate::observer::{ResourceKind, ResourceSelector};
use crate::phase::Phase;
use crate::task::{ExistsCheck, IdempotentTask};
use crate::{Error, Result};

/// Secret the Grafana chart reads its admin login from
pub const ADMIN_SECRET_NAME: &str = "grafana-admin-credentials";

/// Admin user name stored alongside the password
pub const ADMIN_USER: &str = "admin";

/// Render the Secret manifest as JSON
pub fn admin_secret_manifest(credential: &str) -> Result<Zeroizing<String>> {
    let mut secret = Secret {
        metadata: ObjectMeta {
            name: Some(ADMIN_SECRET_NAME.to_string()),
            namespace: Some(MONITORING_NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                "platform-bootstrap".to_string(),
            )])),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(BTreeMap::from([
            ("admin-user".to_string(), ADMIN_USER.to_string()),
            ("admin-password".to_string(), credential.to_string()),
        ])),
        ..Default::default()
    };

    let manifest = serde_json::to_string(&secret)
        .map(Zeroizing::new)
        .map_err(|e| Error::serialization(format!("secret {ADMIN_SECRET_NAME}: {e}")));
    if let Some(data) = secret.string_data.as_mut() {
        data.values_mut().for_each(Zeroize::zeroize);
    }
    manifest
}

/// Apply the admin Secret unless it already exists
pub fn credentials_phase(tools: ClusterTools<'_>, credential: &str) -> Result<Phase> {
    let manifest = admin_secret_manifest(credential)?;
    let task = IdempotentTask::new(
        "admin-credentials",
        ResourceSelector::named(ResourceKind::Secret, MONITORING_NAMESPACE, ADMIN_SECRET_NAME),
    )
    .when_absent(ExistsCheck::Succeeds(tools.kubectl_query(&[
        "get",
        "secret",
        ADMIN_SECRET_NAME,
        "-n",
        MONITORING_NAMESPACE,
        "-o",
        "name",
    ])))
    .run(tools.kubectl_mutation(&["apply", "-f", "-"]).with_stdin(manifest.as_str()));

    Ok(Phase::new("credentials", "Storing observability admin credentials").task(task))
}
