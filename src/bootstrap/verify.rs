//! Post-handoff checks on the sample workload
//!
//! Argo CD deploys the workload from the GitOps repository, so its absence is
//! reported but never fails the run.

use crate::health::{HealthPredicate, SuccessCondition};
use crate::observer::{ResourceKind, ResourceSelector};
use crate::phase::Phase;
use crate::session::BootstrapSession;

/// Upper bound on checks per verification wait
pub const VERIFY_MAX_ITERATIONS: u32 = 6;

/// Deployment available, pods running, Service present
pub fn workload_phase(session: &BootstrapSession) -> Phase {
    let workload = session.workload();
    let ns = workload.namespace.as_str();
    let name = workload.name.as_str();
    let check = |selector, condition| {
        HealthPredicate::new(
            selector,
            condition,
            session.poll_interval(),
            session.max_wait_iterations().min(VERIFY_MAX_ITERATIONS),
        )
    };

    Phase::new("workload-verification", format!("Verifying workload {ns}/{name}"))
        .warn_on_failure()
        .wait(check(
            ResourceSelector::named(ResourceKind::Deployment, ns, name),
            SuccessCondition::AllReady { min: 1 },
        ))
        .wait(check(
            ResourceSelector::labelled(ResourceKind::Pod, ns, &format!("app={name}")),
            SuccessCondition::AllReady { min: 1 },
        ))
        .wait(check(
            ResourceSelector::named(ResourceKind::Service, ns, name),
            SuccessCondition::Exists,
        ))
}
