//! Integration tests for phase ordering
//!
//! These tests tell the story of what happens when a phase runs before the
//! phase it depends on. The platform rejects the action, and the sequencer
//! stops at the phase that was moved instead of carrying on.

use platform_bootstrap::bootstrap;
use platform_bootstrap::orchestrator::Orchestrator;
use platform_bootstrap::phase::{Phase, PhaseSequencer, SequencerOutcome};
use platform_bootstrap::Error;

use super::fake::FakePlatform;
use super::session;

fn position(phases: &[Phase], name: &str) -> usize {
    phases
        .iter()
        .position(|p| p.name == name)
        .unwrap_or_else(|| panic!("no phase {name}"))
}

/// Move phase `name` directly in front of phase `before`
fn move_before(phases: &mut Vec<Phase>, name: &str, before: &str) {
    let phase = phases.remove(position(phases, name));
    let at = position(phases, before);
    phases.insert(at, phase);
}

/// Move phase `name` directly behind phase `after`
fn move_after(phases: &mut Vec<Phase>, name: &str, after: &str) {
    let phase = phases.remove(position(phases, name));
    let at = position(phases, after) + 1;
    phases.insert(at, phase);
}

fn aborted(outcome: SequencerOutcome) -> (String, Error, Vec<String>) {
    match outcome {
        SequencerOutcome::Aborted {
            phase,
            error,
            reports,
        } => (phase, error, reports.into_iter().map(|r| r.name).collect()),
        SequencerOutcome::Completed { reports } => {
            panic!("expected an abort, every phase ran: {reports:?}")
        }
    }
}

// =============================================================================
// Story: Root applications before Argo CD are rejected
// =============================================================================

#[tokio::test]
async fn story_handoff_before_argocd_aborts_at_handoff() {
    let platform = FakePlatform::new();
    let session = session(&[]);
    let mut phases = bootstrap::plan(&session).unwrap();
    move_before(&mut phases, "workload-handoff", "gitops-control-plane");

    let (phase, error, ran) = aborted(
        PhaseSequencer::new(phases)
            .run(&platform, &platform)
            .await,
    );

    assert_eq!(phase, "workload-handoff");
    assert_eq!(ran.last().map(String::as_str), Some("workload-handoff"));
    assert!(!ran.contains(&"gitops-control-plane".to_string()));

    // Both root applications were attempted and both failures are reported
    match &error {
        Error::Aggregate {
            total, failures, ..
        } => {
            assert_eq!(*total, 2);
            assert_eq!(failures.len(), 2);
        }
        other => panic!("expected an aggregate error, got {other}"),
    }
    let diagnostics = error.diagnostics();
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics
        .iter()
        .all(|d| d.contains("ensure CRDs are installed first")));

    assert!(!platform
        .invocations()
        .iter()
        .any(|inv| inv.args.iter().any(|a| a == "argo/argo-cd")));
}

// =============================================================================
// Story: Argo CD before its namespace is rejected
// =============================================================================

#[tokio::test]
async fn story_argocd_before_namespaces_aborts_at_control_plane() {
    let platform = FakePlatform::new();
    let session = session(&[]);
    let mut phases = bootstrap::plan(&session).unwrap();
    move_after(&mut phases, "namespaces", "gitops-control-plane");

    let outcome = PhaseSequencer::new(phases)
        .run(&platform, &platform)
        .await;

    // Labelling only warns, so the run reaches the control plane
    let labels = outcome
        .reports()
        .iter()
        .find(|r| r.name == "namespace-labels")
        .expect("labels phase ran");
    assert_eq!(labels.status.label(), "warning");

    let (phase, error, _) = aborted(outcome);
    assert_eq!(phase, "gitops-control-plane");
    assert!(error
        .diagnostics()
        .iter()
        .any(|d| d.contains("namespaces \"argocd\" not found")));
}

// =============================================================================
// Story: Without a CNI nothing schedules and the DNS wait times out
// =============================================================================

#[tokio::test]
async fn story_missing_network_fabric_times_out_at_dns() {
    let platform = FakePlatform::new();
    let session = session(&[]);
    let mut phases = bootstrap::plan(&session).unwrap();
    phases.retain(|p| p.name != "network-fabric");

    let (phase, error, _) = aborted(
        PhaseSequencer::new(phases)
            .run(&platform, &platform)
            .await,
    );

    assert_eq!(phase, "dns");
    assert!(error.is_timeout());
    assert!(error.to_string().contains("after 3 checks"));
}

// =============================================================================
// Story: A missing tool stops the run before anything changes
// =============================================================================

#[tokio::test]
async fn story_missing_prerequisite_fails_fast() {
    let platform = FakePlatform::new().without_tool("kind");
    let session = session(&["--force"]);

    let result = Orchestrator::new(&session, &platform, &platform, &platform)
        .run()
        .await;

    match result {
        Err(Error::PrerequisiteNotFound { tool, hint }) => {
            assert_eq!(tool, "kind");
            assert!(hint.contains("kind.sigs.k8s.io"));
        }
        Err(other) => panic!("expected a missing prerequisite, got {other}"),
        Ok(summary) => panic!("run should not start:\n{}", summary.render()),
    }
    assert!(platform.mutations().is_empty());
    assert!(platform
        .invocations()
        .iter()
        .all(|inv| inv.program == "which"));
}
