//! Platform bootstrap - brings up a kind cluster and hands it to GitOps
//!
//! The bootstrap creates a local multi-node cluster, installs the Cilium CNI
//! and Argo CD, applies the root applications, and then waits for whatever
//! the GitOps repository declares to become healthy.
//!
//! # Architecture
//!
//! Every step is an idempotent task: a read-only existence check guarding a
//! state-changing command. Re-running against a bootstrapped cluster changes
//! nothing. Tasks are grouped into phases that run strictly in order, each
//! with its own failure policy.
//!
//! # Modules
//!
//! - [`tool`] - External command invocation (kind, kubectl, helm)
//! - [`observer`] - Read-only cluster state through the Kubernetes API
//! - [`health`] - Bounded polling and health predicates
//! - [`task`] - Idempotent create-if-absent tasks
//! - [`group`] - Concurrent task groups with aggregated results
//! - [`phase`] - Phases and the phase sequencer
//! - [`convergence`] - Argo CD application discovery and convergence
//! - [`session`] - Command line and environment configuration
//! - [`bootstrap`] - The concrete platform plan
//! - [`orchestrator`] - End-to-end run and exit status
//! - [`report`] - Summary tables
//! - [`retry`] - Exponential backoff for transient API errors
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod bootstrap;
pub mod convergence;
pub mod error;
pub mod group;
pub mod health;
pub mod observer;
pub mod orchestrator;
pub mod phase;
pub mod report;
pub mod retry;
pub mod session;
pub mod task;
pub mod tool;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
