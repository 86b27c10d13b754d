//! ringleader-rollout — ring-by-ring deployment progression.
//!
//! The [`DeploymentScheduler`] advances a deployment through its rings in
//! order: dwell, gate, advance on pass, cascade-stop on fail. Gating is a
//! pluggable async callback; [`gate::threshold_gate`] provides the built-in
//! threshold evaluation over a ring's device snapshots.

pub mod error;
pub mod gate;
pub mod scheduler;

pub use error::{RolloutError, RolloutResult};
pub use gate::{evaluate_thresholds, threshold_gate, GateDecision, GateFn, GateRequest, GateStatus};
pub use scheduler::{DeploymentScheduler, RolloutConfig, TimerInfo};
