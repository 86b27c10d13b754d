//! ringleader-registry — device registry with health and risk scoring.
//!
//! The [`DeviceRegistry`] is the single owner of device health snapshots:
//! all reads and writes go through it, and it keeps the persistent store in
//! sync with an in-memory view. Health classification and risk scoring live
//! here as free functions so other crates can evaluate snapshots without a
//! registry instance.

pub mod error;
pub mod health;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use health::{device_risk_score, is_healthy, risk_score, StressProfile};
pub use registry::DeviceRegistry;
