//! ringleader-rings — ring membership and rebalancing.
//!
//! The [`RingBalancer`] owns per-ring membership lists and is the only
//! component that moves devices between rings. Automatic placement uses the
//! health heuristic from `ringleader-registry`; an optional external
//! categorization callback can batch-place devices instead, and both paths
//! funnel through the same assignment primitive so a device is never in two
//! rings at once.

pub mod balancer;
pub mod categorize;
pub mod error;

pub use balancer::RingBalancer;
pub use categorize::{CategorizeFn, RingCategorization};
pub use error::{RingsError, RingsResult};
