//! External ring-categorization collaborator contract.

use std::future::Future;
use std::pin::Pin;

use ringleader_state::{DeviceHealth, RingId};

/// One placement decision from the categorization collaborator.
#[derive(Debug, Clone)]
pub struct RingCategorization {
    pub device_id: String,
    pub ring: RingId,
    pub reasoning: String,
}

/// Batch categorization callback.
///
/// Takes the current device snapshots and returns a placement for each.
/// The callback owns its own latency and failure modes; an `Err` leaves all
/// memberships untouched.
pub type CategorizeFn = Box<
    dyn Fn(
            Vec<DeviceHealth>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<RingCategorization>, String>> + Send>>
        + Send
        + Sync,
>;
