//! redb table definitions for the Ringleader state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Composite keys follow the pattern `{deployment_id}:{ring_id}`.

use redb::TableDefinition;

/// Device health snapshots keyed by `{agent_id}`.
pub const DEVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("devices");

/// Ring configuration keyed by `{ring_id}`; listings sort numerically on read.
pub const RINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("rings");

/// Deployments keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Per-ring deployment state keyed by `{deployment_id}:{ring_id}`.
pub const DEPLOYMENT_RINGS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("deployment_rings");

/// Gating factor templates keyed by name (`"default"` for the global template).
pub const GATING: TableDefinition<&str, &[u8]> = TableDefinition::new("gating");
