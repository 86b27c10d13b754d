//! StateStore — redb-backed state persistence for Ringleader.
//!
//! Provides typed CRUD operations over devices, rings, deployments,
//! deployment rings, and gating templates. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEVICES).map_err(map_err!(Table))?;
        txn.open_table(RINGS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENT_RINGS).map_err(map_err!(Table))?;
        txn.open_table(GATING).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Devices ────────────────────────────────────────────────────

    /// Insert or update a device health snapshot.
    pub fn put_device(&self, health: &DeviceHealth) -> StateResult<()> {
        let value = serde_json::to_vec(health).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEVICES).map_err(map_err!(Table))?;
            table
                .insert(health.agent_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a device by agent id.
    pub fn get_device(&self, agent_id: &str) -> StateResult<Option<DeviceHealth>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEVICES).map_err(map_err!(Table))?;
        match table.get(agent_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let health: DeviceHealth =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(health))
            }
            None => Ok(None),
        }
    }

    /// List all known devices.
    pub fn list_devices(&self) -> StateResult<Vec<DeviceHealth>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEVICES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let health: DeviceHealth =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(health);
        }
        Ok(results)
    }

    /// Delete a device by agent id. Returns true if it existed.
    pub fn delete_device(&self, agent_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DEVICES).map_err(map_err!(Table))?;
            existed = table.remove(agent_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%agent_id, existed, "device deleted");
        Ok(existed)
    }

    // ── Rings ──────────────────────────────────────────────────────

    /// Insert or update a ring spec.
    pub fn put_ring(&self, spec: &RingSpec) -> StateResult<()> {
        let key = spec.table_key();
        let value = serde_json::to_vec(spec).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RINGS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a ring spec by its rollout order index.
    pub fn get_ring(&self, ring_id: u8) -> StateResult<Option<RingSpec>> {
        let key = ring_id.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RINGS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let spec: RingSpec =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(spec))
            }
            None => Ok(None),
        }
    }

    /// List all ring specs in rollout order.
    pub fn list_rings(&self) -> StateResult<Vec<RingSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RINGS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let spec: RingSpec =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(spec);
        }
        results.sort_by_key(|r| r.ring_id);
        Ok(results)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(deployment.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment_id = %deployment.id, status = ?deployment.status, "deployment stored");
        Ok(())
    }

    /// Get a deployment by id.
    pub fn get_deployment(&self, deployment_id: &str) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(deployment_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let deployment: Deployment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(deployment))
            }
            None => Ok(None),
        }
    }

    /// List all deployments.
    pub fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(deployment);
        }
        Ok(results)
    }

    // ── Deployment rings ───────────────────────────────────────────

    /// Insert or update a deployment ring.
    pub fn put_deployment_ring(&self, ring: &DeploymentRing) -> StateResult<()> {
        let key = ring.table_key();
        let value = serde_json::to_vec(ring).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENT_RINGS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get one deployment ring by its composite key.
    pub fn get_deployment_ring(
        &self,
        deployment_id: &str,
        ring_id: u8,
    ) -> StateResult<Option<DeploymentRing>> {
        let key = format!("{deployment_id}:{ring_id}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENT_RINGS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let ring: DeploymentRing =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(ring))
            }
            None => Ok(None),
        }
    }

    /// List all rings for a deployment, sorted by rollout order.
    pub fn list_deployment_rings(
        &self,
        deployment_id: &str,
    ) -> StateResult<Vec<DeploymentRing>> {
        let prefix = format!("{deployment_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENT_RINGS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let ring: DeploymentRing =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(ring);
            }
        }
        results.sort_by_key(|r| r.ring_id);
        Ok(results)
    }

    // ── Gating templates ───────────────────────────────────────────

    /// Store a gating factor template under a name (`"default"` for the
    /// global template).
    pub fn put_gating(&self, name: &str, factors: &GatingFactors) -> StateResult<()> {
        let value = serde_json::to_vec(factors).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(GATING).map_err(map_err!(Table))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a gating template by name.
    pub fn get_gating(&self, name: &str) -> StateResult<Option<GatingFactors>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(GATING).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let factors: GatingFactors =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(factors))
            }
            None => Ok(None),
        }
    }
}
