//! The device registry: single owner of device health snapshots.
//!
//! Writes update an in-memory map and the persistent store together, so a
//! restart recovers the last known fleet state. Readers get cheap clones of
//! the in-memory view.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use ringleader_state::{DeviceHealth, RingId, StateStore};
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};
use crate::health::{device_risk_score, is_healthy, StressProfile};

pub struct DeviceRegistry {
    store: StateStore,
    devices: RwLock<HashMap<String, DeviceHealth>>,
}

impl DeviceRegistry {
    /// Create a registry, loading any devices already in the store.
    pub fn new(store: StateStore) -> RegistryResult<Self> {
        let mut devices = HashMap::new();
        for health in store.list_devices()? {
            devices.insert(health.agent_id.clone(), health);
        }
        if !devices.is_empty() {
            info!(count = devices.len(), "devices recovered from store");
        }
        Ok(Self {
            store,
            devices: RwLock::new(devices),
        })
    }

    /// Insert or update a device snapshot, stamping `last_updated`.
    pub fn upsert(&self, mut health: DeviceHealth) -> RegistryResult<()> {
        health.last_updated = Utc::now();
        // Ring assignment is owned by the balancer; an update from the
        // device itself must not reset an existing assignment.
        if health.assigned_ring == RingId::Unassigned {
            if let Some(existing) = self.devices.read().unwrap().get(&health.agent_id) {
                health.assigned_ring = existing.assigned_ring;
            }
        }
        self.store.put_device(&health)?;
        self.devices
            .write()
            .unwrap()
            .insert(health.agent_id.clone(), health);
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Option<DeviceHealth> {
        self.devices.read().unwrap().get(agent_id).cloned()
    }

    pub fn list(&self) -> Vec<DeviceHealth> {
        self.devices.read().unwrap().values().cloned().collect()
    }

    /// Devices currently assigned to the given ring.
    pub fn list_in_ring(&self, ring: RingId) -> Vec<DeviceHealth> {
        self.devices
            .read()
            .unwrap()
            .values()
            .filter(|d| d.assigned_ring == ring)
            .cloned()
            .collect()
    }

    /// Remove a device. Returns its last snapshot if it existed.
    pub fn remove(&self, agent_id: &str) -> RegistryResult<Option<DeviceHealth>> {
        let removed = self.devices.write().unwrap().remove(agent_id);
        if removed.is_some() {
            self.store.delete_device(agent_id)?;
            debug!(%agent_id, "device removed from registry");
        }
        Ok(removed)
    }

    /// Move a device to a ring.
    pub fn set_ring(&self, agent_id: &str, ring: RingId) -> RegistryResult<()> {
        let mut devices = self.devices.write().unwrap();
        let health = devices
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::DeviceNotFound(agent_id.to_string()))?;
        health.assigned_ring = ring;
        health.last_updated = Utc::now();
        self.store.put_device(health)?;
        Ok(())
    }

    /// Overwrite a device's raw metrics with a named stress profile.
    pub fn apply_stress(&self, agent_id: &str, profile: StressProfile) -> RegistryResult<()> {
        let mut devices = self.devices.write().unwrap();
        let health = devices
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::DeviceNotFound(agent_id.to_string()))?;
        let (cpu, memory, disk) = profile.metrics();
        health.cpu_usage = cpu;
        health.memory_usage = memory;
        health.disk_usage = disk;
        health.last_updated = Utc::now();
        self.store.put_device(health)?;
        info!(%agent_id, ?profile, "stress profile applied");
        Ok(())
    }

    /// Healthy/unhealthy split of the current fleet.
    pub fn health_summary(&self) -> (usize, usize) {
        let devices = self.devices.read().unwrap();
        let healthy = devices.values().filter(|d| is_healthy(d)).count();
        (healthy, devices.len() - healthy)
    }

    /// Risk score for a registered device.
    pub fn risk_of(&self, agent_id: &str) -> Option<u8> {
        self.devices
            .read()
            .unwrap()
            .get(agent_id)
            .map(device_risk_score)
    }
}
