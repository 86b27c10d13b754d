//! The deployment scheduler: sequential ring progression with gating.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ringleader_registry::DeviceRegistry;
use ringleader_state::{
    Deployment, DeploymentRing, DeploymentStatus, GatingFactors, RingId, RingStatus, StateStore,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{RolloutError, RolloutResult};
use crate::gate::{GateFn, GateRequest, GateStatus};

#[derive(Debug, Clone)]
pub struct RolloutConfig {
    /// Settle time after a ring goes in-progress, before gating runs.
    pub dwell: Duration,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(30),
        }
    }
}

/// Where a running deployment currently is.
#[derive(Debug, Clone)]
pub struct TimerInfo {
    pub deployment_id: String,
    pub current_ring: Option<u8>,
    pub next_check_at: Option<DateTime<Utc>>,
    pub status: DeploymentStatus,
}

struct Slot {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct DeploymentScheduler {
    store: StateStore,
    registry: Arc<DeviceRegistry>,
    gate: GateFn,
    config: RolloutConfig,
    active: Mutex<HashMap<String, Slot>>,
    timers: Mutex<HashMap<String, TimerInfo>>,
}

impl DeploymentScheduler {
    pub fn new(
        store: StateStore,
        registry: Arc<DeviceRegistry>,
        gate: GateFn,
        config: RolloutConfig,
    ) -> Self {
        Self {
            store,
            registry,
            gate,
            config,
            active: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Create a deployment with one ring record per rollout ring, counting
    /// the devices currently assigned to each.
    pub fn create_deployment(
        &self,
        name: &str,
        gating: Option<GatingFactors>,
    ) -> RolloutResult<Deployment> {
        let now = Utc::now();
        let deployment = Deployment {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: DeploymentStatus::NotStarted,
            gating,
            created_at: now,
            updated_at: now,
        };
        self.store.put_deployment(&deployment)?;
        for ring in RingId::ASSIGNABLE {
            let ring_id = ring.index().unwrap_or_default();
            self.store.put_deployment_ring(&DeploymentRing {
                deployment_id: deployment.id.clone(),
                ring_id,
                device_count: self.registry.list_in_ring(ring).len() as u32,
                status: RingStatus::NotStarted,
                failure_reason: None,
                updated_at: now,
            })?;
        }
        info!(deployment_id = %deployment.id, %name, "deployment created");
        Ok(deployment)
    }

    /// Kick off ring progression for a deployment.
    pub fn start(self: &Arc<Self>, deployment_id: &str) -> RolloutResult<()> {
        let mut deployment = self
            .store
            .get_deployment(deployment_id)?
            .ok_or_else(|| RolloutError::DeploymentNotFound(deployment_id.to_string()))?;

        let mut active = self.active.lock().unwrap();
        if let Some(slot) = active.get(deployment_id)
            && !slot.handle.is_finished()
        {
            return Err(RolloutError::AlreadyRunning(deployment_id.to_string()));
        }

        deployment.status = DeploymentStatus::InProgress;
        deployment.updated_at = Utc::now();
        self.store.put_deployment(&deployment)?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let id = deployment_id.to_string();
        let handle = tokio::spawn(async move {
            scheduler.run_deployment(id, cancel_rx).await;
        });
        active.insert(
            deployment_id.to_string(),
            Slot {
                cancel: cancel_tx,
                handle,
            },
        );
        info!(%deployment_id, "deployment started");
        Ok(())
    }

    /// Cancel a running deployment. The progression task records the
    /// Stopped statuses itself, so no ring is left half-written.
    pub fn stop(&self, deployment_id: &str) -> RolloutResult<()> {
        let active = self.active.lock().unwrap();
        match active.get(deployment_id) {
            Some(slot) if !slot.handle.is_finished() => {
                let _ = slot.cancel.send(true);
                info!(%deployment_id, "deployment stop requested");
                Ok(())
            }
            _ => {
                self.store
                    .get_deployment(deployment_id)?
                    .ok_or_else(|| RolloutError::DeploymentNotFound(deployment_id.to_string()))?;
                warn!(%deployment_id, "stop requested but deployment is not running");
                Ok(())
            }
        }
    }

    /// Wait for a deployment's progression task to finish (it also finishes
    /// after a stop). No-op for deployments that are not running.
    pub async fn wait(&self, deployment_id: &str) {
        let slot = self.active.lock().unwrap().remove(deployment_id);
        if let Some(slot) = slot {
            let _ = slot.handle.await;
        }
    }

    /// Cancel every running deployment and wait for each progression task
    /// to record its Stopped statuses. Daemon shutdown calls this so no
    /// ring is left in progress in the store.
    pub async fn stop_all(&self) {
        let slots: Vec<(String, Slot)> = {
            let mut active = self.active.lock().unwrap();
            active.drain().collect()
        };
        for (deployment_id, slot) in slots {
            if !slot.handle.is_finished() {
                let _ = slot.cancel.send(true);
                info!(%deployment_id, "deployment stopped for shutdown");
            }
            let _ = slot.handle.await;
        }
    }

    /// Timer position for a deployment, if it has ever been started.
    pub fn timer_info(&self, deployment_id: &str) -> Option<TimerInfo> {
        self.timers.lock().unwrap().get(deployment_id).cloned()
    }

    fn set_timer(
        &self,
        deployment_id: &str,
        current_ring: Option<u8>,
        next_check_at: Option<DateTime<Utc>>,
        status: DeploymentStatus,
    ) {
        self.timers.lock().unwrap().insert(
            deployment_id.to_string(),
            TimerInfo {
                deployment_id: deployment_id.to_string(),
                current_ring,
                next_check_at,
                status,
            },
        );
    }

    fn update_ring(
        &self,
        mut ring: DeploymentRing,
        status: RingStatus,
        failure_reason: Option<String>,
    ) -> RolloutResult<DeploymentRing> {
        ring.status = status;
        ring.failure_reason = failure_reason;
        ring.updated_at = Utc::now();
        self.store.put_deployment_ring(&ring)?;
        Ok(ring)
    }

    fn finish_deployment(&self, deployment_id: &str, status: DeploymentStatus) -> RolloutResult<()> {
        if let Some(mut deployment) = self.store.get_deployment(deployment_id)? {
            deployment.status = status;
            deployment.updated_at = Utc::now();
            self.store.put_deployment(&deployment)?;
        }
        self.set_timer(deployment_id, None, None, status);
        info!(%deployment_id, ?status, "deployment finished");
        Ok(())
    }

    fn gating_factors(&self, deployment: &Deployment) -> GatingFactors {
        if let Some(factors) = &deployment.gating {
            return factors.clone();
        }
        match self.store.get_gating("default") {
            Ok(Some(factors)) => factors,
            Ok(None) => GatingFactors::default(),
            Err(e) => {
                warn!(error = %e, "default gating lookup failed, using built-in defaults");
                GatingFactors::default()
            }
        }
    }

    /// Mark every ring that has not finished as Stopped.
    fn stop_remaining_rings(&self, deployment_id: &str) -> RolloutResult<()> {
        for ring in self.store.list_deployment_rings(deployment_id)? {
            if matches!(ring.status, RingStatus::NotStarted | RingStatus::InProgress) {
                self.update_ring(ring, RingStatus::Stopped, None)?;
            }
        }
        Ok(())
    }

    async fn run_deployment(self: Arc<Self>, deployment_id: String, mut cancel: watch::Receiver<bool>) {
        if let Err(e) = self.advance_rings(&deployment_id, &mut cancel).await {
            warn!(%deployment_id, error = %e, "deployment loop aborted");
            let _ = self.finish_deployment(&deployment_id, DeploymentStatus::Failed);
        }
    }

    async fn advance_rings(
        &self,
        deployment_id: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> RolloutResult<()> {
        let deployment = self
            .store
            .get_deployment(deployment_id)?
            .ok_or_else(|| RolloutError::DeploymentNotFound(deployment_id.to_string()))?;
        let factors = self.gating_factors(&deployment);

        for ring in self.store.list_deployment_rings(deployment_id)? {
            if *cancel.borrow() {
                self.stop_remaining_rings(deployment_id)?;
                self.finish_deployment(deployment_id, DeploymentStatus::Stopped)?;
                return Ok(());
            }

            let ring_id = RingId::from_index(ring.ring_id).unwrap_or(RingId::Canary);
            let devices = self.registry.list_in_ring(ring_id);

            // An empty ring needs no dwell and no gating.
            if devices.is_empty() {
                info!(%deployment_id, ring = %ring_id, "ring empty, completed immediately");
                self.update_ring(ring, RingStatus::Completed, None)?;
                continue;
            }

            let mut ring = self.update_ring(ring, RingStatus::InProgress, None)?;
            ring.device_count = devices.len() as u32;
            self.store.put_deployment_ring(&ring)?;

            let dwell_until = Utc::now()
                + chrono::Duration::from_std(self.config.dwell)
                    .unwrap_or_else(|_| chrono::Duration::seconds(30));
            self.set_timer(
                deployment_id,
                Some(ring.ring_id),
                Some(dwell_until),
                DeploymentStatus::InProgress,
            );
            info!(%deployment_id, ring = %ring_id, devices = devices.len(), dwell = ?self.config.dwell, "ring in progress");

            tokio::select! {
                _ = tokio::time::sleep(self.config.dwell) => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        self.update_ring(ring, RingStatus::Stopped, None)?;
                        self.stop_remaining_rings(deployment_id)?;
                        self.finish_deployment(deployment_id, DeploymentStatus::Stopped)?;
                        return Ok(());
                    }
                }
            }

            // Gate on a fresh snapshot; the dwell exists so these metrics
            // reflect the ring actually running the rollout.
            let request = GateRequest {
                ring_name: ring_id.to_string(),
                devices: self.registry.list_in_ring(ring_id),
                factors: factors.clone(),
            };
            let decision = match (self.gate)(request).await {
                Ok(decision) => decision,
                // A gating service failure never passes a ring.
                Err(e) => {
                    let err = RolloutError::Gate(e);
                    warn!(%deployment_id, ring = %ring_id, error = %err, "gate invocation failed");
                    crate::gate::GateDecision::failed(err.to_string())
                }
            };

            match decision.status {
                GateStatus::Passed => {
                    info!(%deployment_id, ring = %ring_id, "gating passed");
                    self.update_ring(ring, RingStatus::Completed, None)?;
                }
                GateStatus::Failed => {
                    let reason = decision
                        .failure_reason
                        .unwrap_or_else(|| "gating failed".to_string());
                    warn!(%deployment_id, ring = %ring_id, %reason, "gating failed, stopping rollout");
                    self.update_ring(ring, RingStatus::Failed, Some(reason))?;
                    self.stop_remaining_rings(deployment_id)?;
                    self.finish_deployment(deployment_id, DeploymentStatus::Failed)?;
                    return Ok(());
                }
            }
        }

        self.finish_deployment(deployment_id, DeploymentStatus::Completed)?;
        Ok(())
    }
}
