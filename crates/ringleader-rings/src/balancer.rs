//! Ring membership management and the periodic rebalancer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use rand::seq::IndexedRandom;
use ringleader_channel::ChannelManager;
use ringleader_registry::{is_healthy, DeviceRegistry};
use ringleader_state::{DeviceHealth, Message, MessagePayload, RingId};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::categorize::{CategorizeFn, RingCategorization};
use crate::error::{RingsError, RingsResult};

/// How often the rebalance pass runs.
pub const REBALANCE_PERIOD: Duration = Duration::from_secs(30);

/// Probability of a random diversity move per device per rebalance pass.
const DIVERSITY_PROBABILITY: f64 = 0.1;

/// Rings an unhealthy device may occupy.
const LOW_RISK_RINGS: [RingId; 2] = [RingId::Canary, RingId::LowRisk];

/// Owns ring membership lists and moves devices between rings.
///
/// Every placement path (auto-assignment, rebalancing, external
/// categorization) goes through [`RingBalancer::assign`], which removes the
/// device from its old ring before inserting it into the new one.
pub struct RingBalancer {
    registry: Arc<DeviceRegistry>,
    channels: ChannelManager,
    memberships: RwLock<HashMap<RingId, Vec<String>>>,
}

impl RingBalancer {
    /// Create a balancer, seeding memberships from already-assigned devices.
    pub fn new(registry: Arc<DeviceRegistry>, channels: ChannelManager) -> Self {
        let mut memberships: HashMap<RingId, Vec<String>> = RingId::ASSIGNABLE
            .iter()
            .map(|&ring| (ring, Vec::new()))
            .collect();
        for device in registry.list() {
            if let Some(members) = memberships.get_mut(&device.assigned_ring) {
                members.push(device.agent_id);
            }
        }
        Self {
            registry,
            channels,
            memberships: RwLock::new(memberships),
        }
    }

    /// Current members of a ring.
    pub fn members(&self, ring: RingId) -> Vec<String> {
        self.memberships
            .read()
            .unwrap()
            .get(&ring)
            .cloned()
            .unwrap_or_default()
    }

    /// The ring a device currently belongs to, if any.
    pub fn ring_of(&self, agent_id: &str) -> Option<RingId> {
        let memberships = self.memberships.read().unwrap();
        memberships
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == agent_id))
            .map(|(&ring, _)| ring)
    }

    /// Move a device into a ring.
    ///
    /// Removes it from its old ring first, persists the assignment through
    /// the registry, and notifies the agent.
    pub fn assign(&self, agent_id: &str, ring: RingId, reason: &str) -> RingsResult<()> {
        if self.registry.get(agent_id).is_none() {
            return Err(RingsError::UnknownDevice(agent_id.to_string()));
        }
        {
            let mut memberships = self.memberships.write().unwrap();
            for members in memberships.values_mut() {
                members.retain(|m| m != agent_id);
            }
            memberships.entry(ring).or_default().push(agent_id.to_string());
        }
        self.registry.set_ring(agent_id, ring)?;
        self.channels.send(Message {
            sender_id: "master".to_string(),
            receiver_id: agent_id.to_string(),
            timestamp: Utc::now(),
            id: Uuid::new_v4().to_string(),
            payload: MessagePayload::RingAssignment {
                ring,
                reason: reason.to_string(),
            },
        });
        info!(%agent_id, %ring, %reason, "device assigned to ring");
        Ok(())
    }

    /// Place a device using the health heuristic.
    ///
    /// Healthy devices go to the ring with the fewest members. Unhealthy
    /// devices land in one of the two lowest rings, chosen at random, and
    /// never in a production ring.
    pub fn auto_assign(&self, agent_id: &str) -> RingsResult<RingId> {
        let health = self
            .registry
            .get(agent_id)
            .ok_or_else(|| RingsError::UnknownDevice(agent_id.to_string()))?;

        let ring = if is_healthy(&health) {
            self.fewest_members_ring()
        } else {
            let mut rng = rand::rng();
            *LOW_RISK_RINGS.choose(&mut rng).unwrap_or(&RingId::Canary)
        };
        let reason = if is_healthy(&health) {
            "auto-assigned to least populated ring"
        } else {
            "unhealthy device placed in low-risk ring"
        };
        self.assign(agent_id, ring, reason)?;
        Ok(ring)
    }

    fn fewest_members_ring(&self) -> RingId {
        let memberships = self.memberships.read().unwrap();
        // Ties resolve to the earliest ring in rollout order.
        RingId::ASSIGNABLE
            .iter()
            .copied()
            .min_by_key(|ring| memberships.get(ring).map_or(0, Vec::len))
            .unwrap_or(RingId::Canary)
    }

    /// One rebalance pass over the whole fleet.
    ///
    /// Unassigned devices are auto-assigned. Unhealthy devices in the top
    /// ring are demoted. Otherwise each device has a small chance of a
    /// random move within its health-eligible rings, to keep ring
    /// populations diverse.
    pub fn rebalance(&self) {
        let devices = self.registry.list();
        let mut rng = rand::rng();
        for device in devices {
            let agent_id = device.agent_id.clone();
            let result = if device.assigned_ring == RingId::Unassigned {
                self.auto_assign(&agent_id).map(|_| ())
            } else if !is_healthy(&device) && device.assigned_ring == RingId::Vip {
                let target = *LOW_RISK_RINGS.choose(&mut rng).unwrap_or(&RingId::Canary);
                self.assign(&agent_id, target, "unhealthy device demoted from vip ring")
            } else if rand::random_bool(DIVERSITY_PROBABILITY) {
                let target = if is_healthy(&device) {
                    *RingId::ASSIGNABLE.choose(&mut rng).unwrap_or(&RingId::Canary)
                } else {
                    *LOW_RISK_RINGS.choose(&mut rng).unwrap_or(&RingId::Canary)
                };
                self.assign(&agent_id, target, "diversity rotation")
            } else {
                Ok(())
            };
            if let Err(e) = result {
                // A device can disappear between the list and the move.
                warn!(%agent_id, error = %e, "rebalance move skipped");
            }
        }
        debug!("rebalance pass complete");
    }

    /// Apply a batch of external categorization decisions.
    ///
    /// Unknown devices are skipped so one stale entry cannot fail the batch.
    /// Returns the number of devices moved.
    pub fn apply_categorization(&self, decisions: Vec<RingCategorization>) -> usize {
        let mut applied = 0;
        for decision in decisions {
            match self.assign(&decision.device_id, decision.ring, &decision.reasoning) {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(device_id = %decision.device_id, error = %e, "categorization skipped")
                }
            }
        }
        applied
    }

    /// Run the external categorization collaborator over the current fleet
    /// and apply its decisions.
    pub async fn categorize_with(&self, callback: &CategorizeFn) -> RingsResult<usize> {
        let snapshot: Vec<DeviceHealth> = self.registry.list();
        let decisions = callback(snapshot)
            .await
            .map_err(RingsError::Categorization)?;
        Ok(self.apply_categorization(decisions))
    }

    /// Periodic rebalance loop. Exits when the shutdown signal flips.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(period = ?period, "ring rebalancer started");
        loop {
            tokio::select! {
                _ = ticker.tick() => self.rebalance(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ring rebalancer stopped");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringleader_state::StateStore;

    fn test_setup() -> (Arc<DeviceRegistry>, ChannelManager, RingBalancer) {
        let store = StateStore::open_in_memory().unwrap();
        let registry = Arc::new(DeviceRegistry::new(store).unwrap());
        let channels = ChannelManager::new();
        let balancer = RingBalancer::new(Arc::clone(&registry), channels.clone());
        (registry, channels, balancer)
    }

    fn register(registry: &DeviceRegistry, agent_id: &str, healthy: bool) {
        registry
            .upsert(DeviceHealth {
                agent_id: agent_id.to_string(),
                battery_level: if healthy { 80 } else { 10 },
                battery_charging: false,
                cpu_usage: 30.0,
                memory_usage: 40.0,
                disk_usage: 50.0,
                assigned_ring: RingId::Unassigned,
                device_name: format!("Device-{agent_id}"),
                os_version: "1.0.0".to_string(),
                last_updated: Utc::now(),
            })
            .unwrap();
    }

    fn assert_single_ring(balancer: &RingBalancer, agent_id: &str) {
        let count = RingId::ASSIGNABLE
            .iter()
            .filter(|&&ring| balancer.members(ring).iter().any(|m| m == agent_id))
            .count();
        assert_eq!(count, 1, "{agent_id} must be in exactly one ring");
    }

    #[tokio::test]
    async fn healthy_auto_assign_balances_load() {
        let (registry, _channels, balancer) = test_setup();
        for i in 0..8 {
            register(&registry, &format!("agent-{i}"), true);
            balancer.auto_assign(&format!("agent-{i}")).unwrap();
        }
        // 8 devices over 4 rings, fewest-first: perfectly even.
        for ring in RingId::ASSIGNABLE {
            assert_eq!(balancer.members(ring).len(), 2);
        }
    }

    #[tokio::test]
    async fn unhealthy_auto_assign_avoids_production_rings() {
        let (registry, _channels, balancer) = test_setup();
        for i in 0..20 {
            let id = format!("agent-{i}");
            register(&registry, &id, false);
            let ring = balancer.auto_assign(&id).unwrap();
            assert!(matches!(ring, RingId::Canary | RingId::LowRisk));
        }
        assert!(balancer.members(RingId::HighRisk).is_empty());
        assert!(balancer.members(RingId::Vip).is_empty());
    }

    #[tokio::test]
    async fn assign_is_remove_before_insert() {
        let (registry, _channels, balancer) = test_setup();
        register(&registry, "agent-1", true);

        balancer.assign("agent-1", RingId::Canary, "initial").unwrap();
        balancer.assign("agent-1", RingId::Vip, "promoted").unwrap();

        assert_single_ring(&balancer, "agent-1");
        assert_eq!(balancer.ring_of("agent-1"), Some(RingId::Vip));
        assert_eq!(registry.get("agent-1").unwrap().assigned_ring, RingId::Vip);
    }

    #[tokio::test]
    async fn assign_notifies_agent() {
        let (registry, channels, balancer) = test_setup();
        register(&registry, "agent-1", true);
        balancer
            .assign("agent-1", RingId::HighRisk, "soak test")
            .unwrap();

        let msg = channels
            .recv("agent-1", Duration::from_millis(100))
            .await
            .unwrap();
        match msg.payload {
            MessagePayload::RingAssignment { ring, reason } => {
                assert_eq!(ring, RingId::HighRisk);
                assert_eq!(reason, "soak test");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn assign_unknown_device_errors() {
        let (_registry, _channels, balancer) = test_setup();
        let err = balancer.assign("ghost", RingId::Canary, "x").unwrap_err();
        assert!(matches!(err, RingsError::UnknownDevice(_)));
    }

    #[tokio::test]
    async fn rebalance_places_unassigned_devices() {
        let (registry, _channels, balancer) = test_setup();
        for i in 0..5 {
            register(&registry, &format!("agent-{i}"), true);
        }
        balancer.rebalance();
        for i in 0..5 {
            let id = format!("agent-{i}");
            assert_ne!(registry.get(&id).unwrap().assigned_ring, RingId::Unassigned);
            assert_single_ring(&balancer, &id);
        }
    }

    #[tokio::test]
    async fn rebalance_demotes_unhealthy_vip_device() {
        let (registry, channels, balancer) = test_setup();
        register(&registry, "agent-1", false);
        balancer.assign("agent-1", RingId::Vip, "forced for test").unwrap();
        // Drain the assignment notification.
        channels.recv("agent-1", Duration::from_millis(100)).await;

        balancer.rebalance();

        let ring = balancer.ring_of("agent-1").unwrap();
        assert!(matches!(ring, RingId::Canary | RingId::LowRisk));

        let msg = channels
            .recv("agent-1", Duration::from_millis(100))
            .await
            .unwrap();
        match msg.payload {
            MessagePayload::RingAssignment { reason, .. } => {
                assert!(reason.contains("demoted"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_ring_invariant_across_many_moves() {
        let (registry, _channels, balancer) = test_setup();
        for i in 0..10 {
            register(&registry, &format!("agent-{i}"), true);
            balancer.auto_assign(&format!("agent-{i}")).unwrap();
        }
        for _ in 0..20 {
            balancer.rebalance();
            for i in 0..10 {
                assert_single_ring(&balancer, &format!("agent-{i}"));
            }
        }
    }

    #[tokio::test]
    async fn categorization_funnels_through_assign() {
        let (registry, _channels, balancer) = test_setup();
        register(&registry, "agent-1", true);
        register(&registry, "agent-2", true);

        let applied = balancer.apply_categorization(vec![
            RingCategorization {
                device_id: "agent-1".to_string(),
                ring: RingId::Vip,
                reasoning: "stable metrics over 30 days".to_string(),
            },
            RingCategorization {
                device_id: "ghost".to_string(),
                ring: RingId::Canary,
                reasoning: "n/a".to_string(),
            },
            RingCategorization {
                device_id: "agent-2".to_string(),
                ring: RingId::Canary,
                reasoning: "new device".to_string(),
            },
        ]);

        assert_eq!(applied, 2);
        assert_eq!(balancer.ring_of("agent-1"), Some(RingId::Vip));
        assert_eq!(balancer.ring_of("agent-2"), Some(RingId::Canary));
        assert_single_ring(&balancer, "agent-1");
    }

    #[tokio::test]
    async fn categorize_with_callback() {
        let (registry, _channels, balancer) = test_setup();
        register(&registry, "agent-1", true);

        let callback: CategorizeFn = Box::new(|devices| {
            Box::pin(async move {
                Ok(devices
                    .into_iter()
                    .map(|d| RingCategorization {
                        device_id: d.agent_id,
                        ring: RingId::LowRisk,
                        reasoning: "batch placement".to_string(),
                    })
                    .collect())
            })
        });

        let applied = balancer.categorize_with(&callback).await.unwrap();
        assert_eq!(applied, 1);
        assert_eq!(balancer.ring_of("agent-1"), Some(RingId::LowRisk));
    }

    #[tokio::test]
    async fn categorize_error_leaves_memberships_untouched() {
        let (registry, _channels, balancer) = test_setup();
        register(&registry, "agent-1", true);
        balancer.assign("agent-1", RingId::Canary, "initial").unwrap();

        let callback: CategorizeFn =
            Box::new(|_| Box::pin(async { Err("service unavailable".to_string()) }));

        let err = balancer.categorize_with(&callback).await.unwrap_err();
        assert!(matches!(err, RingsError::Categorization(_)));
        assert_eq!(balancer.ring_of("agent-1"), Some(RingId::Canary));
    }
}
