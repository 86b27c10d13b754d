//! The device agent control loop.
//!
//! One agent simulates one managed device: it registers with the master,
//! heartbeats on a fixed interval, drifts its simulated metrics, and
//! executes assigned tasks through pluggable handlers. Task execution is
//! spawned so a slow handler never starves the heartbeat.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use ringleader_channel::ChannelManager;
use ringleader_state::{DeviceHealth, Message, MessagePayload, RingId};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Async task execution callback: parameters in, result or error string out.
pub type TaskHandler = Box<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>>
        + Send
        + Sync,
>;

/// Agent loop timing.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub heartbeat_interval: Duration,
    pub drift_interval: Duration,
    /// How long each mailbox poll waits before re-checking shutdown.
    pub recv_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            drift_interval: Duration::from_secs(10),
            recv_timeout: Duration::from_secs(1),
        }
    }
}

pub struct DeviceAgent {
    agent_id: String,
    master_id: String,
    channels: ChannelManager,
    config: AgentConfig,
    handlers: HashMap<String, TaskHandler>,
    health: Mutex<DeviceHealth>,
    current_task: Mutex<Option<String>>,
    stop_tx: watch::Sender<bool>,
}

impl DeviceAgent {
    /// Create an agent with randomized initial metrics, as a fresh device
    /// would report.
    pub fn new(agent_id: &str, master_id: &str, channels: ChannelManager) -> Self {
        let mut rng = rand::rng();
        let health = DeviceHealth {
            agent_id: agent_id.to_string(),
            battery_level: rng.random_range(30..=100),
            battery_charging: rng.random_bool(0.5),
            cpu_usage: rng.random_range(10.0..60.0),
            memory_usage: rng.random_range(30.0..70.0),
            disk_usage: rng.random_range(40.0..80.0),
            assigned_ring: RingId::Unassigned,
            device_name: format!("Device-{agent_id}"),
            os_version: "1.0.0".to_string(),
            last_updated: Utc::now(),
        };
        Self::with_health(master_id, channels, health)
    }

    /// Create an agent with a fixed initial health snapshot.
    pub fn with_health(master_id: &str, channels: ChannelManager, health: DeviceHealth) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            agent_id: health.agent_id.clone(),
            master_id: master_id.to_string(),
            channels,
            config: AgentConfig::default(),
            handlers: HashMap::new(),
            health: Mutex::new(health),
            current_task: Mutex::new(None),
            stop_tx,
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a handler for a task type. Call before starting the loop.
    pub fn register_handler(&mut self, task_type: &str, handler: TaskHandler) {
        self.handlers.insert(task_type.to_string(), handler);
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn health_snapshot(&self) -> DeviceHealth {
        self.health.lock().unwrap().clone()
    }

    /// Overwrite the raw resource metrics (fault injection and demos).
    pub fn set_metrics(&self, cpu_usage: f64, memory_usage: f64, disk_usage: f64) {
        let mut health = self.health.lock().unwrap();
        health.cpu_usage = cpu_usage;
        health.memory_usage = memory_usage;
        health.disk_usage = disk_usage;
        health.last_updated = Utc::now();
    }

    /// Ask a running agent loop to exit.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    fn send(&self, payload: MessagePayload) -> bool {
        self.channels.send(Message {
            sender_id: self.agent_id.clone(),
            receiver_id: self.master_id.clone(),
            timestamp: Utc::now(),
            id: Uuid::new_v4().to_string(),
            payload,
        })
    }

    fn send_registration(&self) {
        let health = self.health_snapshot();
        let capabilities: Vec<String> = self.handlers.keys().cloned().collect();
        self.send(MessagePayload::Registration {
            capabilities,
            health,
        });
        info!(agent_id = %self.agent_id, "registration sent");
    }

    fn send_heartbeat(&self) {
        let health = self.health_snapshot();
        let current_task = self.current_task.lock().unwrap().clone();
        self.send(MessagePayload::Heartbeat {
            health,
            current_task,
        });
    }

    /// Perturb the simulated metrics within device-realistic bounds and
    /// report the new snapshot.
    fn drift_and_report(&self) {
        let health = {
            let mut rng = rand::rng();
            let mut health = self.health.lock().unwrap();
            if health.battery_charging {
                health.battery_level = health.battery_level.saturating_add(rng.random_range(1..=5)).min(100);
            } else {
                health.battery_level = health.battery_level.saturating_sub(rng.random_range(0..=3));
            }
            health.cpu_usage = (health.cpu_usage + rng.random_range(-10.0..10.0)).clamp(5.0, 95.0);
            health.memory_usage = (health.memory_usage + rng.random_range(-5.0..5.0)).clamp(20.0, 90.0);
            // Disk only fills up.
            health.disk_usage = (health.disk_usage + rng.random_range(0.0..0.5)).min(95.0);
            health.last_updated = Utc::now();
            health.clone()
        };
        debug!(
            agent_id = %self.agent_id,
            battery = health.battery_level,
            cpu = health.cpu_usage,
            "device metrics drifted"
        );
        self.send(MessagePayload::DeviceStatusUpdate { health });
    }

    async fn handle_message(self: &Arc<Self>, message: Message) -> bool {
        match message.payload {
            MessagePayload::TaskAssignment {
                task_id,
                task_type,
                parameters,
                priority,
            } => {
                debug!(agent_id = %self.agent_id, %task_id, %task_type, priority, "task assigned");
                *self.current_task.lock().unwrap() = Some(task_id.clone());
                let agent = Arc::clone(self);
                tokio::spawn(async move {
                    agent.execute_task(task_id, task_type, parameters).await;
                });
            }
            MessagePayload::RingAssignment { ring, reason } => {
                self.health.lock().unwrap().assigned_ring = ring;
                info!(agent_id = %self.agent_id, %ring, %reason, "ring assignment accepted");
                self.send(MessagePayload::Ack {
                    detail: format!("moved to ring {ring}"),
                });
            }
            MessagePayload::Shutdown { reason } => {
                info!(agent_id = %self.agent_id, %reason, "shutdown requested");
                return false;
            }
            other => {
                warn!(agent_id = %self.agent_id, message_type = ?other.message_type(), "unexpected message");
            }
        }
        true
    }

    async fn execute_task(&self, task_id: String, task_type: String, parameters: serde_json::Value) {
        let outcome = match self.handlers.get(&task_type) {
            Some(handler) => handler(parameters).await,
            None => Err(format!("unknown task type: {task_type}")),
        };
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(e) => {
                warn!(agent_id = %self.agent_id, %task_id, error = %e, "task failed");
                (None, Some(e))
            }
        };
        *self.current_task.lock().unwrap() = None;
        self.send(MessagePayload::TaskResult {
            task_id,
            result,
            error,
            completed_at: Utc::now(),
        });
    }

    /// Register with the master and run until shut down.
    ///
    /// Exits on an external shutdown signal, a Shutdown message, or
    /// [`DeviceAgent::stop`].
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.send_registration();

        let mut stop_rx = self.stop_tx.subscribe();
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        let mut drift = tokio::time::interval(self.config.drift_interval);
        // First interval tick fires immediately; skip it so the heartbeat
        // does not double up with registration.
        heartbeat.tick().await;
        drift.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => self.send_heartbeat(),
                _ = drift.tick() => self.drift_and_report(),
                msg = self.channels.recv(&self.agent_id, self.config.recv_timeout) => {
                    if let Some(message) = msg
                        && !self.handle_message(message).await
                    {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!(agent_id = %self.agent_id, "agent loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_health(agent_id: &str) -> DeviceHealth {
        DeviceHealth {
            agent_id: agent_id.to_string(),
            battery_level: 80,
            battery_charging: false,
            cpu_usage: 30.0,
            memory_usage: 40.0,
            disk_usage: 50.0,
            assigned_ring: RingId::Unassigned,
            device_name: format!("Device-{agent_id}"),
            os_version: "1.0.0".to_string(),
            last_updated: Utc::now(),
        }
    }

    fn fast_config() -> AgentConfig {
        AgentConfig {
            heartbeat_interval: Duration::from_millis(50),
            drift_interval: Duration::from_secs(60),
            recv_timeout: Duration::from_millis(20),
        }
    }

    fn echo_handler() -> TaskHandler {
        Box::new(|params| Box::pin(async move { Ok(json!({ "echo": params })) }))
    }

    async fn recv_master(channels: &ChannelManager) -> Message {
        channels
            .recv("master", Duration::from_secs(1))
            .await
            .expect("expected a message for master")
    }

    #[tokio::test]
    async fn registration_is_sent_first() {
        let channels = ChannelManager::new();
        let mut agent = DeviceAgent::with_health("master", channels.clone(), test_health("agent-1"));
        agent.register_handler("echo", echo_handler());
        let agent = Arc::new(agent.with_config(fast_config()));

        let (_tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&agent).run(rx));

        let msg = recv_master(&channels).await;
        match msg.payload {
            MessagePayload::Registration { capabilities, health } => {
                assert_eq!(capabilities, vec!["echo".to_string()]);
                assert_eq!(health.agent_id, "agent-1");
            }
            other => panic!("expected registration, got {other:?}"),
        }

        agent.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_carries_current_task() {
        let channels = ChannelManager::new();
        let agent = Arc::new(
            DeviceAgent::with_health("master", channels.clone(), test_health("agent-1"))
                .with_config(fast_config()),
        );
        *agent.current_task.lock().unwrap() = Some("task-42".to_string());

        let (_tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&agent).run(rx));

        // Skip registration, then expect a heartbeat.
        recv_master(&channels).await;
        let msg = recv_master(&channels).await;
        match msg.payload {
            MessagePayload::Heartbeat { current_task, .. } => {
                assert_eq!(current_task.as_deref(), Some("task-42"));
            }
            other => panic!("expected heartbeat, got {other:?}"),
        }

        agent.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn task_assignment_produces_result() {
        let channels = ChannelManager::new();
        let mut agent = DeviceAgent::with_health("master", channels.clone(), test_health("agent-1"));
        agent.register_handler("echo", echo_handler());
        let agent = Arc::new(agent.with_config(fast_config()));

        let (_tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&agent).run(rx));
        recv_master(&channels).await; // registration

        channels.send(Message {
            sender_id: "master".to_string(),
            receiver_id: "agent-1".to_string(),
            timestamp: Utc::now(),
            id: "m1".to_string(),
            payload: MessagePayload::TaskAssignment {
                task_id: "task-1".to_string(),
                task_type: "echo".to_string(),
                parameters: json!({ "n": 1 }),
                priority: 5,
            },
        });

        loop {
            let msg = recv_master(&channels).await;
            if let MessagePayload::TaskResult { task_id, result, error, .. } = msg.payload {
                assert_eq!(task_id, "task-1");
                assert_eq!(result, Some(json!({ "echo": { "n": 1 } })));
                assert!(error.is_none());
                break;
            }
        }

        agent.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_task_type_returns_error_result() {
        let channels = ChannelManager::new();
        let agent = Arc::new(
            DeviceAgent::with_health("master", channels.clone(), test_health("agent-1"))
                .with_config(fast_config()),
        );

        let (_tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&agent).run(rx));
        recv_master(&channels).await; // registration

        channels.send(Message {
            sender_id: "master".to_string(),
            receiver_id: "agent-1".to_string(),
            timestamp: Utc::now(),
            id: "m1".to_string(),
            payload: MessagePayload::TaskAssignment {
                task_id: "task-1".to_string(),
                task_type: "transmute".to_string(),
                parameters: json!({}),
                priority: 1,
            },
        });

        loop {
            let msg = recv_master(&channels).await;
            if let MessagePayload::TaskResult { error, result, .. } = msg.payload {
                assert_eq!(error.as_deref(), Some("unknown task type: transmute"));
                assert!(result.is_none());
                break;
            }
        }

        agent.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn ring_assignment_updates_health_and_acks() {
        let channels = ChannelManager::new();
        let agent = Arc::new(
            DeviceAgent::with_health("master", channels.clone(), test_health("agent-1"))
                .with_config(fast_config()),
        );

        let (_tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&agent).run(rx));
        recv_master(&channels).await; // registration

        channels.send(Message {
            sender_id: "master".to_string(),
            receiver_id: "agent-1".to_string(),
            timestamp: Utc::now(),
            id: "m1".to_string(),
            payload: MessagePayload::RingAssignment {
                ring: RingId::HighRisk,
                reason: "rebalance".to_string(),
            },
        });

        loop {
            let msg = recv_master(&channels).await;
            if let MessagePayload::Ack { detail } = msg.payload {
                assert!(detail.contains("high_risk"));
                break;
            }
        }
        assert_eq!(agent.health_snapshot().assigned_ring, RingId::HighRisk);

        agent.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_message_stops_the_loop() {
        let channels = ChannelManager::new();
        let agent = Arc::new(
            DeviceAgent::with_health("master", channels.clone(), test_health("agent-1"))
                .with_config(fast_config()),
        );

        let (_tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&agent).run(rx));

        channels.send(Message {
            sender_id: "master".to_string(),
            receiver_id: "agent-1".to_string(),
            timestamp: Utc::now(),
            id: "m1".to_string(),
            payload: MessagePayload::Shutdown {
                reason: "rolling restart".to_string(),
            },
        });

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("agent loop should exit on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn drift_stays_within_bounds() {
        let channels = ChannelManager::new();
        let mut health = test_health("agent-1");
        health.battery_charging = false;
        health.battery_level = 2;
        let agent = DeviceAgent::with_health("master", channels, health);

        for _ in 0..100 {
            agent.drift_and_report();
            let h = agent.health_snapshot();
            assert!((5.0..=95.0).contains(&h.cpu_usage));
            assert!((20.0..=90.0).contains(&h.memory_usage));
            assert!(h.disk_usage <= 95.0);
            assert!(h.battery_level <= 100);
        }
    }

    #[tokio::test]
    async fn set_metrics_overwrites_snapshot() {
        let channels = ChannelManager::new();
        let agent = DeviceAgent::with_health("master", channels, test_health("agent-1"));
        agent.set_metrics(95.0, 92.0, 88.0);

        let h = agent.health_snapshot();
        assert_eq!(h.cpu_usage, 95.0);
        assert_eq!(h.memory_usage, 92.0);
        assert_eq!(h.disk_usage, 88.0);
    }
}
