//! The task scheduler and its liveness monitors.
//!
//! All task and agent bookkeeping lives behind one mutex. Operations mutate
//! under the lock, collect the messages they need to send, and deliver them
//! after the lock is released so a full mailbox can never stall scheduling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ringleader_channel::{ChannelManager, QueueStats};
use ringleader_registry::DeviceRegistry;
use ringleader_state::{Message, MessagePayload, Task, TaskStatus};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::PendingQueue;

/// Topic carrying every device health snapshot the master receives.
pub const DEVICE_STATUS_TOPIC: &str = "device_status";

/// Master mailbox id on the channel manager.
pub const MASTER_ID: &str = "master";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the liveness monitors run.
    pub monitor_interval: Duration,
    /// An agent silent for longer than this is considered dead.
    pub agent_timeout: Duration,
    /// An in-progress task older than this is failed (and maybe retried).
    pub task_timeout: Duration,
    /// Retries allowed per task before it stays Failed.
    pub retry_limit: u32,
    /// Mailbox poll timeout in the message loop.
    pub recv_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(5),
            agent_timeout: Duration::from_secs(20),
            task_timeout: Duration::from_secs(60),
            retry_limit: 3,
            recv_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Busy,
}

/// Master-side view of one registered agent.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub agent_id: String,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// Point-in-time cluster summary.
#[derive(Debug, Clone)]
pub struct ClusterStatus {
    pub total_agents: usize,
    pub idle_agents: usize,
    pub busy_agents: usize,
    pub pending_tasks: usize,
    pub in_progress_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub queue_stats: HashMap<String, QueueStats>,
}

struct Inner {
    tasks: HashMap<String, Task>,
    agents: HashMap<String, AgentInfo>,
    queue: PendingQueue,
}

pub struct TaskScheduler {
    channels: ChannelManager,
    registry: Arc<DeviceRegistry>,
    config: SchedulerConfig,
    inner: Mutex<Inner>,
}

impl TaskScheduler {
    pub fn new(
        channels: ChannelManager,
        registry: Arc<DeviceRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            channels,
            registry,
            config,
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                agents: HashMap::new(),
                queue: PendingQueue::new(),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Submit a task and immediately try to assign it.
    pub fn submit(&self, task_type: &str, parameters: serde_json::Value, priority: i32) -> String {
        let task_id = Uuid::new_v4().to_string();
        let task = Task {
            id: task_id.clone(),
            task_type: task_type.to_string(),
            parameters,
            priority,
            retry_count: 0,
            status: TaskStatus::Pending,
            assigned_agent: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        };
        let messages = {
            let mut inner = self.inner.lock().unwrap();
            inner.tasks.insert(task_id.clone(), task);
            inner.queue.push(&task_id, priority);
            Self::drain_assignments(&mut inner)
        };
        info!(%task_id, %task_type, priority, "task submitted");
        self.deliver(messages);
        task_id
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.lock().unwrap().tasks.get(task_id).cloned()
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<AgentInfo> {
        self.inner.lock().unwrap().agents.get(agent_id).cloned()
    }

    /// Register (or re-register) an agent as idle.
    pub fn register_agent(&self, agent_id: &str, capabilities: Vec<String>) {
        let messages = {
            let mut inner = self.inner.lock().unwrap();
            inner.agents.insert(
                agent_id.to_string(),
                AgentInfo {
                    agent_id: agent_id.to_string(),
                    capabilities,
                    status: AgentStatus::Idle,
                    current_task: None,
                    last_heartbeat: Utc::now(),
                    tasks_completed: 0,
                    tasks_failed: 0,
                },
            );
            Self::drain_assignments(&mut inner)
        };
        info!(%agent_id, "agent registered");
        self.deliver(messages);
    }

    /// Assign queued tasks to every idle agent.
    pub fn assign_pending(&self) {
        let messages = {
            let mut inner = self.inner.lock().unwrap();
            Self::drain_assignments(&mut inner)
        };
        self.deliver(messages);
    }

    fn drain_assignments(inner: &mut Inner) -> Vec<Message> {
        let mut messages = Vec::new();
        let idle: Vec<String> = inner
            .agents
            .values()
            .filter(|a| a.status == AgentStatus::Idle)
            .map(|a| a.agent_id.clone())
            .collect();
        for agent_id in idle {
            let Some(task_id) = inner.queue.pop() else {
                break;
            };
            // Skip ids whose task was completed or superseded meanwhile.
            let Some(task) = inner.tasks.get_mut(&task_id) else {
                continue;
            };
            if task.status != TaskStatus::Pending {
                continue;
            }
            task.status = TaskStatus::InProgress;
            task.assigned_agent = Some(agent_id.clone());
            task.started_at = Some(Utc::now());
            let payload = MessagePayload::TaskAssignment {
                task_id: task.id.clone(),
                task_type: task.task_type.clone(),
                parameters: task.parameters.clone(),
                priority: task.priority,
            };
            let agent = inner.agents.get_mut(&agent_id).unwrap();
            agent.status = AgentStatus::Busy;
            agent.current_task = Some(task_id.clone());
            debug!(%task_id, %agent_id, "task assigned");
            messages.push(Message {
                sender_id: MASTER_ID.to_string(),
                receiver_id: agent_id,
                timestamp: Utc::now(),
                id: Uuid::new_v4().to_string(),
                payload,
            });
        }
        messages
    }

    fn deliver(&self, messages: Vec<Message>) {
        for message in messages {
            self.channels.send(message);
        }
    }

    /// Apply a TaskResult from an agent. Results from unregistered senders
    /// are rejected: an evicted agent's late result must not complete a
    /// task that was requeued to a survivor.
    pub fn handle_task_result(
        &self,
        agent_id: &str,
        task_id: &str,
        result: Option<serde_json::Value>,
        error: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let messages = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.agents.contains_key(agent_id) {
                return Err(SchedulerError::UnknownAgent(agent_id.to_string()));
            }
            let task = inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| SchedulerError::UnknownTask(task_id.to_string()))?;
            let failed = error.is_some();
            task.status = if failed {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            };
            task.result = result;
            task.error = error;
            task.completed_at = Some(completed_at);
            task.assigned_agent = None;
            // A timed-out task may have been requeued before its result
            // arrived; drop the duplicate so it cannot be reassigned.
            inner.queue.remove(task_id);

            if let Some(agent) = inner.agents.get_mut(agent_id) {
                if agent.current_task.as_deref() == Some(task_id) {
                    agent.status = AgentStatus::Idle;
                    agent.current_task = None;
                }
                if failed {
                    agent.tasks_failed += 1;
                } else {
                    agent.tasks_completed += 1;
                }
            }
            info!(%task_id, %agent_id, failed, "task result recorded");
            // Keep the pipeline full: the agent just went idle.
            Self::drain_assignments(&mut inner)
        };
        self.deliver(messages);
        Ok(())
    }

    /// Evict agents whose last heartbeat is older than the timeout and
    /// requeue their in-flight tasks.
    pub fn check_heartbeats(&self) {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(self.config.agent_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(20));
        let messages = {
            let mut inner = self.inner.lock().unwrap();
            let dead: Vec<String> = inner
                .agents
                .values()
                .filter(|a| now - a.last_heartbeat > timeout)
                .map(|a| a.agent_id.clone())
                .collect();
            for agent_id in &dead {
                inner.agents.remove(agent_id);
                let orphaned: Vec<String> = inner
                    .tasks
                    .values()
                    .filter(|t| {
                        t.status == TaskStatus::InProgress
                            && t.assigned_agent.as_deref() == Some(agent_id)
                    })
                    .map(|t| t.id.clone())
                    .collect();
                warn!(%agent_id, orphaned = orphaned.len(), "agent timed out, evicting");
                for task_id in orphaned {
                    let priority = {
                        let task = inner.tasks.get_mut(&task_id).unwrap();
                        task.status = TaskStatus::Pending;
                        task.assigned_agent = None;
                        task.started_at = None;
                        task.priority
                    };
                    inner.queue.push(&task_id, priority);
                }
            }
            if dead.is_empty() {
                Vec::new()
            } else {
                Self::drain_assignments(&mut inner)
            }
        };
        self.deliver(messages);
    }

    /// Fail overdue in-progress tasks, retrying those under the limit.
    pub fn check_task_timeouts(&self) {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(self.config.task_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let retry_limit = self.config.retry_limit;
        let messages = {
            let mut inner = self.inner.lock().unwrap();
            let overdue: Vec<String> = inner
                .tasks
                .values()
                .filter(|t| {
                    t.status == TaskStatus::InProgress
                        && t.started_at.is_some_and(|s| now - s > timeout)
                })
                .map(|t| t.id.clone())
                .collect();
            for task_id in overdue {
                let (agent_id, requeue, priority) = {
                    let task = inner.tasks.get_mut(&task_id).unwrap();
                    let agent_id = task.assigned_agent.take();
                    let requeue = task.retry_count < retry_limit;
                    if requeue {
                        // Retry bookkeeping is separate from priority, so a
                        // retried task never jumps ahead of fresh work.
                        task.retry_count += 1;
                        task.status = TaskStatus::Pending;
                        task.started_at = None;
                    } else {
                        task.status = TaskStatus::Failed;
                        task.error = Some("task timed out".to_string());
                        task.completed_at = Some(now);
                    }
                    (agent_id, requeue, task.priority)
                };
                warn!(%task_id, requeue, "task timed out");
                if requeue {
                    inner.queue.push(&task_id, priority);
                }
                if let Some(agent_id) = agent_id
                    && let Some(agent) = inner.agents.get_mut(&agent_id)
                    && agent.current_task.as_deref() == Some(task_id.as_str())
                {
                    agent.status = AgentStatus::Idle;
                    agent.current_task = None;
                }
            }
            Self::drain_assignments(&mut inner)
        };
        self.deliver(messages);
    }

    /// Route one agent-to-master message.
    pub fn handle_message(&self, message: Message) {
        let sender = message.sender_id.clone();
        match message.payload {
            MessagePayload::Registration { capabilities, health } => {
                if let Err(e) = self.registry.upsert(health) {
                    warn!(agent_id = %sender, error = %e, "registration upsert failed");
                }
                self.register_agent(&sender, capabilities);
            }
            MessagePayload::Heartbeat { health, current_task } => {
                if let Err(e) = self.registry.upsert(health) {
                    warn!(agent_id = %sender, error = %e, "heartbeat upsert failed");
                }
                let mut inner = self.inner.lock().unwrap();
                if let Some(agent) = inner.agents.get_mut(&sender) {
                    agent.last_heartbeat = Utc::now();
                    agent.current_task = current_task;
                } else {
                    debug!(agent_id = %sender, "heartbeat from unregistered agent ignored");
                }
            }
            MessagePayload::DeviceStatusUpdate { health } => {
                let snapshot = health.clone();
                if let Err(e) = self.registry.upsert(health) {
                    warn!(agent_id = %sender, error = %e, "status upsert failed");
                }
                self.channels.publish(
                    DEVICE_STATUS_TOPIC,
                    Message {
                        sender_id: sender,
                        receiver_id: "*".to_string(),
                        timestamp: Utc::now(),
                        id: Uuid::new_v4().to_string(),
                        payload: MessagePayload::DeviceStatusUpdate { health: snapshot },
                    },
                );
            }
            MessagePayload::TaskResult { task_id, result, error, completed_at } => {
                if let Err(e) =
                    self.handle_task_result(&sender, &task_id, result, error, completed_at)
                {
                    warn!(agent_id = %sender, error = %e, "task result dropped");
                }
            }
            MessagePayload::TaskStatus { task_id, status, progress } => {
                debug!(agent_id = %sender, %task_id, ?status, progress, "task progress");
            }
            MessagePayload::Ack { detail } => {
                debug!(agent_id = %sender, %detail, "ack");
            }
            MessagePayload::Error { error } => {
                warn!(agent_id = %sender, %error, "agent reported error");
            }
            other => {
                debug!(agent_id = %sender, message_type = ?other.message_type(), "ignored message");
            }
        }
    }

    /// Current cluster summary.
    pub fn cluster_status(&self) -> ClusterStatus {
        let inner = self.inner.lock().unwrap();
        let idle = inner
            .agents
            .values()
            .filter(|a| a.status == AgentStatus::Idle)
            .count();
        let count = |status: TaskStatus| {
            inner.tasks.values().filter(|t| t.status == status).count()
        };
        ClusterStatus {
            total_agents: inner.agents.len(),
            idle_agents: idle,
            busy_agents: inner.agents.len() - idle,
            pending_tasks: count(TaskStatus::Pending),
            in_progress_tasks: count(TaskStatus::InProgress),
            completed_tasks: count(TaskStatus::Completed),
            failed_tasks: count(TaskStatus::Failed),
            queue_stats: self.channels.all_stats(),
        }
    }

    /// Broadcast a Shutdown message to every registered agent.
    pub fn shutdown_agents(&self, reason: &str) {
        let agent_ids: Vec<String> = {
            let inner = self.inner.lock().unwrap();
            inner.agents.keys().cloned().collect()
        };
        info!(agents = agent_ids.len(), %reason, "shutting down agents");
        for agent_id in agent_ids {
            self.channels.send(Message {
                sender_id: MASTER_ID.to_string(),
                receiver_id: agent_id,
                timestamp: Utc::now(),
                id: Uuid::new_v4().to_string(),
                payload: MessagePayload::Shutdown {
                    reason: reason.to_string(),
                },
            });
        }
    }

    /// Liveness monitor loop: heartbeat eviction, task timeouts, and a
    /// catch-up assignment pass every interval.
    pub async fn run_monitors(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.monitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("scheduler monitors started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_heartbeats();
                    self.check_task_timeouts();
                    self.assign_pending();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler monitors stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Drain the master mailbox until shutdown.
    pub async fn run_message_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler message loop started");
        loop {
            tokio::select! {
                msg = self.channels.recv(MASTER_ID, self.config.recv_timeout) => {
                    if let Some(message) = msg {
                        self.handle_message(message);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler message loop stopped");
                        return;
                    }
                }
            }
        }
    }
}
