//! Domain types for the Ringleader state store.
//!
//! These types represent the persisted state of devices, rings, deployments,
//! and gating factors, plus the message envelope exchanged between the master
//! and device agents. All types are serializable to/from JSON for storage in
//! redb tables and for wire transit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a device agent.
pub type AgentId = String;

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Unique identifier for a task.
pub type TaskId = String;

// ── Rings ─────────────────────────────────────────────────────────

/// Deployment ring a device belongs to.
///
/// Rings are ordered by risk tolerance: a rollout starts at `Canary`
/// (ring 0) and ends at `Vip` (ring 3). `Unassigned` is the sentinel for
/// devices that have not been placed yet — a device is always in exactly
/// one ring or unassigned, never two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingId {
    Canary,
    LowRisk,
    HighRisk,
    Vip,
    Unassigned,
}

impl RingId {
    /// All assignable rings, in rollout order.
    pub const ASSIGNABLE: [RingId; 4] =
        [RingId::Canary, RingId::LowRisk, RingId::HighRisk, RingId::Vip];

    /// Rollout order index (0 = first ring processed), if assigned.
    pub fn index(self) -> Option<u8> {
        match self {
            RingId::Canary => Some(0),
            RingId::LowRisk => Some(1),
            RingId::HighRisk => Some(2),
            RingId::Vip => Some(3),
            RingId::Unassigned => None,
        }
    }

    /// Ring for a rollout order index.
    pub fn from_index(index: u8) -> Option<RingId> {
        RingId::ASSIGNABLE.get(index as usize).copied()
    }

    /// String identifier used on the wire and in table keys.
    pub fn as_str(self) -> &'static str {
        match self {
            RingId::Canary => "canary",
            RingId::LowRisk => "low_risk",
            RingId::HighRisk => "high_risk",
            RingId::Vip => "vip",
            RingId::Unassigned => "unassigned",
        }
    }
}

impl std::fmt::Display for RingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static configuration for one ring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RingSpec {
    /// Rollout order (0 = first / lowest-risk tier processed).
    pub ring_id: u8,
    pub name: String,
    /// Natural-language categorization criteria, consumed by the external
    /// categorization collaborator.
    pub criteria: String,
}

impl RingSpec {
    /// Build the key for the rings table.
    pub fn table_key(&self) -> String {
        self.ring_id.to_string()
    }
}

// ── Devices ───────────────────────────────────────────────────────

/// Authoritative health snapshot for one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceHealth {
    pub agent_id: AgentId,
    /// Battery charge (0–100).
    pub battery_level: u8,
    pub battery_charging: bool,
    /// CPU usage percentage (0–100).
    pub cpu_usage: f64,
    /// Memory usage percentage (0–100).
    pub memory_usage: f64,
    /// Disk usage percentage (0–100). Free space is `100 − disk_usage`.
    pub disk_usage: f64,
    pub assigned_ring: RingId,
    pub device_name: String,
    pub os_version: String,
    pub last_updated: DateTime<Utc>,
}

impl DeviceHealth {
    /// Percentage of disk free, derived from usage.
    pub fn free_disk(&self) -> f64 {
        100.0 - self.disk_usage
    }
}

// ── Tasks ─────────────────────────────────────────────────────────

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A unit of work assigned to a device agent.
///
/// Owned exclusively by the task scheduler; everything else sees copies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub parameters: serde_json::Value,
    /// Scheduling priority (higher = assigned first). Never mutated after
    /// submission — retries are tracked separately in `retry_count`.
    pub priority: i32,
    /// Number of timeout retries so far.
    pub retry_count: u32,
    pub status: TaskStatus,
    pub assigned_agent: Option<AgentId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

// ── Deployments ───────────────────────────────────────────────────

/// Status of a single ring within a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Stopped,
}

/// Per-(deployment, ring) rollout state. Mutated only by the deployment
/// scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRing {
    pub deployment_id: DeploymentId,
    pub ring_id: u8,
    /// Number of devices in the ring when the deployment was created or the
    /// ring was last evaluated.
    pub device_count: u32,
    pub status: RingStatus,
    pub failure_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRing {
    /// Build the composite key for the deployment_rings table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.deployment_id, self.ring_id)
    }
}

/// Rollup status of a deployment across its rings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Stopped,
}

impl DeploymentStatus {
    /// Derive the deployment status from its ring statuses.
    ///
    /// Completed iff every ring completed; Failed if any ring failed;
    /// Stopped if any ring was stopped without a failure; NotStarted if
    /// nothing has run yet; InProgress otherwise.
    pub fn rollup(rings: &[RingStatus]) -> DeploymentStatus {
        if rings.iter().any(|s| *s == RingStatus::Failed) {
            DeploymentStatus::Failed
        } else if !rings.is_empty() && rings.iter().all(|s| *s == RingStatus::Completed) {
            DeploymentStatus::Completed
        } else if rings.iter().any(|s| *s == RingStatus::Stopped) {
            DeploymentStatus::Stopped
        } else if rings.iter().all(|s| *s == RingStatus::NotStarted) {
            DeploymentStatus::NotStarted
        } else {
            DeploymentStatus::InProgress
        }
    }
}

/// A software rollout progressing ring by ring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub name: String,
    pub status: DeploymentStatus,
    /// Per-deployment gating thresholds; the global default template is
    /// used when absent.
    pub gating: Option<GatingFactors>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Thresholds a ring's devices must satisfy before the rollout advances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatingFactors {
    /// Maximum acceptable CPU usage percentage.
    pub max_cpu: f64,
    /// Maximum acceptable memory usage percentage.
    pub max_memory: f64,
    /// Minimum acceptable free disk percentage.
    pub min_free_disk: f64,
    /// Risk score range (0–100, higher = safer).
    pub risk_score_min: u8,
    pub risk_score_max: u8,
}

impl Default for GatingFactors {
    fn default() -> Self {
        Self {
            max_cpu: 60.0,
            max_memory: 60.0,
            min_free_disk: 5.0,
            risk_score_min: 0,
            risk_score_max: 75,
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────

/// Message kinds exchanged between the master and device agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Registration,
    Heartbeat,
    DeviceStatusUpdate,
    TaskAssignment,
    TaskResult,
    TaskStatus,
    RingAssignment,
    Error,
    Ack,
    Shutdown,
}

/// Typed message payload, keyed by message type on the wire.
///
/// Receivers switch exhaustively on the variant instead of probing a dynamic
/// dictionary for fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessagePayload {
    Registration {
        capabilities: Vec<String>,
        health: DeviceHealth,
    },
    Heartbeat {
        health: DeviceHealth,
        current_task: Option<TaskId>,
    },
    DeviceStatusUpdate {
        health: DeviceHealth,
    },
    TaskAssignment {
        task_id: TaskId,
        task_type: String,
        parameters: serde_json::Value,
        priority: i32,
    },
    TaskResult {
        task_id: TaskId,
        result: Option<serde_json::Value>,
        error: Option<String>,
        completed_at: DateTime<Utc>,
    },
    TaskStatus {
        task_id: TaskId,
        status: TaskStatus,
        progress: u8,
    },
    RingAssignment {
        ring: RingId,
        reason: String,
    },
    Error {
        error: String,
    },
    Ack {
        detail: String,
    },
    Shutdown {
        reason: String,
    },
}

impl MessagePayload {
    /// The message type this payload corresponds to.
    pub fn message_type(&self) -> MessageType {
        match self {
            MessagePayload::Registration { .. } => MessageType::Registration,
            MessagePayload::Heartbeat { .. } => MessageType::Heartbeat,
            MessagePayload::DeviceStatusUpdate { .. } => MessageType::DeviceStatusUpdate,
            MessagePayload::TaskAssignment { .. } => MessageType::TaskAssignment,
            MessagePayload::TaskResult { .. } => MessageType::TaskResult,
            MessagePayload::TaskStatus { .. } => MessageType::TaskStatus,
            MessagePayload::RingAssignment { .. } => MessageType::RingAssignment,
            MessagePayload::Error { .. } => MessageType::Error,
            MessagePayload::Ack { .. } => MessageType::Ack,
            MessagePayload::Shutdown { .. } => MessageType::Shutdown,
        }
    }
}

/// Envelope for master↔agent communication.
///
/// Serializes with the payload tag at the top level:
/// `{type, payload, sender_id, receiver_id, timestamp, id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub sender_id: String,
    pub receiver_id: String,
    pub timestamp: DateTime<Utc>,
    /// Opaque correlation id.
    pub id: String,
    #[serde(flatten)]
    pub payload: MessagePayload,
}
