//! Daemon configuration: TOML file with serde defaults.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use ringleader_rollout::RolloutConfig;
use ringleader_scheduler::SchedulerConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Seconds between scheduler monitor passes (and agent heartbeats).
    pub heartbeat_interval_secs: u64,
    /// Seconds of heartbeat silence before an agent is evicted.
    pub agent_timeout_secs: u64,
    /// Seconds before an in-progress task is considered overdue.
    pub task_timeout_secs: u64,
    /// Retries allowed per task.
    pub retry_limit: u32,
    /// Per-recipient mailbox capacity.
    pub queue_capacity: usize,
    /// Seconds between ring rebalance passes.
    pub rebalance_interval_secs: u64,
    /// Seconds each ring dwells before gating.
    pub dwell_secs: u64,
    /// Simulated agents to spawn in standalone mode.
    pub agents: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5,
            agent_timeout_secs: 20,
            task_timeout_secs: 60,
            retry_limit: 3,
            queue_capacity: 1000,
            rebalance_interval_secs: 30,
            dwell_secs: 30,
            agents: 8,
        }
    }
}

impl OrchestratorConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            monitor_interval: Duration::from_secs(self.heartbeat_interval_secs),
            agent_timeout: Duration::from_secs(self.agent_timeout_secs),
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            retry_limit: self.retry_limit,
            ..SchedulerConfig::default()
        }
    }

    pub fn rollout_config(&self) -> RolloutConfig {
        RolloutConfig {
            dwell: Duration::from_secs(self.dwell_secs),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_orchestrator_policy() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.heartbeat_interval_secs, 5);
        assert_eq!(config.agent_timeout_secs, 20);
        assert_eq!(config.task_timeout_secs, 60);
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.dwell_secs, 30);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: OrchestratorConfig =
            toml::from_str("dwell_secs = 5\nagents = 2\n").unwrap();
        assert_eq!(config.dwell_secs, 5);
        assert_eq!(config.agents, 2);
        assert_eq!(config.retry_limit, 3);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<OrchestratorConfig, _> = toml::from_str("dwel_secs = 5\n");
        assert!(result.is_err());
    }
}
