//! The gating-evaluation collaborator contract and the built-in
//! threshold evaluator.

use std::future::Future;
use std::pin::Pin;

use ringleader_registry::device_risk_score;
use ringleader_state::{DeviceHealth, GatingFactors};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Passed,
    Failed,
}

/// Verdict from a gating evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    pub status: GateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl GateDecision {
    pub fn passed() -> Self {
        Self {
            status: GateStatus::Passed,
            failure_reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: GateStatus::Failed,
            failure_reason: Some(reason.into()),
        }
    }
}

/// Input handed to the gating collaborator.
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub ring_name: String,
    pub devices: Vec<DeviceHealth>,
    pub factors: GatingFactors,
}

/// Async gating callback. An `Err` is treated as a gating failure by the
/// deployment scheduler, never as a pass.
pub type GateFn = Box<
    dyn Fn(GateRequest) -> Pin<Box<dyn Future<Output = Result<GateDecision, String>> + Send>>
        + Send
        + Sync,
>;

/// Count threshold violations across a ring's devices and fail if any
/// device violates any factor.
pub fn evaluate_thresholds(devices: &[DeviceHealth], factors: &GatingFactors) -> GateDecision {
    let mut cpu = 0usize;
    let mut memory = 0usize;
    let mut disk = 0usize;
    let mut risk = 0usize;

    for device in devices {
        if device.cpu_usage > factors.max_cpu {
            cpu += 1;
        }
        if device.memory_usage > factors.max_memory {
            memory += 1;
        }
        if device.free_disk() < factors.min_free_disk {
            disk += 1;
        }
        let score = device_risk_score(device);
        if score < factors.risk_score_min || score > factors.risk_score_max {
            risk += 1;
        }
    }

    let total = cpu + memory + disk + risk;
    if total == 0 {
        GateDecision::passed()
    } else {
        GateDecision::failed(format!(
            "{total} threshold violations across {} devices (cpu: {cpu}, memory: {memory}, disk: {disk}, risk: {risk})",
            devices.len()
        ))
    }
}

/// The built-in gate: pure threshold evaluation, no external service.
pub fn threshold_gate() -> GateFn {
    Box::new(|request| {
        Box::pin(async move { Ok(evaluate_thresholds(&request.devices, &request.factors)) })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ringleader_state::RingId;

    fn device(cpu: f64, memory: f64, disk: f64) -> DeviceHealth {
        DeviceHealth {
            agent_id: "agent-1".to_string(),
            battery_level: 80,
            battery_charging: false,
            cpu_usage: cpu,
            memory_usage: memory,
            disk_usage: disk,
            assigned_ring: RingId::Canary,
            device_name: "Device-1".to_string(),
            os_version: "1.0.0".to_string(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn quiet_fleet_passes() {
        // Moderate load keeps every factor inside the default thresholds,
        // including the risk ceiling (a near-idle device scores above 75).
        let devices = vec![device(50.0, 55.0, 45.0), device(55.0, 58.0, 55.0)];
        let decision = evaluate_thresholds(&devices, &GatingFactors::default());
        assert_eq!(decision.status, GateStatus::Passed);
        assert!(decision.failure_reason.is_none());
    }

    #[test]
    fn cpu_violation_fails_with_counts() {
        let devices = vec![device(90.0, 40.0, 50.0), device(55.0, 58.0, 55.0)];
        let decision = evaluate_thresholds(&devices, &GatingFactors::default());
        assert_eq!(decision.status, GateStatus::Failed);
        let reason = decision.failure_reason.unwrap();
        assert!(reason.contains("cpu: 1"), "unexpected reason: {reason}");
    }

    #[test]
    fn low_free_disk_fails() {
        // 97% used leaves 3% free, below the default 5% floor.
        let devices = vec![device(10.0, 20.0, 97.0)];
        let decision = evaluate_thresholds(&devices, &GatingFactors::default());
        assert_eq!(decision.status, GateStatus::Failed);
    }

    #[test]
    fn risk_score_outside_range_fails() {
        let factors = GatingFactors {
            risk_score_min: 60,
            ..GatingFactors::default()
        };
        // cpu 50, mem 50, disk used 50 -> avg 50 -> score 71: fine.
        let calm = vec![device(50.0, 50.0, 50.0)];
        assert_eq!(
            evaluate_thresholds(&calm, &factors).status,
            GateStatus::Passed
        );
        // Heavier load pushes the score below 60 without breaching the raw
        // cpu/memory ceilings.
        let strained = vec![device(59.0, 59.0, 60.0)];
        let decision = evaluate_thresholds(&strained, &factors);
        assert_eq!(decision.status, GateStatus::Failed);
        assert!(decision.failure_reason.unwrap().contains("risk: 1"));
    }

    #[test]
    fn empty_ring_passes_trivially() {
        let decision = evaluate_thresholds(&[], &GatingFactors::default());
        assert_eq!(decision.status, GateStatus::Passed);
    }

    #[test]
    fn decision_wire_format() {
        let json = serde_json::to_value(GateDecision::failed("cpu exceeds threshold")).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["failure_reason"], "cpu exceeds threshold");

        let json = serde_json::to_value(GateDecision::passed()).unwrap();
        assert_eq!(json["status"], "passed");
        assert!(json.get("failure_reason").is_none());
    }
}
