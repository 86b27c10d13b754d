//! Health classification and risk scoring for device snapshots.
//!
//! A device is healthy when it has usable battery and is not resource
//! constrained. The risk score maps average resource pressure onto a
//! 0..=100 scale where higher means safer: lightly loaded devices score
//! above 70, moderately loaded ones land between 31 and 70, and heavily
//! loaded ones fall below 31.

use ringleader_state::DeviceHealth;

/// Battery floor below which a device is unhealthy.
pub const MIN_BATTERY_LEVEL: u8 = 20;
/// CPU ceiling at or above which a device is unhealthy.
pub const MAX_CPU_USAGE: f64 = 80.0;
/// Memory ceiling at or above which a device is unhealthy.
pub const MAX_MEMORY_USAGE: f64 = 85.0;

/// Whether a device is eligible for work and for non-canary rings.
pub fn is_healthy(health: &DeviceHealth) -> bool {
    health.battery_level > MIN_BATTERY_LEVEL
        && health.cpu_usage < MAX_CPU_USAGE
        && health.memory_usage < MAX_MEMORY_USAGE
}

/// Risk score for a device from its current resource pressure.
///
/// Averages CPU usage, memory usage, and consumed disk (100 minus free
/// disk), then maps the average onto three bands: above 80 drops steeply
/// below 31, the 50..=80 band spans 70 down to 31, and at or below 50 the
/// score rises from 71 toward 100. Truncated to an integer and clamped to
/// 0..=100.
pub fn risk_score(cpu_usage: f64, memory_usage: f64, free_disk: f64) -> u8 {
    let avg = (cpu_usage + memory_usage + (100.0 - free_disk)) / 3.0;
    let raw = if avg > 80.0 {
        30.0 - (avg - 80.0) * 1.5
    } else if avg > 50.0 {
        70.0 - (avg - 50.0) * 1.3
    } else {
        71.0 + (50.0 - avg) * 0.58
    };
    raw.trunc().clamp(0.0, 100.0) as u8
}

/// Risk score computed from a device snapshot.
pub fn device_risk_score(health: &DeviceHealth) -> u8 {
    risk_score(health.cpu_usage, health.memory_usage, health.free_disk())
}

/// Named load profiles used to overwrite a device's raw metrics in demos
/// and fault-injection scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StressProfile {
    Low,
    Normal,
    High,
    Critical,
}

impl StressProfile {
    /// (cpu_usage, memory_usage, disk_usage) for this profile.
    pub fn metrics(self) -> (f64, f64, f64) {
        match self {
            StressProfile::Low => (25.0, 30.0, 20.0),
            StressProfile::Normal => (50.0, 55.0, 45.0),
            StressProfile::High => (75.0, 80.0, 70.0),
            StressProfile::Critical => (95.0, 92.0, 88.0),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(StressProfile::Low),
            "normal" => Some(StressProfile::Normal),
            "high" => Some(StressProfile::High),
            "critical" => Some(StressProfile::Critical),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ringleader_state::RingId;

    fn snapshot(battery: u8, cpu: f64, memory: f64, disk: f64) -> DeviceHealth {
        DeviceHealth {
            agent_id: "agent-1".to_string(),
            battery_level: battery,
            battery_charging: false,
            cpu_usage: cpu,
            memory_usage: memory,
            disk_usage: disk,
            assigned_ring: RingId::Unassigned,
            device_name: "Device-1".to_string(),
            os_version: "1.0.0".to_string(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn healthy_device_passes_all_checks() {
        assert!(is_healthy(&snapshot(80, 30.0, 40.0, 50.0)));
    }

    #[test]
    fn battery_boundary_is_strict() {
        // 20 is unhealthy, 21 is healthy.
        assert!(!is_healthy(&snapshot(20, 30.0, 40.0, 50.0)));
        assert!(is_healthy(&snapshot(21, 30.0, 40.0, 50.0)));
    }

    #[test]
    fn cpu_and_memory_ceilings_are_exclusive() {
        assert!(!is_healthy(&snapshot(80, 80.0, 40.0, 50.0)));
        assert!(is_healthy(&snapshot(80, 79.9, 40.0, 50.0)));
        assert!(!is_healthy(&snapshot(80, 30.0, 85.0, 50.0)));
        assert!(is_healthy(&snapshot(80, 30.0, 84.9, 50.0)));
    }

    #[test]
    fn risk_bands_at_the_seams() {
        // avg exactly 50: idle band, score 71.
        assert_eq!(risk_score(50.0, 50.0, 50.0), 71);
        // avg exactly 80: top of the middle band, 70 - 30*1.3 = 31.
        assert_eq!(risk_score(80.0, 80.0, 20.0), 31);
        // Just above 80 drops below 31.
        assert!(risk_score(81.0, 81.0, 19.0) < 31);
    }

    #[test]
    fn idle_device_scores_high() {
        // avg = 0 -> 71 + 50*0.58 = 100.
        assert_eq!(risk_score(0.0, 0.0, 100.0), 100);
    }

    #[test]
    fn saturated_device_clamps_to_zero() {
        // avg = 100 -> 30 - 20*1.5 = 0.
        assert_eq!(risk_score(100.0, 100.0, 0.0), 0);
    }

    #[test]
    fn device_risk_uses_free_disk() {
        let health = snapshot(80, 50.0, 50.0, 50.0);
        // disk_usage 50 means free_disk 50, so consumed is 50 and avg is 50.
        assert_eq!(device_risk_score(&health), 71);
    }

    #[test]
    fn stress_profile_parse_roundtrip() {
        assert_eq!(StressProfile::parse("critical"), Some(StressProfile::Critical));
        assert_eq!(StressProfile::parse("bogus"), None);
        assert_eq!(StressProfile::High.metrics(), (75.0, 80.0, 70.0));
    }
}
