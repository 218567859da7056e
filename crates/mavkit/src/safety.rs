//! Parameter validators and clampers used inline by the Vehicle Control Core
//! on every command. The heavier safety subsystem (pre-flight checks, the
//! runtime monitor, the geofence client) lives in the `safety-core` crate,
//! which depends on these primitives plus [`crate::Vehicle`].

use crate::error::VehicleError;
use crate::geometry::{Coordinate, VectorNED};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Pluggable out-of-process geofence precheck, consulted by the Vehicle
/// Control Core before a navigation command is issued. Implemented by the
/// geofence client in `safety-core`; kept as a trait here so `mavkit` does
/// not need to depend on the wire protocol crate.
pub trait GeofenceCheck: Send + Sync {
    fn validate_waypoint<'a>(
        &'a self,
        from: &'a Coordinate,
        to: &'a Coordinate,
    ) -> BoxFuture<'a, Result<(), VehicleError>>;

    fn validate_speed<'a>(&'a self, at: &'a Coordinate, speed_mps: f64) -> BoxFuture<'a, Result<(), VehicleError>>;

    fn validate_takeoff<'a>(
        &'a self,
        at: &'a Coordinate,
        altitude_m: f64,
    ) -> BoxFuture<'a, Result<(), VehicleError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    pub max_speed_mps: f64,
    pub max_vertical_speed_mps: f64,
    pub min_battery_percent: f64,
    pub critical_battery_percent: f64,
    pub require_gps_fix: bool,
    pub min_satellites: u8,
    pub enable_speed_limits: bool,
    pub enable_battery_failsafe: bool,
    pub enable_parameter_validation: bool,
    pub enable_preflight_checks: bool,
    pub auto_clamp_values: bool,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_speed_mps: 15.0,
            max_vertical_speed_mps: 5.0,
            min_battery_percent: 25.0,
            critical_battery_percent: 10.0,
            require_gps_fix: true,
            min_satellites: 6,
            enable_speed_limits: true,
            enable_battery_failsafe: true,
            enable_parameter_validation: true,
            enable_preflight_checks: true,
            auto_clamp_values: true,
        }
    }
}

impl SafetyLimits {
    /// Tighter bounds and no auto-clamping; violations always fail hard.
    pub fn restrictive() -> Self {
        Self {
            max_speed_mps: 8.0,
            max_vertical_speed_mps: 2.5,
            min_battery_percent: 40.0,
            critical_battery_percent: 20.0,
            min_satellites: 8,
            auto_clamp_values: false,
            ..Self::default()
        }
    }

    /// Wide bounds for bench testing against SITL.
    pub fn permissive() -> Self {
        Self {
            max_speed_mps: 30.0,
            max_vertical_speed_mps: 10.0,
            min_battery_percent: 10.0,
            critical_battery_percent: 5.0,
            min_satellites: 4,
            ..Self::default()
        }
    }

    /// All checks off. For SITL smoke tests only.
    pub fn disabled() -> Self {
        Self {
            require_gps_fix: false,
            enable_speed_limits: false,
            enable_battery_failsafe: false,
            enable_parameter_validation: false,
            enable_preflight_checks: false,
            auto_clamp_values: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub message: String,
    pub value: f64,
    pub limit: f64,
}

impl ValidationOutcome {
    fn ok(value: f64, limit: f64) -> Self {
        Self {
            ok: true,
            message: String::new(),
            value,
            limit,
        }
    }

    fn fail(message: impl Into<String>, value: f64, limit: f64) -> Self {
        Self {
            ok: false,
            message: message.into(),
            value,
            limit,
        }
    }

    pub fn into_result(self, parameter: &str) -> Result<(), VehicleError> {
        if self.ok {
            Ok(())
        } else {
            Err(VehicleError::ParameterValidation {
                parameter: parameter.to_string(),
                value: self.value,
                limit: self.limit,
            })
        }
    }

    /// Like [`Self::into_result`], but for checks against a commanded speed:
    /// raises `SpeedLimitExceeded` instead of the generic parameter error.
    pub fn into_speed_result(self) -> Result<(), VehicleError> {
        if self.ok {
            Ok(())
        } else {
            Err(VehicleError::SpeedLimitExceeded { speed: self.value, max: self.limit })
        }
    }
}

pub fn validate_coordinate(coord: &crate::geometry::Coordinate) -> ValidationOutcome {
    if coord.is_valid() {
        ValidationOutcome::ok(coord.latitude_deg, 90.0)
    } else {
        ValidationOutcome::fail("coordinate out of range or non-finite", coord.latitude_deg, 90.0)
    }
}

pub fn validate_altitude(altitude_m: f64, min_alt: f64, max_alt: f64) -> ValidationOutcome {
    if !altitude_m.is_finite() {
        return ValidationOutcome::fail("altitude is not finite", altitude_m, max_alt);
    }
    if altitude_m < min_alt || altitude_m > max_alt {
        return ValidationOutcome::fail(
            format!("altitude {altitude_m} outside [{min_alt}, {max_alt}]"),
            altitude_m,
            max_alt,
        );
    }
    ValidationOutcome::ok(altitude_m, max_alt)
}

pub fn validate_speed(speed_mps: f64, limits: &SafetyLimits) -> ValidationOutcome {
    if !limits.enable_speed_limits {
        return ValidationOutcome::ok(speed_mps, limits.max_speed_mps);
    }
    if !speed_mps.is_finite() || speed_mps < 0.0 {
        return ValidationOutcome::fail("speed must be finite and non-negative", speed_mps, limits.max_speed_mps);
    }
    if speed_mps > limits.max_speed_mps {
        return ValidationOutcome::fail(
            format!("speed {speed_mps} exceeds max {}", limits.max_speed_mps),
            speed_mps,
            limits.max_speed_mps,
        );
    }
    ValidationOutcome::ok(speed_mps, limits.max_speed_mps)
}

pub fn validate_velocity(velocity: &VectorNED, limits: &SafetyLimits) -> ValidationOutcome {
    if !limits.enable_speed_limits {
        return ValidationOutcome::ok(velocity.magnitude(), limits.max_speed_mps);
    }
    let horizontal = velocity.horizontal_magnitude();
    if horizontal > limits.max_speed_mps {
        return ValidationOutcome::fail(
            format!("horizontal speed {horizontal} exceeds max {}", limits.max_speed_mps),
            horizontal,
            limits.max_speed_mps,
        );
    }
    if velocity.down.abs() > limits.max_vertical_speed_mps {
        return ValidationOutcome::fail(
            format!("vertical speed {} exceeds max {}", velocity.down.abs(), limits.max_vertical_speed_mps),
            velocity.down.abs(),
            limits.max_vertical_speed_mps,
        );
    }
    ValidationOutcome::ok(horizontal, limits.max_speed_mps)
}

pub fn validate_tolerance(tolerance_m: f64) -> ValidationOutcome {
    if tolerance_m.is_finite() && tolerance_m >= 0.1 {
        ValidationOutcome::ok(tolerance_m, 0.1)
    } else {
        ValidationOutcome::fail("tolerance must be >= 0.1 m", tolerance_m, 0.1)
    }
}

pub fn validate_timeout(timeout: std::time::Duration) -> ValidationOutcome {
    let secs = timeout.as_secs_f64();
    if secs > 0.0 && secs <= 3600.0 {
        ValidationOutcome::ok(secs, 3600.0)
    } else {
        ValidationOutcome::fail("timeout must be in (0, 3600] seconds", secs, 3600.0)
    }
}

pub fn clamp_speed(speed_mps: f64, limits: &SafetyLimits) -> f64 {
    speed_mps.clamp(0.0, limits.max_speed_mps)
}

pub fn clamp_velocity(velocity: &VectorNED, limits: &SafetyLimits) -> VectorNED {
    let horizontal = velocity.horizontal_magnitude();
    let scaled = if horizontal > limits.max_speed_mps && horizontal > f64::EPSILON {
        let factor = limits.max_speed_mps / horizontal;
        VectorNED::new(velocity.north * factor, velocity.east * factor, velocity.down)
    } else {
        *velocity
    };
    VectorNED::new(
        scaled.north,
        scaled.east,
        scaled.down.clamp(-limits.max_vertical_speed_mps, limits.max_vertical_speed_mps),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_speed_is_identity_within_bounds() {
        let limits = SafetyLimits::default();
        assert_eq!(clamp_speed(5.0, &limits), 5.0);
        assert_eq!(clamp_speed(limits.max_speed_mps + 10.0, &limits), limits.max_speed_mps);
    }

    #[test]
    fn clamp_velocity_preserves_horizontal_direction() {
        let limits = SafetyLimits::default();
        let v = VectorNED::new(0.0, limits.max_speed_mps * 3.0, 0.0);
        let clamped = clamp_velocity(&v, &limits);
        assert!((clamped.horizontal_magnitude() - limits.max_speed_mps).abs() < 1e-9);
        assert!(clamped.north.abs() < 1e-9);
        assert!(clamped.east > 0.0);
    }

    #[test]
    fn validate_speed_rejects_over_limit() {
        let limits = SafetyLimits::default();
        let outcome = validate_speed(limits.max_speed_mps + 1.0, &limits);
        assert!(!outcome.ok);
    }

    #[test]
    fn validate_altitude_accepts_within_range() {
        let outcome = validate_altitude(50.0, 0.0, 120.0);
        assert!(outcome.ok);
    }
}
