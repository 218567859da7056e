//! The rich vehicle telemetry snapshot consumed by the control core and the
//! safety monitor. Distinct from [`crate::state::Telemetry`], which only
//! tracks the minimal link-level fields the mission/param transfers need.

use crate::geometry::{Coordinate, VectorNED};
use crate::state::GpsFixType;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandedState {
    Unknown,
    OnGround,
    TakingOff,
    InAir,
    Landing,
}

impl Default for LandedState {
    fn default() -> Self {
        LandedState::Unknown
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub voltage_v: Option<f32>,
    pub current_a: Option<f32>,
    pub percentage: Option<f32>,
    pub is_low: bool,
    pub is_critical: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsState {
    pub fix_type: GpsFixType,
    pub satellites_visible: u8,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

impl GpsState {
    pub fn has_fix(&self) -> bool {
        matches!(
            self.fix_type,
            GpsFixType::Fix3d | GpsFixType::Dgps | GpsFixType::RtkFloat | GpsFixType::RtkFixed
        )
    }
}

/// A single, internally-consistent snapshot of vehicle telemetry.
///
/// Every field reflects the same moment in time: the event loop only
/// publishes a snapshot once all of a message's fields have been folded in,
/// so readers never observe a torn update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub position: Option<Coordinate>,
    pub heading_deg: f64,
    pub velocity: VectorNED,
    pub groundspeed_mps: f64,
    pub airspeed_mps: f64,
    pub climb_rate_mps: f64,
    pub flight_mode: String,
    pub landed_state: LandedState,
    pub armed: bool,
    pub in_air: bool,
    pub battery: BatteryState,
    pub gps: GpsState,
    pub home: Option<Coordinate>,
    pub generation: u64,
}

impl VehicleSnapshot {
    /// Altitude relative to home, or `0.0` before the first position fix.
    pub fn altitude_m(&self) -> f64 {
        self.position.as_ref().map(|p| p.altitude_m).unwrap_or(0.0)
    }

    pub fn distance_to_home(&self) -> Option<f64> {
        match (&self.position, &self.home) {
            (Some(pos), Some(home)) => Some(pos.ground_distance_to(home)),
            _ => None,
        }
    }
}

pub(crate) fn create_channel() -> (watch::Sender<VehicleSnapshot>, watch::Receiver<VehicleSnapshot>) {
    watch::channel(VehicleSnapshot::default())
}

/// Suspend until `predicate` holds for an observed snapshot, or `timeout` elapses.
///
/// Mirrors the heartbeat-wait pattern used by `Vehicle::connect_with_config`:
/// race a `watch::Receiver::changed()` loop against a `tokio::time::sleep`.
pub async fn wait_until<F>(
    mut rx: watch::Receiver<VehicleSnapshot>,
    timeout: Duration,
    mut predicate: F,
) -> Result<VehicleSnapshot, crate::error::VehicleError>
where
    F: FnMut(&VehicleSnapshot) -> bool,
{
    {
        let current = rx.borrow().clone();
        if predicate(&current) {
            return Ok(current);
        }
    }

    let wait_loop = async {
        loop {
            rx.changed()
                .await
                .map_err(|_| crate::error::VehicleError::Disconnected)?;
            let snapshot = rx.borrow().clone();
            if predicate(&snapshot) {
                return Ok::<VehicleSnapshot, crate::error::VehicleError>(snapshot);
            }
        }
    };

    tokio::select! {
        result = wait_loop => result,
        _ = tokio::time::sleep(timeout) => Err(crate::error::VehicleError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_until_resolves_immediately_when_predicate_already_holds() {
        let (_tx, rx) = create_channel();
        let result = wait_until(rx, Duration::from_millis(50), |_| true).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wait_until_times_out_when_predicate_never_holds() {
        let (_tx, rx) = create_channel();
        let result = wait_until(rx, Duration::from_millis(20), |_| false).await;
        assert!(matches!(result, Err(crate::error::VehicleError::Timeout)));
    }

    #[tokio::test]
    async fn wait_until_observes_later_update() {
        let (tx, rx) = create_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send_modify(|s| s.armed = true);
        });
        let result = wait_until(rx, Duration::from_millis(200), |s| s.armed).await;
        assert!(result.unwrap().armed);
    }
}
