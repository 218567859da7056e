//! Entry-point Mission Runner: invokes a single user async function with a
//! connected `Vehicle`. Lifecycle: connect -> invoke -> disconnect.

use crate::signal::wait_for_shutdown_signal;
use mavkit::{Vehicle, VehicleConfig, VehicleError};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

const ABORT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Process exit classification, matching the CLI's exit-code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerExit {
    Success,
    MissionError,
    ConnectionFailed,
    SafetyViolation,
    Sigint,
}

impl RunnerExit {
    pub fn exit_code(self) -> u8 {
        match self {
            RunnerExit::Success => 0,
            RunnerExit::MissionError => 1,
            RunnerExit::ConnectionFailed => 2,
            RunnerExit::SafetyViolation => 3,
            RunnerExit::Sigint => 130,
        }
    }
}

/// Runs `mission` to completion against a freshly connected vehicle,
/// racing it against SIGINT/SIGTERM. On a shutdown signal the vehicle is
/// told to `abort`, and the mission future is given up to 30 s to return
/// before the connection is forced closed.
pub async fn run_entry_point<F, Fut>(address: &str, config: VehicleConfig, mission: F) -> RunnerExit
where
    F: FnOnce(Vehicle) -> Fut,
    Fut: Future<Output = Result<(), VehicleError>>,
{
    let vehicle = match Vehicle::connect_with_config(address, config).await {
        Ok(vehicle) => vehicle,
        Err(err) => {
            error!(%err, "mission runner failed to connect");
            return RunnerExit::ConnectionFailed;
        }
    };

    let mission_future = mission(vehicle.clone());
    tokio::pin!(mission_future);

    let outcome = tokio::select! {
        result = &mut mission_future => classify(result),
        _ = wait_for_shutdown_signal() => {
            warn!("shutdown signal received, aborting mission");
            let _ = vehicle.abort(true).await;
            match tokio::time::timeout(ABORT_GRACE_PERIOD, &mut mission_future).await {
                Ok(result) => {
                    info!(?result, "mission returned during abort grace period");
                    RunnerExit::Sigint
                }
                Err(_) => {
                    warn!("mission did not terminate within the abort grace period, forcing disconnect");
                    RunnerExit::Sigint
                }
            }
        }
    };

    let _ = vehicle.disconnect().await;
    outcome
}

fn classify(result: Result<(), VehicleError>) -> RunnerExit {
    match result {
        Ok(()) => RunnerExit::Success,
        Err(err @ VehicleError::GeofenceViolation { .. }) | Err(err @ VehicleError::Aborted) => {
            error!(%err, "mission ended on a safety violation");
            RunnerExit::SafetyViolation
        }
        Err(err) => {
            error!(%err, "mission function returned an error");
            RunnerExit::MissionError
        }
    }
}
