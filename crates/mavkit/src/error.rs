#[derive(Debug, thiserror::Error)]
pub enum VehicleError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("vehicle disconnected")]
    Disconnected,
    #[error("operation timed out")]
    Timeout,
    #[error("operation cancelled")]
    Cancelled,
    #[error("command {command} rejected: {result}")]
    CommandRejected { command: String, result: String },
    #[error("no heartbeat received yet")]
    IdentityUnknown,
    #[error("mode '{0}' not available for this vehicle")]
    ModeNotAvailable(String),
    #[error("mission transfer failed: [{code}] {message}")]
    MissionTransfer { code: String, message: String },
    #[error("mission validation failed: {0}")]
    MissionValidation(String),
    #[error("MAVLink I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("heartbeat lost")]
    HeartbeatLost,
    #[error("arm rejected: {0}")]
    ArmFailed(String),
    #[error("pre-flight checks failed: {failed_checks:?}")]
    PreflightCheckFailed { failed_checks: Vec<String> },
    #[error("takeoff failed: {0}")]
    TakeoffFailed(String),
    #[error("takeoff did not reach target altitude in time")]
    TakeoffTimeout,
    #[error("landing failed: {0}")]
    LandingFailed(String),
    #[error("vehicle did not land in time")]
    LandingTimeout,
    #[error("navigation failed: {0}")]
    NavigationFailed(String),
    #[error("goto timed out with {distance_remaining_m:.1} m remaining")]
    GotoTimeout { distance_remaining_m: f64 },
    #[error("command rejected: abort flag is set")]
    Aborted,
    #[error("command cancelled by caller")]
    CommandCancelled,
    #[error("another command is already running")]
    CommandBusy,
    #[error("parameter '{parameter}' value {value} outside limit {limit}")]
    ParameterValidation {
        parameter: String,
        value: f64,
        limit: f64,
    },
    #[error("speed {speed} exceeds maximum {max}")]
    SpeedLimitExceeded { speed: f64, max: f64 },
    #[error("geofence violation: {reason} (from {current_position:?} to {target_position:?})")]
    GeofenceViolation {
        current_position: crate::geometry::Coordinate,
        target_position: crate::geometry::Coordinate,
        reason: String,
    },
    #[error("geofence server did not respond in time")]
    GeofenceUnavailable,
    #[error("telemetry field '{0}' has not been populated yet")]
    UnavailableTelemetry(String),
}
