pub mod command;
pub mod config;
pub mod control;
pub mod error;
pub mod event_loop;
pub mod geometry;
pub mod handle;
pub mod mission;
#[cfg(feature = "ardupilot")]
pub mod modes;
pub mod params;
pub mod safety;
pub mod snapshot;
pub mod state;
pub mod vehicle;

pub use config::VehicleConfig;
pub use error::VehicleError;
pub use geometry::{signed_angle_diff, Coordinate, VectorNED, Waypoint};
pub use handle::{CommandHandle, CommandResult, CommandStatus, Progress, ProgressValue};
pub use safety::SafetyLimits;
pub use snapshot::{BatteryState, GpsState, LandedState, VehicleSnapshot};
pub use vehicle::Vehicle;

pub use state::{
    AutopilotType, FlightMode, GpsFixType, LinkState, MissionState, SystemStatus, Telemetry,
    VehicleIdentity, VehicleState, VehicleType,
};

pub use mission::{
    items_for_wire_upload, normalize_for_compare, plan_from_wire_download, plans_equivalent,
    validate_plan, CompareTolerance, HomePosition, IssueSeverity, MissionFrame, MissionHandle,
    MissionItem, MissionIssue, MissionPlan, MissionTransferMachine, MissionType, RetryPolicy,
    TransferDirection, TransferError, TransferEvent, TransferPhase, TransferProgress,
};
