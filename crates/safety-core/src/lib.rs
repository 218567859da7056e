//! Safety subsystem: parameter validators live in `mavkit::safety`; this
//! crate adds the heavier pieces that need a live `Vehicle` or an
//! out-of-process collaborator — pre-flight checks, the runtime monitor,
//! the geofence client, and the `SafetyConfig`/KML loader shared with the
//! reference geofence server.

pub mod config;
pub mod geofence_client;
pub mod monitor;
pub mod preflight;
pub mod wire;

pub use config::{ConfigError, KmlError, Polygon, SafetyConfig, VehicleKind};
pub use geofence_client::GeofenceClient;
pub use monitor::{Callback, SafetyMonitor, Violation, ViolationKind};
pub use preflight::{checked_arm, run_preflight, CheckOutcome, PreflightResult};
