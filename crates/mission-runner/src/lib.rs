//! Mission Runner: two ways to drive a `Vehicle` through user logic. The
//! entry-point runner hands a connected vehicle to one user async function;
//! the state-machine runner drives named states with background tasks.

pub mod entry;
pub mod plan;
pub mod signal;
pub mod state_machine;

pub use entry::{run_entry_point, RunnerExit};
pub use plan::{load_plan_waypoints, PlanError};
pub use signal::wait_for_shutdown_signal;
pub use state_machine::{BackgroundTask, Context, InitHook, MissionState, StateMachineRunner, StateOutcome};
