//! `vehiclectl`: the Mission Runner's CLI entry point. Connects to a
//! vehicle, optionally flies a QGroundControl `.plan` file, and exits with
//! the code the process-supervision layer expects.

use clap::{Parser, ValueEnum};
use mavkit::{Vehicle, VehicleConfig, VehicleError};
use safety_core::SafetyConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VehicleKindArg {
    Drone,
    Rover,
    None,
}

/// Fly a mission against a MAVLink-speaking vehicle.
#[derive(Parser, Debug)]
#[command(name = "vehiclectl")]
struct Args {
    /// Named built-in mission to run. Only "plan-follower" ships today; the
    /// original dynamically-loaded Python mission module is replaced by a
    /// small compiled-in registry (see DESIGN.md).
    #[arg(long, default_value = "plan-follower")]
    script: String,

    /// MAVLink connection URI, e.g. `udpin:0.0.0.0:14550`.
    #[arg(long)]
    conn: String,

    #[arg(long, value_enum, default_value_t = VehicleKindArg::Drone)]
    vehicle: VehicleKindArg,

    /// QGroundControl `.plan` file to fly.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Accepted for CLI compatibility with the multi-vehicle ZeroMQ
    /// coordination proxy; not wired to a transport (out of scope).
    #[arg(long)]
    zmq_identifier: Option<String>,

    #[arg(long)]
    zmq_proxy_server: Option<String>,

    /// Telemetry log sample rate in Hz, used only when `--output` is set.
    #[arg(long, default_value_t = 1.0)]
    samplerate: f64,

    /// Optional path to log newline-delimited JSON telemetry snapshots to.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Safety config YAML (speed/altitude bounds, arming-check policy).
    #[arg(long)]
    safety_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let safety_config = match &args.safety_config {
        Some(path) => match SafetyConfig::from_yaml_file(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(%err, "failed to load safety config");
                return std::process::ExitCode::from(2);
            }
        },
        None => SafetyConfig::default(),
    };
    let limits = safety_config.to_safety_limits();

    if args.zmq_identifier.is_some() || args.zmq_proxy_server.is_some() {
        tracing::warn!("zmq flags accepted but not wired to a coordination transport in this build");
    }

    let plan_path = args.file.clone();
    let output_path = args.output.clone();
    let samplerate = args.samplerate;
    let script = args.script.clone();

    let outcome = mission_runner::run_entry_point(&args.conn, VehicleConfig::default(), move |vehicle| async move {
        vehicle.set_safety_limits(limits);

        let mut telemetry_log = output_path
            .map(|path| tokio::task::spawn(log_telemetry(vehicle.clone(), path, samplerate)));

        let result = run_mission(&script, &vehicle, &safety_config, plan_path.as_deref()).await;

        if let Some(handle) = telemetry_log.take() {
            handle.abort();
        }
        result
    })
    .await;

    std::process::ExitCode::from(outcome.exit_code())
}

async fn run_mission(
    script: &str,
    vehicle: &Vehicle,
    safety_config: &SafetyConfig,
    plan_path: Option<&std::path::Path>,
) -> Result<(), VehicleError> {
    match script {
        "plan-follower" => fly_plan(vehicle, safety_config, plan_path).await,
        other => Err(VehicleError::NavigationFailed(format!("unknown mission script '{other}'"))),
    }
}

async fn fly_plan(
    vehicle: &Vehicle,
    safety_config: &SafetyConfig,
    plan_path: Option<&std::path::Path>,
) -> Result<(), VehicleError> {
    let limits = vehicle.safety_limits();
    safety_core::checked_arm(vehicle, safety_config, &limits, false, false).await?;

    let waypoints = match plan_path {
        Some(path) => mission_runner::load_plan_waypoints(path)
            .map_err(|err| VehicleError::NavigationFailed(err.to_string()))?,
        None => Vec::new(),
    };

    let Some(first) = waypoints.first() else {
        tracing::warn!("no plan file supplied, nothing to fly");
        return vehicle.land(true).await.map(|_| ());
    };

    vehicle.takeoff(first.coordinate.altitude_m, true).await?;

    for waypoint in &waypoints {
        vehicle
            .goto(
                waypoint.coordinate.clone(),
                waypoint.acceptance_radius_m,
                waypoint.speed,
                None,
                Duration::from_secs(60),
                true,
            )
            .await?;
    }

    vehicle.land(true).await?;
    Ok(())
}

async fn log_telemetry(vehicle: Vehicle, path: PathBuf, samplerate_hz: f64) {
    let period = Duration::from_secs_f64((1.0 / samplerate_hz.max(0.01)).min(3600.0));
    let mut file = match tokio::fs::File::create(&path).await {
        Ok(file) => file,
        Err(err) => {
            tracing::error!(%err, path = %path.display(), "failed to open telemetry log");
            return;
        }
    };
    use tokio::io::AsyncWriteExt;

    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let snapshot = vehicle.snapshot().borrow().clone();
        match serde_json::to_string(&snapshot) {
            Ok(line) => {
                if file.write_all(line.as_bytes()).await.is_err() || file.write_all(b"\n").await.is_err() {
                    return;
                }
            }
            Err(err) => tracing::warn!(%err, "failed to serialize telemetry snapshot"),
        }
    }
}
