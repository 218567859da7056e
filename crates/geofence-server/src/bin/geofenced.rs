use clap::Parser;
use safety_core::SafetyConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Reference geofence server answering `status`/`waypoint`/`speed`/`takeoff`
/// requests over the length-prefixed JSON wire protocol.
#[derive(Parser, Debug)]
#[command(name = "geofenced")]
struct Args {
    /// Safety config YAML (vehicle type, speed/altitude bounds).
    #[arg(long)]
    config: PathBuf,

    /// KML file to load as an additional include polygon.
    #[arg(long)]
    include_kml: Option<PathBuf>,

    /// KML file to load as an additional exclude polygon.
    #[arg(long)]
    exclude_kml: Option<PathBuf>,

    /// Address to bind the TCP listener on.
    #[arg(long, default_value = "0.0.0.0:5760")]
    bind: String,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let mut config = match SafetyConfig::from_yaml_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "failed to load safety config");
            return std::process::ExitCode::from(2);
        }
    };

    if let Some(path) = &args.include_kml {
        config = match config.with_include_kml(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(%err, "failed to load include geofence");
                return std::process::ExitCode::from(2);
            }
        };
    }
    if let Some(path) = &args.exclude_kml {
        config = match config.with_exclude_kml(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(%err, "failed to load exclude geofence");
                return std::process::ExitCode::from(2);
            }
        };
    }

    let listener = match TcpListener::bind(&args.bind).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, addr = %args.bind, "failed to bind geofence listener");
            return std::process::ExitCode::from(2);
        }
    };
    tracing::info!(addr = %args.bind, "geofence server listening");

    let shutdown = CancellationToken::new();
    let serve_shutdown = shutdown.clone();
    let serve_task = tokio::spawn(geofence_server::serve(Arc::new(config), listener, serve_shutdown));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl-C, shutting down");
            shutdown.cancel();
        }
        result = serve_task => {
            if let Err(err) = result {
                tracing::error!(%err, "geofence server task panicked");
                return std::process::ExitCode::FAILURE;
            }
        }
    }

    std::process::ExitCode::SUCCESS
}
