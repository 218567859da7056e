//! QGroundControl `.plan` file loading: a thin, synchronous I/O helper. Not
//! part of the async core surface — callers on a latency-sensitive path
//! should wrap this in `tokio::task::spawn_blocking`.

use mavkit::{Coordinate, Waypoint};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("failed to read plan file {0}: {1}")]
    Read(String, std::io::Error),
    #[error("failed to parse plan JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct PlanFile {
    mission: PlanMission,
}

#[derive(Debug, Deserialize)]
struct PlanMission {
    items: Vec<PlanItem>,
}

#[derive(Debug, Deserialize)]
struct PlanItem {
    command: u32,
    params: [Option<f64>; 7],
}

/// MAVLink nav commands that carry a lat/lon/alt target in `params[4..6]`.
const NAV_COMMAND_IDS: &[u32] = &[16, 17, 18, 19, 21, 22, 82, 84, 85];

pub fn load_plan_waypoints(path: impl AsRef<Path>) -> Result<Vec<Waypoint>, PlanError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| PlanError::Read(path.display().to_string(), e))?;
    let plan: PlanFile = serde_json::from_str(&text)?;

    let waypoints = plan
        .mission
        .items
        .iter()
        .filter(|item| NAV_COMMAND_IDS.contains(&item.command))
        .filter_map(|item| {
            let lat = item.params[4]?;
            let lon = item.params[5]?;
            let alt = item.params[6]?;
            Some(Waypoint::new(Coordinate::new(lat, lon, alt)))
        })
        .collect();

    Ok(waypoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_waypoints_from_nav_items_only() {
        let json = serde_json::json!({
            "mission": {
                "items": [
                    {"command": 16, "params": [0, 0, 0, 0, 35.7275, -78.6960, 25.0]},
                    {"command": 178, "params": [0, 0, 0, 0, 0, 0, 0]},
                    {"command": 22, "params": [0, 0, 0, 0, 35.7280, -78.6965, 30.0]},
                ]
            }
        });
        let dir = std::env::temp_dir();
        let path = dir.join(format!("mission_runner_test_plan_{}.plan", std::process::id()));
        std::fs::write(&path, json.to_string()).unwrap();

        let waypoints = load_plan_waypoints(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(waypoints.len(), 2);
        assert!((waypoints[0].coordinate.latitude_deg - 35.7275).abs() < 1e-9);
        assert!((waypoints[1].coordinate.altitude_m - 30.0).abs() < 1e-9);
    }
}
