//! Reference geofence server: a small `tokio` TCP listener answering the
//! wire protocol's `status`/`waypoint`/`speed`/`takeoff` requests against a
//! [`SafetyConfig`] loaded from YAML, with include/exclude polygons loaded
//! from KML and checked with the `geo` crate's point-in-polygon predicate.

use geo::{Contains, Coord, LineString, Point, Polygon as GeoPolygon};
use safety_core::config::{Polygon, VehicleKind};
use safety_core::wire::{read_frame, write_frame, Reply, Request};
use safety_core::SafetyConfig;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accepts connections until `shutdown` is triggered, handling each on its
/// own task. Does not return until the listener itself errors or shutdown
/// fires.
pub async fn serve(config: Arc<SafetyConfig>, listener: TcpListener, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("geofence server shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "geofence client connected");
                        let config = config.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, config).await {
                                warn!(%peer, %err, "geofence connection ended with error");
                            }
                        });
                    }
                    Err(err) => {
                        warn!(%err, "failed to accept geofence connection");
                    }
                }
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, config: Arc<SafetyConfig>) -> std::io::Result<()> {
    loop {
        let request: Request = match read_frame(&mut stream).await {
            Ok(request) => request,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        };
        let reply = handle_request(&request, &config);
        write_frame(&mut stream, &reply).await?;
    }
}

fn handle_request(request: &Request, config: &SafetyConfig) -> Reply {
    match request {
        Request::Status => Reply::Status { ok: true },
        Request::Waypoint { from, to } => {
            let (valid, reason) = validate_point(to.lat, to.lon, to.alt, None, config);
            let (valid, reason) = if valid && config.validate_path {
                validate_path(from.lat, from.lon, to.lat, to.lon, config)
            } else {
                (valid, reason)
            };
            Reply::valid(valid, reason)
        }
        Request::Speed { speed } => {
            let valid = *speed >= config.min_speed_mps && *speed <= config.max_speed_mps;
            let reason = if valid {
                None
            } else {
                Some(format!("speed {speed} outside [{}, {}]", config.min_speed_mps, config.max_speed_mps))
            };
            Reply::valid(valid, reason)
        }
        Request::Takeoff { alt, lat, lon } => {
            let (valid, reason) = validate_point(*lat, *lon, *alt, None, config);
            Reply::valid(valid, reason)
        }
    }
}

fn validate_point(lat: f64, lon: f64, alt: f64, _speed: Option<f64>, config: &SafetyConfig) -> (bool, Option<String>) {
    for polygon in &config.include_polygons {
        if !point_in_polygon(lat, lon, polygon) {
            return (false, Some(String::from("outside include polygon")));
        }
    }
    for polygon in &config.exclude_polygons {
        if point_in_polygon(lat, lon, polygon) {
            return (false, Some(String::from("inside exclude polygon")));
        }
    }
    let alt_ok = match config.vehicle_type {
        VehicleKind::Copter => alt >= config.min_altitude_m && alt <= config.max_altitude_m,
        VehicleKind::Rover => true,
    };
    if !alt_ok {
        return (
            false,
            Some(format!("altitude {alt} outside [{}, {}]", config.min_altitude_m, config.max_altitude_m)),
        );
    }
    (true, None)
}

fn validate_path(from_lat: f64, from_lon: f64, to_lat: f64, to_lon: f64, config: &SafetyConfig) -> (bool, Option<String>) {
    for polygon in &config.exclude_polygons {
        if segment_crosses_polygon(from_lat, from_lon, to_lat, to_lon, polygon) {
            return (false, Some(String::from("path crosses exclude polygon boundary")));
        }
    }
    (true, None)
}

fn point_in_polygon(lat: f64, lon: f64, vertices: &Polygon) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let ring: LineString<f64> = vertices.iter().map(|(lat, lon)| Coord { x: *lon, y: *lat }).collect();
    let polygon = GeoPolygon::new(ring, Vec::new());
    polygon.contains(&Point::new(lon, lat))
}

fn segment_crosses_polygon(from_lat: f64, from_lon: f64, to_lat: f64, to_lon: f64, vertices: &Polygon) -> bool {
    if vertices.len() < 2 {
        return false;
    }
    for window in vertices.windows(2) {
        let (a_lat, a_lon) = window[0];
        let (b_lat, b_lon) = window[1];
        if segments_intersect((from_lat, from_lon), (to_lat, to_lon), (a_lat, a_lon), (b_lat, b_lon)) {
            return true;
        }
    }
    false
}

fn segments_intersect(p1: (f64, f64), p2: (f64, f64), p3: (f64, f64), p4: (f64, f64)) -> bool {
    fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    }
    let d1 = cross(p3, p4, p1);
    let d2 = cross(p3, p4, p2);
    let d3 = cross(p1, p2, p3);
    let d4 = cross(p1, p2, p4);
    (d1 > 0.0) != (d2 > 0.0) && (d3 > 0.0) != (d4 > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon {
        vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0), (0.0, 0.0)]
    }

    #[test]
    fn point_inside_square_is_contained() {
        assert!(point_in_polygon(0.5, 0.5, &square()));
    }

    #[test]
    fn point_outside_square_is_not_contained() {
        assert!(!point_in_polygon(2.0, 2.0, &square()));
    }

    #[test]
    fn include_exclude_difference_is_respected() {
        let config = SafetyConfig {
            include_polygons: vec![square()],
            exclude_polygons: vec![vec![(0.4, 0.4), (0.4, 0.6), (0.6, 0.6), (0.6, 0.4), (0.4, 0.4)]],
            ..SafetyConfig::default()
        };
        let (outside_valid, _) = validate_point(0.9, 0.9, 10.0, None, &config);
        assert!(outside_valid);
        let (hole_valid, _) = validate_point(0.5, 0.5, 10.0, None, &config);
        assert!(!hole_valid);
        let (far_valid, _) = validate_point(5.0, 5.0, 10.0, None, &config);
        assert!(!far_valid);
    }

    #[test]
    fn altitude_bound_rejects_copter_above_max() {
        let config = SafetyConfig { max_altitude_m: 50.0, ..SafetyConfig::default() };
        let (valid, _) = validate_point(0.0, 0.0, 51.0, None, &config);
        assert!(!valid);
    }

    #[test]
    fn crossing_segment_is_detected() {
        let square = square();
        assert!(segment_crosses_polygon(-0.5, 0.5, 1.5, 0.5, &square));
        assert!(!segment_crosses_polygon(2.0, 2.0, 3.0, 3.0, &square));
    }
}
