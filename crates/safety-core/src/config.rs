//! `SafetyConfig`: server-side geofence configuration plus the bounds the
//! pre-flight and runtime checks validate against. Loadable from YAML with
//! `serde_yaml`, mirroring `VehicleConfig::default()` in `mavkit`.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleKind {
    Copter,
    Rover,
}

/// A closed WGS84 polygon, `(lat_deg, lon_deg)` vertices in order.
pub type Polygon = Vec<(f64, f64)>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub vehicle_type: VehicleKind,
    pub min_altitude_m: f64,
    pub max_altitude_m: f64,
    pub min_speed_mps: f64,
    pub max_speed_mps: f64,
    #[serde(default)]
    pub include_polygons: Vec<Polygon>,
    #[serde(default)]
    pub exclude_polygons: Vec<Polygon>,
    #[serde(default)]
    pub validate_path: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            vehicle_type: VehicleKind::Copter,
            min_altitude_m: 0.0,
            max_altitude_m: 120.0,
            min_speed_mps: 0.0,
            max_speed_mps: 15.0,
            include_polygons: Vec::new(),
            exclude_polygons: Vec::new(),
            validate_path: false,
        }
    }
}

impl SafetyConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Read(path.as_ref().display().to_string(), e))?;
        Self::from_yaml_str(&text).map_err(ConfigError::Parse)
    }

    /// Merge in polygons loaded from a KML file as an additional include
    /// region (the common case: one config references one site boundary).
    pub fn with_include_kml(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let polygons =
            load_kml_polygons(path.as_ref()).map_err(|e| ConfigError::Kml(path.as_ref().display().to_string(), e))?;
        self.include_polygons.extend(polygons);
        Ok(self)
    }

    pub fn with_exclude_kml(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let polygons =
            load_kml_polygons(path.as_ref()).map_err(|e| ConfigError::Kml(path.as_ref().display().to_string(), e))?;
        self.exclude_polygons.extend(polygons);
        Ok(self)
    }

    pub fn to_safety_limits(&self) -> mavkit::SafetyLimits {
        mavkit::SafetyLimits {
            max_speed_mps: self.max_speed_mps,
            ..mavkit::SafetyLimits::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read safety config {0}: {1}")]
    Read(String, std::io::Error),
    #[error("failed to parse safety config: {0}")]
    Parse(serde_yaml::Error),
    #[error("failed to parse KML geofence {0}: {1}")]
    Kml(String, KmlError),
}

#[derive(Debug, thiserror::Error)]
pub enum KmlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed coordinates triple: {0}")]
    BadCoordinate(String),
}

/// Parse every `Polygon/outerBoundaryIs/LinearRing/coordinates` element in a
/// KML document, returning one polygon per element. Coordinate triples are
/// `lon,lat,alt` (WGS84); altitude is discarded since geofence polygons are
/// 2D regions evaluated against a separate altitude bound.
pub fn load_kml_polygons(path: &Path) -> Result<Vec<Polygon>, KmlError> {
    let bytes = std::fs::read(path)?;
    parse_kml_polygons(&bytes)
}

fn parse_kml_polygons(bytes: &[u8]) -> Result<Vec<Polygon>, KmlError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut polygons = Vec::new();
    let mut in_coordinates = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"coordinates" => {
                in_coordinates = true;
            }
            Event::End(e) if e.local_name().as_ref() == b"coordinates" => {
                in_coordinates = false;
            }
            Event::Text(text) if in_coordinates => {
                let raw = text.unescape()?.into_owned();
                polygons.push(parse_coordinate_list(&raw)?);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(polygons)
}

fn parse_coordinate_list(raw: &str) -> Result<Polygon, KmlError> {
    raw.split_ascii_whitespace()
        .map(|triple| {
            let mut parts = triple.splitn(3, ',');
            let lon: f64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| KmlError::BadCoordinate(triple.to_string()))?;
            let lat: f64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| KmlError::BadCoordinate(triple.to_string()))?;
            Ok((lat, lon))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_polygon() {
        let kml = r#"<?xml version="1.0"?>
<kml><Document><Placemark><Polygon><outerBoundaryIs><LinearRing>
<coordinates>-78.6960,35.7275,0 -78.6950,35.7275,0 -78.6950,35.7285,0 -78.6960,35.7275,0</coordinates>
</LinearRing></outerBoundaryIs></Polygon></Placemark></Document></kml>"#;
        let polygons = parse_kml_polygons(kml.as_bytes()).unwrap();
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].len(), 4);
        assert!((polygons[0][0].0 - 35.7275).abs() < 1e-9);
        assert!((polygons[0][0].1 - (-78.6960)).abs() < 1e-9);
    }

    #[test]
    fn default_config_round_trips_through_yaml() {
        let config = SafetyConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = SafetyConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.max_speed_mps, config.max_speed_mps);
    }
}
