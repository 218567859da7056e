//! Pure geodesy and local-frame vector math. No I/O, no MAVLink dependency.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used for the flat-Earth / haversine approximations below.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A geodetic point, with altitude measured relative to the vehicle's home
/// position (not MSL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
    pub name: Option<String>,
}

impl Coordinate {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
            name: None,
        }
    }

    pub fn named(latitude_deg: f64, longitude_deg: f64, altitude_m: f64, name: impl Into<String>) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
            name: Some(name.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude_deg.is_finite()
            && self.longitude_deg.is_finite()
            && self.altitude_m.is_finite()
            && (-90.0..=90.0).contains(&self.latitude_deg)
            && (-180.0..=180.0).contains(&self.longitude_deg)
    }

    /// Great-circle surface distance, ignoring altitude.
    pub fn ground_distance_to(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude_deg.to_radians();
        let lat2 = other.latitude_deg.to_radians();
        let dlat = (other.latitude_deg - self.latitude_deg).to_radians();
        let dlon = (other.longitude_deg - self.longitude_deg).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();
        EARTH_RADIUS_M * c
    }

    /// 3D distance: ground distance combined with altitude delta.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let ground = self.ground_distance_to(other);
        let dalt = other.altitude_m - self.altitude_m;
        (ground * ground + dalt * dalt).sqrt()
    }

    /// Initial bearing from `self` to `other`, degrees, 0 = north, clockwise positive.
    pub fn bearing_to(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude_deg.to_radians();
        let lat2 = other.latitude_deg.to_radians();
        let dlon = (other.longitude_deg - self.longitude_deg).to_radians();

        let y = dlon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
        let bearing = y.atan2(x).to_degrees();
        (bearing + 360.0) % 360.0
    }

    /// Offset this coordinate by a local NED vector (meters).
    pub fn offset_by(&self, offset: &VectorNED) -> Coordinate {
        let lat_rad = self.latitude_deg.to_radians();
        let dlat = offset.north / EARTH_RADIUS_M;
        let dlon = offset.east / (EARTH_RADIUS_M * lat_rad.cos());

        Coordinate::new(
            self.latitude_deg + dlat.to_degrees(),
            self.longitude_deg + dlon.to_degrees(),
            self.altitude_m - offset.down,
        )
    }

    /// Local NED vector from `self` to `other`.
    pub fn vector_to(&self, other: &Coordinate) -> VectorNED {
        let bearing = self.bearing_to(other).to_radians();
        let ground = self.ground_distance_to(other);
        VectorNED {
            north: ground * bearing.cos(),
            east: ground * bearing.sin(),
            down: self.altitude_m - other.altitude_m,
        }
    }
}

/// A local North-East-Down vector, meters. `down` is positive downward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorNED {
    pub north: f64,
    pub east: f64,
    pub down: f64,
}

impl VectorNED {
    pub const ZERO: VectorNED = VectorNED {
        north: 0.0,
        east: 0.0,
        down: 0.0,
    };

    pub fn new(north: f64, east: f64, down: f64) -> Self {
        Self { north, east, down }
    }

    pub fn magnitude(&self) -> f64 {
        (self.north * self.north + self.east * self.east + self.down * self.down).sqrt()
    }

    pub fn horizontal_magnitude(&self) -> f64 {
        (self.north * self.north + self.east * self.east).sqrt()
    }

    pub fn normalize(&self) -> VectorNED {
        let mag = self.magnitude();
        if mag < f64::EPSILON {
            return VectorNED::ZERO;
        }
        VectorNED::new(self.north / mag, self.east / mag, self.down / mag)
    }

    pub fn scale(&self, factor: f64) -> VectorNED {
        VectorNED::new(self.north * factor, self.east * factor, self.down * factor)
    }

    pub fn negate(&self) -> VectorNED {
        self.scale(-1.0)
    }

    pub fn add(&self, other: &VectorNED) -> VectorNED {
        VectorNED::new(self.north + other.north, self.east + other.east, self.down + other.down)
    }

    pub fn sub(&self, other: &VectorNED) -> VectorNED {
        self.add(&other.negate())
    }

    /// Rotate the horizontal component by `angle_deg` clockwise (right-hand about down axis).
    pub fn rotate_by_angle(&self, angle_deg: f64) -> VectorNED {
        let rad = angle_deg.to_radians();
        let (sin, cos) = rad.sin_cos();
        VectorNED::new(
            self.north * cos - self.east * sin,
            self.north * sin + self.east * cos,
            self.down,
        )
    }

    /// Compass bearing of the horizontal component, 0 = north, clockwise positive.
    pub fn heading(&self) -> f64 {
        let bearing = self.east.atan2(self.north).to_degrees();
        (bearing + 360.0) % 360.0
    }
}

/// A navigation target with an acceptance radius and optional hold time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub coordinate: Coordinate,
    pub speed: Option<f64>,
    pub acceptance_radius_m: f64,
    pub hold_time_s: f64,
    pub name: Option<String>,
}

impl Waypoint {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            speed: None,
            acceptance_radius_m: 2.0,
            hold_time_s: 0.0,
            name: None,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_acceptance_radius(mut self, radius_m: f64) -> Self {
        self.acceptance_radius_m = radius_m;
        self
    }

    pub fn with_hold_time(mut self, seconds: f64) -> Self {
        self.hold_time_s = seconds;
        self
    }
}

/// Smallest signed angular difference `to - from`, in degrees, in `[-180, 180]`.
pub fn signed_angle_diff(from_deg: f64, to_deg: f64) -> f64 {
    let mut diff = (to_deg - from_deg) % 360.0;
    if diff > 180.0 {
        diff -= 360.0;
    } else if diff < -180.0 {
        diff += 360.0;
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric() {
        let a = Coordinate::new(47.0, 8.0, 0.0);
        let b = Coordinate::new(47.01, 8.02, 10.0);
        assert!((a.distance_to(&b) - b.distance_to(&a)).abs() < 1e-6);
    }

    #[test]
    fn ground_distance_triangle_inequality() {
        let a = Coordinate::new(47.0, 8.0, 0.0);
        let b = Coordinate::new(47.01, 8.0, 0.0);
        let c = Coordinate::new(47.02, 8.03, 0.0);
        assert!(a.ground_distance_to(&c) <= a.ground_distance_to(&b) + b.ground_distance_to(&c) + 1e-6);
    }

    #[test]
    fn offset_and_vector_round_trip() {
        let origin = Coordinate::new(35.7275, -78.6960, 10.0);
        let offset = VectorNED::new(20.0, -30.0, -5.0);
        let moved = origin.offset_by(&offset);
        let recovered = origin.vector_to(&moved);
        assert!((recovered.north - offset.north).abs() < 1.0);
        assert!((recovered.east - offset.east).abs() < 1.0);
    }

    #[test]
    fn negate_is_involution() {
        let v = VectorNED::new(1.0, -2.0, 3.0);
        assert_eq!(v.negate().negate(), v);
    }

    #[test]
    fn normalize_has_unit_or_zero_magnitude() {
        let v = VectorNED::new(3.0, 4.0, 0.0);
        assert!((v.normalize().magnitude() - 1.0).abs() < 1e-9);
        assert_eq!(VectorNED::ZERO.normalize(), VectorNED::ZERO);
    }

    #[test]
    fn rotate_by_90_swaps_axes() {
        let v = VectorNED::new(1.0, 0.0, 0.0);
        let rotated = v.rotate_by_angle(90.0);
        assert!((rotated.north).abs() < 1e-9);
        assert!((rotated.east - 1.0).abs() < 1e-9);
    }

    #[test]
    fn signed_angle_diff_wraps_shortest_way() {
        assert!((signed_angle_diff(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((signed_angle_diff(10.0, 350.0) + 20.0).abs() < 1e-9);
    }
}
