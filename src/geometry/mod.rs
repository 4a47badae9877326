use geo::{HaversineBearing, HaversineDestination, HaversineDistance, Point};
use serde::{Deserialize, Serialize};

use crate::error::{GeometryError, StatusOr};

/// Feet per metre
pub const FEET_PER_METER: f64 = 3.28084;

/// Square feet per square metre
pub const SQ_FEET_PER_SQ_METER: f64 = 10.7639;

/// A WGS-84 latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    /// Create a coordinate, rejecting values outside the valid lat/lng range
    pub fn new(lat: f64, lng: f64) -> StatusOr<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(GeometryError::CoordinateOutOfRange { lat, lng });
        }
        Ok(Self { lat, lng })
    }

    /// Read a GeoJSON position, which is ordered `[lng, lat]`
    pub fn from_position(position: &[f64]) -> StatusOr<Self> {
        match position {
            [lng, lat, ..] => Self::new(*lat, *lng),
            _ => Err(GeometryError::ShortPosition(position.len())),
        }
    }

    /// Re-check the range of a coordinate built from a struct literal
    pub fn validate(self) -> StatusOr<Self> {
        Self::new(self.lat, self.lng)
    }

    pub fn to_position(self) -> Vec<f64> {
        vec![self.lng, self.lat]
    }

    fn to_point(self) -> Point<f64> {
        Point::new(self.lng, self.lat)
    }

    fn from_point(point: Point<f64>) -> Self {
        Self {
            lat: point.y(),
            lng: point.x(),
        }
    }

    /// Great-circle distance in metres
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        self.to_point().haversine_distance(&other.to_point())
    }

    /// Initial bearing towards `other`, degrees clockwise from north
    pub fn bearing_to(&self, other: &Coordinate) -> f64 {
        self.to_point().haversine_bearing(other.to_point())
    }

    /// The point reached by travelling `distance_m` metres along `bearing`
    pub fn destination(&self, bearing: f64, distance_m: f64) -> Coordinate {
        Self::from_point(self.to_point().haversine_destination(bearing, distance_m))
    }

    /// Plain lat/lng average, used for label placement on short segments
    pub fn midpoint(&self, other: &Coordinate) -> Coordinate {
        Coordinate {
            lat: (self.lat + other.lat) / 2.0,
            lng: (self.lng + other.lng) / 2.0,
        }
    }

    pub fn approx_eq(&self, other: &Coordinate, tolerance: f64) -> bool {
        (self.lat - other.lat).abs() <= tolerance && (self.lng - other.lng).abs() <= tolerance
    }
}

/// The four corners of a parent parcel, in ring order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadrilateral {
    pub top_left: Coordinate,
    pub top_right: Coordinate,
    pub bottom_right: Coordinate,
    pub bottom_left: Coordinate,
}

impl Quadrilateral {
    pub fn new(
        top_left: Coordinate,
        top_right: Coordinate,
        bottom_right: Coordinate,
        bottom_left: Coordinate,
    ) -> Self {
        Self {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        }
    }

    /// Take the first four positions of a boundary ring as
    /// top-left, top-right, bottom-right, bottom-left
    pub fn from_ring(ring: &[Vec<f64>]) -> StatusOr<Self> {
        if ring.len() < 4 {
            return Err(GeometryError::ShortRing(ring.len()));
        }
        Ok(Self {
            top_left: Coordinate::from_position(&ring[0])?,
            top_right: Coordinate::from_position(&ring[1])?,
            bottom_right: Coordinate::from_position(&ring[2])?,
            bottom_left: Coordinate::from_position(&ring[3])?,
        })
    }

    pub fn corners(&self) -> [Coordinate; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }

    /// Fails on the first corner outside the lat/lng range, NaN included
    pub fn validate(&self) -> StatusOr<()> {
        for corner in self.corners() {
            corner.validate()?;
        }
        Ok(())
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_coordinates(self.corners().iter())
            .unwrap_or_else(|| Bounds::point(self.top_left))
    }
}

/// An axis-aligned lat/lng box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub south_west: Coordinate,
    pub north_east: Coordinate,
}

impl Bounds {
    pub fn point(c: Coordinate) -> Self {
        Self {
            south_west: c,
            north_east: c,
        }
    }

    /// Smallest box containing every coordinate, `None` for an empty input
    pub fn from_coordinates<'a>(coords: impl IntoIterator<Item = &'a Coordinate>) -> Option<Self> {
        let mut iter = coords.into_iter();
        let first = *iter.next()?;
        let mut bounds = Self::point(first);
        for c in iter {
            bounds.extend(c);
        }
        Some(bounds)
    }

    pub fn extend(&mut self, c: &Coordinate) {
        self.south_west.lat = self.south_west.lat.min(c.lat);
        self.south_west.lng = self.south_west.lng.min(c.lng);
        self.north_east.lat = self.north_east.lat.max(c.lat);
        self.north_east.lng = self.north_east.lng.max(c.lng);
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        let mut merged = *self;
        merged.extend(&other.south_west);
        merged.extend(&other.north_east);
        merged
    }

    pub fn center(&self) -> Coordinate {
        self.south_west.midpoint(&self.north_east)
    }

    pub fn contains(&self, c: &Coordinate) -> bool {
        c.lat >= self.south_west.lat
            && c.lat <= self.north_east.lat
            && c.lng >= self.south_west.lng
            && c.lng <= self.north_east.lng
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(Coordinate::new(91.0, 0.0).is_err());
        assert!(Coordinate::new(0.0, -180.5).is_err());
        assert!(Coordinate::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn positions_are_lng_lat() {
        let c = Coordinate::from_position(&[71.5, 29.3]).unwrap();
        assert_eq!(c.lat, 29.3);
        assert_eq!(c.lng, 71.5);
        assert_eq!(c.to_position(), vec![71.5, 29.3]);
    }

    #[test]
    fn destination_inverts_distance_and_bearing() {
        let origin = Coordinate::new(29.35, 71.62).unwrap();
        let target = Coordinate::new(29.352, 71.623).unwrap();
        let reached = origin.destination(origin.bearing_to(&target), origin.distance_to(&target));
        assert!(reached.approx_eq(&target, 1e-9));
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let a = Coordinate::new(0.0, 0.0).unwrap();
        let b = Coordinate::new(1.0, 0.0).unwrap();
        let d = a.distance_to(&b);
        assert!((d - 111_195.0).abs() < 10.0, "got {}", d);
        assert!(a.bearing_to(&b).abs() < 1e-9);
    }

    #[test]
    fn short_positions_are_reported_as_such() {
        assert_eq!(Coordinate::from_position(&[71.5]), Err(GeometryError::ShortPosition(1)));
    }

    #[test]
    fn validate_catches_literal_coordinates() {
        let bad = Coordinate { lat: f64::NAN, lng: 71.74 };
        assert!(bad.validate().is_err());
        let ok = Coordinate { lat: 29.1, lng: 71.74 };
        let quad = Quadrilateral::new(ok, ok, ok, bad);
        assert!(matches!(
            quad.validate(),
            Err(GeometryError::CoordinateOutOfRange { .. })
        ));
    }

    #[test]
    fn quadrilateral_needs_four_positions() {
        let ring = vec![vec![71.0, 29.0], vec![71.1, 29.0], vec![71.1, 28.9]];
        assert_eq!(Quadrilateral::from_ring(&ring), Err(GeometryError::ShortRing(3)));
    }

    #[test]
    fn bounds_cover_all_points() {
        let pts = [
            Coordinate::new(29.0, 71.2).unwrap(),
            Coordinate::new(29.4, 71.0).unwrap(),
        ];
        let b = Bounds::from_coordinates(pts.iter()).unwrap();
        assert_eq!(b.south_west, Coordinate { lat: 29.0, lng: 71.0 });
        assert_eq!(b.north_east, Coordinate { lat: 29.4, lng: 71.2 });
        assert!(b.center().approx_eq(&Coordinate { lat: 29.2, lng: 71.1 }, 1e-12));
    }
}
