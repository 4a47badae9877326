use std::cmp::Ordering;
use std::collections::HashMap;

use geo::{Contains, LineString, Point, Polygon};
use geojson::{GeoJson, JsonValue, Value};
use log::{debug, info, warn};
use s2::cellid::CellID;
use s2::latlng::LatLng;

use crate::error::StatusOr;
use crate::geometry::{Bounds, Coordinate, Quadrilateral};

/// Property carrying the murabba number on boundary features
pub const MURABBA_PROPERTY: &str = "Murabba_No";

/// Deepest S2 level used for parcel buckets
const MAX_BUCKET_LEVEL: u64 = 30;

/// Ordered region identifiers, e.g. `["Yazman", "4 DNB"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RegionPath {
    segments: Vec<String>,
}

impl RegionPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// A murabba as read from the boundary layer
#[derive(Debug, Clone, PartialEq)]
pub struct ParentParcel {
    pub number: String,
    pub quad: Quadrilateral,
    /// Full outer ring, used for hit testing
    pub ring: Vec<Coordinate>,
}

impl ParentParcel {
    pub fn bounds(&self) -> Bounds {
        Bounds::from_coordinates(self.ring.iter()).unwrap_or_else(|| self.quad.bounds())
    }

    fn polygon(&self) -> Polygon<f64> {
        let exterior: LineString<f64> = self.ring.iter().map(|c| (c.lng, c.lat)).collect();
        Polygon::new(exterior, vec![])
    }
}

/// Murabba numbers arrive as strings or numbers; treat them as strings
fn parcel_number(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn cell_of(c: &Coordinate) -> CellID {
    CellID::from(LatLng::from_degrees(c.lat, c.lng))
}

/// The deepest cell containing every corner, `None` when the corners
/// straddle cube faces
fn common_ancestor(corners: &[Coordinate]) -> Option<CellID> {
    let leaves: Vec<CellID> = corners.iter().map(cell_of).collect();
    let first = leaves.first()?;
    (0..=MAX_BUCKET_LEVEL).rev().find_map(|level| {
        let candidate = first.parent(level);
        leaves
            .iter()
            .all(|leaf| leaf.parent(level).0 == candidate.0)
            .then_some(candidate)
    })
}

/// Boundary parcels of one mauza, with S2-bucketed point lookup
#[derive(Debug, Clone, Default)]
pub struct ParcelIndex {
    parcels: Vec<ParentParcel>,
    by_number: HashMap<String, usize>,
    buckets: HashMap<u64, Vec<usize>>,
    unbucketed: Vec<usize>,
}

impl ParcelIndex {
    /// Read every feature that carries a murabba number and a polygon
    pub fn from_geojson(geojson: &GeoJson) -> Self {
        let features = match geojson {
            GeoJson::FeatureCollection(fc) => fc.features.iter().collect::<Vec<_>>(),
            GeoJson::Feature(f) => vec![f],
            GeoJson::Geometry(_) => Vec::new(),
        };

        let mut index = Self::default();
        for feature in features {
            let Some(number) = feature
                .properties
                .as_ref()
                .and_then(|p| p.get(MURABBA_PROPERTY))
                .and_then(parcel_number)
            else {
                debug!("Skipping boundary feature without {}", MURABBA_PROPERTY);
                continue;
            };

            let ring = match feature.geometry.as_ref().map(|g| &g.value) {
                Some(Value::Polygon(rings)) => rings.first(),
                Some(Value::MultiPolygon(polygons)) => polygons.first().and_then(|p| p.first()),
                _ => None,
            };
            let Some(ring) = ring else {
                debug!("Skipping murabba {}: no polygon geometry", number);
                continue;
            };

            match Self::parse_parcel(number.clone(), ring) {
                Ok(parcel) => index.insert(parcel),
                Err(e) => warn!("Skipping murabba {}: {}", number, e),
            }
        }

        info!("Indexed {} murabbas", index.len());
        index
    }

    fn parse_parcel(number: String, ring: &[Vec<f64>]) -> StatusOr<ParentParcel> {
        let quad = Quadrilateral::from_ring(ring)?;
        let ring = ring
            .iter()
            .map(|p| Coordinate::from_position(p))
            .collect::<StatusOr<Vec<_>>>()?;
        Ok(ParentParcel { number, quad, ring })
    }

    /// Add a parcel; a repeated number keeps the first one
    pub fn insert(&mut self, parcel: ParentParcel) {
        if self.by_number.contains_key(&parcel.number) {
            warn!("Duplicate murabba {}, keeping the first", parcel.number);
            return;
        }
        let idx = self.parcels.len();
        self.by_number.insert(parcel.number.clone(), idx);

        match common_ancestor(&parcel.ring) {
            Some(cell) => self.buckets.entry(cell.0).or_default().push(idx),
            None => self.unbucketed.push(idx),
        }
        self.parcels.push(parcel);
    }

    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    pub fn parcels(&self) -> &[ParentParcel] {
        &self.parcels
    }

    pub fn parcel(&self, number: &str) -> Option<&ParentParcel> {
        self.by_number.get(number).map(|&i| &self.parcels[i])
    }

    /// The parcel whose boundary contains `c`.
    ///
    /// A parcel lives in the bucket of the deepest cell holding its whole
    /// ring, so only the buckets of `c`'s own ancestors can contain it.
    pub fn parcel_at(&self, c: &Coordinate) -> Option<&ParentParcel> {
        let point = Point::new(c.lng, c.lat);
        let leaf = cell_of(c);
        let bucketed = (0..=MAX_BUCKET_LEVEL)
            .rev()
            .filter_map(|level| self.buckets.get(&leaf.parent(level).0))
            .flatten();

        bucketed
            .chain(self.unbucketed.iter())
            .map(|&i| &self.parcels[i])
            .find(|parcel| parcel.polygon().contains(&point))
    }

    /// Distinct murabba numbers in natural order
    pub fn numbers(&self) -> Vec<String> {
        let mut numbers: Vec<String> = self.parcels.iter().map(|p| p.number.clone()).collect();
        numbers.sort_by(|a, b| natural_cmp(a, b));
        numbers
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.parcels
            .iter()
            .map(ParentParcel::bounds)
            .reduce(|acc, b| acc.union(&b))
    }
}

/// Compare strings with digit runs ordered by value: "2" < "10" < "10-A"
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut run_a = String::new();
                while let Some(d) = left.next_if(|c| c.is_ascii_digit()) {
                    run_a.push(d);
                }
                let mut run_b = String::new();
                while let Some(d) = right.next_if(|c| c.is_ascii_digit()) {
                    run_b.push(d);
                }
                let trimmed_a = run_a.trim_start_matches('0');
                let trimmed_b = run_b.trim_start_matches('0');
                let ord = trimmed_a
                    .len()
                    .cmp(&trimmed_b.len())
                    .then_with(|| trimmed_a.cmp(trimmed_b));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                let ord = x.to_lowercase().cmp(y.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two adjacent murabbas, numbers stored once as a string, once as a number
    fn boundary() -> GeoJson {
        r#"{"type":"FeatureCollection","features":[
          {"type":"Feature","properties":{"Murabba_No":"10"},
           "geometry":{"type":"Polygon","coordinates":[[[71.740,29.124],[71.742,29.124],[71.742,29.122],[71.740,29.122],[71.740,29.124]]]}},
          {"type":"Feature","properties":{"Murabba_No":9},
           "geometry":{"type":"Polygon","coordinates":[[[71.742,29.124],[71.744,29.124],[71.744,29.122],[71.742,29.122],[71.742,29.124]]]}},
          {"type":"Feature","properties":{"name":"road"},
           "geometry":{"type":"LineString","coordinates":[[71.74,29.12],[71.75,29.12]]}}
        ]}"#
        .parse()
        .unwrap()
    }

    #[test]
    fn reads_numbered_polygons_only() {
        let index = ParcelIndex::from_geojson(&boundary());
        assert_eq!(index.len(), 2);
        let nine = index.parcel("9").unwrap();
        assert_eq!(nine.quad.top_left, Coordinate { lat: 29.124, lng: 71.742 });
    }

    #[test]
    fn multipolygon_uses_its_first_polygon() {
        let geojson: GeoJson = r#"{"type":"Feature","properties":{"Murabba_No":"21"},
            "geometry":{"type":"MultiPolygon","coordinates":[
              [[[71.750,29.130],[71.752,29.130],[71.752,29.128],[71.750,29.128],[71.750,29.130]]],
              [[[71.760,29.140],[71.762,29.140],[71.762,29.138],[71.760,29.138],[71.760,29.140]]]
            ]}}"#
            .parse()
            .unwrap();
        let index = ParcelIndex::from_geojson(&geojson);
        let parcel = index.parcel("21").unwrap();
        assert_eq!(parcel.quad.top_left, Coordinate { lat: 29.130, lng: 71.750 });
        assert_eq!(parcel.ring.len(), 5);
        assert!(index.parcel_at(&Coordinate::new(29.129, 71.751).unwrap()).is_some());
        assert!(index.parcel_at(&Coordinate::new(29.139, 71.761).unwrap()).is_none());
    }

    #[test]
    fn numbers_sort_naturally() {
        let index = ParcelIndex::from_geojson(&boundary());
        assert_eq!(index.numbers(), vec!["9".to_string(), "10".to_string()]);

        let mut labels = vec!["10-A", "2", "10", "1/3", "1/12"];
        labels.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(labels, vec!["1/3", "1/12", "2", "10", "10-A"]);
    }

    #[test]
    fn finds_parcel_under_a_click() {
        let index = ParcelIndex::from_geojson(&boundary());
        let west = Coordinate::new(29.123, 71.741).unwrap();
        let east = Coordinate::new(29.123, 71.743).unwrap();
        let outside = Coordinate::new(29.130, 71.741).unwrap();
        assert_eq!(index.parcel_at(&west).map(|p| p.number.as_str()), Some("10"));
        assert_eq!(index.parcel_at(&east).map(|p| p.number.as_str()), Some("9"));
        assert!(index.parcel_at(&outside).is_none());
    }

    #[test]
    fn duplicate_numbers_keep_the_first() {
        let mut index = ParcelIndex::from_geojson(&boundary());
        let mut copy = index.parcel("10").unwrap().clone();
        copy.ring.reverse();
        index.insert(copy);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn bounds_span_all_parcels() {
        let index = ParcelIndex::from_geojson(&boundary());
        let b = index.bounds().unwrap();
        assert_eq!(b.south_west, Coordinate { lat: 29.122, lng: 71.740 });
        assert_eq!(b.north_east, Coordinate { lat: 29.124, lng: 71.744 });
    }
}
