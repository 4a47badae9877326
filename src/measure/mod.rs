use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use std::fmt;

use geo::{BoundingRect, ChamberlainDuquetteArea, LineString, Polygon};
use log::debug;

use crate::geometry::{Coordinate, FEET_PER_METER, SQ_FEET_PER_SQ_METER};
use crate::labels::{LabelHandle, LabelKind, LabelManager, LabelOwner, ShapeId};

pub const MARLA_SQ_FEET: f64 = 272.25;
pub const KANAL_SQ_FEET: f64 = MARLA_SQ_FEET * 20.0;
pub const ACRE_SQ_FEET: f64 = KANAL_SQ_FEET * 8.0;

/// An area split into acres, kanals, marlas and leftover square feet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionalArea {
    pub acres: u64,
    pub kanals: u64,
    pub marlas: u64,
    pub sq_feet: f64,
}

impl RegionalArea {
    /// Peel off whole acres, then kanals, then marlas, in that order
    pub fn from_sq_feet(area: f64) -> Self {
        let mut remaining = area.max(0.0);
        let mut take = |unit: f64| {
            if remaining >= unit {
                let whole = (remaining / unit).floor();
                remaining %= unit;
                whole as u64
            } else {
                0
            }
        };
        let acres = take(ACRE_SQ_FEET);
        let kanals = take(KANAL_SQ_FEET);
        let marlas = take(MARLA_SQ_FEET);
        Self {
            acres,
            kanals,
            marlas,
            sq_feet: remaining,
        }
    }
}

impl fmt::Display for RegionalArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-Acre {}-Kanal {}-Marla {:.2}-Sq Feet",
            self.acres, self.kanals, self.marlas, self.sq_feet
        )
    }
}

pub fn format_area(sq_feet: f64) -> String {
    RegionalArea::from_sq_feet(sq_feet).to_string()
}

pub fn format_length(meters: f64) -> String {
    format!("{:.2} Ft", meters * FEET_PER_METER)
}

/// A user-drawn shape
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Polyline(Vec<Coordinate>),
    /// Outer ring; a repeated closing point is tolerated
    Polygon(Vec<Coordinate>),
    Circle { center: Coordinate, radius_m: f64 },
    Marker(Coordinate),
}

/// Lifecycle events from the drawing tools
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeEvent {
    Created(ShapeId, Shape),
    EditStart(ShapeId),
    VertexDrag(ShapeId, Shape),
    Edited(ShapeId, Shape),
    EditStop(ShapeId),
    Deleted(ShapeId),
}

fn open_ring(ring: &[Coordinate]) -> &[Coordinate] {
    match ring {
        [first, .., last] if ring.len() > 2 && first == last => &ring[..ring.len() - 1],
        _ => ring,
    }
}

/// Spherical polygon area in square metres
fn polygon_area_m2(ring: &[Coordinate]) -> f64 {
    let exterior: LineString<f64> = ring.iter().map(|c| (c.lng, c.lat)).collect();
    Polygon::new(exterior, vec![]).chamberlain_duquette_unsigned_area()
}

fn bbox_center(ring: &[Coordinate]) -> Option<Coordinate> {
    let exterior: LineString<f64> = ring.iter().map(|c| (c.lng, c.lat)).collect();
    let center = exterior.bounding_rect()?.center();
    Some(Coordinate {
        lat: center.y,
        lng: center.x,
    })
}

/// Labels shapes with lengths, areas and coordinates
#[derive(Debug, Default)]
pub struct MeasurementAnnotator {
    shapes: HashMap<ShapeId, Shape>,
    editing: HashSet<ShapeId>,
}

impl MeasurementAnnotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shape(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(&id)
    }

    pub fn is_editing(&self, id: ShapeId) -> bool {
        self.editing.contains(&id)
    }

    pub fn is_live(&self, owner: &LabelOwner) -> bool {
        match owner {
            LabelOwner::Shape(id) => self.shapes.contains_key(id),
            _ => true,
        }
    }

    /// Replace the shape's labels with freshly measured ones
    pub fn annotate(
        &mut self,
        id: ShapeId,
        shape: Shape,
        labels: &mut LabelManager,
    ) -> Vec<LabelHandle> {
        let owner = LabelOwner::Shape(id);
        labels.unbind_owner(&owner);

        let mut handles = Vec::new();
        match &shape {
            Shape::Polyline(points) => {
                for pair in points.windows(2) {
                    handles.push(Self::length_label(&owner, &pair[0], &pair[1], labels));
                }
            }
            Shape::Polygon(ring) => {
                let ring = open_ring(ring);
                if ring.len() >= 3 {
                    let sq_feet = polygon_area_m2(ring) * SQ_FEET_PER_SQ_METER;
                    if let Some(center) = bbox_center(ring) {
                        let text = format!("Area: {}", format_area(sq_feet));
                        handles.push(labels.bind(owner.clone(), center, text, LabelKind::Area));
                    }
                }
                if ring.len() >= 2 {
                    for pair in ring.windows(2) {
                        handles.push(Self::length_label(&owner, &pair[0], &pair[1], labels));
                    }
                    let (first, last) = (ring[0], ring[ring.len() - 1]);
                    handles.push(Self::length_label(&owner, &last, &first, labels));
                }
            }
            Shape::Circle { center, radius_m } => {
                let sq_feet = PI * radius_m * radius_m * SQ_FEET_PER_SQ_METER;
                let text = format!(
                    "Radius: {}\nArea: {}",
                    format_length(*radius_m),
                    format_area(sq_feet)
                );
                handles.push(labels.bind(owner.clone(), *center, text, LabelKind::Circle));
            }
            Shape::Marker(point) => {
                let text = format!("{:.5}, {:.5}", point.lat, point.lng);
                let kind = LabelKind::Coordinates;
                handles.push(labels.bind_copyable(owner.clone(), *point, text, kind));
            }
        }

        debug!("Annotated {:?} with {} labels", id, handles.len());
        self.shapes.insert(id, shape);
        handles
    }

    fn length_label(
        owner: &LabelOwner,
        a: &Coordinate,
        b: &Coordinate,
        labels: &mut LabelManager,
    ) -> LabelHandle {
        let text = format_length(a.distance_to(b));
        labels.bind(owner.clone(), a.midpoint(b), text, LabelKind::Length)
    }

    /// Remove a shape's labels and forget it
    pub fn clear(&mut self, id: ShapeId, labels: &mut LabelManager) -> usize {
        self.shapes.remove(&id);
        self.editing.remove(&id);
        labels.unbind_owner(&LabelOwner::Shape(id))
    }

    /// Drive labels from the drawing tools' edit lifecycle
    pub fn handle_event(&mut self, event: ShapeEvent, labels: &mut LabelManager) {
        match event {
            ShapeEvent::Created(id, shape) | ShapeEvent::Edited(id, shape) => {
                self.annotate(id, shape, labels);
            }
            ShapeEvent::EditStart(id) => {
                self.editing.insert(id);
                if let Some(shape) = self.shapes.get(&id).cloned() {
                    self.annotate(id, shape, labels);
                }
            }
            ShapeEvent::VertexDrag(id, shape) => {
                self.annotate(id, shape, labels);
            }
            ShapeEvent::EditStop(id) => {
                self.editing.remove(&id);
            }
            ShapeEvent::Deleted(id) => {
                self.clear(id, labels);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(lat: f64, lng: f64) -> Coordinate {
        Coordinate::new(lat, lng).unwrap()
    }

    fn square() -> Vec<Coordinate> {
        vec![
            c(29.1240, 71.7400),
            c(29.1240, 71.7410),
            c(29.1230, 71.7410),
            c(29.1230, 71.7400),
        ]
    }

    #[test]
    fn one_acre() {
        assert_eq!(format_area(43_560.0), "1-Acre 0-Kanal 0-Marla 0.00-Sq Feet");
    }

    #[test]
    fn one_marla() {
        assert_eq!(format_area(272.25), "0-Acre 0-Kanal 1-Marla 0.00-Sq Feet");
    }

    #[test]
    fn marla_with_remainder() {
        assert_eq!(format_area(300.0), "0-Acre 0-Kanal 1-Marla 27.75-Sq Feet");
    }

    #[test]
    fn units_are_peeled_largest_first() {
        let sq_feet = 2.0 * ACRE_SQ_FEET + 3.0 * KANAL_SQ_FEET + 5.0 * MARLA_SQ_FEET + 10.5;
        let area = RegionalArea::from_sq_feet(sq_feet);
        assert_eq!(area.acres, 2);
        assert_eq!(area.kanals, 3);
        assert_eq!(area.marlas, 5);
        assert!((area.sq_feet - 10.5).abs() < 1e-6);
    }

    #[test]
    fn polyline_gets_one_label_per_segment() {
        let mut labels = LabelManager::new(15.0);
        let mut annotator = MeasurementAnnotator::new();
        let line = square()[..3].to_vec();
        let handles = annotator.annotate(ShapeId(1), Shape::Polyline(line.clone()), &mut labels);
        assert_eq!(handles.len(), 2);

        let first = labels.get(handles[0]).unwrap();
        assert_eq!(first.kind, LabelKind::Length);
        assert_eq!(first.anchor, line[0].midpoint(&line[1]));
        assert!(first.text.ends_with(" Ft"));
    }

    #[test]
    fn polygon_gets_edges_and_area() {
        let mut labels = LabelManager::new(15.0);
        let mut annotator = MeasurementAnnotator::new();
        let mut ring = square();
        ring.push(ring[0]);
        let handles = annotator.annotate(ShapeId(2), Shape::Polygon(ring), &mut labels);
        assert_eq!(handles.len(), 5);

        let areas: Vec<_> = handles
            .iter()
            .filter_map(|h| labels.get(*h))
            .filter(|l| l.kind == LabelKind::Area)
            .collect();
        assert_eq!(areas.len(), 1);
        assert!(areas[0].text.starts_with("Area: "));
        assert!(areas[0].anchor.approx_eq(&c(29.1235, 71.7405), 1e-9));
    }

    #[test]
    fn edge_length_is_in_feet() {
        let mut labels = LabelManager::new(15.0);
        let mut annotator = MeasurementAnnotator::new();
        let a = c(0.0, 0.0);
        let b = c(0.001, 0.0);
        let handles = annotator.annotate(ShapeId(3), Shape::Polyline(vec![a, b]), &mut labels);
        let expected = format!("{:.2} Ft", a.distance_to(&b) * FEET_PER_METER);
        assert_eq!(labels.get(handles[0]).unwrap().text, expected);
    }

    #[test]
    fn circle_reports_radius_and_area() {
        let mut labels = LabelManager::new(15.0);
        let mut annotator = MeasurementAnnotator::new();
        let center = c(29.12, 71.74);
        let circle = Shape::Circle { center, radius_m: 10.0 };
        let handles = annotator.annotate(ShapeId(4), circle, &mut labels);
        assert_eq!(handles.len(), 1);
        let label = labels.get(handles[0]).unwrap();
        assert_eq!(label.anchor, center);
        assert!(label.text.starts_with("Radius: 32.81 Ft\nArea: "));
    }

    #[test]
    fn marker_label_is_copyable() {
        let mut labels = LabelManager::new(15.0);
        let mut annotator = MeasurementAnnotator::new();
        let marker = Shape::Marker(c(29.123456, 71.7));
        let handles = annotator.annotate(ShapeId(5), marker, &mut labels);
        let label = labels.get(handles[0]).unwrap();
        assert_eq!(label.text, "29.12346, 71.70000");
        assert_eq!(label.copy_text.as_deref(), Some("29.12346, 71.70000"));
    }

    #[test]
    fn dragging_vertices_never_accumulates_labels() {
        let mut labels = LabelManager::new(15.0);
        let mut annotator = MeasurementAnnotator::new();
        let id = ShapeId(6);
        annotator.handle_event(ShapeEvent::Created(id, Shape::Polygon(square())), &mut labels);
        assert_eq!(labels.len(), 5);

        annotator.handle_event(ShapeEvent::EditStart(id), &mut labels);
        assert!(annotator.is_editing(id));
        for step in 0..10 {
            let mut ring = square();
            ring[2].lat -= 0.0001 * step as f64;
            annotator.handle_event(ShapeEvent::VertexDrag(id, Shape::Polygon(ring)), &mut labels);
            assert_eq!(labels.len(), 5);
        }
        annotator.handle_event(ShapeEvent::EditStop(id), &mut labels);
        assert!(!annotator.is_editing(id));

        annotator.handle_event(ShapeEvent::Deleted(id), &mut labels);
        assert!(labels.is_empty());
        assert!(labels.audit(|o| annotator.is_live(o)).is_empty());
    }
}
