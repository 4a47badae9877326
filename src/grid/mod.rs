use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue, Value};
use log::debug;

use crate::error::{GeometryError, StatusOr, SubGridFetchError};
use crate::geometry::{Bounds, Coordinate, Quadrilateral};

/// Cells per side of a murabba
pub const GRID_SIZE: usize = 5;

/// Widths or heights below this many metres are treated as zero
pub const DEGENERATE_EPSILON_M: f64 = 1e-6;

/// Property holding the killa number in the built-in template
pub const KILLA_PROPERTY: &str = "Killa";

/// A fixed N×N arrangement of unit cells, stored row-major.
/// Only the properties travel; position comes from the index.
#[derive(Debug, Clone, PartialEq)]
pub struct GridTemplate {
    size: usize,
    cells: Vec<JsonObject>,
}

impl GridTemplate {
    /// The standard 5×5 template, killas numbered 1..=25 row by row
    pub fn standard() -> Self {
        let cells = (0..GRID_SIZE * GRID_SIZE)
            .map(|index| {
                let mut props = JsonObject::new();
                props.insert(KILLA_PROPERTY.to_string(), JsonValue::from(index + 1));
                props
            })
            .collect();
        Self {
            size: GRID_SIZE,
            cells,
        }
    }

    /// Build a template from per-cell properties in row-major order
    pub fn from_properties(size: usize, cells: Vec<JsonObject>) -> StatusOr<Self> {
        if size == 0 || cells.len() != size * size {
            return Err(GeometryError::Template(format!(
                "expected {} cells for a {}x{} grid, got {}",
                size * size,
                size,
                size,
                cells.len()
            )));
        }
        Ok(Self { size, cells })
    }

    /// Read a template from a GeoJSON FeatureCollection of 25 features.
    /// Feature order is the row-major cell index; geometry is ignored.
    pub fn from_geojson(geojson: &GeoJson) -> StatusOr<Self> {
        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            _ => {
                return Err(GeometryError::Template(
                    "template must be a FeatureCollection".to_string(),
                ));
            }
        };
        let cells = collection
            .features
            .iter()
            .map(|f| f.properties.clone().unwrap_or_default())
            .collect();
        Self::from_properties(GRID_SIZE, cells)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell_properties(&self, index: usize) -> Option<&JsonObject> {
        self.cells.get(index)
    }
}

impl Default for GridTemplate {
    fn default() -> Self {
        Self::standard()
    }
}

/// One georeferenced sub-parcel polygon
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    /// Closed ring, first position repeated at the end
    pub ring: Vec<Coordinate>,
    pub properties: JsonObject,
}

impl GridCell {
    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_coordinates(self.ring.iter())
    }

    /// Property rendered as a string, numbers without quotes
    pub fn label(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// The sub-grid of one parent parcel in real coordinates
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransformedGrid {
    pub cells: Vec<GridCell>,
}

impl TransformedGrid {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.cells
            .iter()
            .filter_map(GridCell::bounds)
            .reduce(|acc, b| acc.union(&b))
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .cells
            .iter()
            .map(|cell| {
                let ring = cell.ring.iter().map(|c| c.to_position()).collect();
                Feature {
                    bbox: None,
                    geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
                    id: None,
                    properties: Some(cell.properties.clone()),
                    foreign_members: None,
                }
            })
            .collect();
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    /// Accept a precomputed sub-grid. Every feature must be a polygon
    /// with a closed outer ring of at least four positions.
    pub fn from_geojson(geojson: &GeoJson) -> Result<Self, SubGridFetchError> {
        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            _ => {
                return Err(SubGridFetchError::Malformed(
                    "expected a FeatureCollection".to_string(),
                ));
            }
        };
        if collection.features.is_empty() {
            return Err(SubGridFetchError::Malformed("no features".to_string()));
        }

        let mut cells = Vec::with_capacity(collection.features.len());
        for (index, feature) in collection.features.iter().enumerate() {
            let outer = match feature.geometry.as_ref().map(|g| &g.value) {
                Some(Value::Polygon(rings)) => rings.first(),
                Some(Value::MultiPolygon(polygons)) => polygons.first().and_then(|p| p.first()),
                _ => None,
            }
            .ok_or_else(|| {
                SubGridFetchError::Malformed(format!("feature {} has no polygon", index))
            })?;

            let ring = outer
                .iter()
                .map(|p| Coordinate::from_position(p))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| SubGridFetchError::Malformed(format!("feature {}: {}", index, e)))?;
            if ring.len() < 4 || ring.first() != ring.last() {
                return Err(SubGridFetchError::Malformed(format!(
                    "feature {} ring is not closed",
                    index
                )));
            }

            cells.push(GridCell {
                ring,
                properties: feature.properties.clone().unwrap_or_default(),
            });
        }
        Ok(Self { cells })
    }
}

/// Lay the template over the real quadrilateral.
///
/// Width and height are the great-circle lengths of the top and left edges;
/// each cell's top-left corner is reached by walking `col` cell widths along
/// the top edge's initial bearing, then `row` cell heights along the left
/// edge's. The two bearings are used as-is, so a sheared quad yields a
/// sheared grid. The bottom-right corner does not take part.
pub fn transform(template: &GridTemplate, quad: &Quadrilateral) -> StatusOr<TransformedGrid> {
    quad.validate()?;
    let size = template.size();
    let width = quad.top_left.distance_to(&quad.top_right);
    let height = quad.top_left.distance_to(&quad.bottom_left);
    if [width, height]
        .iter()
        .any(|m| m.is_nan() || *m < DEGENERATE_EPSILON_M)
    {
        return Err(GeometryError::Degenerate {
            width_m: width,
            height_m: height,
        });
    }

    let cell_width = width / size as f64;
    let cell_height = height / size as f64;
    let bearing_top = quad.top_left.bearing_to(&quad.top_right);
    let bearing_left = quad.top_left.bearing_to(&quad.bottom_left);
    debug!(
        "Transforming {}x{} template: {:.2} m x {:.2} m, bearings {:.4}/{:.4}",
        size, size, width, height, bearing_top, bearing_left
    );

    let cells = (0..template.len())
        .map(|index| {
            let row = index / size;
            let col = index % size;
            let top_left = quad
                .top_left
                .destination(bearing_top, col as f64 * cell_width)
                .destination(bearing_left, row as f64 * cell_height);
            let top_right = top_left.destination(bearing_top, cell_width);
            let bottom_left = top_left.destination(bearing_left, cell_height);
            let bottom_right = top_right.destination(bearing_left, cell_height);

            GridCell {
                ring: vec![top_left, top_right, bottom_right, bottom_left, top_left],
                properties: template.cell_properties(index).cloned().unwrap_or_default(),
            }
        })
        .collect();

    Ok(TransformedGrid { cells })
}
