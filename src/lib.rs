pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod labels;
pub mod measure;
pub mod model;
pub mod selection;
pub mod session;
pub mod tiles;

pub use error::{GeometryError, SelectionError, StatusOr, SubGridFetchError, TileFetchError};
pub use geometry::{Bounds, Coordinate, Quadrilateral};
pub use grid::{transform, GridTemplate, TransformedGrid};
pub use session::MapSession;
