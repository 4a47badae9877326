use thiserror::Error;

/// Failures in coordinate validation and grid synthesis
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("degenerate quadrilateral: width {width_m:.6} m, height {height_m:.6} m")]
    Degenerate { width_m: f64, height_m: f64 },

    #[error("coordinate out of range: lat {lat}, lng {lng}")]
    CoordinateOutOfRange { lat: f64, lng: f64 },

    #[error("boundary ring has {0} positions, need at least 4")]
    ShortRing(usize),

    #[error("position has {0} numbers, need longitude and latitude")]
    ShortPosition(usize),

    #[error("invalid grid template: {0}")]
    Template(String),
}

/// Failures fetching a raster tile. None of these populate the cache.
#[derive(Error, Debug)]
pub enum TileFetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tile server answered HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("invalid tile URL {url}: {reason}")]
    Url { url: String, reason: String },
}

/// Failures loading a precomputed sub-grid file; recovered by synthesis.
#[derive(Error, Debug)]
pub enum SubGridFetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sub-grid server answered HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("malformed sub-grid payload: {0}")]
    Malformed(String),

    #[error("invalid sub-grid URL: {0}")]
    Url(String),
}

/// Terminal per-parcel failures surfaced to the caller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionError {
    #[error("grid synthesis failed: {0}")]
    Geometry(#[from] GeometryError),

    #[error("no parcel numbered {0} in the loaded boundary")]
    UnknownParcel(String),

    #[error("no boundary loaded")]
    NoBoundary,
}

pub type StatusOr<T> = Result<T, GeometryError>;
