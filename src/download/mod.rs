use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::header::CACHE_CONTROL;
use reqwest::Url;
use std::time::Duration;

use crate::error::{SubGridFetchError, TileFetchError};
use crate::grid::TransformedGrid;
use crate::model::RegionPath;
use crate::selection::{subgrid_url, SubGridSource};
use crate::tiles::TileFetcher;

/// Why a GET did not produce a body
#[derive(Debug)]
enum FetchFailure {
    Url(String, String),
    Http(reqwest::Error),
    Status(String, u16),
}

impl From<FetchFailure> for TileFetchError {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::Url(url, reason) => TileFetchError::Url { url, reason },
            FetchFailure::Http(e) => TileFetchError::Http(e),
            FetchFailure::Status(url, status) => TileFetchError::Status { url, status },
        }
    }
}

impl From<FetchFailure> for SubGridFetchError {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::Url(url, reason) => {
                SubGridFetchError::Url(format!("{}: {}", url, reason))
            }
            FetchFailure::Http(e) => SubGridFetchError::Http(e),
            FetchFailure::Status(url, status) => SubGridFetchError::Status { url, status },
        }
    }
}

/// Blocking HTTP downloader for tiles and sub-grid files.
/// Relative paths are resolved against `origin`.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    origin: Option<Url>,
}

impl Downloader {
    /// Create a downloader; `timeout` of `None` keeps the transport default
    pub fn new(origin: Option<&str>, timeout: Option<Duration>) -> Result<Self, TileFetchError> {
        let origin = origin
            .map(|o| {
                Url::parse(o).map_err(|e| TileFetchError::Url {
                    url: o.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self { client, origin })
    }

    /// Turn an absolute URL or an origin-relative path into a request URL
    pub fn resolve(&self, url: &str) -> Result<Url, String> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(_) => match &self.origin {
                Some(origin) => origin.join(url).map_err(|e| e.to_string()),
                None => Err("relative URL without a configured origin".to_string()),
            },
        }
    }

    fn get_bytes(&self, url: &str, no_store: bool) -> Result<Vec<u8>, FetchFailure> {
        let request_url = self
            .resolve(url)
            .map_err(|reason| FetchFailure::Url(url.to_string(), reason))?;

        debug!("GET {}", request_url);
        let mut request = self.client.get(request_url);
        if no_store {
            request = request.header(CACHE_CONTROL, "no-store");
        }
        let response = request.send().map_err(FetchFailure::Http)?;

        if !response.status().is_success() {
            return Err(FetchFailure::Status(url.to_string(), response.status().as_u16()));
        }
        let data = response.bytes().map_err(FetchFailure::Http)?;

        Ok(data.to_vec())
    }
}

impl TileFetcher for Downloader {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, TileFetchError> {
        Ok(self.get_bytes(url, false)?)
    }
}

/// Fetches precomputed sub-grids from `{base}/{region…}/{parcel}.geojson`
#[derive(Debug, Clone)]
pub struct HttpSubGridSource {
    downloader: Downloader,
    base: String,
}

impl HttpSubGridSource {
    pub fn new(downloader: Downloader, base: impl Into<String>) -> Self {
        Self {
            downloader,
            base: base.into(),
        }
    }
}

impl SubGridSource for HttpSubGridSource {
    fn fetch(
        &self,
        region: &RegionPath,
        parcel_id: &str,
    ) -> Result<TransformedGrid, SubGridFetchError> {
        let cache_buster = chrono::Utc::now().timestamp_millis();
        let url = subgrid_url(&self.base, region, parcel_id, cache_buster)?;

        info!("Fetching precomputed sub-grid for parcel {} from {}", parcel_id, url);
        let body = self.downloader.get_bytes(&url, true)?;
        let text = String::from_utf8(body)
            .map_err(|e| SubGridFetchError::Malformed(format!("body is not UTF-8: {}", e)))?;
        let geojson = text
            .parse::<geojson::GeoJson>()
            .map_err(|e| SubGridFetchError::Malformed(e.to_string()))?;

        TransformedGrid::from_geojson(&geojson)
    }
}
