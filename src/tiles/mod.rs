use log::{debug, error, info, warn};
use reqwest::Url;
use serde::Deserialize;

use crate::cache::TileStore;
use crate::error::TileFetchError;
use crate::geometry::{Bounds, Coordinate};
use crate::model::RegionPath;

/// Network side of the tile cache
pub trait TileFetcher {
    /// Fetch the bytes behind `url`; non-success statuses are errors
    fn fetch(&self, url: &str) -> Result<Vec<u8>, TileFetchError>;
}

/// Where a tile should be drawn from
#[derive(Debug, Clone, PartialEq)]
pub enum TileSource {
    /// Bytes from the local store or a fresh fetch
    Bytes(Vec<u8>),
    /// Fetching failed; request the tile straight from its origin
    Origin(String),
}

/// URL-keyed tile cache over a persistent store.
///
/// Concurrent misses on one key may both reach the network; both write the
/// same bytes, and the last write wins.
pub struct TileCache<S: TileStore, F: TileFetcher> {
    store: S,
    fetcher: F,
}

impl<S: TileStore, F: TileFetcher> TileCache<S, F> {
    pub fn new(store: S, fetcher: F) -> Self {
        Self { store, fetcher }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Return the cached bytes for `url`, fetching and storing them on a miss
    pub fn get_or_fetch(&self, url: &str) -> Result<Vec<u8>, TileFetchError> {
        match self.store.get(url) {
            Ok(Some(data)) => {
                debug!("Tile cache hit for {}", url);
                return Ok(data);
            }
            Ok(None) => {}
            // An unreadable store behaves like a miss
            Err(e) => warn!("Tile store lookup failed for {}: {:#}", url, e),
        }

        let data = self.fetcher.fetch(url)?;
        if let Err(e) = self.store.put(url, &data) {
            warn!("Failed to cache tile {}: {:#}", url, e);
        } else {
            debug!("Tile {} cached", url);
        }
        Ok(data)
    }

    /// Like `get_or_fetch`, but a failure degrades to the origin URL
    pub fn resolve(&self, url: &str) -> TileSource {
        match self.get_or_fetch(url) {
            Ok(data) => TileSource::Bytes(data),
            Err(e) => {
                error!("Error fetching tile {}: {}", url, e);
                TileSource::Origin(url.to_string())
            }
        }
    }

    /// Drop every cached tile
    pub fn clear(&self) -> anyhow::Result<()> {
        self.store.clear()?;
        info!("All cached tiles have been deleted");
        Ok(())
    }
}

/// Percent-encode `segments` as URL path segments and hang them below `base`
pub fn encode_path<I>(base: &str, segments: I) -> Result<String, String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut scratch = Url::parse("http://localhost/").map_err(|e| e.to_string())?;
    scratch
        .path_segments_mut()
        .map_err(|_| "URL cannot take path segments".to_string())?
        .clear()
        .extend(segments);
    Ok(format!("{}{}", base.trim_end_matches('/'), scratch.path()))
}

/// Region segments followed by `tail`, encoded below `base`
pub(crate) fn region_path(
    base: &str,
    region: &RegionPath,
    tail: &[String],
) -> Result<String, String> {
    encode_path(base, region.segments().iter().chain(tail))
}

/// Raster layer of a region's scanned map sheets
#[derive(Debug, Clone, PartialEq)]
pub struct TileLayer {
    base: String,
    region: RegionPath,
}

impl TileLayer {
    pub fn new(base: impl Into<String>, region: RegionPath) -> Self {
        Self {
            base: base.into(),
            region,
        }
    }

    pub fn region(&self) -> &RegionPath {
        &self.region
    }

    /// `{base}/{region…}/{z}/{x}/{y}.png`
    pub fn tile_url(&self, z: u32, x: u32, y: u32) -> Result<String, TileFetchError> {
        let tail = [z.to_string(), x.to_string(), format!("{}.png", y)];
        region_path(&self.base, &self.region, &tail).map_err(|reason| self.url_error(reason))
    }

    /// `{base}/{region…}.json`, the sheet metadata
    pub fn metadata_url(&self) -> Result<String, TileFetchError> {
        let mut segments = self.region.segments().to_vec();
        match segments.last_mut() {
            Some(last) => last.push_str(".json"),
            None => return Err(self.url_error("region has no segments".to_string())),
        }
        encode_path(&self.base, &segments).map_err(|reason| self.url_error(reason))
    }

    fn url_error(&self, reason: String) -> TileFetchError {
        TileFetchError::Url {
            url: self.base.clone(),
            reason,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CornerBounds {
    top_left: [f64; 2],
    top_right: [f64; 2],
    bottom_right: [f64; 2],
    bottom_left: [f64; 2],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBounds {
    Csv(String),
    Corners(CornerBounds),
}

#[derive(Deserialize)]
struct SheetMetadata {
    bounds: Option<RawBounds>,
}

/// Extent of a region's map sheet, read from its metadata file
pub struct ShajraBounds;

impl ShajraBounds {
    /// Parse the `bounds` field of sheet metadata. Accepts a
    /// `"minLng,minLat,maxLng,maxLat"` string or four `[lat, lng]` corners.
    pub fn parse(metadata: &str) -> Option<Bounds> {
        let meta: SheetMetadata = match serde_json::from_str(metadata) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Unreadable sheet metadata: {}", e);
                return None;
            }
        };

        match meta.bounds? {
            RawBounds::Csv(text) => {
                let parts = text
                    .split(',')
                    .map(|p| p.trim().parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .ok()?;
                let [min_lng, min_lat, max_lng, max_lat] = parts.as_slice() else {
                    return None;
                };
                let sw = Coordinate::new(*min_lat, *min_lng).ok()?;
                let ne = Coordinate::new(*max_lat, *max_lng).ok()?;
                Bounds::from_coordinates([sw, ne].iter())
            }
            RawBounds::Corners(c) => {
                let corners = [c.top_left, c.top_right, c.bottom_right, c.bottom_left]
                    .iter()
                    .map(|[lat, lng]| Coordinate::new(*lat, *lng))
                    .collect::<Result<Vec<_>, _>>()
                    .ok()?;
                Bounds::from_coordinates(corners.iter())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryTileStore;
    use std::cell::Cell;

    /// Serves fixed bytes and counts requests
    struct CountingFetcher {
        calls: Cell<usize>,
        fail: bool,
    }

    impl CountingFetcher {
        fn new(fail: bool) -> Self {
            Self {
                calls: Cell::new(0),
                fail,
            }
        }
    }

    impl TileFetcher for CountingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, TileFetchError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(TileFetchError::Status {
                    url: url.to_string(),
                    status: 404,
                });
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    /// Reads always miss, writes always fail
    struct BrokenStore;

    impl TileStore for BrokenStore {
        fn get(&self, _key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn put(&self, _key: &str, _data: &[u8]) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        fn clear(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    const URL: &str = "/shajra/Yazman/4%20DNB/17/93012/53921.png";

    #[test]
    fn second_lookup_skips_the_network() {
        let cache = TileCache::new(MemoryTileStore::new(), CountingFetcher::new(false));
        let first = cache.get_or_fetch(URL).unwrap();
        let second = cache.get_or_fetch(URL).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.fetcher().calls.get(), 1);
    }

    #[test]
    fn store_write_failure_still_returns_the_tile() {
        let cache = TileCache::new(BrokenStore, CountingFetcher::new(false));
        assert_eq!(cache.get_or_fetch(URL).unwrap(), URL.as_bytes());
        assert_eq!(cache.resolve(URL), TileSource::Bytes(URL.as_bytes().to_vec()));
        assert_eq!(cache.fetcher().calls.get(), 2);
    }

    #[test]
    fn failed_fetch_is_not_cached() {
        let cache = TileCache::new(MemoryTileStore::new(), CountingFetcher::new(true));
        assert!(matches!(
            cache.get_or_fetch(URL),
            Err(TileFetchError::Status { status: 404, .. })
        ));
        assert!(cache.store().is_empty());
        assert_eq!(cache.resolve(URL), TileSource::Origin(URL.to_string()));
        assert_eq!(cache.fetcher().calls.get(), 2);
    }

    #[test]
    fn clear_forces_a_refetch() {
        let cache = TileCache::new(MemoryTileStore::new(), CountingFetcher::new(false));
        cache.get_or_fetch(URL).unwrap();
        cache.clear().unwrap();
        assert!(matches!(cache.resolve(URL), TileSource::Bytes(_)));
        assert_eq!(cache.fetcher().calls.get(), 2);
    }

    #[test]
    fn tile_urls_encode_region_names() {
        let layer = TileLayer::new("/shajra/", RegionPath::new(["Yazman", "4 DNB"]));
        assert_eq!(layer.tile_url(17, 93012, 53921).unwrap(), URL);
        assert_eq!(layer.metadata_url().unwrap(), "/shajra/Yazman/4%20DNB.json");
        assert!(TileLayer::new("/shajra", RegionPath::default()).metadata_url().is_err());
    }

    #[test]
    fn path_segments_are_percent_encoded() {
        assert_eq!(encode_path("", ["12/3 (a)"]).unwrap(), "/12%2F3%20(a)");
        assert_eq!(encode_path("/x/", ["چک", "a?b#c"]).unwrap(), "/x/%DA%86%DA%A9/a%3Fb%23c");
    }

    #[test]
    fn parses_csv_bounds() {
        let b = ShajraBounds::parse(r#"{"bounds":"71.70,29.10,71.76,29.14"}"#).unwrap();
        assert_eq!(b.south_west, Coordinate { lat: 29.10, lng: 71.70 });
        assert_eq!(b.north_east, Coordinate { lat: 29.14, lng: 71.76 });
    }

    #[test]
    fn parses_corner_bounds() {
        let raw = r#"{"bounds":{"topLeft":[29.14,71.70],"topRight":[29.141,71.76],
            "bottomRight":[29.10,71.761],"bottomLeft":[29.099,71.699]}}"#;
        let b = ShajraBounds::parse(raw).unwrap();
        assert_eq!(b.south_west, Coordinate { lat: 29.099, lng: 71.699 });
        assert_eq!(b.north_east, Coordinate { lat: 29.141, lng: 71.761 });
    }

    #[test]
    fn missing_or_bad_bounds_are_none() {
        assert!(ShajraBounds::parse(r#"{"name":"x"}"#).is_none());
        assert!(ShajraBounds::parse(r#"{"bounds":"1,2,3"}"#).is_none());
        assert!(ShajraBounds::parse("not json").is_none());
    }
}
