use geojson::GeoJson;
use log::info;

use crate::cache::TileStore;
use crate::config::MapConfig;
use crate::error::{SelectionError, TileFetchError};
use crate::geometry::{Coordinate, Quadrilateral};
use crate::grid::{GridTemplate, TransformedGrid};
use crate::labels::{Clipboard, LabelHandle, LabelKind, LabelManager, LabelOwner, ShapeId};
use crate::measure::{MeasurementAnnotator, Shape, ShapeEvent};
use crate::model::{ParcelIndex, RegionPath};
use crate::selection::{
    MapSurface, OverlayListener, ParcelSelectionController, SelectOutcome, SubGridSource,
};
use crate::tiles::{TileCache, TileFetcher, TileSource};

/// Everything one map view needs, wired together.
///
/// The UI layer forwards clicks, zoom changes and drawing events here;
/// external code drives the same paths through the select/annotate calls.
pub struct MapSession<M, S, St, F>
where
    M: MapSurface,
    S: SubGridSource,
    St: TileStore,
    F: TileFetcher,
{
    map: M,
    labels: LabelManager,
    selection: ParcelSelectionController<S>,
    annotator: MeasurementAnnotator,
    tiles: TileCache<St, F>,
    boundary: Option<ParcelIndex>,
}

impl<M, S, St, F> MapSession<M, S, St, F>
where
    M: MapSurface,
    S: SubGridSource,
    St: TileStore,
    F: TileFetcher,
{
    pub fn new(
        map: M,
        selection: ParcelSelectionController<S>,
        tiles: TileCache<St, F>,
        labels: LabelManager,
    ) -> Self {
        Self {
            map,
            labels,
            selection,
            annotator: MeasurementAnnotator::new(),
            tiles,
            boundary: None,
        }
    }

    /// Build a session from settings and the injected collaborators
    pub fn from_config(
        config: &MapConfig,
        map: M,
        source: S,
        tiles: TileCache<St, F>,
        template: GridTemplate,
        region: RegionPath,
    ) -> Self {
        let selection = ParcelSelectionController::new(source, template, region)
            .with_label_property(config.label_property.clone());
        let labels = LabelManager::with_thresholds(
            config.initial_zoom,
            config.label_min_zoom,
            config.label_large_zoom,
        );
        Self::new(map, selection, tiles, labels)
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut M {
        &mut self.map
    }

    pub fn labels(&self) -> &LabelManager {
        &self.labels
    }

    pub fn selection(&self) -> &ParcelSelectionController<S> {
        &self.selection
    }

    pub fn annotator(&self) -> &MeasurementAnnotator {
        &self.annotator
    }

    pub fn boundary(&self) -> Option<&ParcelIndex> {
        self.boundary.as_ref()
    }

    pub fn add_listener(&mut self, listener: Box<dyn OverlayListener>) {
        self.selection.add_listener(listener);
    }

    /// Replace the murabba boundary layer. Selected sub-grids of the old
    /// boundary are removed; every murabba gets a number label.
    pub fn load_boundary(&mut self, geojson: &GeoJson) -> &ParcelIndex {
        self.clear_boundary();

        let index = ParcelIndex::from_geojson(geojson);
        for parcel in index.parcels() {
            let owner = LabelOwner::Boundary(parcel.number.clone());
            let anchor = parcel.bounds().center();
            self.labels.bind(owner, anchor, parcel.number.clone(), LabelKind::Parcel);
        }
        if let Some(bounds) = index.bounds() {
            self.map.fit_bounds(bounds);
        }
        info!("Boundary loaded with {} murabbas", index.len());

        self.boundary.insert(index)
    }

    /// Remove the boundary layer, its labels and every selected sub-grid
    pub fn clear_boundary(&mut self) {
        self.selection.clear(&mut self.map, &mut self.labels);
        if let Some(old) = self.boundary.take() {
            for parcel in old.parcels() {
                self.labels
                    .unbind_owner(&LabelOwner::Boundary(parcel.number.clone()));
            }
        }
    }

    /// Switch to another region; everything region-bound is dropped
    pub fn set_region(&mut self, region: RegionPath) {
        self.clear_boundary();
        self.selection.set_region(region);
    }

    pub fn select_parcel(
        &mut self,
        parcel_id: &str,
        quad: &Quadrilateral,
    ) -> Result<SelectOutcome, SelectionError> {
        self.selection.select(&mut self.map, &mut self.labels, parcel_id, quad)
    }

    /// Programmatic selection by murabba number, same path as a click
    pub fn select_by_number(&mut self, number: &str) -> Result<SelectOutcome, SelectionError> {
        let boundary = self.boundary.as_ref().ok_or(SelectionError::NoBoundary)?;
        let quad = boundary
            .parcel(number)
            .map(|p| p.quad)
            .ok_or_else(|| SelectionError::UnknownParcel(number.to_string()))?;
        self.select_parcel(number, &quad)
    }

    /// A click on the map; `None` when it hit no murabba
    pub fn click(&mut self, at: Coordinate) -> Result<Option<SelectOutcome>, SelectionError> {
        let hit = self
            .boundary
            .as_ref()
            .and_then(|b| b.parcel_at(&at))
            .map(|p| (p.number.clone(), p.quad));
        match hit {
            Some((number, quad)) => self.select_parcel(&number, &quad).map(Some),
            None => Ok(None),
        }
    }

    pub fn deselect_parcel(&mut self, parcel_id: &str) -> bool {
        self.selection.deselect(&mut self.map, &mut self.labels, parcel_id)
    }

    pub fn loaded_overlay(&self, parcel_id: &str) -> Option<&TransformedGrid> {
        self.selection.loaded_overlay(parcel_id)
    }

    pub fn get_or_fetch_tile(&self, url: &str) -> Result<Vec<u8>, TileFetchError> {
        self.tiles.get_or_fetch(url)
    }

    pub fn resolve_tile(&self, url: &str) -> TileSource {
        self.tiles.resolve(url)
    }

    pub fn clear_tile_cache(&self) -> anyhow::Result<()> {
        self.tiles.clear()
    }

    pub fn annotate_shape(&mut self, id: ShapeId, shape: Shape) -> Vec<LabelHandle> {
        self.annotator.annotate(id, shape, &mut self.labels)
    }

    pub fn clear_annotations(&mut self, id: ShapeId) -> usize {
        self.annotator.clear(id, &mut self.labels)
    }

    pub fn shape_event(&mut self, event: ShapeEvent) {
        self.annotator.handle_event(event, &mut self.labels);
    }

    pub fn zoom_changed(&mut self, zoom: f64) {
        self.labels.set_zoom(zoom);
    }

    pub fn activate_label(
        &self,
        handle: LabelHandle,
        clipboard: &mut dyn Clipboard,
    ) -> Option<&str> {
        self.labels.activate(handle, clipboard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryTileStore;
    use crate::error::SubGridFetchError;
    use crate::geometry::Bounds;
    use std::cell::Cell;

    #[derive(Default)]
    struct RecordingMap {
        overlays: Vec<String>,
        fits: usize,
    }

    impl MapSurface for RecordingMap {
        fn add_overlay(&mut self, key: &str, _grid: &TransformedGrid) {
            self.overlays.push(key.to_string());
        }

        fn remove_overlay(&mut self, key: &str) {
            self.overlays.retain(|k| k != key);
        }

        fn fit_bounds(&mut self, _bounds: Bounds) {
            self.fits += 1;
        }
    }

    struct Offline;

    impl SubGridSource for Offline {
        fn fetch(
            &self,
            _region: &RegionPath,
            _parcel_id: &str,
        ) -> Result<TransformedGrid, SubGridFetchError> {
            Err(SubGridFetchError::Malformed("offline".to_string()))
        }
    }

    #[derive(Default)]
    struct StaticTiles {
        calls: Cell<usize>,
    }

    impl TileFetcher for StaticTiles {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>, TileFetchError> {
            self.calls.set(self.calls.get() + 1);
            Ok(vec![0x89, b'P', b'N', b'G'])
        }
    }

    #[derive(Default)]
    struct Board(Option<String>);

    impl Clipboard for Board {
        fn write_text(&mut self, text: &str) {
            self.0 = Some(text.to_string());
        }
    }

    type TestSession = MapSession<RecordingMap, Offline, MemoryTileStore, StaticTiles>;

    fn session() -> TestSession {
        MapSession::from_config(
            &MapConfig::default(),
            RecordingMap::default(),
            Offline,
            TileCache::new(MemoryTileStore::new(), StaticTiles::default()),
            GridTemplate::standard(),
            RegionPath::new(["Yazman", "4 DNB"]),
        )
    }

    fn boundary() -> GeoJson {
        r#"{"type":"FeatureCollection","features":[
          {"type":"Feature","properties":{"Murabba_No":"10"},
           "geometry":{"type":"Polygon","coordinates":[[[71.740,29.124],[71.742,29.124],[71.742,29.122],[71.740,29.122],[71.740,29.124]]]}},
          {"type":"Feature","properties":{"Murabba_No":"11"},
           "geometry":{"type":"Polygon","coordinates":[[[71.742,29.124],[71.744,29.124],[71.744,29.122],[71.742,29.122],[71.742,29.124]]]}}
        ]}"#
        .parse()
        .unwrap()
    }

    #[test]
    fn boundary_gets_number_labels() {
        let mut s = session();
        assert_eq!(s.load_boundary(&boundary()).numbers(), vec!["10", "11"]);
        assert_eq!(s.labels().len(), 2);
        assert_eq!(s.labels().visible().count(), 0);
        assert_eq!(s.map().fits, 1);

        s.zoom_changed(14.0);
        assert_eq!(s.labels().visible().count(), 2);
    }

    #[test]
    fn click_and_programmatic_selection_share_one_path() {
        let mut s = session();
        s.load_boundary(&boundary());

        let clicked = s.click(Coordinate::new(29.123, 71.741).unwrap()).unwrap();
        assert_eq!(clicked, Some(SelectOutcome::Loaded));
        assert_eq!(s.select_by_number("10"), Ok(SelectOutcome::Refocused));
        assert_eq!(s.loaded_overlay("10").map(TransformedGrid::len), Some(25));
        assert_eq!(s.map().overlays, vec!["10".to_string()]);

        assert_eq!(s.click(Coordinate::new(29.2, 71.741).unwrap()), Ok(None));
        assert_eq!(
            s.select_by_number("99"),
            Err(SelectionError::UnknownParcel("99".to_string()))
        );
    }

    #[test]
    fn selection_without_boundary_is_an_error() {
        let mut s = session();
        assert_eq!(s.select_by_number("10"), Err(SelectionError::NoBoundary));
    }

    #[test]
    fn reloading_the_boundary_drops_old_overlays_and_labels() {
        let mut s = session();
        s.load_boundary(&boundary());
        s.select_by_number("11").unwrap();
        assert_eq!(s.labels().len(), 2 + 25);

        s.load_boundary(&boundary());
        assert!(s.map().overlays.is_empty());
        assert_eq!(s.labels().len(), 2);
        assert!(s.selection().loaded_ids().is_empty());
    }

    #[test]
    fn deselect_leaves_no_killa_labels() {
        let mut s = session();
        s.load_boundary(&boundary());
        s.select_by_number("10").unwrap();
        assert!(s.deselect_parcel("10"));
        assert!(s.labels().handles_for(&LabelOwner::Overlay("10".into())).is_empty());
        assert!(s.loaded_overlay("10").is_none());
    }

    #[test]
    fn tiles_are_fetched_once() {
        let s = session();
        let url = "/Shajra/Yazman/4%20DNB/18/1/2.png";
        s.get_or_fetch_tile(url).unwrap();
        assert!(matches!(s.resolve_tile(url), TileSource::Bytes(_)));
        assert_eq!(s.tiles.fetcher().calls.get(), 1);

        s.clear_tile_cache().unwrap();
        s.get_or_fetch_tile(url).unwrap();
        assert_eq!(s.tiles.fetcher().calls.get(), 2);
    }

    #[test]
    fn marker_label_copies_on_activation() {
        let mut s = session();
        let marker = Shape::Marker(Coordinate::new(29.5, 71.25).unwrap());
        let handles = s.annotate_shape(ShapeId(1), marker);
        let mut board = Board::default();
        assert_eq!(s.activate_label(handles[0], &mut board), Some("29.50000, 71.25000"));
        assert_eq!(board.0.as_deref(), Some("29.50000, 71.25000"));

        assert_eq!(s.clear_annotations(ShapeId(1)), 1);
        assert!(s.labels().is_empty());
    }
}
