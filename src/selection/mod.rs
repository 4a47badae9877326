use std::collections::HashMap;

use log::{error, info, warn};

use crate::error::{SelectionError, SubGridFetchError};
use crate::geometry::{Bounds, Quadrilateral};
use crate::grid::{transform, GridTemplate, TransformedGrid, KILLA_PROPERTY};
use crate::labels::{LabelKind, LabelManager, LabelOwner};
use crate::model::RegionPath;
use crate::tiles::region_path;


/// The map as the selection logic sees it
pub trait MapSurface {
    fn add_overlay(&mut self, key: &str, grid: &TransformedGrid);
    fn remove_overlay(&mut self, key: &str);
    fn fit_bounds(&mut self, bounds: Bounds);
}

/// Supplier of precomputed sub-grids
pub trait SubGridSource {
    fn fetch(
        &self,
        region: &RegionPath,
        parcel_id: &str,
    ) -> Result<TransformedGrid, SubGridFetchError>;
}

/// Notified when a selection settles
pub trait OverlayListener {
    fn overlay_ready(&mut self, _parcel_id: &str, _grid: &TransformedGrid) {}
    fn overlay_error(&mut self, _parcel_id: &str, _error: &SelectionError) {}
}

/// Address of a parcel's precomputed sub-grid:
/// `{base}/{region…}/{parcel}.geojson?t={cache_buster}`.
/// Slashes in the parcel id become dashes; every segment is percent-encoded.
pub fn subgrid_url(
    base: &str,
    region: &RegionPath,
    parcel_id: &str,
    cache_buster: i64,
) -> Result<String, SubGridFetchError> {
    let sanitized = parcel_id.replace('/', "-");
    if sanitized.is_empty() {
        return Err(SubGridFetchError::Url("empty parcel id".to_string()));
    }
    let path = region_path(base, region, &[format!("{}.geojson", sanitized)])
        .map_err(SubGridFetchError::Url)?;
    Ok(format!("{}?t={}", path, cache_buster))
}

/// Proof that a load was started; completing it commits only if the
/// parcel is still waiting on this exact ticket
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionTicket {
    parcel_id: String,
    generation: u64,
    quad: Quadrilateral,
}

impl SelectionTicket {
    pub fn parcel_id(&self) -> &str {
        &self.parcel_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionState {
    Loading { generation: u64 },
    Loaded { grid: TransformedGrid, bounds: Option<Bounds> },
}

/// What `begin_selection` decided
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionStart {
    Started(SelectionTicket),
    AlreadyLoaded,
    InFlight,
}

/// How a selection request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// A new overlay was registered
    Loaded,
    /// The parcel was already loaded; the viewport moved back to it
    Refocused,
    /// Another load for this parcel is still running
    Pending,
    /// The parcel was deselected while loading; the result was dropped
    Discarded,
}

/// Tracks which murabbas have their sub-grid on the map
pub struct ParcelSelectionController<S: SubGridSource> {
    source: S,
    template: GridTemplate,
    region: RegionPath,
    label_property: String,
    registry: HashMap<String, SelectionState>,
    next_generation: u64,
    listeners: Vec<Box<dyn OverlayListener>>,
}

impl<S: SubGridSource> ParcelSelectionController<S> {
    pub fn new(source: S, template: GridTemplate, region: RegionPath) -> Self {
        Self {
            source,
            template,
            region,
            label_property: KILLA_PROPERTY.to_string(),
            registry: HashMap::new(),
            next_generation: 0,
            listeners: Vec::new(),
        }
    }

    /// Use another cell property as the sub-parcel label text
    pub fn with_label_property(mut self, property: impl Into<String>) -> Self {
        self.label_property = property.into();
        self
    }

    pub fn add_listener(&mut self, listener: Box<dyn OverlayListener>) {
        self.listeners.push(listener);
    }

    pub fn region(&self) -> &RegionPath {
        &self.region
    }

    /// Point later fetches at another region. Loaded overlays are untouched.
    pub fn set_region(&mut self, region: RegionPath) {
        self.region = region;
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn state(&self, parcel_id: &str) -> Option<&SelectionState> {
        self.registry.get(parcel_id)
    }

    pub fn loaded_overlay(&self, parcel_id: &str) -> Option<&TransformedGrid> {
        match self.registry.get(parcel_id)? {
            SelectionState::Loaded { grid, .. } => Some(grid),
            SelectionState::Loading { .. } => None,
        }
    }

    pub fn loaded_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .registry
            .iter()
            .filter(|(_, state)| matches!(state, SelectionState::Loaded { .. }))
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Select a murabba, loading its sub-grid if it is not on the map yet
    pub fn select<M: MapSurface>(
        &mut self,
        map: &mut M,
        labels: &mut LabelManager,
        parcel_id: &str,
        quad: &Quadrilateral,
    ) -> Result<SelectOutcome, SelectionError> {
        let ticket = match self.begin_selection(map, parcel_id, quad) {
            SelectionStart::Started(ticket) => ticket,
            SelectionStart::AlreadyLoaded => return Ok(SelectOutcome::Refocused),
            SelectionStart::InFlight => return Ok(SelectOutcome::Pending),
        };
        let fetched = self.source.fetch(&self.region, parcel_id);
        self.complete_selection(map, labels, ticket, fetched)
    }

    /// First half of `select`: refocus a loaded parcel, or mark it loading
    /// and hand back a ticket for the fetch
    pub fn begin_selection<M: MapSurface>(
        &mut self,
        map: &mut M,
        parcel_id: &str,
        quad: &Quadrilateral,
    ) -> SelectionStart {
        match self.registry.get(parcel_id) {
            Some(SelectionState::Loaded { bounds, .. }) => {
                info!("Murabba {} already loaded, refocusing", parcel_id);
                if let Some(bounds) = bounds {
                    map.fit_bounds(*bounds);
                }
                return SelectionStart::AlreadyLoaded;
            }
            Some(SelectionState::Loading { .. }) => {
                info!("Murabba {} is still loading", parcel_id);
                return SelectionStart::InFlight;
            }
            None => {}
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        self.registry
            .insert(parcel_id.to_string(), SelectionState::Loading { generation });
        SelectionStart::Started(SelectionTicket {
            parcel_id: parcel_id.to_string(),
            generation,
            quad: *quad,
        })
    }

    /// Second half of `select`: commit the fetched sub-grid, or synthesise
    /// one from the ticket's quadrilateral when the fetch failed
    pub fn complete_selection<M: MapSurface>(
        &mut self,
        map: &mut M,
        labels: &mut LabelManager,
        ticket: SelectionTicket,
        fetched: Result<TransformedGrid, SubGridFetchError>,
    ) -> Result<SelectOutcome, SelectionError> {
        let parcel_id = ticket.parcel_id.as_str();
        let still_wanted = matches!(
            self.registry.get(parcel_id),
            Some(SelectionState::Loading { generation }) if *generation == ticket.generation
        );
        if !still_wanted {
            info!("Dropping late sub-grid for murabba {}", parcel_id);
            return Ok(SelectOutcome::Discarded);
        }

        let fetched = fetched.and_then(|grid| {
            if grid.is_empty() {
                Err(SubGridFetchError::Malformed("sub-grid has no cells".to_string()))
            } else {
                Ok(grid)
            }
        });
        let grid = match fetched {
            Ok(grid) => grid,
            Err(e) => {
                warn!("Murabba {} file fetch failed, using template grid: {}", parcel_id, e);
                match transform(&self.template, &ticket.quad) {
                    Ok(grid) => grid,
                    Err(e) => {
                        self.registry.remove(parcel_id);
                        let err = SelectionError::from(e);
                        error!("Murabba {} failed: {}", parcel_id, err);
                        for listener in &mut self.listeners {
                            listener.overlay_error(parcel_id, &err);
                        }
                        return Err(err);
                    }
                }
            }
        };

        map.add_overlay(parcel_id, &grid);
        let owner = LabelOwner::Overlay(parcel_id.to_string());
        for cell in &grid.cells {
            if let (Some(text), Some(bounds)) = (cell.label(&self.label_property), cell.bounds()) {
                labels.bind(owner.clone(), bounds.center(), text, LabelKind::SubParcel);
            }
        }

        let bounds = grid.bounds();
        if let Some(bounds) = bounds {
            map.fit_bounds(bounds);
        }
        for listener in &mut self.listeners {
            listener.overlay_ready(parcel_id, &grid);
        }
        info!("Murabba {} loaded with {} killas", parcel_id, grid.len());
        self.registry
            .insert(parcel_id.to_string(), SelectionState::Loaded { grid, bounds });

        Ok(SelectOutcome::Loaded)
    }

    /// Take a murabba's overlay and labels off the map. Unknown ids are a
    /// no-op; a pending load is abandoned.
    pub fn deselect<M: MapSurface>(
        &mut self,
        map: &mut M,
        labels: &mut LabelManager,
        parcel_id: &str,
    ) -> bool {
        match self.registry.remove(parcel_id) {
            Some(SelectionState::Loaded { .. }) => {
                map.remove_overlay(parcel_id);
                labels.unbind_owner(&LabelOwner::Overlay(parcel_id.to_string()));
                info!("Murabba {} deselected", parcel_id);
                true
            }
            Some(SelectionState::Loading { .. }) => {
                info!("Murabba {} deselected while loading", parcel_id);
                true
            }
            None => false,
        }
    }

    /// Deselect everything
    pub fn clear<M: MapSurface>(&mut self, map: &mut M, labels: &mut LabelManager) {
        let ids: Vec<String> = self.registry.keys().cloned().collect();
        for id in ids {
            self.deselect(map, labels, &id);
        }
    }
}
