use std::collections::HashMap;

use log::{debug, warn};
use uuid::Uuid;

use crate::geometry::Coordinate;

/// Labels are hidden below this zoom
pub const DEFAULT_MIN_LABEL_ZOOM: f64 = 14.0;

/// Labels switch to the large size class at this zoom
pub const DEFAULT_LARGE_LABEL_ZOOM: f64 = 16.0;

/// Opaque reference to a bound label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelHandle(Uuid);

/// Identifier the UI layer assigns to a user-drawn shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub u64);

/// The feature a label belongs to; all of an owner's labels go together
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LabelOwner {
    /// A murabba of the boundary layer
    Boundary(String),
    /// The sub-grid overlay of a selected murabba
    Overlay(String),
    /// A measured shape
    Shape(ShapeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Parcel,
    SubParcel,
    Length,
    Area,
    Circle,
    Coordinates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub fn css_class(&self) -> &'static str {
        match self {
            SizeClass::Small => "label-small",
            SizeClass::Medium => "label-medium",
            SizeClass::Large => "label-large",
        }
    }
}

/// Something that can receive copied label text
pub trait Clipboard {
    fn write_text(&mut self, text: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub owner: LabelOwner,
    pub anchor: Coordinate,
    pub text: String,
    pub kind: LabelKind,
    pub size: SizeClass,
    pub visible: bool,
    /// Text placed on the clipboard when the label is activated
    pub copy_text: Option<String>,
}

/// Reported when an owner that no longer exists still holds labels
#[derive(Debug, Clone, PartialEq)]
pub struct LabelLeakWarning {
    pub owner: LabelOwner,
    pub count: usize,
}

/// Keeps every bound label in step with the viewport zoom
#[derive(Debug, Clone)]
pub struct LabelManager {
    zoom: f64,
    min_zoom: f64,
    large_zoom: f64,
    labels: HashMap<LabelHandle, Label>,
    groups: HashMap<LabelOwner, Vec<LabelHandle>>,
}

impl LabelManager {
    pub fn new(zoom: f64) -> Self {
        Self::with_thresholds(zoom, DEFAULT_MIN_LABEL_ZOOM, DEFAULT_LARGE_LABEL_ZOOM)
    }

    pub fn with_thresholds(zoom: f64, min_zoom: f64, large_zoom: f64) -> Self {
        Self {
            zoom,
            min_zoom,
            large_zoom,
            labels: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    fn size_for(&self, zoom: f64) -> SizeClass {
        if zoom >= self.large_zoom {
            SizeClass::Large
        } else if zoom >= self.min_zoom {
            SizeClass::Medium
        } else {
            SizeClass::Small
        }
    }

    fn is_visible_at(&self, zoom: f64) -> bool {
        zoom >= self.min_zoom
    }

    /// Anchor a text label for `owner`
    pub fn bind(
        &mut self,
        owner: LabelOwner,
        anchor: Coordinate,
        text: impl Into<String>,
        kind: LabelKind,
    ) -> LabelHandle {
        self.insert(owner, anchor, text.into(), kind, None)
    }

    /// Like `bind`, but activating the label copies its text
    pub fn bind_copyable(
        &mut self,
        owner: LabelOwner,
        anchor: Coordinate,
        text: impl Into<String>,
        kind: LabelKind,
    ) -> LabelHandle {
        let text = text.into();
        let copy = Some(text.clone());
        self.insert(owner, anchor, text, kind, copy)
    }

    fn insert(
        &mut self,
        owner: LabelOwner,
        anchor: Coordinate,
        text: String,
        kind: LabelKind,
        copy_text: Option<String>,
    ) -> LabelHandle {
        let handle = LabelHandle(Uuid::new_v4());
        let label = Label {
            owner: owner.clone(),
            anchor,
            text,
            kind,
            size: self.size_for(self.zoom),
            visible: self.is_visible_at(self.zoom),
            copy_text,
        };
        self.labels.insert(handle, label);
        self.groups.entry(owner).or_default().push(handle);
        handle
    }

    /// Remove one label, whatever the zoom. Returns false if it was not bound.
    pub fn unbind(&mut self, handle: LabelHandle) -> bool {
        let Some(label) = self.labels.remove(&handle) else {
            return false;
        };
        if let Some(group) = self.groups.get_mut(&label.owner) {
            group.retain(|h| *h != handle);
            if group.is_empty() {
                self.groups.remove(&label.owner);
            }
        }
        true
    }

    /// Remove every label of `owner`, returning how many went
    pub fn unbind_owner(&mut self, owner: &LabelOwner) -> usize {
        let Some(handles) = self.groups.remove(owner) else {
            return 0;
        };
        for handle in &handles {
            self.labels.remove(handle);
        }
        debug!("Unbound {} labels of {:?}", handles.len(), owner);
        handles.len()
    }

    /// Apply a zoom change. Labels that end up hidden keep their size class.
    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom;
        let visible = self.is_visible_at(zoom);
        let size = self.size_for(zoom);
        for label in self.labels.values_mut() {
            label.visible = visible;
            if visible {
                label.size = size;
            }
        }
    }

    pub fn get(&self, handle: LabelHandle) -> Option<&Label> {
        self.labels.get(&handle)
    }

    pub fn handles_for(&self, owner: &LabelOwner) -> &[LabelHandle] {
        self.groups.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn labels_for(&self, owner: &LabelOwner) -> Vec<&Label> {
        self.handles_for(owner)
            .iter()
            .filter_map(|h| self.labels.get(h))
            .collect()
    }

    pub fn visible(&self) -> impl Iterator<Item = &Label> {
        self.labels.values().filter(|l| l.visible)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Copy a copyable label's text to the clipboard
    pub fn activate(&self, handle: LabelHandle, clipboard: &mut dyn Clipboard) -> Option<&str> {
        let text = self.labels.get(&handle)?.copy_text.as_deref()?;
        clipboard.write_text(text);
        Some(text)
    }

    /// Owners that still hold labels though `is_live` says they are gone
    pub fn audit(&self, is_live: impl Fn(&LabelOwner) -> bool) -> Vec<LabelLeakWarning> {
        let leaks: Vec<LabelLeakWarning> = self
            .groups
            .iter()
            .filter(|(owner, handles)| !handles.is_empty() && !is_live(owner))
            .map(|(owner, handles)| LabelLeakWarning {
                owner: owner.clone(),
                count: handles.len(),
            })
            .collect();
        for leak in &leaks {
            warn!("{} labels leaked by {:?}", leak.count, leak.owner);
        }
        leaks
    }
}
