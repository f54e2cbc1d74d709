use crate::domain::marker::ListingMarker;
use crate::domain::postal_code::Coordinate;
use crate::geocoder::GeocodeError;
use crate::map::bounds::{filter_visible, MapBounds};
use crate::session::SearchGenerations;

// Largest viewport side a client may report, in CSS pixels.
const MAX_VIEWPORT_PX: u32 = 8192;

pub type BoundsCallback = Box<dyn FnMut(MapBounds) + Send>;
pub type ClickCallback = Box<dyn FnMut(&str) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    Uninitialized,
    Initializing,
    Ready,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapOptions {
    pub center: Coordinate,
    pub zoom: f64,
    pub width: u32,
    pub height: u32,
    pub max_zoom: u8,
}

impl Default for MapOptions {
    fn default() -> Self {
        // Ottawa, wide enough to show the metro area
        Self {
            center: Coordinate::new(45.4215, -75.6972),
            zoom: 11.0,
            width: 1024,
            height: 768,
            max_zoom: 18,
        }
    }
}

/// Map bound to one container: pan/zoom state, drawn markers, callbacks.
pub struct MapView {
    container_id: String,
    state: MapState,
    center: Coordinate,
    zoom: f64,
    width: u32,
    height: u32,
    max_zoom: u8,
    markers: Vec<ListingMarker>,
    drawn: Vec<ListingMarker>,
    bounds: Option<MapBounds>,
    redraws: usize,
    on_bounds_change: Option<BoundsCallback>,
    on_marker_click: Option<ClickCallback>,
    searches: SearchGenerations,
}

impl std::fmt::Debug for MapView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapView")
            .field("container_id", &self.container_id)
            .field("state", &self.state)
            .field("center", &self.center)
            .field("zoom", &self.zoom)
            .field("drawn", &self.drawn.len())
            .finish()
    }
}

impl MapView {
    pub fn new(container_id: impl Into<String>, options: MapOptions) -> Self {
        Self {
            container_id: container_id.into(),
            state: MapState::Uninitialized,
            center: options.center,
            zoom: options.zoom,
            width: options.width,
            height: options.height,
            max_zoom: options.max_zoom,
            markers: Vec::new(),
            drawn: Vec::new(),
            bounds: None,
            redraws: 0,
            on_bounds_change: None,
            on_marker_click: None,
            searches: SearchGenerations::new(),
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn state(&self) -> MapState {
        self.state
    }

    pub fn center(&self) -> Coordinate {
        self.center
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Markers currently on the map.
    pub fn drawn_markers(&self) -> &[ListingMarker] {
        &self.drawn
    }

    pub fn redraw_count(&self) -> usize {
        self.redraws
    }

    /// Marker searches targeting this view. A search started here only
    /// cancels earlier searches on the same view.
    pub fn searches(&self) -> &SearchGenerations {
        &self.searches
    }

    /// Adopts the client's viewport size so bounds match what it shows.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.clamp(1, MAX_VIEWPORT_PX);
        self.height = height.clamp(1, MAX_VIEWPORT_PX);
    }

    pub fn on_bounds_change(&mut self, callback: impl FnMut(MapBounds) + Send + 'static) {
        self.on_bounds_change = Some(Box::new(callback));
    }

    pub fn on_marker_click(&mut self, callback: impl FnMut(&str) + Send + 'static) {
        self.on_marker_click = Some(Box::new(callback));
    }

    /// Starts initialization. Returns `Ok(false)` when the view is already
    /// initializing or ready, so a second mount does nothing.
    pub fn begin_initialize(&mut self) -> Result<bool, GeocodeError> {
        match self.state {
            MapState::Uninitialized => {
                self.state = MapState::Initializing;
                Ok(true)
            }
            MapState::Initializing | MapState::Ready => Ok(false),
            MapState::Disposed => Err(GeocodeError::MapInit(format!(
                "container {} was disposed; mount a new view",
                self.container_id
            ))),
        }
    }

    pub fn complete_initialize(&mut self) -> Result<(), GeocodeError> {
        if self.state != MapState::Initializing {
            return Err(GeocodeError::MapInit(format!(
                "container {} is {:?}, not initializing",
                self.container_id, self.state
            )));
        }
        self.state = MapState::Ready;
        self.redraw();
        self.settle(self.center, self.zoom);
        Ok(())
    }

    /// Idempotent: a no-op when already initializing or ready.
    pub fn initialize(&mut self) -> Result<(), GeocodeError> {
        if self.begin_initialize()? {
            self.complete_initialize()?;
        }
        Ok(())
    }

    /// Replaces the marker set. Everything drawn is cleared first; markers
    /// without a position are not drawn.
    pub fn set_markers(&mut self, markers: Vec<ListingMarker>) {
        if self.state == MapState::Disposed {
            return;
        }
        self.markers = markers;
        if self.state == MapState::Ready {
            self.redraw();
        }
    }

    fn redraw(&mut self) {
        self.drawn.clear();
        self.drawn
            .extend(self.markers.iter().filter(|m| m.position.is_some()).cloned());
        self.redraws += 1;
    }

    /// Pan/zoom end: recompute the viewport and fire `on_bounds_change`.
    pub fn settle(&mut self, center: Coordinate, zoom: f64) -> Option<MapBounds> {
        if self.state != MapState::Ready {
            return None;
        }
        self.center = center;
        self.zoom = zoom.clamp(0.0, f64::from(self.max_zoom));

        let bounds = MapBounds::from_viewport(self.center, self.zoom, self.width, self.height);
        self.bounds = Some(bounds);
        if let Some(cb) = self.on_bounds_change.as_mut() {
            cb(bounds);
        }
        Some(bounds)
    }

    /// Centres and zooms so every drawn marker is on screen.
    pub fn fit_markers(&mut self) -> Option<MapBounds> {
        let enclosing = MapBounds::enclosing(&self.drawn)?;
        let zoom = enclosing.fit_zoom(self.width, self.height, self.max_zoom);
        self.settle(enclosing.center(), f64::from(zoom))
    }

    /// Fires `on_marker_click` if `listing_key` is drawn.
    pub fn click(&mut self, listing_key: &str) -> bool {
        if self.state != MapState::Ready || !self.drawn.iter().any(|m| m.listing_key == listing_key) {
            return false;
        }
        if let Some(cb) = self.on_marker_click.as_mut() {
            cb(listing_key);
        }
        true
    }

    pub fn visible_markers(&self) -> Vec<ListingMarker> {
        match &self.bounds {
            Some(b) => filter_visible(&self.drawn, b),
            None => Vec::new(),
        }
    }

    /// Tears the view down; the container can then take a new view.
    pub fn dispose(&mut self) {
        self.state = MapState::Disposed;
        self.markers.clear();
        self.drawn.clear();
        self.bounds = None;
        self.on_bounds_change = None;
        self.on_marker_click = None;
        // Anything still geocoding for this view is now stale.
        self.searches.begin();
    }
}
