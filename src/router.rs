use crate::app::AppState;
use crate::db::PostalCodeLookup;
use crate::domain::listing::Listing;
use crate::domain::marker::ListingMarker;
use crate::domain::postal_code::{normalize, Coordinate};
use crate::errors::{ResultResp, ServerError};
use crate::geocoder::Geocode;
use crate::map::{filter_visible, MapBounds, MapOptions, MapRegistry, MapState, MapView};
use crate::markers::{MarkerBuild, MarkerBuilder};
use crate::responses::stream::NdjsonSender;
use crate::responses::{html_response, json_response, ndjson_channel, ndjson_response, read_json};
use crate::session::{SearchGenerations, SearchTicket};
use crate::templates;
use astra::Request;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

pub const MAP_CONTAINER_ID: &str = "listing-map";

// Upper bound on live map views across all clients.
const MAX_MAP_CONTAINERS: usize = 256;
const MAX_CONTAINER_ID_LEN: usize = 64;

pub fn handle(mut req: Request, state: &AppState) -> ResultResp {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();

    match (method.as_str(), path.as_str()) {
        ("GET", "/health") => health(state),
        ("POST", "/api/postal-codes/lookup") => lookup_postal_codes(&mut req, state),
        ("POST", "/api/postal-codes/geocode") => geocode_postal_codes(&mut req, state),
        ("POST", "/api/markers") => build_markers(&mut req, state),
        ("POST", "/api/markers/stream") => stream_markers(&mut req, state),
        ("POST", "/api/markers/visible") => visible_markers(&mut req),
        ("GET", "/") | ("GET", "/map") => show_map(&req, state),
        ("POST", "/map") => render_map(&mut req, state),
        ("POST", "/map/events") => map_event(&mut req, state),
        (
            _,
            "/health"
            | "/api/postal-codes/lookup"
            | "/api/postal-codes/geocode"
            | "/api/markers"
            | "/api/markers/stream"
            | "/api/markers/visible"
            | "/map"
            | "/map/events",
        ) => Err(ServerError::MethodNotAllowed),
        _ => Err(ServerError::NotFound),
    }
}

fn health(state: &AppState) -> ResultResp {
    match state.store.count() {
        Ok(n) => json_response(200, &json!({ "status": "ok", "postal_codes": n })),
        Err(e) => json_response(
            503,
            &json!({ "status": "degraded", "postal_codes": null, "error": e.to_string() }),
        ),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest {
    postal_codes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct LookupMetadata {
    requested: usize,
    found: usize,
    missing: usize,
    duration_ms: u128,
}

#[derive(Debug, Serialize)]
struct LookupResponse {
    results: BTreeMap<String, Coordinate>,
    metadata: LookupMetadata,
}

/// Distinct inputs after normalization. Invalid codes keep their trimmed
/// upper-case form so they still count as requested (and missing).
fn requested_codes(raw: &[String]) -> HashSet<String> {
    raw.iter()
        .map(|raw| normalize(raw).unwrap_or_else(|| raw.trim().to_uppercase()))
        .collect()
}

fn lookup_postal_codes(req: &mut Request, state: &AppState) -> ResultResp {
    let started = Instant::now();
    let body: LookupRequest = read_json(req)?;
    let requested = requested_codes(&body.postal_codes);

    let results: BTreeMap<String, Coordinate> =
        state.store.lookup_many(&requested)?.into_iter().collect();

    let found = results.len();
    let metadata = LookupMetadata {
        requested: requested.len(),
        found,
        missing: requested.len() - found,
        duration_ms: started.elapsed().as_millis(),
    };
    tracing::info!(
        requested = metadata.requested,
        found = metadata.found,
        duration_ms = metadata.duration_ms as u64,
        "postal code lookup"
    );

    json_response(200, &LookupResponse { results, metadata })
}

#[derive(Debug, Serialize)]
struct GeocodeMetadata {
    requested: usize,
    found: usize,
    missing: usize,
    batches: usize,
    from_store: usize,
    from_provider: usize,
    duration_ms: u128,
}

#[derive(Debug, Serialize)]
struct GeocodeResponse {
    results: BTreeMap<String, Coordinate>,
    metadata: GeocodeMetadata,
}

fn geocode_postal_codes(req: &mut Request, state: &AppState) -> ResultResp {
    let started = Instant::now();
    let body: LookupRequest = read_json(req)?;
    let requested = requested_codes(&body.postal_codes).len();

    let mut batches = 0;
    let mut from_store = 0;
    let mut from_provider = 0;
    let results: BTreeMap<String, Coordinate> = state
        .geocoder
        .geocode(&body.postal_codes, &mut |progress| {
            batches += 1;
            from_store += progress.from_store;
            from_provider += progress.from_provider;
            tracing::debug!(
                done = progress.done,
                total = progress.total,
                batch = progress.batch.len(),
                "geocode progress"
            );
        })
        .into_iter()
        .collect();

    let found = results.len();
    let metadata = GeocodeMetadata {
        requested,
        found,
        missing: requested - found,
        batches,
        from_store,
        from_provider,
        duration_ms: started.elapsed().as_millis(),
    };
    tracing::info!(
        requested,
        found,
        from_store,
        from_provider,
        duration_ms = metadata.duration_ms as u64,
        "postal code geocode"
    );

    json_response(200, &GeocodeResponse { results, metadata })
}

#[derive(Debug, Deserialize)]
struct ListingsRequest {
    listings: Vec<Listing>,
}

#[derive(Debug, Serialize)]
struct MarkersMetadata {
    listings: usize,
    markers: usize,
    excluded: usize,
    duration_ms: u128,
}

impl MarkersMetadata {
    fn new(listings: usize, markers: usize, started: Instant) -> Self {
        Self {
            listings,
            markers,
            excluded: listings - markers,
            duration_ms: started.elapsed().as_millis(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MarkersResponse {
    markers: Vec<ListingMarker>,
    metadata: MarkersMetadata,
}

fn build_markers(req: &mut Request, state: &AppState) -> ResultResp {
    let started = Instant::now();
    let body: ListingsRequest = read_json(req)?;

    let markers = MarkerBuilder::new(state.geocoder.as_ref()).build_markers(&body.listings);
    let metadata = MarkersMetadata::new(body.listings.len(), markers.len(), started);
    tracing::info!(
        listings = metadata.listings,
        markers = metadata.markers,
        duration_ms = metadata.duration_ms as u64,
        "markers built"
    );

    json_response(200, &MarkersResponse { markers, metadata })
}

/// One NDJSON line of a marker stream.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum StreamLine<'a> {
    /// Every marker finished so far.
    Partial {
        batch: usize,
        markers: &'a [ListingMarker],
    },
    Complete {
        markers: &'a [ListingMarker],
        metadata: MarkersMetadata,
    },
}

fn stream_markers(req: &mut Request, state: &AppState) -> ResultResp {
    let body: ListingsRequest = read_json(req)?;
    let slot = state
        .try_stream_slot()
        .ok_or_else(|| ServerError::Unavailable("too many marker streams in progress".into()))?;

    let geocoder = Arc::clone(&state.geocoder);
    let (sender, stream_body) = ndjson_channel();

    std::thread::Builder::new()
        .name("marker-stream".into())
        .spawn(move || {
            let _slot = slot;
            stream_marker_batches(geocoder.as_ref(), &body.listings, &sender);
        })
        .map_err(|e| {
            tracing::error!(error = %e, "failed to start marker stream");
            ServerError::InternalError
        })?;

    ndjson_response(stream_body)
}

fn stream_marker_batches(geocoder: &dyn Geocode, listings: &[Listing], sender: &NdjsonSender) {
    let started = Instant::now();
    // Private to this stream: the only newer search is "the client left".
    let client = SearchGenerations::new();
    let ticket = client.begin();
    let mut batch = 0;

    let build = MarkerBuilder::new(geocoder).build_markers_incremental(
        listings,
        Some(&ticket),
        |markers| {
            batch += 1;
            if !sender.send(&StreamLine::Partial { batch, markers }) {
                client.begin();
            }
        },
    );

    match build {
        MarkerBuild::Complete(markers) => {
            let metadata = MarkersMetadata::new(listings.len(), markers.len(), started);
            tracing::info!(
                listings = metadata.listings,
                markers = metadata.markers,
                batches = batch,
                duration_ms = metadata.duration_ms as u64,
                "marker stream complete"
            );
            sender.send(&StreamLine::Complete {
                markers: &markers,
                metadata,
            });
        }
        MarkerBuild::Superseded => {
            tracing::debug!(batches = batch, "marker stream client went away");
        }
    }
}

#[derive(Debug, Deserialize)]
struct VisibleRequest {
    markers: Vec<ListingMarker>,
    bounds: MapBounds,
}

fn visible_markers(req: &mut Request) -> ResultResp {
    let body: VisibleRequest = read_json(req)?;
    if !body.bounds.is_valid() {
        return Err(ServerError::BadRequest(
            "bounds must be finite with north >= south".into(),
        ));
    }

    let markers = filter_visible(&body.markers, &body.bounds);
    json_response(200, &json!({ "markers": markers }))
}

fn query_param(req: &Request, key: &str) -> Option<String> {
    let query = req.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Container ids come from clients and become HTML ids and registry keys.
fn container_id(raw: Option<&str>) -> Result<String, ServerError> {
    let id = match raw {
        None => return Ok(MAP_CONTAINER_ID.to_string()),
        Some(id) => id.trim(),
    };
    let valid = !id.is_empty()
        && id.len() <= MAX_CONTAINER_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ServerError::BadRequest(format!(
            "container must be 1-{MAX_CONTAINER_ID_LEN} letters, digits, '-' or '_'"
        )));
    }
    Ok(id.to_string())
}

fn mount_view<'m>(
    maps: &'m mut MapRegistry,
    container: &str,
    options: MapOptions,
) -> Result<&'m mut MapView, ServerError> {
    if maps.get(container).is_none() && maps.len() >= MAX_MAP_CONTAINERS {
        return Err(ServerError::Unavailable("too many open maps".into()));
    }
    Ok(maps.mount(container, options, watch_view)?)
}

fn watch_view(view: &mut MapView) {
    let id = view.container_id().to_string();
    view.on_bounds_change(move |b| {
        tracing::debug!(
            container = %id,
            north = b.north,
            south = b.south,
            east = b.east,
            west = b.west,
            "map viewport changed"
        );
    });

    let id = view.container_id().to_string();
    view.on_marker_click(move |listing| {
        tracing::info!(container = %id, listing, "map marker clicked");
    });
}

/// Renders the container as it stands. Never starts a search.
fn show_map(req: &Request, state: &AppState) -> ResultResp {
    let container = container_id(query_param(req, "container").as_deref())?;
    let mut maps = state.maps();
    let view = mount_view(&mut maps, &container, state.map_options)?;
    html_response(templates::pages::map_page(view))
}

#[derive(Debug, Deserialize)]
struct MapRenderRequest {
    listings: Vec<Listing>,
    #[serde(default)]
    container: Option<String>,
}

fn render_map(req: &mut Request, state: &AppState) -> ResultResp {
    let body: MapRenderRequest = read_json(req)?;
    let container = container_id(body.container.as_deref())?;

    let ticket = {
        let mut maps = state.maps();
        mount_view(&mut maps, &container, state.map_options)?
            .searches()
            .begin()
    };

    // Geocoding runs without the registry lock held.
    let build = MarkerBuilder::new(state.geocoder.as_ref()).build_markers_incremental(
        &body.listings,
        Some(&ticket),
        |_| {},
    );
    let markers = match build {
        MarkerBuild::Complete(markers) => markers,
        MarkerBuild::Superseded => return Err(superseded(&container, &ticket)),
    };

    let mut maps = state.maps();
    // The view may have taken a newer search, or been disposed and replaced.
    let view = match maps.get_mut(&container) {
        Some(view) if view.searches().issued(&ticket) => view,
        _ => return Err(superseded(&container, &ticket)),
    };

    view.set_markers(markers);
    if view.fit_markers().is_none() {
        view.settle(state.map_options.center, state.map_options.zoom);
    }
    tracing::debug!(
        container = %container,
        markers = view.drawn_markers().len(),
        redraws = view.redraw_count(),
        "map rendered"
    );

    html_response(templates::pages::map_page(view))
}

fn superseded(container: &str, ticket: &SearchTicket) -> ServerError {
    tracing::debug!(container, generation = ticket.generation(), "map search superseded");
    ServerError::Conflict(format!("map {container} started a newer search"))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum MapEvent {
    /// Pan or zoom finished on the client.
    Moveend {
        center: Coordinate,
        zoom: f64,
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    Click { listing_key: String },
    Dispose,
}

#[derive(Debug, Deserialize)]
struct MapEventRequest {
    container: String,
    event: MapEvent,
}

fn map_event(req: &mut Request, state: &AppState) -> ResultResp {
    let body: MapEventRequest = read_json(req)?;
    let container = container_id(Some(&body.container))?;
    let mut maps = state.maps();

    match body.event {
        MapEvent::Moveend {
            center,
            zoom,
            width,
            height,
        } => {
            if !center.is_valid() || !zoom.is_finite() {
                return Err(ServerError::BadRequest("invalid center or zoom".into()));
            }
            let view = ready_view(&mut maps, &container)?;
            if let (Some(width), Some(height)) = (width, height) {
                view.resize(width, height);
            }
            let bounds = view.settle(center, zoom).ok_or(ServerError::NotFound)?;
            json_response(
                200,
                &json!({ "bounds": bounds, "markers": view.visible_markers() }),
            )
        }
        MapEvent::Click { listing_key } => {
            let drawn = ready_view(&mut maps, &container)?.click(&listing_key);
            json_response(200, &json!({ "listingKey": listing_key, "drawn": drawn }))
        }
        MapEvent::Dispose => {
            let disposed = maps.unmount(&container);
            tracing::debug!(container = %container, disposed, "map disposed");
            json_response(200, &json!({ "disposed": disposed }))
        }
    }
}

fn ready_view<'m>(
    maps: &'m mut MapRegistry,
    container: &str,
) -> Result<&'m mut MapView, ServerError> {
    maps.get_mut(container)
        .filter(|view| view.state() == MapState::Ready)
        .ok_or(ServerError::NotFound)
}
