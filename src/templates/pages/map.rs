// templates/pages/map.rs

use crate::map::MapView;
use crate::templates::{components::listing_row, desktop_layout};
use maud::{html, Markup, PreEscaped};

// Client half of the map. Binds Leaflet to the container at most once and
// reports view events back to /map/events.
const MAP_SCRIPT: &str = r#"
(function () {
  var el = document.querySelector('[data-pinmap-container]');
  if (!el || el._leaflet_id) return;
  var state = el.dataset.state;
  if (state === 'initializing' || state === 'ready') return;
  el.dataset.state = 'initializing';

  var container = el.id;
  function send(event) {
    return fetch('/map/events', {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({ container: container, event: event })
    }).then(function (r) { return r.ok ? r.json() : null; });
  }

  var map = L.map(el).setView(
    [parseFloat(el.dataset.centerLat), parseFloat(el.dataset.centerLng)],
    parseFloat(el.dataset.zoom)
  );
  L.tileLayer('https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png', {
    maxZoom: 19,
    attribution: '&copy; OpenStreetMap contributors'
  }).addTo(map);

  var markers = JSON.parse(el.dataset.markers || '[]');
  var layer = L.layerGroup().addTo(map);
  layer.clearLayers();
  markers.forEach(function (m) {
    if (!m.position) return;
    L.marker([m.position.lat, m.position.lng], {
      icon: L.divIcon({ className: 'price-pin', html: m.label })
    }).on('click', function () {
      send({ type: 'click', listingKey: m.listingKey }).catch(function () {});
      el.dispatchEvent(new CustomEvent('pinmap:marker-click', { detail: m.listingKey, bubbles: true }));
    }).addTo(layer);
  });

  var list = document.getElementById('visible-listings');
  map.on('moveend', function () {
    var c = map.getCenter();
    var size = map.getSize();
    send({ type: 'moveend', center: { lat: c.lat, lng: c.lng }, zoom: map.getZoom(), width: size.x, height: size.y })
      .then(function (data) {
        if (!list || !data || !data.markers) return;
        list.innerHTML = '';
        data.markers.forEach(function (m) {
          var li = document.createElement('li');
          li.className = 'listing-row';
          li.dataset.listingKey = m.listingKey;
          li.textContent = m.label + ' ' + m.address;
          list.appendChild(li);
        });
      }).catch(function () {});
  });

  el.dataset.state = 'ready';
  window.addEventListener('pagehide', function () {
    map.remove();
    el.dataset.state = 'disposed';
    navigator.sendBeacon('/map/events', new Blob(
      [JSON.stringify({ container: container, event: { type: 'dispose' } })],
      { type: 'application/json' }
    ));
  });
})();
"#;

pub fn map_page(view: &MapView) -> Markup {
    let markers_json =
        serde_json::to_string(view.drawn_markers()).unwrap_or_else(|_| "[]".to_string());
    let center = view.center();
    let visible = view.visible_markers();

    desktop_layout(
        "Listings map",
        html! {
            main {
                div id=(view.container_id())
                    data-pinmap-container
                    data-center-lat=(center.lat)
                    data-center-lng=(center.lng)
                    data-zoom=(view.zoom())
                    data-markers=(markers_json) {}

                aside {
                    h3 { (visible.len()) " of " (view.drawn_markers().len()) " listings in view" }
                    ul id="visible-listings" {
                        @for marker in &visible {
                            (listing_row(marker))
                        }
                    }
                }
            }
            script { (PreEscaped(MAP_SCRIPT)) }
        },
    )
}
