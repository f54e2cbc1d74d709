use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::domain::marker::ListingMarker;
use crate::domain::postal_code::Coordinate;

const TILE_SIZE: f64 = 256.0;
/// Web Mercator stops here; beyond it y runs off to infinity.
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;
const PIXEL_EPSILON: f64 = 1e-6;

/// Visible rectangle of the map. `north >= south`; no antimeridian wrap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl MapBounds {
    pub fn is_valid(&self) -> bool {
        [self.north, self.south, self.east, self.west]
            .iter()
            .all(|v| v.is_finite())
            && self.north >= self.south
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        self.south <= point.lat
            && point.lat <= self.north
            && self.west <= point.lng
            && point.lng <= self.east
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.north + self.south) / 2.0,
            (self.east + self.west) / 2.0,
        )
    }

    /// Smallest box holding every positioned marker.
    pub fn enclosing(markers: &[ListingMarker]) -> Option<Self> {
        markers
            .iter()
            .filter_map(|m| m.position)
            .fold(None, |acc: Option<MapBounds>, p| {
                Some(match acc {
                    None => MapBounds {
                        north: p.lat,
                        south: p.lat,
                        east: p.lng,
                        west: p.lng,
                    },
                    Some(b) => MapBounds {
                        north: b.north.max(p.lat),
                        south: b.south.min(p.lat),
                        east: b.east.max(p.lng),
                        west: b.west.min(p.lng),
                    },
                })
            })
    }

    /// Bounds of a `width` x `height` pixel viewport centred on `center`
    /// at `zoom`, in Web Mercator with 256px tiles.
    pub fn from_viewport(center: Coordinate, zoom: f64, width: u32, height: u32) -> Self {
        let world = TILE_SIZE * 2f64.powf(zoom);
        let (cx, cy) = project(center, world);
        let half_w = f64::from(width) / 2.0;
        let half_h = f64::from(height) / 2.0;

        let west = unproject_x(cx - half_w, world).max(-180.0);
        let east = unproject_x(cx + half_w, world).min(180.0);
        let north = unproject_y(cy - half_h, world);
        let south = unproject_y(cy + half_h, world);

        MapBounds {
            north,
            south,
            east,
            west,
        }
    }

    /// Largest integer zoom at which these bounds fit a viewport.
    pub fn fit_zoom(&self, width: u32, height: u32, max_zoom: u8) -> u8 {
        (0..=max_zoom)
            .rev()
            .find(|&z| {
                let world = TILE_SIZE * 2f64.powi(i32::from(z));
                let (x_w, y_n) = project(Coordinate::new(self.north, self.west), world);
                let (x_e, y_s) = project(Coordinate::new(self.south, self.east), world);
                (x_e - x_w) <= f64::from(width) + PIXEL_EPSILON
                    && (y_s - y_n) <= f64::from(height) + PIXEL_EPSILON
            })
            .unwrap_or(0)
    }
}

fn project(point: Coordinate, world: f64) -> (f64, f64) {
    let lat = point.lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let x = (point.lng + 180.0) / 360.0 * world;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * world;
    (x, y)
}

fn unproject_x(x: f64, world: f64) -> f64 {
    x / world * 360.0 - 180.0
}

fn unproject_y(y: f64, world: f64) -> f64 {
    let n = PI * (1.0 - 2.0 * y / world);
    n.sinh().atan().to_degrees().clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT)
}

/// Markers whose position lies inside `bounds`, edges included.
pub fn filter_visible(markers: &[ListingMarker], bounds: &MapBounds) -> Vec<ListingMarker> {
    markers
        .iter()
        .filter(|m| m.position.is_some_and(|p| bounds.contains(p)))
        .cloned()
        .collect()
}
