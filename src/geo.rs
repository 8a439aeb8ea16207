use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Latitude limit of the spherical Mercator projection.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Deepest zoom level supported. Tile indices at this level still fit in
/// `u32` with room for the one-past-the-end corner.
pub const MAX_ZOOM: u8 = 30;

/// A geographic point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Axis-aligned lat/lng rectangle. `north >= south` and `east >= west`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoRectangle {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl GeoRectangle {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self, PipelineError> {
        let values = [north, south, east, west];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::InvalidArea("non-finite coordinate".to_string()));
        }
        if north < south || east < west {
            return Err(PipelineError::InvalidArea(format!(
                "inverted rectangle (N {north}, S {south}, E {east}, W {west})"
            )));
        }
        Ok(Self { north, south, east, west })
    }

    /// Normalize the two corners of a drag gesture, in any order.
    pub fn from_corners(a: GeoPoint, b: GeoPoint) -> Self {
        Self {
            north: a.lat.max(b.lat),
            south: a.lat.min(b.lat),
            east: a.lng.max(b.lng),
            west: a.lng.min(b.lng),
        }
    }

    /// True when `other` lies entirely inside this rectangle.
    pub fn contains(&self, other: &GeoRectangle) -> bool {
        self.north >= other.north
            && self.south <= other.south
            && self.east >= other.east
            && self.west <= other.west
    }

    /// Rough area in km², good enough for a selection readout.
    pub fn approx_area_km2(&self) -> f64 {
        let height = (self.north - self.south).abs() * 111.0;
        let width = (self.east - self.west).abs() * 111.0 * self.north.to_radians().cos();
        height * width
    }
}

/// Address of a tile in the web-map pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileAddress {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.y, self.x)
    }
}

fn tiles_per_axis(zoom: u8) -> f64 {
    2f64.powi(zoom as i32)
}

/// Project a lat/lng onto the tile that contains it.
///
/// Returns `None` for latitudes at or beyond the Mercator limit and for
/// non-finite input, and for zoom levels above `MAX_ZOOM`. Longitude 180 is
/// folded onto the last column.
pub fn point_to_tile(lat: f64, lng: f64, zoom: u8) -> Option<TileAddress> {
    if zoom > MAX_ZOOM {
        return None;
    }
    if !lat.is_finite() || !lng.is_finite() || lat.abs() >= MAX_MERCATOR_LAT {
        return None;
    }
    if !(-180.0..=180.0).contains(&lng) {
        return None;
    }

    let n = tiles_per_axis(zoom);
    let lat_rad = lat.to_radians();
    let x = ((lng + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n).floor();

    let max_index = n - 1.0;
    Some(TileAddress {
        x: x.clamp(0.0, max_index) as u32,
        y: y.clamp(0.0, max_index) as u32,
        zoom,
    })
}

/// Top-left corner of tile `(x, y)`.
///
/// `x`/`y` may be one past the last tile so the far edge of a grid can be
/// addressed.
pub fn tile_to_point(x: u32, y: u32, zoom: u8) -> GeoPoint {
    let n = tiles_per_axis(zoom);
    let lng = x as f64 / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y as f64 / n)).sinh().atan().to_degrees();
    GeoPoint { lat, lng }
}

/// Rectangular block of tiles, inclusive on both corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub zoom: u8,
    pub top_left: TileAddress,
    pub bottom_right: TileAddress,
}

impl TileGrid {
    pub fn width(&self) -> u32 {
        self.bottom_right.x - self.top_left.x + 1
    }

    pub fn height(&self) -> u32 {
        self.bottom_right.y - self.top_left.y + 1
    }

    pub fn len(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All tiles in row-major order (top row first, west to east).
    pub fn tiles(&self) -> impl Iterator<Item = TileAddress> + '_ {
        (self.top_left.y..=self.bottom_right.y).flat_map(move |y| {
            (self.top_left.x..=self.bottom_right.x).map(move |x| TileAddress {
                x,
                y,
                zoom: self.zoom,
            })
        })
    }

    /// Grid as rows of tile addresses.
    pub fn rows(&self) -> Vec<Vec<TileAddress>> {
        (self.top_left.y..=self.bottom_right.y)
            .map(|y| {
                (self.top_left.x..=self.bottom_right.x)
                    .map(|x| TileAddress { x, y, zoom: self.zoom })
                    .collect()
            })
            .collect()
    }

    /// Pixel offset of `tile` inside a composite made of this grid.
    pub fn pixel_offset(&self, tile: TileAddress, tile_size: u32) -> (u32, u32) {
        (
            (tile.x - self.top_left.x) * tile_size,
            (tile.y - self.top_left.y) * tile_size,
        )
    }

    /// Geographic extent actually covered by the grid's tiles.
    pub fn bounds(&self) -> GeoRectangle {
        let north_west = tile_to_point(self.top_left.x, self.top_left.y, self.zoom);
        let south_east = tile_to_point(
            self.bottom_right.x.saturating_add(1),
            self.bottom_right.y.saturating_add(1),
            self.zoom,
        );
        GeoRectangle {
            north: north_west.lat,
            south: south_east.lat,
            east: south_east.lng,
            west: north_west.lng,
        }
    }
}

/// Resolve the grid of tiles covering `rect` at `zoom`.
///
/// Fails with `CapacityExceeded` when more than `max_tiles` would be needed
/// and with `InvalidArea` for zoom levels above `MAX_ZOOM`.
pub fn resolve_grid(rect: &GeoRectangle, zoom: u8, max_tiles: usize) -> Result<TileGrid, PipelineError> {
    if zoom > MAX_ZOOM {
        return Err(PipelineError::InvalidArea(format!(
            "zoom {zoom} is above the supported maximum of {MAX_ZOOM}"
        )));
    }
    let top_left = point_to_tile(rect.north, rect.west, zoom).ok_or_else(|| {
        PipelineError::InvalidArea(format!("north-west corner ({}, {}) is outside the map", rect.north, rect.west))
    })?;
    let bottom_right = point_to_tile(rect.south, rect.east, zoom).ok_or_else(|| {
        PipelineError::InvalidArea(format!("south-east corner ({}, {}) is outside the map", rect.south, rect.east))
    })?;

    if bottom_right.x < top_left.x || bottom_right.y < top_left.y {
        return Err(PipelineError::InvalidArea("inverted rectangle".to_string()));
    }

    let grid = TileGrid { zoom, top_left, bottom_right };
    let tiles = grid.len();
    if tiles > max_tiles {
        return Err(PipelineError::CapacityExceeded { tiles, max: max_tiles });
    }

    log::debug!(
        "Resolved {}x{} tile grid at zoom {} starting at {}",
        grid.width(),
        grid.height(),
        zoom,
        top_left
    );
    Ok(grid)
}
