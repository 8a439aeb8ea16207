//! Pixel to geographic coordinate mapping for composite images.
//!
//! The mapping interpolates linearly between the composite's edges. Web
//! Mercator is not linear in latitude, so this is an approximation: at the
//! capped grid size (at most 16 tiles around zoom 17) the error is far below
//! a metre, but it grows quickly at low zoom levels or for large areas where
//! a proper inverse Mercator projection would be needed.

use crate::geo::{GeoPoint, GeoRectangle};
use crate::models::{AcceptedDetection, GeoDetection};

/// Map pixel `(px, py)` of an `img_w` x `img_h` image covering `bounds`.
///
/// Exact at the corners: `(0, 0)` is north-west, `(img_w, img_h)` is south-east.
pub fn project(px: f64, py: f64, img_w: f64, img_h: f64, bounds: &GeoRectangle) -> GeoPoint {
    let ty = py / img_h;
    let tx = px / img_w;
    GeoPoint {
        lat: lerp(bounds.north, bounds.south, ty),
        lng: lerp(bounds.west, bounds.east, tx),
    }
}

// Two-weight form so both endpoints are reproduced without rounding
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    (1.0 - t) * a + t * b
}

/// Project every canopy center, keeping input order.
pub fn project_all(
    accepted: &[AcceptedDetection],
    img_w: u32,
    img_h: u32,
    bounds: &GeoRectangle,
) -> Vec<GeoDetection> {
    accepted
        .iter()
        .map(|a| {
            let point = project(
                a.canopy_center.x as f64,
                a.canopy_center.y as f64,
                img_w as f64,
                img_h as f64,
                bounds,
            );
            GeoDetection {
                latitude: point.lat,
                longitude: point.lng,
                confidence: a.detection.score,
                label: a.detection.label.clone(),
            }
        })
        .collect()
}
