use image::Rgba;
use imageproc::drawing::{Blend, draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::compositor::CompositeImage;
use crate::models::{AcceptedDetection, PixelBox};

const OUTLINE: Rgba<u8> = Rgba([34, 197, 94, 255]);
// rgba(34, 197, 94, 0.15)
const FILL: Rgba<u8> = Rgba([34, 197, 94, 38]);
const TAB_BACKGROUND: Rgba<u8> = Rgba([22, 163, 74, 255]);
const TAB_BAR: Rgba<u8> = Rgba([255, 255, 255, 255]);

const OUTLINE_WIDTH: i32 = 3;
const TAB_WIDTH: u32 = 60;
const TAB_HEIGHT: u32 = 18;

/// Pixel rectangle of a detection box clipped to a `width` x `height` image.
///
/// Returns `None` for boxes with non-finite coordinates or lying entirely
/// outside the image. The result always fits in `i32`.
fn clip_box(bbox: &PixelBox, width: u32, height: u32) -> Option<(i32, i32, u32, u32)> {
    let coords = [bbox.xmin, bbox.ymin, bbox.xmax, bbox.ymax];
    if coords.iter().any(|c| !c.is_finite()) {
        return None;
    }
    let (w, h) = (width as f32, height as f32);
    if bbox.xmax < 0.0 || bbox.ymax < 0.0 || bbox.xmin >= w || bbox.ymin >= h {
        return None;
    }

    let xmin = bbox.xmin.clamp(0.0, w).round();
    let ymin = bbox.ymin.clamp(0.0, h).round();
    let xmax = bbox.xmax.clamp(0.0, w).round();
    let ymax = bbox.ymax.clamp(0.0, h).round();
    let bw = (xmax - xmin).max(1.0) as u32;
    let bh = (ymax - ymin).max(1.0) as u32;
    Some((xmin as i32, ymin as i32, bw, bh))
}

/// Length of the score bar inside a tab.
fn bar_length(score: f32) -> u32 {
    let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
    ((TAB_WIDTH - 6) as f32 * score).round() as u32
}

/// Draw every accepted detection onto the composite in place.
///
/// Each box gets a translucent fill, a green outline and a fixed-size tab
/// above it holding a bar whose length follows the score. Boxes are clipped
/// to the image; boxes entirely outside it are skipped.
pub fn draw_detections(image: &mut CompositeImage, detections: &[AcceptedDetection]) {
    if detections.is_empty() {
        return;
    }

    let (width, height) = (image.width(), image.height());
    let raster = std::mem::take(image.raster_mut());
    let mut canvas = Blend(raster);

    for accepted in detections {
        let Some((x, y, w, h)) = clip_box(&accepted.detection.bbox, width, height) else {
            log::debug!(
                "Skipping detection outside the image: {:?}",
                accepted.detection.bbox
            );
            continue;
        };

        draw_filled_rect_mut(&mut canvas, Rect::at(x, y).of_size(w, h), FILL);

        for inset in 0..OUTLINE_WIDTH {
            let iw = w as i32 - 2 * inset;
            let ih = h as i32 - 2 * inset;
            if iw <= 0 || ih <= 0 {
                break;
            }
            let rect = Rect::at(x.saturating_add(inset), y.saturating_add(inset))
                .of_size(iw as u32, ih as u32);
            draw_hollow_rect_mut(&mut canvas, rect, OUTLINE);
        }

        // The tab may hang above the top edge; imageproc clips it
        let tab_y = y.saturating_sub(TAB_HEIGHT as i32);
        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(x, tab_y).of_size(TAB_WIDTH, TAB_HEIGHT),
            TAB_BACKGROUND,
        );
        let bar = bar_length(accepted.detection.score);
        if bar > 0 {
            draw_filled_rect_mut(
                &mut canvas,
                Rect::at(x.saturating_add(3), tab_y.saturating_add(7)).of_size(bar, 4),
                TAB_BAR,
            );
        }
    }

    *image.raster_mut() = canvas.0;
}
