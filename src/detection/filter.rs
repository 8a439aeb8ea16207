use crate::config::FilterPolicy;
use crate::models::{AcceptedDetection, RawDetection};

impl FilterPolicy {
    pub fn is_vegetation(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.vegetation_labels
            .iter()
            .any(|v| label.contains(&v.to_lowercase()))
    }

    /// Box extent strictly inside the canopy size window on both axes
    pub fn is_canopy_sized(&self, detection: &RawDetection, img_w: u32, img_h: u32) -> bool {
        if img_w == 0 || img_h == 0 {
            return false;
        }
        let w = detection.bbox.width() / img_w as f32;
        let h = detection.bbox.height() / img_h as f32;
        w > self.min_extent && w < self.max_extent && h > self.min_extent && h < self.max_extent
    }

    pub fn accepts(&self, detection: &RawDetection, img_w: u32, img_h: u32) -> bool {
        let score = detection.score;
        if score.is_nan() || score <= self.min_score {
            return false;
        }
        self.is_vegetation(&detection.label)
            || (score > self.strong_score && self.is_canopy_sized(detection, img_w, img_h))
    }
}

/// Keep likely trees, in input order, and attach their canopy centers.
pub fn filter_detections(
    detections: Vec<RawDetection>,
    img_w: u32,
    img_h: u32,
    policy: &FilterPolicy,
) -> Vec<AcceptedDetection> {
    detections
        .into_iter()
        .filter(|d| policy.accepts(d, img_w, img_h))
        .map(|d| AcceptedDetection {
            canopy_center: d.bbox.center(),
            detection: d,
        })
        .collect()
}
