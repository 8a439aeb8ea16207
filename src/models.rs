use serde::{Deserialize, Serialize};

/// Bounding box in pixel space of the composite image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl PixelBox {
    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    /// Box centroid, used as the trunk position estimate
    pub fn center(&self) -> PixelPoint {
        PixelPoint {
            x: (self.xmin + self.xmax) / 2.0,
            y: (self.ymin + self.ymax) / 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f32,
    pub y: f32,
}

/// One entry of the object-detection API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub score: f32,
    #[serde(rename = "box")]
    pub bbox: PixelBox,
}

/// A detection that passed the vegetation filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedDetection {
    pub detection: RawDetection,
    pub canopy_center: PixelPoint,
}

/// Candidate tree location, ready for import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoDetection {
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: f32,
    pub label: String,
}
