pub mod annotate;
pub mod client;
pub mod filter;

pub use annotate::draw_detections;
pub use client::{DetectionClient, DetectorReply, HuggingFaceDetector, ObjectDetector};
pub use filter::filter_detections;
