use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use crate::error::PipelineError;
use crate::models::RawDetection;

pub const DEFAULT_DETECTOR_URL: &str =
    "https://api-inference.huggingface.co/models/facebook/detr-resnet-50";

/// What the detection endpoint answered, before any interpretation.
#[derive(Debug, Clone)]
pub enum DetectorReply {
    Success(serde_json::Value),
    /// Success status, but the body is not JSON.
    Unreadable(String),
    /// The model is still loading (HTTP 503).
    WarmingUp,
    Failure { status: u16, body: String },
}

/// Transport for the object-detection API.
pub trait ObjectDetector: Send + Sync {
    fn detect(
        &self,
        image: &[u8],
        content_type: &str,
    ) -> impl Future<Output = anyhow::Result<DetectorReply>> + Send;
}

/// Hosted inference endpoint authenticated with an optional bearer token.
#[derive(Debug, Clone)]
pub struct HuggingFaceDetector {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HuggingFaceDetector {
    pub fn new(url: impl Into<String>, token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build detector HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            token: token.filter(|t| !t.is_empty()),
        })
    }
}

impl ObjectDetector for HuggingFaceDetector {
    async fn detect(&self, image: &[u8], content_type: &str) -> anyhow::Result<DetectorReply> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, content_type)
            .body(image.to_vec());
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Ok(DetectorReply::WarmingUp);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Ok(DetectorReply::Failure {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await.context("Failed to read detection response")?;
        match serde_json::from_str(&body) {
            Ok(value) => Ok(DetectorReply::Success(value)),
            Err(_) => Ok(DetectorReply::Unreadable(body)),
        }
    }
}

/// Calls a detector, retrying once after a cold start, and parses the result.
pub struct DetectionClient<D> {
    detector: D,
    retry_delay: Duration,
}

impl<D: ObjectDetector> DetectionClient<D> {
    pub fn new(detector: D, retry_delay: Duration) -> Self {
        Self { detector, retry_delay }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub async fn detect_objects(&self, jpeg: &[u8]) -> Result<Vec<RawDetection>, PipelineError> {
        let reply = match self.call(jpeg).await? {
            DetectorReply::WarmingUp => {
                log::warn!(
                    "Detection model is warming up, retrying once in {:?}",
                    self.retry_delay
                );
                tokio::time::sleep(self.retry_delay).await;
                self.call(jpeg).await?
            }
            reply => reply,
        };

        match reply {
            DetectorReply::Success(value) => parse_detections(value),
            DetectorReply::Unreadable(body) => Err(PipelineError::MalformedResponse(format!(
                "response is not JSON: {}",
                snippet(&body)
            ))),
            DetectorReply::Failure { status, body } => Err(PipelineError::DetectionApi {
                status: Some(status),
                message: format!("HTTP {status}: {body}"),
            }),
            DetectorReply::WarmingUp => Err(PipelineError::DetectionApi {
                status: Some(StatusCode::SERVICE_UNAVAILABLE.as_u16()),
                message: "model is still loading, try again in 30s".to_string(),
            }),
        }
    }

    async fn call(&self, jpeg: &[u8]) -> Result<DetectorReply, PipelineError> {
        self.detector
            .detect(jpeg, "image/jpeg")
            .await
            .map_err(|e| PipelineError::DetectionApi {
                status: None,
                message: format!("{e:#}"),
            })
    }
}

fn snippet(body: &str) -> String {
    const MAX_CHARS: usize = 120;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Interpret a successful response body as a list of detections.
pub fn parse_detections(value: serde_json::Value) -> Result<Vec<RawDetection>, PipelineError> {
    if !value.is_array() {
        let message = value
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("unexpected response from detection model")
            .to_string();
        return Err(PipelineError::MalformedResponse(message));
    }
    serde_json::from_value(value)
        .map_err(|e| PipelineError::MalformedResponse(format!("bad detection entry: {e}")))
}
