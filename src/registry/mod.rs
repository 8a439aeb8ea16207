mod session;

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::models::GeoDetection;

pub use session::{HttpTokenRefresher, Session, TokenRefresher};

/// One tree location offered to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportCandidate {
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: f32,
}

impl From<&GeoDetection> for ImportCandidate {
    fn from(d: &GeoDetection) -> Self {
        Self {
            latitude: d.latitude,
            longitude: d.longitude,
            confidence: d.confidence,
        }
    }
}

/// Body of a bulk-create call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub trees: Vec<ImportCandidate>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedTree {
    pub tag_number: String,
    pub zone: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// What the registry reports back. Low-confidence entries may be skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub created: u32,
    pub skipped: u32,
    #[serde(default)]
    pub trees: Vec<ImportedTree>,
}

impl ImportSummary {
    pub fn merge(&mut self, other: ImportSummary) {
        self.created += other.created;
        self.skipped += other.skipped;
        self.trees.extend(other.trees);
    }
}

/// Destination for detected trees.
pub trait TreeImporter: Send + Sync {
    fn import(&self, request: &ImportRequest) -> impl Future<Output = anyhow::Result<ImportSummary>> + Send;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Tree registry REST client (`POST {base}/trees/bulk-create/`).
#[derive(Debug)]
pub struct RegistryClient<R> {
    client: reqwest::Client,
    base_url: String,
    session: Session<R>,
}

impl RegistryClient<HttpTokenRefresher> {
    /// Client whose session refreshes against the same registry.
    pub fn connect(
        base_url: &str,
        access: Option<String>,
        refresh: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build registry HTTP client")?;
        let refresher = HttpTokenRefresher::new(client.clone(), base_url);
        Ok(Self::new(client, base_url, Session::new(access, refresh, refresher)))
    }
}

impl<R: TokenRefresher> RegistryClient<R> {
    pub fn new(client: reqwest::Client, base_url: &str, session: Session<R>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn session(&self) -> &Session<R> {
        &self.session
    }

    fn bulk_create_url(&self) -> String {
        format!("{}/trees/bulk-create/", self.base_url)
    }

    async fn post(&self, request: &ImportRequest, token: Option<String>) -> anyhow::Result<reqwest::Response> {
        let mut builder = self.client.post(self.bulk_create_url()).json(request);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder.send().await?)
    }
}

impl<R: TokenRefresher> TreeImporter for RegistryClient<R> {
    async fn import(&self, request: &ImportRequest) -> anyhow::Result<ImportSummary> {
        let mut resp = self.post(request, self.session.access_token().await).await?;

        // One refresh and one retry on an expired token
        if resp.status() == StatusCode::UNAUTHORIZED {
            log::debug!("Registry returned 401, refreshing access token");
            let token = self.session.refresh().await?;
            resp = self.post(request, Some(token)).await?;
        }

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            anyhow::bail!("registry returned HTTP {}: {}", status, message);
        }
        resp.json::<ImportSummary>()
            .await
            .context("Bad bulk-create response")
    }
}
