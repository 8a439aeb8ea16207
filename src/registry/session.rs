use std::future::Future;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Exchanges a refresh token for a fresh access token.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self, refresh_token: &str) -> impl Future<Output = anyhow::Result<String>> + Send;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
}

/// Refresh against `{base}/auth/token/refresh/`.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTokenRefresher {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/auth/token/refresh/", base_url.trim_end_matches('/')),
        }
    }
}

impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&RefreshRequest { refresh: refresh_token })
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("token refresh rejected with HTTP {}", resp.status());
        }
        let body: RefreshResponse = resp.json().await.context("Bad token refresh response")?;
        Ok(body.access)
    }
}

#[derive(Debug, Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// Credentials for the registry, passed explicitly to whoever makes requests.
#[derive(Debug)]
pub struct Session<R> {
    tokens: RwLock<Tokens>,
    refresher: R,
}

impl<R: TokenRefresher> Session<R> {
    pub fn new(access: Option<String>, refresh: Option<String>, refresher: R) -> Self {
        Self {
            tokens: RwLock::new(Tokens { access, refresh }),
            refresher,
        }
    }

    pub async fn access_token(&self) -> Option<String> {
        self.tokens.read().await.access.clone()
    }

    /// Replace the access token using the refresh token.
    ///
    /// Both tokens are dropped when the refresh fails so the caller has to
    /// sign in again.
    pub async fn refresh(&self) -> anyhow::Result<String> {
        let refresh = self
            .tokens
            .read()
            .await
            .refresh
            .clone()
            .context("No refresh token available")?;

        match self.refresher.refresh(&refresh).await {
            Ok(access) => {
                self.tokens.write().await.access = Some(access.clone());
                log::debug!("Access token refreshed");
                Ok(access)
            }
            Err(e) => {
                *self.tokens.write().await = Tokens::default();
                Err(e.context("Session expired, please sign in again"))
            }
        }
    }

    pub async fn clear(&self) {
        *self.tokens.write().await = Tokens::default();
    }
}
