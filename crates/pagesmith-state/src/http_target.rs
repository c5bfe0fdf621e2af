//! Remote hosting target over HTTP
//!
//! Speaks a small content-addressed protocol against `endpoint`:
//!
//! - `HEAD /blobs/{digest}` / `PUT /blobs/{digest}`: file content
//! - `PUT /bundles/{id}`: manifest JSON, returns `{"bundle_id"}`
//! - `PUT /live` with `{"bundle_id", "note"}`: returns `{"url"}`
//! - `GET /live`, `GET /live/history`
//!
//! Blobs already present remotely are skipped, so re-publishing an unchanged
//! site only uploads the manifest.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StateError;
use crate::storage_traits::{BundleId, BundleManifest, HostingTarget, LiveRecord, StateResult};

#[derive(Debug, Deserialize)]
struct BundleAccepted {
    bundle_id: BundleId,
}

#[derive(Debug, Serialize)]
struct SetLiveRequest<'a> {
    bundle_id: &'a BundleId,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SetLiveResponse {
    url: String,
}

/// HTTP hosting client
pub struct HttpHostingTarget {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpHostingTarget {
    /// Create a client for `endpoint` (trailing slash optional).
    pub fn new(endpoint: &str) -> StateResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("pagesmith/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StateError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(HttpHostingTarget {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    async fn check(response: reqwest::Response) -> StateResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.to_string()
        } else {
            body
        };
        Err(StateError::from_status(status.as_u16(), message))
    }

    async fn blob_exists(&self, digest: &str) -> StateResult<bool> {
        let response = self
            .http_client
            .head(self.url(&format!("blobs/{digest}")))
            .send()
            .await?;
        match response.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            status => Err(StateError::from_status(status, format!("HEAD blob {digest}"))),
        }
    }
}

#[async_trait]
impl HostingTarget for HttpHostingTarget {
    async fn upload_bundle(
        &self,
        manifest: &BundleManifest,
        source: &Path,
    ) -> StateResult<BundleId> {
        manifest.validate()?;
        let bundle = manifest.bundle_id()?;

        let mut uploaded = 0usize;
        for file in &manifest.files {
            if self.blob_exists(file.digest.as_str()).await? {
                continue;
            }
            let data = tokio::fs::read(source.join(&file.path)).await?;
            let response = self
                .http_client
                .put(self.url(&format!("blobs/{}", file.digest)))
                .body(data)
                .send()
                .await?;
            Self::check(response).await?;
            uploaded += 1;
        }

        let response = self
            .http_client
            .put(self.url(&format!("bundles/{bundle}")))
            .json(manifest)
            .send()
            .await?;
        let accepted: BundleAccepted = Self::check(response).await?.json().await?;
        if accepted.bundle_id != bundle {
            return Err(StateError::Corrupt(format!(
                "server acknowledged bundle {} but {} was uploaded",
                accepted.bundle_id.short(),
                bundle.short()
            )));
        }

        debug!(
            bundle = %bundle.short(),
            uploaded,
            skipped = manifest.len() - uploaded,
            "bundle uploaded"
        );
        Ok(bundle)
    }

    async fn set_live(&self, bundle: &BundleId, note: Option<String>) -> StateResult<String> {
        let request = SetLiveRequest {
            bundle_id: bundle,
            note: note.as_deref(),
        };
        let response = self
            .http_client
            .put(self.url("live"))
            .json(&request)
            .send()
            .await?;
        let accepted: SetLiveResponse = Self::check(response).await?.json().await?;
        info!(bundle = %bundle.short(), url = %accepted.url, "live slot repointed");
        Ok(accepted.url)
    }

    async fn live(&self) -> StateResult<Option<LiveRecord>> {
        let response = self.http_client.get(self.url("live")).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::check(response).await?.json().await?))
    }

    async fn history(&self) -> StateResult<Vec<LiveRecord>> {
        let response = self
            .http_client
            .get(self.url("live/history"))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
