//! HTTP implementation of the remote capabilities.
//!
//! Wire format:
//! - `POST {base}/uploads` `{"filename"}` -> `{"url","key"}`
//! - `PUT <url>` with the raw payload
//! - `PUT {base}/recordings/{id}` with the metadata document
//! - `DELETE {base}/recordings/{id}?key=<key>`
//! - `GET {base}/recordings?status=synced`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use super::{MetadataStore, ObjectStore, Reachability, RemoteError};
use crate::domain::{Payload, RecordingMetadata, UploadTarget};

#[derive(Debug, Serialize)]
struct UploadTargetRequest<'a> {
    filename: &'a str,
}

/// Map a reqwest failure onto the remote error taxonomy
fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_decode() {
        // A 2xx with a body we cannot read is the server's fault.
        return RemoteError::Server {
            status: StatusCode::BAD_GATEWAY.as_u16(),
            message: err.to_string(),
        };
    }
    match err.status() {
        Some(status) => RemoteError::Server {
            status: status.as_u16(),
            message: err.to_string(),
        },
        None => RemoteError::Network(err.to_string()),
    }
}

/// Turn a non-success response into a server error
async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.trim().to_string()
    };

    Err(RemoteError::Server {
        status: status.as_u16(),
        message,
    })
}

/// Whether a delete response means the remote copy is gone
fn delete_confirmed(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::NOT_FOUND || status == StatusCode::GONE
}

/// Metadata API client
pub struct HttpMetadataStore {
    base_url: String,
    client: Client,
}

impl HttpMetadataStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Build API URL
    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl MetadataStore for HttpMetadataStore {
    async fn request_upload_target(&self, filename: &str) -> Result<UploadTarget, RemoteError> {
        let response = self
            .client
            .post(self.api_url("uploads"))
            .json(&UploadTargetRequest { filename })
            .send()
            .await
            .map_err(transport_error)?;

        let target: UploadTarget = check_status(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;

        debug!(key = %target.key, "Received upload target");
        Ok(target)
    }

    async fn commit_metadata(&self, metadata: &RecordingMetadata) -> Result<(), RemoteError> {
        let response = self
            .client
            .put(self.api_url(&format!("recordings/{}", metadata.id)))
            .json(metadata)
            .send()
            .await
            .map_err(transport_error)?;

        check_status(response).await?;
        Ok(())
    }

    async fn delete_remote(&self, key: Option<&str>, id: &str) -> bool {
        let mut request = self.client.delete(self.api_url(&format!("recordings/{}", id)));
        if let Some(key) = key {
            request = request.query(&[("key", key)]);
        }

        match request.send().await {
            Ok(response) if delete_confirmed(response.status()) => true,
            Ok(response) => {
                warn!(%id, status = response.status().as_u16(), "Remote delete rejected");
                false
            }
            Err(e) => {
                warn!(%id, error = %e, "Remote delete failed");
                false
            }
        }
    }

    async fn list_synced(&self) -> Result<Vec<RecordingMetadata>, RemoteError> {
        let response = self
            .client
            .get(self.api_url("recordings"))
            .query(&[("status", "synced")])
            .send()
            .await
            .map_err(transport_error)?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(transport_error)
    }
}

/// Direct object upload to a pre-authorized URL
pub struct HttpObjectStore {
    client: Client,
}

impl Default for HttpObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpObjectStore {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put_object(&self, url: &str, payload: &Payload) -> Result<(), RemoteError> {
        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, payload.content_type.as_str())
            .body(payload.bytes.clone())
            .send()
            .await
            .map_err(transport_error)?;

        check_status(response).await?;
        Ok(())
    }
}

/// Reachability check against a trivial endpoint
pub struct HttpProbe {
    url: String,
    timeout: Duration,
    client: Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Reachability for HttpProbe {
    async fn probe(&self) -> bool {
        // Any response at all means a server is reachable.
        match self.client.get(&self.url).timeout(self.timeout).send().await {
            Ok(response) => {
                debug!(status = response.status().as_u16(), "Probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "Probe failed");
                false
            }
        }
    }
}
