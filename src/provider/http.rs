//! JSON-over-HTTP cloud provider client.
//!
//! Speaks a plain REST dialect: `POST /resources/{kind}` to create,
//! `GET`/`PUT`/`DELETE /resources/{kind}/{id}` for the rest, and
//! `PUT /resources/{kind}/{id}/tags` for tagging. Responses are classified
//! into transient and terminal provider errors; retries are the engine's
//! job, not the client's.

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::ResourceKind;
use crate::error::{ProviderError, Result, StratusError};

use super::api::{Attributes, CloudProvider};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP cloud provider client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Base URL of the provider API.
    base_url: String,
    /// Bearer token.
    token: String,
}

/// Response body for create requests.
#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

/// Response body for read requests.
#[derive(Debug, Deserialize)]
struct ReadResponse {
    #[serde(default)]
    attributes: Attributes,
}

impl HttpProvider {
    /// Creates a new HTTP provider client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Builds the collection URL for a kind.
    fn collection_url(&self, kind: ResourceKind) -> String {
        format!("{}/resources/{kind}", self.base_url)
    }

    /// Builds the URL for a single remote resource.
    fn resource_url(&self, kind: ResourceKind, remote_id: &str) -> String {
        format!("{}/resources/{kind}/{remote_id}", self.base_url)
    }

    /// Sends a request with auth headers attached.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        request
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StratusError::Provider(ProviderError::Timeout {
                        operation: String::from("http request"),
                        timeout_secs: DEFAULT_TIMEOUT_SECS,
                    })
                } else {
                    ProviderError::unavailable(format!("Request failed: {e}")).into()
                }
            })
    }

    /// Classifies a non-success response into a provider error.
    async fn classify_error(response: Response) -> StratusError {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return StratusError::Provider(ProviderError::Throttled {
                retry_after_secs: retry_after,
            });
        }

        if status == StatusCode::UNAUTHORIZED {
            return StratusError::Provider(ProviderError::AuthenticationFailed {
                message: String::from("Invalid API token"),
            });
        }

        if status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return StratusError::Provider(ProviderError::PermissionDenied { message: body });
        }

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return StratusError::Provider(ProviderError::InvalidAttribute { message: body });
        }

        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return ProviderError::unavailable(format!("{status}: {body}")).into();
        }

        let body = response.text().await.unwrap_or_default();
        ProviderError::api_error(status.as_u16(), body).into()
    }
}

#[async_trait]
impl CloudProvider for HttpProvider {
    async fn create(&self, kind: ResourceKind, attributes: &Attributes) -> Result<String> {
        debug!("Creating {kind} via provider API");
        trace!("Create payload: {attributes:?}");

        let url = self.collection_url(kind);
        let response = self
            .send(self.client.post(&url).json(&serde_json::json!({ "attributes": attributes })))
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }

        let body: CreateResponse = response.json().await.map_err(|e| {
            StratusError::Provider(ProviderError::InvalidResponse {
                message: format!("Failed to parse create response: {e}"),
            })
        })?;

        debug!("Created {kind} with remote id {}", body.id);
        Ok(body.id)
    }

    async fn read(&self, kind: ResourceKind, remote_id: &str) -> Result<Option<Attributes>> {
        trace!("Reading {kind} {remote_id}");

        let url = self.resource_url(kind, remote_id);
        let response = self.send(self.client.get(&url)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }

        let body: ReadResponse = response.json().await.map_err(|e| {
            StratusError::Provider(ProviderError::InvalidResponse {
                message: format!("Failed to parse read response: {e}"),
            })
        })?;

        Ok(Some(body.attributes))
    }

    async fn update(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        debug!("Updating {kind} {remote_id}");

        let url = self.resource_url(kind, remote_id);
        let response = self
            .send(self.client.put(&url).json(&serde_json::json!({ "attributes": attributes })))
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> Result<()> {
        debug!("Deleting {kind} {remote_id}");

        let url = self.resource_url(kind, remote_id);
        let response = self.send(self.client.delete(&url)).await?;

        // Already gone counts as deleted
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }
        Ok(())
    }

    async fn tag(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        trace!("Tagging {kind} {remote_id}");

        let url = format!("{}/tags", self.resource_url(kind, remote_id));
        let response = self
            .send(self.client.put(&url).json(&serde_json::json!({ "tags": tags })))
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn attrs(pairs: &[(&str, serde_json::Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_returns_remote_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resources/network"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "net-123" })))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "test-token").expect("client");
        let remote_id = provider
            .create(ResourceKind::Network, &attrs(&[("cidr", json!("10.0.0.0/16"))]))
            .await
            .expect("create should succeed");

        assert_eq!(remote_id, "net-123");
    }

    #[tokio::test]
    async fn test_read_missing_resource_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/instance/i-404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "t").expect("client");
        let observed = provider
            .read(ResourceKind::Instance, "i-404")
            .await
            .expect("read should succeed");

        assert!(observed.is_none());
    }

    #[tokio::test]
    async fn test_read_returns_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/network/net-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "net-1",
                "attributes": { "cidr": "10.0.0.0/16" }
            })))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "t").expect("client");
        let observed = provider
            .read(ResourceKind::Network, "net-1")
            .await
            .expect("read should succeed")
            .expect("resource should exist");

        assert_eq!(observed.get("cidr"), Some(&json!("10.0.0.0/16")));
    }

    #[tokio::test]
    async fn test_throttling_maps_to_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resources/network"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "t").expect("client");
        let err = provider
            .create(ResourceKind::Network, &Attributes::new())
            .await
            .expect_err("should be throttled");

        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(7));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_transient() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/resources/database/db-1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "t").expect("client");
        let err = provider
            .delete(ResourceKind::Database, "db-1")
            .await
            .expect_err("should fail");

        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_validation_error_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resources/database"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad engine"))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "t").expect("client");
        let err = provider
            .create(ResourceKind::Database, &Attributes::new())
            .await
            .expect_err("should fail");

        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad engine"));
    }

    #[tokio::test]
    async fn test_auth_failure_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/network/net-1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "bad-token").expect("client");
        let err = provider
            .read(ResourceKind::Network, "net-1")
            .await
            .expect_err("should fail");

        assert!(!err.is_retryable());
        assert!(err.to_string().contains("authentication"));
    }

    #[tokio::test]
    async fn test_delete_missing_resource_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/resources/subnet/s-gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = HttpProvider::new(&server.uri(), "t").expect("client");
        assert!(provider.delete(ResourceKind::Subnet, "s-gone").await.is_ok());
    }
}
