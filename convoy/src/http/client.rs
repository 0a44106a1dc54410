//! HTTP client implementation

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::errors::ReconcileError;

/// HTTP client for the control plane REST API
pub struct HttpClient {
    client: Client,
    base_url: Url,
    token: Option<SecretString>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ReconcileError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ReconcileError::Configuration(format!("invalid control plane URL '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ReconcileError::Configuration(format!(
                "control plane URL '{}' cannot be used as a base",
                base_url
            )));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Build an endpoint URL below the base, percent-encoding every segment
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ReconcileError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ReconcileError::Configuration(format!(
                    "control plane URL '{}' cannot be used as a base",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Make a GET request. A 404 is reported as `None`.
    pub async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, ReconcileError> {
        debug!("GET {}", url);

        let response = self.authorize(self.client.get(url.clone())).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_status("GET", &url, response).await?;
        Ok(Some(response.json().await?))
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, ReconcileError> {
        debug!("POST {}", url);

        let response = self
            .authorize(self.client.post(url.clone()).json(body))
            .send()
            .await?;

        let response = check_status("POST", &url, response).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request whose success body, if any, is ignored
    pub async fn post_no_content<B: Serialize>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<(), ReconcileError> {
        debug!("POST {}", url);

        let response = self
            .authorize(self.client.post(url.clone()).json(body))
            .send()
            .await?;

        check_status("POST", &url, response).await?;
        Ok(())
    }

    /// Make a PATCH request
    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, ReconcileError> {
        debug!("PATCH {}", url);

        let response = self
            .authorize(self.client.patch(url.clone()).json(body))
            .send()
            .await?;

        let response = check_status("PATCH", &url, response).await?;
        Ok(response.json().await?)
    }
}

async fn check_status(method: &str, url: &Url, response: Response) -> Result<Response, ReconcileError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!("HTTP {} {} failed: {} - {}", method, url, status, body);
    Err(classify_status(status, &body))
}

/// Map a non-success status to the reconciler error taxonomy
pub fn classify_status(status: StatusCode, body: &str) -> ReconcileError {
    let detail = format!("{}: {}", status, body);
    match status {
        StatusCode::CONFLICT => ReconcileError::Conflict(detail),
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT
        | StatusCode::INTERNAL_SERVER_ERROR => ReconcileError::TransientControlPlane(detail),
        _ => ReconcileError::ControlPlane(detail),
    }
}
