//! HTTP requests against managed instances.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use crate::{Error, Result};

/// Status code and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub code: u16,
    pub body: String,
}

/// Minimal HTTP surface the manager consumes.
///
/// A transport failure is an `Err`; any received response, whatever its
/// status code, is `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, authorization: Option<&str>) -> Result<HttpResponse>;

    async fn delete(&self, url: &str, authorization: Option<&str>) -> Result<HttpResponse>;

    /// Sends `body` as JSON.
    async fn put(&self, url: &str, body: &str, authorization: Option<&str>) -> Result<HttpResponse>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Builds a client with a per-request timeout. Certificates are not
    /// verified, since test clusters run with self-signed keys.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { client })
    }

    async fn send(&self, request: reqwest::RequestBuilder, authorization: Option<&str>) -> Result<HttpResponse> {
        let request = match authorization {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        };
        let response = request.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let code = response.status().as_u16();
        let body = response.text().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(HttpResponse { code, body })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, authorization: Option<&str>) -> Result<HttpResponse> {
        self.send(self.client.get(url), authorization).await
    }

    async fn delete(&self, url: &str, authorization: Option<&str>) -> Result<HttpResponse> {
        self.send(self.client.delete(url), authorization).await
    }

    async fn put(&self, url: &str, body: &str, authorization: Option<&str>) -> Result<HttpResponse> {
        let request = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string());
        self.send(request, authorization).await
    }
}
