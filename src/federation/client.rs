//! Outbound HTTP
//!
//! The federation core never talks to the network directly; it goes through
//! [`HttpClient`] so that discovery, key fetches and deliveries can be run
//! against any transport (and against fakes in tests).

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::HttpConfig;
use crate::error::FederationError;

/// Status and body of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Minimal HTTP surface used for federation
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GET `url` with query parameters and request headers
    async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, FederationError>;

    /// POST `body` to `url` with request headers
    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, FederationError>;

    /// Addresses `host` resolves to, consulted before fetching remote keys
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<IpAddr>, FederationError> {
        let addresses = tokio::net::lookup_host((host, port)).await.map_err(|e| {
            FederationError::Federation(format!("Failed to resolve actor host: {}", e))
        })?;

        Ok(addresses.map(|address| address.ip()).collect())
    }
}

#[async_trait]
impl HttpClient for reqwest::Client {
    async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, FederationError> {
        let mut request = reqwest::Client::get(self, url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse { status, body })
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, FederationError> {
        let mut request = reqwest::Client::post(self, url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.body(body).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse { status, body })
    }
}

/// Build the federation HTTP client from configuration
pub fn build_http_client(config: &HttpConfig) -> Result<reqwest::Client, FederationError> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .map_err(FederationError::HttpClient)
}
