//! HTTP client used for manifests and metadata.

use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;

use crate::config::ResolverConfig;
use crate::error::{Error, Result};

/// Thin wrapper around `reqwest::Client` with the resolver's timeout and
/// user agent applied.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str, referer: Option<&str>) -> Result<Response> {
        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(header::REFERER, referer);
        }
        let response = request.send().await?;

        let status = response.status();
        if status.is_client_error() && status.as_u16() != 429 {
            return Err(Error::UnresolvableSource(format!(
                "HTTP {} from {}",
                status, url
            )));
        }

        // 5xx and 429 surface as retryable HTTP errors.
        Ok(response.error_for_status()?)
    }

    /// GET a resource as text.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        tracing::debug!(url, "Fetching");
        Ok(self.get(url, None).await?.text().await?)
    }

    /// GET a JSON document.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, referer: Option<&str>) -> Result<T> {
        tracing::debug!(url, "Fetching JSON");
        let body = self.get(url, referer).await?.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::UnresolvableSource(format!("unexpected response from {}: {}", url, e))
        })
    }
}
