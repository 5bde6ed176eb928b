use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.massive.com";

const API_KEY_ENV: &str = "MASSIVE_API_KEY";
const BASE_URL_ENV: &str = "MASSIVE_BASE_URL";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Read the API key from the environment, failing fast when it is missing
/// so the process never starts serving half-configured.
pub fn ensure_api_key() -> Result<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .with_context(|| format!("{API_KEY_ENV} must be set in the environment"))
}

/// Thin GET client for the Massive REST API. The API key is appended as the
/// `apiKey` query parameter on every request unless the caller already
/// supplied one.
#[derive(Clone)]
pub struct MassiveClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl MassiveClient {
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(&base_url, ensure_api_key()?)
    }

    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid Massive base URL: {base_url}"))?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// GET `path` with the given query parameters and decode the JSON body.
    /// A non-2xx status is an error.
    pub async fn get(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let mut url = self.base_url.clone();
        url.set_path(path);
        debug!("GET {url}");

        let mut request = self.http.get(url).query(params);
        if !params.iter().any(|(key, _)| key == "apiKey") {
            request = request.query(&[("apiKey", self.api_key.as_str())]);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?
            .error_for_status()
            .with_context(|| format!("request to {path} returned an error status"))?;
        response
            .json()
            .await
            .with_context(|| format!("response from {path} was not valid JSON"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_base_urls() {
        assert!(MassiveClient::new("not a url", "key").is_err());
        assert!(MassiveClient::new("https://api.massive.com", "key").is_ok());
    }
}
