//! URL shortener adapter
//!
//! Replies that link back to an initiative run its URL through a
//! shortening service first. Shortening is best-effort: any failure
//! falls back to the long URL.

use async_trait::async_trait;
use convoca_domain::UrlShortener;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortener speaking the common POST-JSON shortening contract
pub struct HttpShortener {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpShortener {
    pub fn new(endpoint: String, api_key: Option<SecretString>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            endpoint,
            api_key,
        }
    }

    async fn try_shorten(&self, url: &str) -> Result<String, reqwest::Error> {
        let mut request = self.client.post(&self.endpoint).json(&ShortenRequest {
            long_url: url.to_string(),
        });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = request.send().await?.error_for_status()?;
        let body: ShortenResponse = response.json().await?;
        Ok(body.short_url)
    }
}

#[derive(Serialize)]
struct ShortenRequest {
    long_url: String,
}

#[derive(Deserialize)]
struct ShortenResponse {
    short_url: String,
}

#[async_trait]
impl UrlShortener for HttpShortener {
    async fn shorten(&self, url: &str) -> String {
        match self.try_shorten(url).await {
            Ok(short) => short,
            Err(error) => {
                tracing::error!(url = %url, error = %error, "URL shortening failed, using the long URL");
                url.to_string()
            }
        }
    }
}

/// Shortener used when the feature is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoShortener;

#[async_trait]
impl UrlShortener for NoShortener {
    async fn shorten(&self, url: &str) -> String {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_shorten_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/shorten"))
            .and(body_json(serde_json::json!({
                "long_url": "https://example.org/cityvoices"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "short_url": "https://sho.rt/abc"
            })))
            .mount(&server)
            .await;

        let shortener = HttpShortener::new(format!("{}/shorten", server.uri()), None);
        let short = shortener.shorten("https://example.org/cityvoices").await;
        assert_eq!(short, "https://sho.rt/abc");
    }

    #[tokio::test]
    async fn test_shorten_failure_falls_back_to_long_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/shorten"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let shortener = HttpShortener::new(format!("{}/shorten", server.uri()), None);
        let short = shortener.shorten("https://example.org/cityvoices").await;
        assert_eq!(short, "https://example.org/cityvoices");
    }

    #[tokio::test]
    async fn test_no_shortener_passes_through() {
        let short = NoShortener.shorten("https://example.org/x").await;
        assert_eq!(short, "https://example.org/x");
    }
}
