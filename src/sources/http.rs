use reqwest::redirect::Policy;
use reqwest::Client;
use std::error::Error as _;
use std::time::Duration;
use tracing::{debug, info};

use super::secret_source::SecretSource;
use crate::config::SourceConfig;
use crate::error::{Result, RotationError};

const MAX_REDIRECTS: usize = 10;

/// Fetches salts from the WordPress.org secret-key service (or a compatible endpoint)
#[derive(Clone)]
pub struct HttpSource {
    client: Client,
    url: String,
}

impl HttpSource {
    /// Create a new HTTP source
    ///
    /// Fails with `NetworkUnavailable` when the HTTP client (TLS backend included)
    /// cannot be initialised.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("wp-salt-rotator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RotationError::NetworkUnavailable(describe(&e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait::async_trait]
impl SecretSource for HttpSource {
    async fn fetch(&self) -> Result<String> {
        debug!("Fetching salts from: {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RotationError::Transport(describe(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RotationError::HttpStatus(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RotationError::Transport(describe(&e)))?;

        info!("Fetched {} bytes from {}", body.len(), self.url);
        Ok(body)
    }

    fn source_type(&self) -> &'static str {
        "HTTP"
    }
}

/// reqwest's top-level message hides the cause (refused, timed out, dns); walk the chain
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(url: String) -> SourceConfig {
        SourceConfig {
            url,
            connect_timeout_seconds: 2,
            timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/secret-key/1.1/salt/")
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body("define('AUTH_KEY', 'x');\n")
            .create_async()
            .await;

        let source =
            HttpSource::new(&config_for(format!("{}/secret-key/1.1/salt/", server.url()))).unwrap();
        let body = source.fetch().await.unwrap();

        assert_eq!(body, "define('AUTH_KEY', 'x');\n");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_follows_redirects() {
        let mut server = mockito::Server::new_async().await;
        let new_location = format!("{}/new", server.url());
        let moved = server
            .mock("GET", "/old")
            .with_status(301)
            .with_header("location", &new_location)
            .create_async()
            .await;
        let target = server
            .mock("GET", "/new")
            .with_status(200)
            .with_body("redirected")
            .create_async()
            .await;

        let source = HttpSource::new(&config_for(format!("{}/old", server.url()))).unwrap();
        assert_eq!(source.fetch().await.unwrap(), "redirected");

        moved.assert_async().await;
        target.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let source = HttpSource::new(&config_for(format!("{}/", server.url()))).unwrap();
        match source.fetch().await {
            Err(RotationError::HttpStatus(code)) => assert_eq!(code, 503),
            other => panic!("expected HttpStatus, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Port 1 (tcpmux) is not listening on any sane test host
        let source = HttpSource::new(&config_for("http://127.0.0.1:1/".to_string())).unwrap();
        assert!(matches!(
            source.fetch().await,
            Err(RotationError::Transport(_))
        ));
    }

    #[test]
    fn test_source_type() {
        let source = HttpSource::new(&SourceConfig::default()).unwrap();
        assert_eq!(source.source_type(), "HTTP");
        assert_eq!(source.url, "https://api.wordpress.org/secret-key/1.1/salt/");
    }
}
