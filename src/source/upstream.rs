//! Upstream camera feeds
//!
//! The source only needs three things from a camera: whether it is reachable
//! at all, where its feed lives, and a streamed GET of that feed. Discovery,
//! authentication and health monitoring happen elsewhere; their result reaches
//! [`HttpUpstream`] as a `watch` channel of connectivity.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use tokio::sync::watch;
use url::Url;

use crate::error::{ConfigError, UpstreamError};

use super::config::SourceConfig;

/// Chunks of a feed body
pub type ByteStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

/// A camera feed the source can pull from
pub trait Upstream: Send + Sync + 'static {
    /// Whether the camera is currently reachable
    fn is_connected(&self) -> bool;

    /// Feed location, for logging
    fn feed_url(&self) -> &str;

    /// Start a streamed GET of the feed
    ///
    /// Any non-success status is an error. `read_timeout` bounds the wait
    /// for the response head.
    fn open(
        &self,
        read_timeout: Duration,
    ) -> impl Future<Output = Result<ByteStream, UpstreamError>> + Send;
}

/// Camera topics that carry an MJPEG feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraTopic {
    /// Raw camera image
    Display,
    /// Camera image with the vehicle's own overlay
    Overlay,
}

impl CameraTopic {
    /// Topic name as used in the feed URL
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraTopic::Display => "display_mjpeg",
            CameraTopic::Overlay => "overlay_msg",
        }
    }
}

/// Build the feed URL of a camera's `route` endpoint
///
/// Produces `<base>/route?topic=/<topic>&width=<w>&height=<h>&quality=<q>`.
pub fn feed_url(base: &str, topic: CameraTopic, config: &SourceConfig) -> Result<Url, ConfigError> {
    let base = Url::parse(base)
        .map_err(|e| ConfigError::InvalidFeedUrl(format!("{}: {}", base, e)))?;
    let mut url = base
        .join("route")
        .map_err(|e| ConfigError::InvalidFeedUrl(e.to_string()))?;

    url.set_query(Some(&format!(
        "topic=/{}&width={}&height={}&quality={}",
        topic.as_str(),
        config.width,
        config.height,
        config.quality
    )));

    Ok(url)
}

/// HTTP client options for [`HttpUpstream`]
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Accept self-signed camera certificates
    pub accept_invalid_certs: bool,

    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,

    /// Session cookie obtained by the authentication collaborator
    pub cookie: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            accept_invalid_certs: true,
            connect_timeout: Duration::from_secs(6),
            cookie: None,
        }
    }
}

impl HttpOptions {
    /// Set the session cookie
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Require valid certificates
    pub fn verify_certs(mut self) -> Self {
        self.accept_invalid_certs = false;
        self
    }
}

/// MJPEG feed served over HTTP(S)
pub struct HttpUpstream {
    client: reqwest::Client,
    url: Url,
    connected: watch::Receiver<bool>,
}

impl HttpUpstream {
    /// A feed that is always considered reachable
    pub fn new(url: Url) -> Result<Self, ConfigError> {
        let (_tx, rx) = watch::channel(true);
        Self::with_options(url, HttpOptions::default(), rx)
    }

    /// A feed whose reachability is driven by `connected`
    pub fn with_options(
        url: Url,
        options: HttpOptions,
        connected: watch::Receiver<bool>,
    ) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        if let Some(ref cookie) = options.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| ConfigError::HttpClient(format!("invalid cookie: {}", e)))?;
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .connect_timeout(options.connect_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            url,
            connected,
        })
    }
}

impl Upstream for HttpUpstream {
    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn feed_url(&self) -> &str {
        self.url.as_str()
    }

    async fn open(&self, read_timeout: Duration) -> Result<ByteStream, UpstreamError> {
        let request = self.client.get(self.url.clone()).send();

        let response = tokio::time::timeout(read_timeout, request)
            .await
            .map_err(|_| UpstreamError::Timeout(read_timeout))??
            .error_for_status()?;

        tracing::debug!(
            url = %self.url,
            status = response.status().as_u16(),
            "Feed response received"
        );

        Ok(response.bytes_stream().map_err(UpstreamError::from).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_url() {
        let config = SourceConfig::default().dimensions(640, 480).quality(80);
        let url = feed_url("https://192.168.1.20", CameraTopic::Display, &config).unwrap();

        assert_eq!(
            url.as_str(),
            "https://192.168.1.20/route?topic=/display_mjpeg&width=640&height=480&quality=80"
        );
    }

    #[test]
    fn test_feed_url_overlay_topic() {
        let config = SourceConfig::default();
        let url = feed_url("http://car.local:8080/", CameraTopic::Overlay, &config).unwrap();

        assert_eq!(url.path(), "/route");
        assert!(url.query().unwrap().starts_with("topic=/overlay_msg&"));
    }

    #[test]
    fn test_feed_url_invalid_base() {
        let result = feed_url("not a url", CameraTopic::Display, &SourceConfig::default());
        assert!(matches!(result, Err(ConfigError::InvalidFeedUrl(_))));
    }

    #[tokio::test]
    async fn test_http_upstream_connectivity() {
        let url = Url::parse("http://127.0.0.1:9/feed").unwrap();
        let (tx, rx) = watch::channel(false);
        let upstream = HttpUpstream::with_options(url, HttpOptions::default(), rx).unwrap();

        assert!(!upstream.is_connected());
        tx.send(true).unwrap();
        assert!(upstream.is_connected());
        assert_eq!(upstream.feed_url(), "http://127.0.0.1:9/feed");
    }

    #[tokio::test]
    async fn test_invalid_cookie_rejected() {
        let url = Url::parse("http://127.0.0.1:9/feed").unwrap();
        let (_tx, rx) = watch::channel(true);
        let options = HttpOptions::default().cookie("bad\ncookie");

        let result = HttpUpstream::with_options(url, options, rx);
        assert!(matches!(result, Err(ConfigError::HttpClient(_))));
    }
}
