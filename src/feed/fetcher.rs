use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors from a single feed download.
///
/// Both kinds are recoverable: the crawler skips the source for this pass.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection establishment or body read exceeded its deadline.
    #[error("Request timed out")]
    Timeout,
    /// Anything else between us and a 2xx body: DNS, TLS, socket, bad URI,
    /// non-success status, exhausted redirects, oversized body.
    #[error("Transport error: {detail}")]
    Transport { detail: String },
}

impl FetchError {
    pub fn transport(detail: impl Into<String>) -> Self {
        FetchError::Transport {
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::transport(err.to_string())
        }
    }
}

/// Timeouts and identity used for every request of a run.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            user_agent: concat!("engblogs/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Cache validators a server sent with the last full response of a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Result of a conditional GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Full body, with whatever validators came back alongside it.
    Fetched { body: Vec<u8>, validators: Validators },
    /// 304: the feed has not changed since the validators were issued.
    NotModified,
}

/// Downloads one feed body. Implementations must not retry.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// GET that sends `If-None-Match` / `If-Modified-Since` when validators
    /// are known. Fetchers without HTTP caching always return the full body.
    async fn fetch_conditional(
        &self,
        url: &str,
        _validators: &Validators,
    ) -> Result<FetchOutcome, FetchError> {
        let body = self.fetch(url).await?;
        Ok(FetchOutcome::Fetched {
            body,
            validators: Validators::default(),
        })
    }
}

/// [`Fetcher`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    read_timeout: Duration,
}

impl HttpFetcher {
    /// Builds the client with the connect timeout baked in; the read timeout
    /// is applied per request around the send and the whole body read.
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| FetchError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            read_timeout: settings.read_timeout,
        })
    }

    async fn get(&self, url: &str, validators: &Validators) -> Result<FetchOutcome, FetchError> {
        let mut request = self.client.get(url);
        if let Some(etag) = &validators.etag {
            request = request.header(header::IF_NONE_MATCH, etag.as_str());
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(header::IF_MODIFIED_SINCE, last_modified.as_str());
        }

        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(FetchError::transport(format!("HTTP status {}", status.as_u16())));
        }

        let validators = Validators {
            etag: header_value(&response, header::ETAG),
            last_modified: header_value(&response, header::LAST_MODIFIED),
        };
        let body = read_limited_bytes(response, MAX_FEED_SIZE).await?;
        Ok(FetchOutcome::Fetched { body, validators })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        match self.fetch_conditional(url, &Validators::default()).await? {
            FetchOutcome::Fetched { body, .. } => Ok(body),
            // Only possible if a server answers 304 to an unconditional GET
            FetchOutcome::NotModified => Err(FetchError::transport("unexpected 304 Not Modified")),
        }
    }

    async fn fetch_conditional(
        &self,
        url: &str,
        validators: &Validators,
    ) -> Result<FetchOutcome, FetchError> {
        tokio::time::timeout(self.read_timeout, self.get(url, validators))
            .await
            .map_err(|_| FetchError::Timeout)?
    }
}

fn header_value(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::transport(format!(
                "response too large: {len} bytes"
            )));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::transport("response too large"));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::transport(format!(
                "incomplete response: expected {expected} bytes, received {}",
                bytes.len()
            )));
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher_with(read_timeout: Duration) -> HttpFetcher {
        HttpFetcher::new(&FetchSettings {
            read_timeout,
            ..FetchSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .mount(&mock_server)
            .await;

        let fetcher = fetcher_with(Duration::from_secs(5));
        let body = fetcher
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(body, b"<rss/>");
    }

    #[tokio::test]
    async fn test_sends_user_agent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "test-agent/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(&FetchSettings {
            user_agent: "test-agent/1.0".to_string(),
            ..FetchSettings::default()
        })
        .unwrap();
        assert!(fetcher.fetch(&mock_server.uri()).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_success_status_is_transport_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1) // no retries
            .mount(&mock_server)
            .await;

        let err = fetcher_with(Duration::from_secs(5))
            .fetch(&mock_server.uri())
            .await
            .unwrap_err();
        match err {
            FetchError::Transport { detail } => assert!(detail.contains("404")),
            e => panic!("Expected Transport error, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fetcher_with(Duration::from_secs(5))
            .fetch(&mock_server.uri())
            .await;
        assert!(matches!(result, Err(FetchError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<rss/>")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let err = fetcher_with(Duration::from_millis(200))
            .fetch(&mock_server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout), "{err:?}");
    }

    #[tokio::test]
    async fn test_malformed_uri_is_transport_error() {
        let err = fetcher_with(Duration::from_secs(5))
            .fetch("not a url at all")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop to get a port nobody is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher_with(Duration::from_secs(5))
            .fetch(&format!("http://{addr}/feed"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_connect_timeout_is_timeout_error() {
        // Non-routable address: the SYN is never answered
        let fetcher = HttpFetcher::new(&FetchSettings {
            connect_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_secs(10),
            ..FetchSettings::default()
        })
        .unwrap();

        let started = Instant::now();
        let err = fetcher.fetch("http://10.255.255.1:81/feed").await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_secs(5), "connect took {elapsed:?}");
        // A sandbox without any route rejects the connect immediately instead
        if elapsed >= Duration::from_millis(150) {
            assert!(matches!(err, FetchError::Timeout), "{err:?}");
        }
    }

    #[tokio::test]
    async fn test_full_response_returns_validators() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"v1\"")
                    .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")
                    .set_body_string("<rss/>"),
            )
            .mount(&mock_server)
            .await;

        let outcome = fetcher_with(Duration::from_secs(5))
            .fetch_conditional(&mock_server.uri(), &Validators::default())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Fetched {
                body: b"<rss/>".to_vec(),
                validators: Validators {
                    etag: Some("\"v1\"".to_string()),
                    last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".to_string()),
                },
            }
        );
    }

    #[tokio::test]
    async fn test_conditional_get_sends_validators_and_maps_304() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("if-none-match", "\"v1\""))
            .and(header("if-modified-since", "Wed, 21 Oct 2015 07:28:00 GMT"))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&mock_server)
            .await;

        let validators = Validators {
            etag: Some("\"v1\"".to_string()),
            last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".to_string()),
        };
        let outcome = fetcher_with(Duration::from_secs(5))
            .fetch_conditional(&mock_server.uri(), &validators)
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::NotModified);
    }

    #[tokio::test]
    async fn test_unconditional_get_sends_no_validators() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists("if-none-match"))
            .respond_with(ResponseTemplate::new(304))
            .with_priority(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
            .mount(&mock_server)
            .await;

        let body = fetcher_with(Duration::from_secs(5))
            .fetch(&mock_server.uri())
            .await
            .unwrap();
        assert_eq!(body, b"fresh");
    }
}
